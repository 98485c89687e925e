//! Integration tests: stage → commit → read → compile.
//!
//! Covers the full path a ticket takes through the store:
//!   - A workflow lifecycle committed over several packs
//!   - Comment edits, labels, assignee and checklists surviving a reload
//!   - A linear history replays in commit order whatever the timestamps
//!   - Identities stored as full records read back as stubs and resolve

use std::collections::BTreeMap;

use ticket_core::checklist::{Checklist, ChecklistQuestion, ChecklistSection, ChecklistState};
use ticket_core::identity::{IdentityRecord, RepoResolver};
use ticket_core::label::Label;
use ticket_core::operation::OpType;
use ticket_core::repository::Repository;
use ticket_core::repository::memory::MemRepository;
use ticket_core::status::Status;
use ticket_core::ticket::local_ref;
use ticket_core::workflow::NoHooks;
use ticket_core::{Identity, Settings, Ticket};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ren() -> Identity {
    Identity::bare("Ren", "ren@example.com")
}

fn ada() -> Identity {
    Identity::bare("Ada", "ada@example.com")
}

fn checklist(states: &[ChecklistState]) -> Checklist {
    Checklist {
        label: Label::from("checklist:code"),
        title: "Code review".to_string(),
        sections: vec![ChecklistSection {
            title: "Basics".to_string(),
            questions: states
                .iter()
                .enumerate()
                .map(|(i, s)| ChecklistQuestion {
                    question: format!("Question {i}?"),
                    comment: String::new(),
                    state: *s,
                })
                .collect(),
        }],
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn lifecycle_survives_reload() {
    let repo = MemRepository::new();
    let settings = Settings::builtin();
    let eng = Label::from("workflow:eng");

    let mut ticket =
        Ticket::create(&settings, ren(), 100, "Crash on start", "Seen on 1.2", Some(&eng))
            .expect("create");
    ticket.commit(&repo).expect("commit create");
    let id = ticket.id().expect("id");

    let mut ticket = Ticket::read_local(&repo, &id).expect("read");
    let comment = ticket.add_comment(ada(), 110, "Repro attached").expect("comment");
    ticket
        .set_status(&settings, &NoHooks, ren(), 120, Status::Vetted)
        .expect("vetted");
    ticket
        .set_status(&settings, &NoHooks, ren(), 130, Status::InProgress)
        .expect("in progress");
    ticket.commit(&repo).expect("commit second pack");

    let mut ticket = Ticket::read_local(&repo, &id).expect("read");
    ticket
        .edit_comment(ada(), 140, comment.clone(), "Repro attached, see log")
        .expect("edit");
    ticket
        .label_change(ren(), 150, &[Label::from("bug"), Label::from("checklist:code")], &[])
        .expect("labels");
    ticket.set_assignee(ren(), 160, ada()).expect("assign");
    ticket
        .set_checklist(ada(), 170, checklist(&[ChecklistState::Passed]))
        .expect("checklist");
    ticket.commit(&repo).expect("commit third pack");

    let reloaded = Ticket::read_local(&repo, &id).expect("reload");
    assert_eq!(reloaded.packs().len(), 3);
    let snap = reloaded.compile();

    assert_eq!(snap.id, Some(id));
    assert_eq!(snap.title, "Crash on start");
    assert_eq!(snap.status, Status::InProgress);
    assert_eq!(
        snap.labels,
        vec![
            Label::from("bug"),
            Label::from("checklist:code"),
            Label::from("workflow:eng"),
        ]
    );
    assert_eq!(snap.assignee, Some(ada()));
    assert_eq!(snap.comments.len(), 2);
    assert_eq!(snap.comments[1].id, comment);
    assert_eq!(snap.comments[1].message, "Repro attached, see log");
    assert_eq!(snap.participants, vec![ren(), ada()]);
    assert_eq!(
        snap.checklist_compound_states()[&Label::from("checklist:code")],
        ChecklistState::Passed
    );
    assert_eq!(
        snap.next_states(&settings.workflows).expect("next"),
        vec![Status::InReview]
    );
}

#[test]
fn illegal_transition_leaves_nothing_staged() {
    let settings = Settings::builtin();
    let mut ticket = Ticket::create(
        &settings,
        ren(),
        100,
        "Title",
        "",
        Some(&Label::from("workflow:default")),
    )
    .expect("create");
    let before = ticket.operations().len();

    assert!(ticket
        .set_status(&settings, &NoHooks, ren(), 110, Status::Merged)
        .is_err());
    assert_eq!(ticket.operations().len(), before);
}

// ---------------------------------------------------------------------------
// Replay order
// ---------------------------------------------------------------------------

#[test]
fn linear_history_replays_in_commit_order_despite_clock_skew() {
    let repo = MemRepository::new();
    let settings = Settings::builtin();
    let mut ticket = Ticket::create(&settings, ren(), 100, "First", "", None).expect("create");
    ticket.commit(&repo).expect("commit");

    // The second author's clock is behind the first.
    ticket.set_title(ren(), 300, "Second").expect("title");
    ticket.commit(&repo).expect("commit");
    ticket.set_title(ada(), 200, "Third").expect("title");
    ticket.commit(&repo).expect("commit");

    let id = ticket.id().expect("id");
    let snap = Ticket::read_local(&repo, &id).expect("read").compile();
    let kinds: Vec<OpType> = snap.operations.iter().map(|op| op.op_type()).collect();
    assert_eq!(kinds, [OpType::Create, OpType::SetTitle, OpType::SetTitle]);
    assert_eq!(snap.operations[1].unix_time, 300);
    assert_eq!(snap.title, "Third");
}

#[test]
fn replay_is_identical_across_reads() {
    let repo = MemRepository::new();
    let settings = Settings::builtin();
    let mut ticket = Ticket::create(&settings, ren(), 100, "Title", "Body", None).expect("create");
    for t in 0..5 {
        ticket.add_comment(ada(), 200 + t, &format!("comment {t}")).expect("comment");
        ticket.commit(&repo).expect("commit");
    }
    let head = repo
        .resolve_ref(&local_ref(&ticket.id().expect("id")))
        .expect("head");

    let a = Ticket::read_commit(&repo, &head).expect("read").compile();
    let b = Ticket::read_commit(&repo, &head).expect("read").compile();
    assert_eq!(a, b);
    assert_eq!(a.comments.len(), 6);
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[test]
fn added_metadata_never_overrides_the_original() {
    let repo = MemRepository::new();
    let settings = Settings::builtin();
    let mut ticket = Ticket::create(&settings, ren(), 100, "Title", "", None).expect("create");
    let create_id = ticket.operations()[0].id();
    ticket.commit(&repo).expect("commit");

    let first: BTreeMap<String, String> =
        [("origin".to_string(), "import".to_string())].into_iter().collect();
    let second: BTreeMap<String, String> =
        [("origin".to_string(), "other".to_string())].into_iter().collect();
    ticket
        .set_metadata(ren(), 110, create_id.clone(), first)
        .expect("metadata");
    ticket
        .set_metadata(ren(), 120, create_id, second)
        .expect("metadata");
    ticket.commit(&repo).expect("commit");

    let snap = Ticket::read_local(&repo, &ticket.id().expect("id"))
        .expect("read")
        .compile();
    assert_eq!(snap.create_metadata("origin"), Some("import"));
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

#[test]
fn full_identities_read_back_as_stubs_and_resolve() {
    let repo = MemRepository::new();
    let settings = Settings::builtin();
    let author = Identity::full(IdentityRecord::new("Mel", "mel@example.com"));

    let mut ticket =
        Ticket::create(&settings, author.clone(), 100, "Title", "", None).expect("create");
    ticket.commit(&repo).expect("commit");

    let mut read = Ticket::read_local(&repo, &ticket.id().expect("id")).expect("read");
    let unresolved = read.compile();
    assert!(unresolved.author.as_ref().is_some_and(Identity::is_stub));

    let resolver = RepoResolver::new(&repo);
    let snap = read.compile_resolved(&resolver).expect("resolve");
    let resolved = snap.author.expect("author");
    assert_eq!(resolved, author);
    assert_eq!(resolved.name(), Some("Mel"));
}

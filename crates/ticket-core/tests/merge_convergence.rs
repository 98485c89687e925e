//! Integration tests: replicas of one ticket converge after syncing.
//!
//! Each replica is a `MemRepository`; `fetch_from` stands in for a git
//! fetch and `merge_all` folds the fetched heads into the local refs.
//!   - Two replicas that pull from each other end on the same head
//!   - Pulling again after converging is a no-op
//!   - Merge order does not change the compiled ticket
//!   - Concurrent title edits resolve by wall time on every replica

use proptest::prelude::*;
use ticket_core::repository::Repository;
use ticket_core::repository::memory::MemRepository;
use ticket_core::ticket::{MergeResult, MergeStatus, local_ref, merge_all};
use ticket_core::{Id, Identity, Settings, Snapshot, Ticket};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn author(name: &str) -> Identity {
    Identity::bare(name, format!("{}@example.com", name.to_lowercase()))
}

/// A repository holding one freshly created ticket.
fn seeded() -> (MemRepository, Id) {
    let repo = MemRepository::new();
    let mut ticket = Ticket::create(
        &Settings::builtin(),
        author("Ren"),
        100,
        "Shared ticket",
        "Opening message",
        None,
    )
    .expect("create");
    ticket.commit(&repo).expect("commit");
    let id = ticket.id().expect("id");
    (repo, id)
}

fn pull(to: &MemRepository, from: &MemRepository, remote: &str) -> Vec<MergeResult> {
    to.fetch_from(remote, from).expect("fetch");
    let results = merge_all(to, remote).expect("merge");
    for r in &results {
        assert!(r.outcome.is_ok(), "merge of {} failed: {:?}", r.id, r.outcome);
    }
    results
}

fn statuses(results: &[MergeResult]) -> Vec<MergeStatus> {
    results
        .iter()
        .filter_map(|r| r.outcome.as_ref().ok().copied())
        .collect()
}

/// Commit one comment per timestamp, each in its own pack.
fn comment_each(repo: &MemRepository, id: &Id, who: &str, times: &[i64]) {
    for (i, t) in times.iter().enumerate() {
        let mut ticket = Ticket::read_local(repo, id).expect("read");
        ticket
            .add_comment(author(who), *t, &format!("{who} #{i}"))
            .expect("comment");
        ticket.commit(repo).expect("commit");
    }
}

fn compiled(repo: &MemRepository, id: &Id) -> Snapshot {
    Ticket::read_local(repo, id).expect("read").compile()
}

fn head(repo: &MemRepository, id: &Id) -> ticket_core::repository::Hash {
    repo.resolve_ref(&local_ref(id)).expect("head")
}

// ---------------------------------------------------------------------------
// Fixed scenarios
// ---------------------------------------------------------------------------

#[test]
fn new_ticket_is_copied_then_up_to_date() {
    let (a, id) = seeded();
    let b = MemRepository::new();

    assert_eq!(statuses(&pull(&b, &a, "a")), [MergeStatus::New]);
    assert_eq!(head(&a, &id), head(&b, &id));
    assert_eq!(statuses(&pull(&b, &a, "a")), [MergeStatus::UpToDate]);
}

#[test]
fn concurrent_titles_resolve_by_wall_time() {
    let (a, id) = seeded();
    let b = MemRepository::new();
    pull(&b, &a, "a");

    let mut ta = Ticket::read_local(&a, &id).expect("read");
    ta.set_title(author("Ada"), 300, "from a").expect("title");
    ta.commit(&a).expect("commit");
    let mut tb = Ticket::read_local(&b, &id).expect("read");
    tb.set_title(author("Bo"), 200, "from b").expect("title");
    tb.commit(&b).expect("commit");

    assert_eq!(statuses(&pull(&a, &b, "b")), [MergeStatus::Merged]);
    assert_eq!(statuses(&pull(&b, &a, "a")), [MergeStatus::FastForward]);

    let sa = compiled(&a, &id);
    assert_eq!(sa.title, "from a");
    assert_eq!(sa, compiled(&b, &id));
}

#[test]
fn local_edits_ahead_of_remote_are_kept() {
    let (a, id) = seeded();
    let b = MemRepository::new();
    pull(&b, &a, "a");
    comment_each(&b, &id, "Bo", &[200]);

    assert_eq!(statuses(&pull(&b, &a, "a")), [MergeStatus::UpToDate]);
    assert_eq!(compiled(&b, &id).comments.len(), 2);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn two_replicas_converge(
        a_times in prop::collection::vec(101i64..1_000, 0..5),
        b_times in prop::collection::vec(101i64..1_000, 0..5),
    ) {
        let (a, id) = seeded();
        let b = MemRepository::new();
        pull(&b, &a, "a");
        comment_each(&a, &id, "Ada", &a_times);
        comment_each(&b, &id, "Bo", &b_times);

        pull(&a, &b, "b");
        pull(&b, &a, "a");

        prop_assert_eq!(head(&a, &id), head(&b, &id));
        let snap = compiled(&a, &id);
        prop_assert_eq!(snap.comments.len(), 1 + a_times.len() + b_times.len());
        prop_assert_eq!(&snap, &compiled(&b, &id));

        // Settled: nothing left to do in either direction.
        prop_assert_eq!(statuses(&pull(&a, &b, "b")), [MergeStatus::UpToDate]);
        prop_assert_eq!(statuses(&pull(&b, &a, "a")), [MergeStatus::UpToDate]);
    }

    #[test]
    fn merge_order_does_not_matter(
        a_times in prop::collection::vec(101i64..1_000, 0..4),
        b_times in prop::collection::vec(101i64..1_000, 0..4),
        c_times in prop::collection::vec(101i64..1_000, 0..4),
    ) {
        let (a, id) = seeded();
        let b = MemRepository::new();
        let c = MemRepository::new();
        pull(&b, &a, "a");
        pull(&c, &a, "a");
        comment_each(&a, &id, "Ada", &a_times);
        comment_each(&b, &id, "Bo", &b_times);
        comment_each(&c, &id, "Cy", &c_times);

        let forward = MemRepository::new();
        pull(&forward, &a, "a");
        pull(&forward, &b, "b");
        pull(&forward, &c, "c");

        let backward = MemRepository::new();
        pull(&backward, &c, "c");
        pull(&backward, &b, "b");
        pull(&backward, &a, "a");

        let f = compiled(&forward, &id);
        let total = 1 + a_times.len() + b_times.len() + c_times.len();
        prop_assert_eq!(f.comments.len(), total);
        prop_assert_eq!(&f, &compiled(&backward, &id));
    }
}

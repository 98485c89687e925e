//! Tickets: a DAG of operation packs plus a pack of staged operations.
//!
//! A [`Ticket`] is loaded from `refs/tickets/<id>` (or a remote-tracking
//! ref), edited by staging operations through the validating helpers, and
//! persisted with [`Ticket::commit`], which chains one new pack onto the
//! current head. State is read with [`Ticket::compile`].

mod linearize;
mod merge;

pub use linearize::linearize;
pub use merge::{MergeResult, MergeStatus, merge_all};

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use crate::checklist::Checklist;
use crate::error::{Error, Result};
use crate::id::Id;
use crate::identity::{Identity, IdentityResolver, ResolveError, store_identity};
use crate::label::{Label, LabelChangeResult, LabelChangeStatus};
use crate::operation::{OpData, OpType, Operation, ValidationError};
use crate::pack::{OperationPack, StoredPack};
use crate::repository::{Hash, Repository, StorageError};
use crate::review::{FetchOutcome, ReviewInfo, TransactionSource, fetch_review_info};
use crate::settings::Settings;
use crate::snapshot::Snapshot;
use crate::status::Status;
use crate::workflow::{HookRunner, TransitionError};

/// Local ticket refs.
pub const TICKETS_REF_PREFIX: &str = "refs/tickets/";

/// Ref holding the local copy of ticket `id`.
#[must_use]
pub fn local_ref(id: &Id) -> String {
    format!("{TICKETS_REF_PREFIX}{id}")
}

/// Prefix of the remote-tracking ticket refs of `remote`.
#[must_use]
pub fn remote_prefix(remote: &str) -> String {
    format!("refs/remotes/{remote}/tickets/")
}

#[derive(Debug, Clone, Default)]
pub struct Ticket {
    /// Committed packs, parents before children.
    packs: Vec<StoredPack>,
    staging: OperationPack,
}

impl Ticket {
    /// An empty ticket with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a ticket with a create operation.
    ///
    /// The ticket joins `workflow` when given, else the project's default
    /// workflow if one is configured, and starts in that workflow's initial
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid title or message and
    /// [`Error::Transition`] for an unknown workflow.
    pub fn create(
        settings: &Settings,
        author: Identity,
        unix_time: i64,
        title: &str,
        message: &str,
        workflow: Option<&Label>,
    ) -> Result<Self> {
        let mut ticket = Self::new();
        ticket.stage(Operation::create(author.clone(), unix_time, title, message, Vec::new()))?;

        let default_label = settings.project.workflow.default.as_deref().map(Label::from);
        if let Some(label) = workflow.or(default_label.as_ref()) {
            let wf = settings
                .workflows
                .get(label)
                .ok_or_else(|| TransitionError::UnknownWorkflow(label.clone()))?;
            ticket.stage(Operation::label_change(
                author.clone(),
                unix_time,
                vec![label.clone()],
                Vec::new(),
            ))?;
            if wf.initial_status != Status::default() {
                ticket.stage(Operation::set_status(author, unix_time, wf.initial_status))?;
            }
        }
        Ok(ticket)
    }

    /// The id of the create operation, once there is one.
    #[must_use]
    pub fn id(&self) -> Option<Id> {
        self.first_op().map(Operation::id)
    }

    fn first_op(&self) -> Option<&Operation> {
        self.packs
            .iter()
            .find(|p| p.parents.is_empty())
            .and_then(|p| p.pack.operations.first())
            .or_else(|| self.staging.operations.first())
    }

    /// Commit at the tip of the history.
    #[must_use]
    pub fn head(&self) -> Option<&Hash> {
        self.packs.last().map(|p| &p.commit)
    }

    #[must_use]
    pub fn has_pending_operations(&self) -> bool {
        !self.staging.is_empty()
    }

    #[must_use]
    pub fn packs(&self) -> &[StoredPack] {
        &self.packs
    }

    /// Stage `op` without validating it.
    pub fn append(&mut self, op: Operation) {
        self.staging.append(op);
    }

    /// Validate `op`, stage it and return its id.
    fn stage(&mut self, op: Operation) -> Result<Id> {
        op.validate()?;
        let id = op.id();
        self.staging.append(op);
        Ok(id)
    }

    /// Every operation in replay order, committed ones first.
    #[must_use]
    pub fn operations(&self) -> Vec<&Operation> {
        let mut ops = linearize(&self.packs);
        ops.extend(&self.staging.operations);
        ops
    }

    /// Replay every operation into a fresh snapshot.
    ///
    /// Stub identities stay stubs; use [`Ticket::compile_resolved`] to get a
    /// snapshot fit for presentation.
    #[must_use]
    pub fn compile(&self) -> Snapshot {
        let mut snap = self.id().map(Snapshot::new).unwrap_or_default();
        for op in self.operations() {
            op.apply(&mut snap);
            snap.operations.push(op.clone());
        }
        snap
    }

    /// Replace every stub identity (authors, assignees and review update
    /// authors) by its resolved form, looking each distinct id up once.
    ///
    /// # Errors
    ///
    /// Returns the first [`ResolveError`]; nothing is replaced then.
    pub fn ensure_identities(&mut self, resolver: &dyn IdentityResolver) -> Result<(), ResolveError> {
        let mut resolved: HashMap<Id, Identity> = HashMap::new();
        for op in self.all_ops() {
            for identity in op_identities(op) {
                if identity.is_stub() && !resolved.contains_key(identity.id()) {
                    let full = resolver.resolve_identity(identity.id())?;
                    resolved.insert(identity.id().clone(), full);
                }
            }
        }
        if resolved.is_empty() {
            return Ok(());
        }
        debug!(identities = resolved.len(), "resolved identity stubs");
        for op in self.all_ops_mut() {
            for identity in op_identities_mut(op).into_iter().filter(|i| i.is_stub()) {
                if let Some(full) = resolved.get(identity.id()) {
                    *identity = full.clone();
                }
            }
        }
        Ok(())
    }

    /// Resolve identities, then replay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolve`] if any identity cannot be resolved; no
    /// partial snapshot is produced.
    pub fn compile_resolved(&mut self, resolver: &dyn IdentityResolver) -> Result<Snapshot> {
        self.ensure_identities(resolver)?;
        Ok(self.compile())
    }

    fn all_ops(&self) -> impl Iterator<Item = &Operation> {
        self.packs
            .iter()
            .flat_map(|p| &p.pack.operations)
            .chain(&self.staging.operations)
    }

    fn all_ops_mut(&mut self) -> impl Iterator<Item = &mut Operation> {
        self.packs
            .iter_mut()
            .flat_map(|p| &mut p.pack.operations)
            .chain(&mut self.staging.operations)
    }

    // -----------------------------------------------------------------------
    // Validating helpers
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty or multi-line title.
    pub fn set_title(&mut self, author: Identity, unix_time: i64, title: &str) -> Result<Id> {
        let was = self.compile().title;
        self.stage(Operation::set_title(author, unix_time, title, was))
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty message.
    pub fn add_comment(&mut self, author: Identity, unix_time: i64, message: &str) -> Result<Id> {
        self.stage(Operation::add_comment(author, unix_time, message, Vec::new()))
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the message has control characters.
    pub fn edit_comment(
        &mut self,
        author: Identity,
        unix_time: i64,
        target: Id,
        message: &str,
    ) -> Result<Id> {
        self.stage(Operation::edit_comment(author, unix_time, target, message, Vec::new()))
    }

    /// Add and remove labels. Only labels that actually change end up in
    /// the staged operation; the result reports what happened to each one.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NoLabelChange`] when nothing would change.
    pub fn label_change(
        &mut self,
        author: Identity,
        unix_time: i64,
        add: &[Label],
        remove: &[Label],
    ) -> Result<Vec<LabelChangeResult>> {
        let current = self.compile().labels;
        let mut results = Vec::new();
        let mut seen: HashSet<&Label> = HashSet::new();
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for label in add {
            let status = if !seen.insert(label) {
                LabelChangeStatus::DuplicateInOp
            } else if current.contains(label) {
                LabelChangeStatus::AlreadySet
            } else {
                added.push(label.clone());
                LabelChangeStatus::Added
            };
            results.push(LabelChangeResult {
                label: label.clone(),
                status,
            });
        }
        for label in remove {
            let status = if !seen.insert(label) {
                LabelChangeStatus::DuplicateInOp
            } else if current.contains(label) {
                removed.push(label.clone());
                LabelChangeStatus::Removed
            } else {
                LabelChangeStatus::DoesNotExist
            };
            results.push(LabelChangeResult {
                label: label.clone(),
                status,
            });
        }

        added.sort();
        removed.sort();
        self.stage(Operation::label_change(author, unix_time, added, removed))?;
        Ok(results)
    }

    /// Move the ticket to `status` along its workflow, running the edge's
    /// hook first. Nothing is staged if the hook fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transition`] if the ticket has no single workflow,
    /// the workflow has no such edge, or the hook fails.
    pub fn set_status(
        &mut self,
        settings: &Settings,
        runner: &dyn HookRunner,
        author: Identity,
        unix_time: i64,
        status: Status,
    ) -> Result<Id> {
        let snap = self.compile();
        let id = self.id().ok_or(ValidationError::NoOperations)?;
        let workflow = snap.workflow(&settings.workflows)?;
        workflow.transition(&id, snap.status, status, runner)?;
        self.stage(Operation::set_status(author, unix_time, status))
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed assignee.
    pub fn set_assignee(&mut self, author: Identity, unix_time: i64, assignee: Identity) -> Result<Id> {
        self.stage(Operation::set_assignee(author, unix_time, assignee))
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed checklist.
    pub fn set_checklist(
        &mut self,
        author: Identity,
        unix_time: i64,
        checklist: Checklist,
    ) -> Result<Id> {
        self.stage(Operation::set_checklist(author, unix_time, checklist))
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed review payload.
    pub fn set_review(&mut self, author: Identity, unix_time: i64, review: ReviewInfo) -> Result<Id> {
        self.stage(Operation::set_review(author, unix_time, review))
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty metadata.
    pub fn set_metadata(
        &mut self,
        author: Identity,
        unix_time: i64,
        target: Id,
        new_metadata: BTreeMap<String, String>,
    ) -> Result<Id> {
        self.stage(Operation::set_metadata(author, unix_time, target, new_metadata))
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a malformed author.
    pub fn noop(&mut self, author: Identity, unix_time: i64) -> Result<Id> {
        self.stage(Operation::noop(author, unix_time))
    }

    /// Pull the transactions of `revision_id` that arrived since the last
    /// fetch and stage them as one set-review operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Reconcile`] when the source fails or sends malformed
    /// data. The ticket is left untouched then.
    pub fn fetch_review(
        &mut self,
        source: &dyn TransactionSource,
        author: Identity,
        unix_time: i64,
        revision_id: &str,
        page_limit: u32,
    ) -> Result<FetchOutcome> {
        let snap = self.compile();
        let existing = snap.reviews.get(revision_id);
        let since = existing.map(|r| r.last_transaction.as_str());
        let info = fetch_review_info(source, revision_id, since, page_limit)?;

        let known: HashSet<&str> = existing
            .map(|r| r.updates.iter().map(|u| u.trans_id()).collect())
            .unwrap_or_default();
        let new_updates = info
            .updates
            .iter()
            .filter(|u| !known.contains(u.trans_id()))
            .count();
        let title_changed = !info.title.is_empty() && existing.is_none_or(|r| r.title != info.title);
        if new_updates == 0 && !title_changed && existing.is_some() {
            debug!(revision = revision_id, "review is up to date");
            return Ok(FetchOutcome::UpToDate);
        }

        let mut info = info;
        if info.title.is_empty() {
            if let Some(r) = existing {
                info.title.clone_from(&r.title);
            }
        }
        self.set_review(author, unix_time, info)?;
        Ok(FetchOutcome::Updated {
            updates: new_updates,
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Validate the staged operations against the history and write them as
    /// one new pack on top of the current head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NothingToCommit`] if nothing is staged,
    /// [`Error::Validation`] if the staged pack would make the history
    /// invalid, and [`Error::Storage`] on write failure.
    pub fn commit<R: Repository + ?Sized>(&mut self, repo: &R) -> Result<Hash> {
        if self.staging.is_empty() {
            return Err(Error::NothingToCommit);
        }
        self.staging.validate()?;
        let creates = self
            .staging
            .operations
            .iter()
            .filter(|op| op.op_type() == OpType::Create)
            .count();
        if self.packs.is_empty() {
            if self.staging.operations[0].op_type() != OpType::Create {
                return Err(ValidationError::FirstNotCreate.into());
            }
            if creates > 1 {
                return Err(ValidationError::DuplicateCreate.into());
            }
        } else if creates > 0 {
            return Err(ValidationError::DuplicateCreate.into());
        }

        for op in &self.staging.operations {
            for identity in op_identities(op) {
                if matches!(identity, Identity::Full { .. }) {
                    store_identity(repo, identity)?;
                }
            }
        }

        let id = self.id().ok_or(ValidationError::NoOperations)?;
        let parents: Vec<Hash> = self.head().cloned().into_iter().collect();
        let stored = self.staging.write(repo, &parents)?;
        repo.update_ref(&local_ref(&id), &stored.commit)?;
        info!(
            ticket = %id.human(),
            commit = %stored.commit,
            ops = stored.pack.len(),
            "committed operation pack"
        );

        let commit = stored.commit.clone();
        self.packs.push(stored);
        self.staging = OperationPack::new();
        Ok(commit)
    }

    /// Commit if anything is staged.
    ///
    /// # Errors
    ///
    /// See [`Ticket::commit`].
    pub fn commit_as_needed<R: Repository + ?Sized>(&mut self, repo: &R) -> Result<Option<Hash>> {
        if self.staging.is_empty() {
            return Ok(None);
        }
        self.commit(repo).map(Some)
    }

    /// Load the ticket whose head is `ref_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TicketNotFound`] if the ref does not exist,
    /// [`Error::CorruptPack`] or [`Error::Validation`] for a malformed
    /// history, and [`Error::Storage`] on read failure.
    pub fn read<R: Repository + ?Sized>(repo: &R, ref_name: &str) -> Result<Self> {
        let head = match repo.resolve_ref(ref_name) {
            Ok(h) => h,
            Err(StorageError::RefNotFound(_)) => {
                return Err(Error::TicketNotFound(ref_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::read_commit(repo, &head)
    }

    /// Load the ticket whose head is `head`.
    ///
    /// # Errors
    ///
    /// See [`Ticket::read`].
    pub fn read_commit<R: Repository + ?Sized>(repo: &R, head: &Hash) -> Result<Self> {
        let mut loaded: HashMap<Hash, StoredPack> = HashMap::new();
        let mut queue = VecDeque::from([head.clone()]);
        while let Some(commit) = queue.pop_front() {
            if loaded.contains_key(&commit) {
                continue;
            }
            let pack = StoredPack::read(repo, &commit)?;
            queue.extend(pack.parents.iter().cloned());
            loaded.insert(commit, pack);
        }

        for pack in loaded.values() {
            for parent in &pack.parents {
                let parent_clock = loaded.get(parent).map_or(0, |p| p.clock);
                if parent_clock >= pack.clock {
                    return Err(Error::CorruptPack {
                        commit: pack.commit.clone(),
                        reason: format!("edit clock {} is not above parent {parent}", pack.clock),
                    });
                }
            }
        }

        let mut packs: Vec<StoredPack> = loaded.into_values().collect();
        // Clocks grow along every edge, so the head sorts last.
        packs.sort_by(|a, b| (a.clock, &a.commit).cmp(&(b.clock, &b.commit)));

        let ticket = Self {
            packs,
            staging: OperationPack::new(),
        };
        ticket.validate_history()?;
        Ok(ticket)
    }

    fn validate_history(&self) -> Result<(), ValidationError> {
        let ops = linearize(&self.packs);
        let Some(first) = ops.first() else {
            return Err(ValidationError::NoOperations);
        };
        if first.op_type() != OpType::Create {
            return Err(ValidationError::FirstNotCreate);
        }
        if ops[1..]
            .iter()
            .any(|op| op.op_type() == OpType::Create)
        {
            return Err(ValidationError::DuplicateCreate);
        }
        for p in &self.packs {
            p.pack.validate()?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// See [`Ticket::read`].
    pub fn read_local<R: Repository + ?Sized>(repo: &R, id: &Id) -> Result<Self> {
        Self::read(repo, &local_ref(id))
    }

    /// # Errors
    ///
    /// See [`Ticket::read`].
    pub fn read_remote<R: Repository + ?Sized>(repo: &R, remote: &str, id: &Id) -> Result<Self> {
        Self::read(repo, &format!("{}{id}", remote_prefix(remote)))
    }

    /// Ids of every local ticket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if refs cannot be listed.
    pub fn list_local_ids<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Id>> {
        let mut ids = Vec::new();
        for name in repo.list_refs(TICKETS_REF_PREFIX)? {
            let Some(raw) = name.strip_prefix(TICKETS_REF_PREFIX) else {
                continue;
            };
            match raw.parse::<Id>() {
                Ok(id) => ids.push(id),
                Err(e) => debug!(refname = %name, error = %e, "skipping malformed ticket ref"),
            }
        }
        Ok(ids)
    }

    /// Every local ticket.
    ///
    /// # Errors
    ///
    /// Returns the first error met while reading.
    pub fn read_all<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Self>> {
        Self::list_local_ids(repo)?
            .iter()
            .map(|id| Self::read_local(repo, id))
            .collect()
    }
}

/// Identities referenced by an operation.
fn op_identities(op: &Operation) -> Vec<&Identity> {
    let mut out = vec![&op.author];
    match &op.data {
        OpData::SetAssignee(d) => out.push(&d.assignee),
        OpData::SetReview(d) => out.extend(d.review.updates.iter().filter_map(|u| u.author.as_ref())),
        _ => {}
    }
    out
}

fn op_identities_mut(op: &mut Operation) -> Vec<&mut Identity> {
    let mut out = vec![&mut op.author];
    match &mut op.data {
        OpData::SetAssignee(d) => out.push(&mut d.assignee),
        OpData::SetReview(d) => out.extend(
            d.review
                .updates
                .iter_mut()
                .filter_map(|u| u.author.as_mut()),
        ),
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityRecord, MemResolver};
    use crate::repository::memory::MemRepository;
    use crate::workflow::NoHooks;

    fn ren() -> Identity {
        Identity::bare("Ren", "ren@example.com")
    }

    fn created(repo: &MemRepository) -> Ticket {
        let mut t = Ticket::create(&Settings::builtin(), ren(), 100, "Title", "Body", None)
            .expect("create");
        t.commit(repo).expect("commit");
        t
    }

    #[test]
    fn create_commit_and_read_back() {
        let repo = MemRepository::new();
        let mut t = created(&repo);
        t.add_comment(ren(), 101, "hello").expect("comment");
        t.commit(&repo).expect("commit");

        let id = t.id().expect("id");
        let back = Ticket::read_local(&repo, &id).expect("read");
        assert_eq!(back.compile(), t.compile());
        assert_eq!(back.packs().len(), 2);
        assert_eq!(Ticket::list_local_ids(&repo).expect("ids"), vec![id]);
    }

    #[test]
    fn commit_requires_staged_ops() {
        let repo = MemRepository::new();
        let mut t = created(&repo);
        assert!(matches!(t.commit(&repo), Err(Error::NothingToCommit)));
        assert_eq!(t.commit_as_needed(&repo).expect("ok"), None);
    }

    #[test]
    fn first_op_must_be_create() {
        let repo = MemRepository::new();
        let mut t = Ticket::new();
        t.noop(ren(), 1).expect("noop");
        assert!(matches!(
            t.commit(&repo),
            Err(Error::Validation(ValidationError::FirstNotCreate))
        ));
    }

    #[test]
    fn create_with_workflow_adds_label() {
        let label = Label::from("workflow:eng");
        let t = Ticket::create(&Settings::builtin(), ren(), 1, "T", "", Some(&label))
            .expect("create");
        let snap = t.compile();
        assert_eq!(snap.labels, vec![label]);
        assert_eq!(snap.status, Status::Proposed);

        let unknown = Label::from("workflow:nope");
        assert!(matches!(
            Ticket::create(&Settings::builtin(), ren(), 1, "T", "", Some(&unknown)),
            Err(Error::Transition(TransitionError::UnknownWorkflow(_)))
        ));
    }

    #[test]
    fn status_changes_follow_the_workflow() {
        let settings = Settings::builtin();
        let label = Label::from("workflow:eng");
        let mut t = Ticket::create(&settings, ren(), 1, "T", "", Some(&label)).expect("create");
        assert!(matches!(
            t.set_status(&settings, &NoHooks, ren(), 2, Status::Merged),
            Err(Error::Transition(TransitionError::Invalid { .. }))
        ));
        t.set_status(&settings, &NoHooks, ren(), 2, Status::Vetted)
            .expect("vetted");
        assert_eq!(t.compile().status, Status::Vetted);
    }

    #[test]
    fn label_change_reports_per_label() {
        let mut t = Ticket::create(&Settings::builtin(), ren(), 1, "T", "", None).expect("create");
        t.label_change(ren(), 2, &[Label::from("bug")], &[]).expect("add");
        let results = t
            .label_change(
                ren(),
                3,
                &[Label::from("ui"), Label::from("ui"), Label::from("bug")],
                &[Label::from("gone")],
            )
            .expect("change");
        let statuses: Vec<LabelChangeStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            [
                LabelChangeStatus::Added,
                LabelChangeStatus::DuplicateInOp,
                LabelChangeStatus::AlreadySet,
                LabelChangeStatus::DoesNotExist
            ]
        );
        assert!(matches!(
            t.label_change(ren(), 4, &[Label::from("bug")], &[]),
            Err(Error::Validation(ValidationError::NoLabelChange))
        ));
    }

    #[test]
    fn invalid_ops_are_never_staged() {
        let mut t = Ticket::create(&Settings::builtin(), ren(), 1, "T", "", None).expect("create");
        let before = t.operations().len();
        assert!(t.set_title(ren(), 2, "").is_err());
        assert!(t.add_comment(ren(), 2, "   ").is_err());
        assert_eq!(t.operations().len(), before);
    }

    #[test]
    fn stubs_are_resolved_once_and_in_place() {
        let repo = MemRepository::new();
        let full = Identity::full(IdentityRecord::new("Kai", "kai@example.com"));
        let mut t = Ticket::create(&Settings::builtin(), full.clone(), 1, "T", "", None)
            .expect("create");
        t.set_assignee(full.clone(), 2, full.clone()).expect("assign");
        t.commit(&repo).expect("commit");

        let mut back = Ticket::read_local(&repo, &t.id().expect("id")).expect("read");
        assert!(back.compile().author.expect("author").is_stub());

        assert!(matches!(
            back.clone().compile_resolved(&MemResolver::new()),
            Err(Error::Resolve(ResolveError::NotFound(_)))
        ));

        let resolver = MemResolver::new().with(full.clone());
        let snap = back.compile_resolved(&resolver).expect("resolve");
        assert!(!snap.author.expect("author").is_stub());
        assert_eq!(snap.assignee.as_ref().and_then(Identity::name), Some("Kai"));
        // The commit stored the identity so the repository can resolve it too.
        let snap = Ticket::read_local(&repo, &t.id().expect("id"))
            .expect("read")
            .compile_resolved(&crate::identity::RepoResolver::new(&repo))
            .expect("resolve");
        assert!(snap.actors.iter().all(|a| !a.is_stub()));
    }

    #[test]
    fn fetch_review_stages_only_new_transactions() {
        use crate::review::fetch::tests::{FakeSource, comment_tx};
        use crate::review::{Cursor, TransactionPage};

        let page = |txs| TransactionPage {
            data: txs,
            cursor: Cursor::default(),
        };
        let mut source = FakeSource::default();
        source
            .pages
            .insert((None, None), page(vec![comment_tx(3, 30, "first")]));

        let mut t = Ticket::create(&Settings::builtin(), ren(), 1, "T", "", None).expect("create");
        let outcome = t.fetch_review(&source, ren(), 2, "D7", 100).expect("fetch");
        assert_eq!(outcome, FetchOutcome::Updated { updates: 1 });
        assert_eq!(t.compile().reviews["D7"].last_transaction, "3");

        // Incremental fetches start from the stored watermark.
        let outcome = t.fetch_review(&source, ren(), 3, "D7", 100).expect("fetch");
        assert_eq!(outcome, FetchOutcome::UpToDate);
        source
            .pages
            .insert((Some("3".to_string()), None), page(vec![comment_tx(4, 40, "second")]));
        let outcome = t.fetch_review(&source, ren(), 4, "D7", 100).expect("fetch");
        assert_eq!(outcome, FetchOutcome::Updated { updates: 1 });

        let snap = t.compile();
        let review = &snap.reviews["D7"];
        assert_eq!(review.updates.len(), 2);
        assert_eq!(review.last_transaction, "4");
    }

    #[test]
    fn missing_ticket_is_not_found() {
        let repo = MemRepository::new();
        assert!(matches!(
            Ticket::read_local(&repo, &Id::derive(b"x")),
            Err(Error::TicketNotFound(_))
        ));
    }
}

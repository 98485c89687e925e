//! Derived, read-only state of a ticket.
//!
//! A [`Snapshot`] is never stored. It is rebuilt by folding every operation
//! of the ticket, in replay order, over an empty snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::checklist::{
    Checklist, ChecklistSnapshot, ChecklistState, ChecklistStore, reduce_compound_states,
};
use crate::config::ConfigError;
use crate::id::Id;
use crate::identity::Identity;
use crate::label::Label;
use crate::operation::Operation;
use crate::repository::Hash;
use crate::review::ReviewInfo;
use crate::status::Status;
use crate::timeline::TimelineItem;
use crate::workflow::{TransitionError, Workflow, WorkflowStore};

/// A comment as currently visible (the latest version of its message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// Id of the operation that created the comment.
    pub id: Id,
    pub author: Identity,
    pub message: String,
    pub files: Vec<Hash>,
    pub unix_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub id: Option<Id>,
    pub status: Status,
    pub title: String,
    pub comments: Vec<Comment>,
    /// Sorted, without duplicates.
    pub labels: Vec<Label>,
    /// Filled checklists by label, then by reviewer id.
    pub checklists: BTreeMap<Label, BTreeMap<Id, ChecklistSnapshot>>,
    /// Reviews by revision id.
    pub reviews: BTreeMap<String, ReviewInfo>,
    pub author: Option<Identity>,
    pub assignee: Option<Identity>,
    /// Everyone who authored an operation, in order of first appearance.
    pub actors: Vec<Identity>,
    /// Everyone who authored a comment, in order of first appearance.
    pub participants: Vec<Identity>,
    pub created_at: i64,
    pub timeline: Vec<TimelineItem>,
    pub operations: Vec<Operation>,
    /// Metadata added after the fact by set-metadata operations, by target op.
    pub extra_metadata: BTreeMap<Id, BTreeMap<String, String>>,
}

impl Snapshot {
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub(crate) fn add_actor(&mut self, actor: &Identity) {
        if !self.actors.contains(actor) {
            self.actors.push(actor.clone());
        }
    }

    pub(crate) fn add_participant(&mut self, participant: &Identity) {
        if !self.participants.contains(participant) {
            self.participants.push(participant.clone());
        }
    }

    /// Time of the last applied operation, or the epoch for an empty ticket.
    #[must_use]
    pub fn last_edit_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_edit_unix(), 0).unwrap_or_default()
    }

    #[must_use]
    pub fn last_edit_unix(&self) -> i64 {
        self.operations.last().map_or(0, |op| op.unix_time)
    }

    /// Metadata attached to the create operation.
    #[must_use]
    pub fn create_metadata(&self, key: &str) -> Option<&str> {
        let first = self.operations.first()?;
        self.metadata(&first.id(), key)
    }

    /// Metadata of operation `op_id`: its own first, then anything added by
    /// later set-metadata operations.
    #[must_use]
    pub fn metadata(&self, op_id: &Id, key: &str) -> Option<&str> {
        let own = self
            .operations
            .iter()
            .find(|op| &op.id() == op_id)
            .and_then(|op| op.get_metadata(key));
        own.or_else(|| {
            self.extra_metadata
                .get(op_id)
                .and_then(|m| m.get(key))
                .map(String::as_str)
        })
    }

    #[must_use]
    pub fn search_timeline_item(&self, id: &Id) -> Option<&TimelineItem> {
        self.timeline.iter().find(|item| item.id() == id)
    }

    #[must_use]
    pub fn search_comment(&self, id: &Id) -> Option<&Comment> {
        self.comments.iter().find(|c| &c.id == id)
    }

    #[must_use]
    pub fn has_actor(&self, id: &Id) -> bool {
        self.actors.iter().any(|a| a.id() == id)
    }

    #[must_use]
    pub fn has_any_actor(&self, ids: &[Id]) -> bool {
        ids.iter().any(|id| self.has_actor(id))
    }

    #[must_use]
    pub fn has_participant(&self, id: &Id) -> bool {
        self.participants.iter().any(|p| p.id() == id)
    }

    #[must_use]
    pub fn has_any_participant(&self, ids: &[Id]) -> bool {
        ids.iter().any(|id| self.has_participant(id))
    }

    fn checklist_labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(|l| l.is_checklist())
    }

    // -----------------------------------------------------------------------
    // Checklists
    // -----------------------------------------------------------------------

    /// Blank templates for every checklist label on the ticket.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownChecklist`] if a label has no template.
    pub fn checklists(
        &self,
        store: &ChecklistStore,
    ) -> Result<BTreeMap<Label, Checklist>, ConfigError> {
        self.checklist_labels()
            .map(|l| store.get(l).map(|c| (l.clone(), c.clone())))
            .collect()
    }

    /// The checklists `reviewer` has filled for this ticket's labels. Labels
    /// they have not filled yet map to the blank template when
    /// `blank_if_none` is set, and are omitted otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownChecklist`] if a blank template is needed
    /// and the store does not have it.
    pub fn user_checklists(
        &self,
        reviewer: &Id,
        store: &ChecklistStore,
        blank_if_none: bool,
    ) -> Result<BTreeMap<Label, Checklist>, ConfigError> {
        let mut out = BTreeMap::new();
        for label in self.checklist_labels() {
            let filled = self
                .checklists
                .get(label)
                .and_then(|by_reviewer| by_reviewer.get(reviewer));
            match filled {
                Some(snap) => {
                    out.insert(label.clone(), snap.checklist.clone());
                }
                None if blank_if_none => {
                    out.insert(label.clone(), store.get(label)?.clone());
                }
                None => {}
            }
        }
        Ok(out)
    }

    /// Ticket-level state of every checklist label on the ticket, reduced
    /// over all reviewers. A label nobody has reviewed is Pending.
    #[must_use]
    pub fn checklist_compound_states(&self) -> BTreeMap<Label, ChecklistState> {
        self.checklist_labels()
            .map(|label| {
                let states = self
                    .checklists
                    .get(label)
                    .into_iter()
                    .flat_map(BTreeMap::values)
                    .map(|snap| snap.checklist.compound_state());
                (label.clone(), reduce_compound_states(states))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Workflow
    // -----------------------------------------------------------------------

    /// The workflow selected by this ticket's labels.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] unless exactly one known workflow label is
    /// present.
    pub fn workflow<'s>(&self, store: &'s WorkflowStore) -> Result<&'s Workflow, TransitionError> {
        store.for_labels(&self.labels)
    }

    /// # Errors
    ///
    /// See [`Snapshot::workflow`].
    pub fn next_states(&self, store: &WorkflowStore) -> Result<Vec<Status>, TransitionError> {
        Ok(self.workflow(store)?.next_states(self.status))
    }

    /// # Errors
    ///
    /// Returns [`TransitionError::Invalid`] if the workflow has no edge from
    /// the current status to `to`, or the errors of [`Snapshot::workflow`].
    pub fn validate_transition(
        &self,
        store: &WorkflowStore,
        to: Status,
    ) -> Result<(), TransitionError> {
        self.workflow(store)?.validate_transition(self.status, to)?;
        Ok(())
    }
}

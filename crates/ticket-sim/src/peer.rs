use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use ticket_core::label::Label;
use ticket_core::repository::memory::MemRepository;
use ticket_core::repository::{Hash, Repository};
use ticket_core::ticket::{MergeResult, local_ref, merge_all};
use ticket_core::workflow::NoHooks;
use ticket_core::{Error, Id, Identity, Settings, Snapshot, Ticket};
use tracing::debug;

use crate::rng::DeterministicRng;

/// Stable index of a simulated replica.
pub type PeerId = usize;

const LABEL_POOL: [&str; 4] = ["backend", "bug", "ui", "urgent"];
const WORKFLOWS: [&str; 2] = ["workflow:default", "workflow:eng"];

/// Kinds of edits a peer makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditKind {
    Create,
    Comment,
    EditComment,
    Title,
    Labels,
    Status,
    Assign,
}

const EDITS: [EditKind; 6] = [
    EditKind::Comment,
    EditKind::EditComment,
    EditKind::Title,
    EditKind::Labels,
    EditKind::Status,
    EditKind::Assign,
];

/// Result of one attempted edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The edit was committed; `ops` are the ids of the new operations.
    Applied {
        kind: EditKind,
        ticket: Id,
        ops: Vec<Id>,
    },
    /// The ticket rejected the edit, e.g. an illegal status move.
    Rejected { kind: EditKind, reason: String },
}

/// Everything a peer can currently see, compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerView {
    pub heads: BTreeMap<Id, Hash>,
    pub tickets: BTreeMap<Id, Snapshot>,
}

/// One replica: an in-memory repository and the identity that edits it.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    repo: MemRepository,
    author: Identity,
    settings: Settings,
    edits: u64,
}

impl Peer {
    #[must_use]
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            repo: MemRepository::new(),
            author: Self::identity(id),
            settings: Settings::builtin(),
            edits: 0,
        }
    }

    /// The identity peer `id` edits as.
    #[must_use]
    pub fn identity(id: PeerId) -> Identity {
        Identity::bare(format!("Peer {id}"), format!("peer{id}@sim.invalid"))
    }

    /// Name of the remote under which other peers see this one.
    #[must_use]
    pub fn remote_name(id: PeerId) -> String {
        format!("peer{id}")
    }

    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    #[must_use]
    pub const fn repo(&self) -> &MemRepository {
        &self.repo
    }

    /// Ids of the local tickets, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the refs cannot be listed.
    pub fn ticket_ids(&self) -> Result<Vec<Id>> {
        let mut ids = Ticket::list_local_ids(&self.repo)?;
        ids.sort();
        Ok(ids)
    }

    /// Make one random edit at `unix_time`, creating a ticket if there is
    /// nothing to edit yet or `create_percent` says so.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage or corruption problems; edits the
    /// ticket refuses are reported as [`EditOutcome::Rejected`].
    pub fn random_edit(
        &mut self,
        rng: &mut DeterministicRng,
        unix_time: i64,
        peer_count: usize,
        create_percent: u8,
    ) -> Result<EditOutcome> {
        self.edits += 1;
        let ids = self.ticket_ids()?;
        let target = if rng.hit_rate_percent(create_percent) {
            None
        } else {
            rng.pick(&ids).cloned()
        };
        let Some(id) = target else {
            return self.create(rng, unix_time);
        };

        let mut ticket = Ticket::read_local(&self.repo, &id)
            .with_context(|| format!("peer {} failed to read ticket {}", self.id, id.human()))?;
        let kind = *rng.pick(&EDITS).unwrap_or(&EditKind::Comment);
        match self.stage(&mut ticket, kind, rng, unix_time, peer_count) {
            Ok(Some(op)) => {
                ticket.commit(&self.repo)?;
                debug!(peer = self.id, ticket = %id.human(), ?kind, "edit committed");
                Ok(EditOutcome::Applied {
                    kind,
                    ticket: id,
                    ops: vec![op],
                })
            }
            Ok(None) => Ok(EditOutcome::Rejected {
                kind,
                reason: "nothing to edit".to_string(),
            }),
            Err(e @ (Error::Validation(_) | Error::Transition(_))) => Ok(EditOutcome::Rejected {
                kind,
                reason: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, rng: &mut DeterministicRng, unix_time: i64) -> Result<EditOutcome> {
        let workflow = Label::from(*rng.pick(&WORKFLOWS).unwrap_or(&WORKFLOWS[0]));
        let mut ticket = Ticket::create(
            &self.settings,
            self.author.clone(),
            unix_time,
            &format!("Ticket {} from peer {}", self.edits, self.id),
            &format!("Opened by peer {}", self.id),
            Some(&workflow),
        )?;
        let ops: Vec<Id> = ticket.operations().iter().map(|op| op.id()).collect();
        ticket.commit(&self.repo)?;
        let id = ticket.id().context("created ticket has no id")?;
        debug!(peer = self.id, ticket = %id.human(), "ticket created");
        Ok(EditOutcome::Applied {
            kind: EditKind::Create,
            ticket: id,
            ops,
        })
    }

    /// Stage one edit of `kind`; `None` if there was nothing to apply it to.
    fn stage(
        &self,
        ticket: &mut Ticket,
        kind: EditKind,
        rng: &mut DeterministicRng,
        unix_time: i64,
        peer_count: usize,
    ) -> Result<Option<Id>, Error> {
        let author = self.author.clone();
        let snap = ticket.compile();
        let op = match kind {
            EditKind::Create | EditKind::Comment => {
                let message = format!("note {} from peer {}", self.edits, self.id);
                ticket.add_comment(author, unix_time, &message)?
            }
            EditKind::EditComment => {
                let ids: Vec<Id> = snap.comments.iter().map(|c| c.id.clone()).collect();
                let Some(target) = rng.pick(&ids).cloned() else {
                    return Ok(None);
                };
                let message = format!("edited by peer {} ({})", self.id, self.edits);
                ticket.edit_comment(author, unix_time, target, &message)?
            }
            EditKind::Title => {
                let title = format!("Renamed by peer {} ({})", self.id, self.edits);
                ticket.set_title(author, unix_time, &title)?
            }
            EditKind::Labels => {
                let label = Label::from(*rng.pick(&LABEL_POOL).unwrap_or(&LABEL_POOL[0]));
                if snap.labels.contains(&label) {
                    ticket.label_change(author, unix_time, &[], &[label])?;
                } else {
                    ticket.label_change(author, unix_time, &[label], &[])?;
                }
                // The label change is the last staged operation.
                match ticket.operations().last() {
                    Some(op) => op.id(),
                    None => return Ok(None),
                }
            }
            EditKind::Status => {
                let next = snap.next_states(&self.settings.workflows)?;
                let Some(status) = rng.pick(&next).copied() else {
                    return Ok(None);
                };
                ticket.set_status(&self.settings, &NoHooks, author, unix_time, status)?
            }
            EditKind::Assign => {
                let assignee = Self::identity(rng.index(peer_count.max(1)));
                ticket.set_assignee(author, unix_time, assignee)?
            }
        };
        Ok(Some(op))
    }

    /// Fetch every ref of `other` and merge its tickets into ours.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails or any ticket fails to merge.
    pub fn pull_from(&self, other: &Self) -> Result<Vec<MergeResult>> {
        let remote = Self::remote_name(other.id);
        self.repo.fetch_from(&remote, &other.repo)?;
        let results = merge_all(&self.repo, &remote)?;
        for r in &results {
            if let Err(e) = &r.outcome {
                anyhow::bail!(
                    "peer {} failed to merge ticket {} from {remote}: {e}",
                    self.id,
                    r.id.human()
                );
            }
        }
        Ok(results)
    }

    /// Compile every local ticket.
    ///
    /// # Errors
    ///
    /// Returns an error if any ticket cannot be read.
    pub fn view(&self) -> Result<PeerView> {
        let mut view = PeerView::default();
        for id in self.ticket_ids()? {
            let head = self.repo.resolve_ref(&local_ref(&id))?;
            let snapshot = Ticket::read_local(&self.repo, &id)?.compile();
            view.heads.insert(id.clone(), head);
            view.tickets.insert(id, snapshot);
        }
        Ok(view)
    }
}

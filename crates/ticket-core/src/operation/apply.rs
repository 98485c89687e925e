//! Applying operations to a snapshot.
//!
//! Application never fails: anything that could be wrong with an operation
//! is caught by validation before it is staged, and replay folds the already
//! validated history.

use std::collections::{BTreeMap, HashSet};

use tracing::trace;

use crate::checklist::ChecklistSnapshot;
use crate::id::Id;
use crate::identity::Identity;
use crate::review::{ReviewInfo, ReviewUpdate};
use crate::snapshot::{Comment, Snapshot};
use crate::timeline::{CommentTimelineItem, TimelineItem};

use super::{OpData, Operation};

impl Operation {
    /// Fold this operation into `snapshot`.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        let id = self.id();
        let author = &self.author;
        let unix_time = self.unix_time;
        trace!(op = %id.human(), kind = %self.op_type(), "apply");

        match &self.data {
            OpData::Create(d) => {
                snapshot.title.clone_from(&d.title);
                snapshot.comments = vec![Comment {
                    id: id.clone(),
                    author: author.clone(),
                    message: d.message.clone(),
                    files: d.files.clone(),
                    unix_time,
                }];
                snapshot.author = Some(author.clone());
                snapshot.created_at = unix_time;
                snapshot.add_participant(author);
                snapshot.timeline.push(TimelineItem::Create(CommentTimelineItem::new(
                    id,
                    author.clone(),
                    d.message.clone(),
                    d.files.clone(),
                    unix_time,
                )));
            }
            OpData::SetTitle(d) => {
                snapshot.title.clone_from(&d.title);
                snapshot.timeline.push(TimelineItem::SetTitle {
                    id,
                    author: author.clone(),
                    unix_time,
                    title: d.title.clone(),
                    was: d.was.clone(),
                });
            }
            OpData::AddComment(d) => {
                snapshot.comments.push(Comment {
                    id: id.clone(),
                    author: author.clone(),
                    message: d.message.clone(),
                    files: d.files.clone(),
                    unix_time,
                });
                snapshot.add_participant(author);
                snapshot.timeline.push(TimelineItem::AddComment(CommentTimelineItem::new(
                    id,
                    author.clone(),
                    d.message.clone(),
                    d.files.clone(),
                    unix_time,
                )));
            }
            OpData::EditComment(d) => {
                let item = snapshot
                    .timeline
                    .iter_mut()
                    .filter(|item| item.id() == &d.target)
                    .find_map(TimelineItem::comment_mut);
                if let Some(item) = item {
                    item.append(author.clone(), d.message.clone(), d.files.clone(), unix_time);
                    if let Some(c) = snapshot.comments.iter_mut().find(|c| c.id == d.target) {
                        c.message.clone_from(&d.message);
                        c.files.clone_from(&d.files);
                    }
                }
            }
            OpData::SetStatus(d) => {
                snapshot.status = d.status;
                snapshot.timeline.push(TimelineItem::SetStatus {
                    id,
                    author: author.clone(),
                    unix_time,
                    status: d.status,
                });
            }
            OpData::LabelChange(d) => {
                for label in &d.added {
                    if !snapshot.labels.contains(label) {
                        snapshot.labels.push(label.clone());
                    }
                }
                snapshot.labels.retain(|l| !d.removed.contains(l));
                snapshot.labels.sort();
                snapshot.timeline.push(TimelineItem::LabelChange {
                    id,
                    author: author.clone(),
                    unix_time,
                    added: d.added.clone(),
                    removed: d.removed.clone(),
                });
            }
            OpData::SetAssignee(d) => {
                snapshot.assignee = Some(d.assignee.clone());
                snapshot.timeline.push(TimelineItem::SetAssignee {
                    id,
                    author: author.clone(),
                    unix_time,
                    assignee: d.assignee.clone(),
                });
            }
            OpData::SetChecklist(d) => {
                snapshot
                    .checklists
                    .entry(d.checklist.label.clone())
                    .or_default()
                    .insert(
                        author.id().clone(),
                        ChecklistSnapshot {
                            checklist: d.checklist.clone(),
                            last_edit: unix_time,
                        },
                    );
                snapshot.timeline.push(TimelineItem::SetChecklist {
                    id,
                    author: author.clone(),
                    unix_time,
                    checklist: d.checklist.clone(),
                });
            }
            OpData::SetReview(d) => apply_review(snapshot, &id, author, &d.review),
            OpData::SetMetadata(d) => {
                let extra = snapshot.extra_metadata.entry(d.target.clone()).or_default();
                for (k, v) in &d.new_metadata {
                    extra.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            OpData::NoOp => {}
        }

        snapshot.add_actor(author);
    }
}

fn apply_review(snapshot: &mut Snapshot, id: &Id, author: &Identity, incoming: &ReviewInfo) {
    let revision = &incoming.revision_id;

    if incoming.is_removal() {
        snapshot.reviews.remove(revision);
        snapshot
            .timeline
            .retain(|item| item.revision_id() != Some(revision.as_str()));
        return;
    }

    let review = snapshot
        .reviews
        .entry(revision.clone())
        .or_insert_with(|| ReviewInfo {
            revision_id: revision.clone(),
            ..ReviewInfo::default()
        });
    review.title.clone_from(&incoming.title);
    review.last_transaction.clone_from(&incoming.last_transaction);

    // Updates already present are dropped, so re-submitting an overlapping
    // batch leaves the review unchanged.
    let mut seen: HashSet<String> = review
        .updates
        .iter()
        .map(|u| u.trans_id().to_string())
        .collect();
    let fresh: Vec<ReviewUpdate> = incoming
        .updates
        .iter()
        .filter(|u| seen.insert(u.trans_id().to_string()))
        .cloned()
        .collect();
    review.updates.extend(fresh.iter().cloned());

    let mut buckets: BTreeMap<i64, Vec<ReviewUpdate>> = BTreeMap::new();
    for u in fresh {
        buckets.entry(u.timestamp()).or_default().push(u);
    }
    for (unix_time, updates) in buckets {
        let bucket_author = updates
            .first()
            .and_then(|u| u.author.clone())
            .unwrap_or_else(|| author.clone());
        snapshot.timeline.push(TimelineItem::SetReview {
            id: id.clone(),
            author: bucket_author,
            unix_time,
            review: ReviewInfo {
                revision_id: revision.clone(),
                updates,
                ..ReviewInfo::default()
            },
        });
    }
    snapshot.timeline.sort_by_key(TimelineItem::when);
}

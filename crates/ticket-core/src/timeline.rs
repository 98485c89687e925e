//! Human-readable history of a ticket.
//!
//! Every operation except set-metadata and no-op contributes one item (a
//! review update contributes one item per distinct update timestamp).
//! Comment items keep their full edit history.

use std::fmt;

use chrono::DateTime;

use crate::checklist::Checklist;
use crate::id::Id;
use crate::identity::Identity;
use crate::label::Label;
use crate::repository::Hash;
use crate::review::{ReviewInfo, TransactionKind};
use crate::status::Status;

fn format_time(unix_time: i64) -> String {
    DateTime::from_timestamp(unix_time, 0)
        .map_or_else(|| unix_time.to_string(), |t| t.format("%d %b %y %H:%M UTC").to_string())
}

/// One version of a comment's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentHistoryStep {
    /// Author of this version, not necessarily the comment's author.
    pub author: Identity,
    pub message: String,
    pub unix_time: i64,
}

/// A comment together with its edit history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentTimelineItem {
    pub id: Id,
    pub author: Identity,
    pub message: String,
    pub files: Vec<Hash>,
    pub created_at: i64,
    pub last_edit: i64,
    pub history: Vec<CommentHistoryStep>,
}

impl CommentTimelineItem {
    #[must_use]
    pub fn new(
        id: Id,
        author: Identity,
        message: String,
        files: Vec<Hash>,
        unix_time: i64,
    ) -> Self {
        Self {
            history: vec![CommentHistoryStep {
                author: author.clone(),
                message: message.clone(),
                unix_time,
            }],
            id,
            author,
            message,
            files,
            created_at: unix_time,
            last_edit: unix_time,
        }
    }

    /// Record a new version of the message.
    pub fn append(&mut self, author: Identity, message: String, files: Vec<Hash>, unix_time: i64) {
        self.message.clone_from(&message);
        self.files = files;
        self.last_edit = unix_time;
        self.history.push(CommentHistoryStep {
            author,
            message,
            unix_time,
        });
    }

    #[must_use]
    pub fn edited(&self) -> bool {
        self.history.len() > 1
    }

    #[must_use]
    pub fn message_is_empty(&self) -> bool {
        self.message.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineItem {
    Create(CommentTimelineItem),
    AddComment(CommentTimelineItem),
    SetTitle {
        id: Id,
        author: Identity,
        unix_time: i64,
        title: String,
        was: String,
    },
    SetStatus {
        id: Id,
        author: Identity,
        unix_time: i64,
        status: Status,
    },
    LabelChange {
        id: Id,
        author: Identity,
        unix_time: i64,
        added: Vec<Label>,
        removed: Vec<Label>,
    },
    SetAssignee {
        id: Id,
        author: Identity,
        unix_time: i64,
        assignee: Identity,
    },
    SetChecklist {
        id: Id,
        author: Identity,
        unix_time: i64,
        checklist: Checklist,
    },
    /// Review updates sharing one timestamp.
    SetReview {
        id: Id,
        author: Identity,
        unix_time: i64,
        review: ReviewInfo,
    },
}

impl TimelineItem {
    /// Id of the operation that produced this item.
    #[must_use]
    pub const fn id(&self) -> &Id {
        match self {
            Self::Create(c) | Self::AddComment(c) => &c.id,
            Self::SetTitle { id, .. }
            | Self::SetStatus { id, .. }
            | Self::LabelChange { id, .. }
            | Self::SetAssignee { id, .. }
            | Self::SetChecklist { id, .. }
            | Self::SetReview { id, .. } => id,
        }
    }

    #[must_use]
    pub const fn when(&self) -> i64 {
        match self {
            Self::Create(c) | Self::AddComment(c) => c.created_at,
            Self::SetTitle { unix_time, .. }
            | Self::SetStatus { unix_time, .. }
            | Self::LabelChange { unix_time, .. }
            | Self::SetAssignee { unix_time, .. }
            | Self::SetChecklist { unix_time, .. }
            | Self::SetReview { unix_time, .. } => *unix_time,
        }
    }

    #[must_use]
    pub const fn author(&self) -> &Identity {
        match self {
            Self::Create(c) | Self::AddComment(c) => &c.author,
            Self::SetTitle { author, .. }
            | Self::SetStatus { author, .. }
            | Self::LabelChange { author, .. }
            | Self::SetAssignee { author, .. }
            | Self::SetChecklist { author, .. }
            | Self::SetReview { author, .. } => author,
        }
    }

    #[must_use]
    pub const fn comment(&self) -> Option<&CommentTimelineItem> {
        match self {
            Self::Create(c) | Self::AddComment(c) => Some(c),
            _ => None,
        }
    }

    pub fn comment_mut(&mut self) -> Option<&mut CommentTimelineItem> {
        match self {
            Self::Create(c) | Self::AddComment(c) => Some(c),
            _ => None,
        }
    }

    /// Revision id of a review item.
    #[must_use]
    pub fn revision_id(&self) -> Option<&str> {
        match self {
            Self::SetReview { review, .. } => Some(&review.revision_id),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Create(c) => format!("created \"{}\"", c.message),
            Self::AddComment(c) => format!("commented \"{}\"", c.message),
            Self::SetTitle { title, was, .. } => {
                format!("changed title from \"{was}\" to \"{title}\"")
            }
            Self::SetStatus { status, .. } => status.action().to_string(),
            Self::LabelChange { added, removed, .. } => {
                let join = |labels: &[Label]| {
                    labels
                        .iter()
                        .map(Label::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let mut parts = Vec::new();
                if !added.is_empty() {
                    parts.push(format!("added labels {}", join(added)));
                }
                if !removed.is_empty() {
                    parts.push(format!("removed labels {}", join(removed)));
                }
                parts.join("; ")
            }
            Self::SetAssignee { assignee, .. } => {
                format!("set assignee \"{}\"", assignee.display_name())
            }
            Self::SetChecklist { checklist, .. } => format!("edited \"{}\"", checklist.title),
            Self::SetReview { review, .. } => {
                let mut tags = String::new();
                let mut comments = 0;
                for u in &review.updates {
                    match &u.transaction.kind {
                        TransactionKind::UserStatus { status } => {
                            tags.push_str(&format!("[{status}] "));
                        }
                        TransactionKind::Diff { diff_id } => {
                            tags.push_str(&format!("[diff>{diff_id}] "));
                        }
                        TransactionKind::Comment { .. } => comments += 1,
                        TransactionKind::Status { .. } => {}
                    }
                }
                match comments {
                    0 => {}
                    1 => tags.push_str("[1 comment] "),
                    n => tags.push_str(&format!("[{n} comments] ")),
                }
                format!("updated revision {} {}", review.revision_id, tags.trim_end())
            }
        }
    }
}

impl fmt::Display for TimelineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}) {:<20}: {}",
            format_time(self.when()),
            self.author().display_name(),
            self.describe()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::tests::comment;

    fn ren() -> Identity {
        Identity::bare("Ren", "ren@example.com")
    }

    #[test]
    fn comment_history_tracks_edits() {
        let mut c = CommentTimelineItem::new(Id::derive(b"c"), ren(), "first".into(), Vec::new(), 10);
        assert!(!c.edited());
        let editor = Identity::bare("Ash", "ash@example.com");
        c.append(editor.clone(), "second".into(), Vec::new(), 20);
        assert!(c.edited());
        assert_eq!(c.message, "second");
        assert_eq!(c.last_edit, 20);
        assert_eq!(c.created_at, 10);
        assert_eq!(c.history[1].author, editor);
        assert!(!c.message_is_empty());
    }

    #[test]
    fn display_uses_utc_time_and_padded_author() {
        let item = TimelineItem::SetStatus {
            id: Id::derive(b"s"),
            author: ren(),
            unix_time: 0,
            status: Status::Vetted,
        };
        assert_eq!(
            item.to_string(),
            format!("(01 Jan 70 00:00 UTC) {:<20}: set VETTED", "Ren")
        );
    }

    #[test]
    fn review_items_summarize_updates() {
        let review = ReviewInfo {
            revision_id: "D7".to_string(),
            updates: vec![comment("1", 5, "a"), comment("2", 5, "b")],
            ..ReviewInfo::default()
        };
        let item = TimelineItem::SetReview {
            id: Id::derive(b"r"),
            author: ren(),
            unix_time: 5,
            review,
        };
        assert!(item.to_string().ends_with("updated revision D7 [2 comments]"));
        assert_eq!(item.revision_id(), Some("D7"));
        assert!(item.comment().is_none());
    }

    #[test]
    fn label_changes_list_both_sides() {
        let item = TimelineItem::LabelChange {
            id: Id::derive(b"l"),
            author: ren(),
            unix_time: 1,
            added: vec![Label::from("a"), Label::from("b")],
            removed: vec![Label::from("c")],
        };
        assert!(item.to_string().ends_with("added labels a, b; removed labels c"));
    }
}

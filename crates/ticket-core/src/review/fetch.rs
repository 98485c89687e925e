//! Pulling review transactions from the external review server.
//!
//! The server is reached through [`TransactionSource`], which hands back
//! pages of raw transaction records. [`fetch_review_info`] walks the pages,
//! maps every recognised transaction to one typed [`ReviewUpdate`] and
//! records the newest transaction id seen as the watermark for the next
//! incremental fetch.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{PhabTransaction, ReviewInfo, ReviewUpdate, TransactionKind};

/// Malformed or unexpected data from the review feed. Aborts the fetch and
/// leaves the ticket's stored review state untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("revision id {0:?} has an unexpected format, expected D<number>")]
    InvalidRevisionId(String),

    #[error("transaction {transaction} is missing field `{field}`")]
    MissingField { transaction: u64, field: &'static str },

    #[error("revision {revision} references diff {phid} which gave no results")]
    UnresolvedDiff { revision: String, phid: String },

    #[error("review source failed: {0}")]
    Source(String),
}

/// What a review fetch amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Nothing arrived since the watermark. Not an error.
    UpToDate,
    /// A set-review operation carrying `updates` new updates was staged.
    Updated { updates: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSearchRequest {
    pub object_id: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Cursor {
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransactionPage {
    pub data: Vec<RawTransaction>,
    #[serde(default)]
    pub cursor: Cursor,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawComment {
    #[serde(default)]
    pub content: Map<String, Value>,
}

/// One transaction record as the review server reports it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTransaction {
    pub id: u64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "authorPHID", default)]
    pub author_phid: String,
    #[serde(rename = "dateCreated", default)]
    pub date_created: i64,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Versions of the comment, newest first.
    #[serde(default)]
    pub comments: Vec<RawComment>,
}

impl RawTransaction {
    fn str_field(&self, field: &'static str) -> Result<&str, ReconcileError> {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .ok_or(ReconcileError::MissingField {
                transaction: self.id,
                field,
            })
    }

    fn u64_field(&self, field: &'static str) -> Result<u64, ReconcileError> {
        self.fields
            .get(field)
            .and_then(Value::as_u64)
            .ok_or(ReconcileError::MissingField {
                transaction: self.id,
                field,
            })
    }

    fn comment_text(&self) -> Result<Option<String>, ReconcileError> {
        let Some(latest) = self.comments.first() else {
            return Ok(None);
        };
        latest
            .content
            .get("raw")
            .and_then(Value::as_str)
            .map(|s| Some(s.to_string()))
            .ok_or(ReconcileError::MissingField {
                transaction: self.id,
                field: "raw",
            })
    }

    fn update(&self, kind: TransactionKind) -> ReviewUpdate {
        ReviewUpdate::new(PhabTransaction {
            trans_id: self.id.to_string(),
            phab_user: self.author_phid.clone(),
            timestamp: self.date_created,
            kind,
        })
    }
}

/// The external review server.
pub trait TransactionSource {
    /// One page of transactions for `request.object_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Source`] on transport failure.
    fn transaction_search(
        &self,
        request: &TransactionSearchRequest,
    ) -> Result<TransactionPage, ReconcileError>;

    /// The numeric id of the diff with the given server reference, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Source`] on transport failure.
    fn diff_id_for(&self, phid: &str) -> Result<Option<u64>, ReconcileError>;
}

/// Check `id` looks like `D1234`.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidRevisionId`] otherwise.
pub fn validate_revision_id(id: &str) -> Result<(), ReconcileError> {
    let valid = id
        .strip_prefix('D')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(ReconcileError::InvalidRevisionId(id.to_string()))
    }
}

fn user_status(action: &str) -> Option<&'static str> {
    match action {
        "accept" => Some("accepted"),
        "close" => Some("closed"),
        "create" => Some("created"),
        "request-changes" => Some("changes requested"),
        "request-review" => Some("review requested"),
        _ => None,
    }
}

/// Fetch the transactions of `revision_id`, all of them or only those newer
/// than `since`.
///
/// A full fetch receives the newest transactions first and pages towards
/// older ones through the `after` cursor; an incremental fetch receives the
/// oldest first and pages towards newer ones through `before`. Either way
/// the returned watermark is the highest transaction id seen, or `since`
/// when nothing new arrived.
///
/// # Errors
///
/// Returns [`ReconcileError`] for a malformed revision id, a malformed
/// transaction, an unresolvable diff, or a failing source.
pub fn fetch_review_info(
    source: &dyn TransactionSource,
    revision_id: &str,
    since: Option<&str>,
    page_limit: u32,
) -> Result<ReviewInfo, ReconcileError> {
    validate_revision_id(revision_id)?;

    let incremental = since.is_some();
    let mut request = TransactionSearchRequest {
        object_id: revision_id.to_string(),
        before: since.map(str::to_string),
        after: None,
        limit: page_limit,
    };
    let mut result = ReviewInfo {
        revision_id: revision_id.to_string(),
        last_transaction: since.unwrap_or_default().to_string(),
        ..ReviewInfo::default()
    };
    let mut newest: Option<u64> = None;
    let mut title: Option<(u64, String)> = None;

    loop {
        let page = source.transaction_search(&request)?;
        if page.data.is_empty() {
            break;
        }
        debug!(
            revision = revision_id,
            transactions = page.data.len(),
            "received review transactions"
        );

        for t in &page.data {
            newest = Some(newest.map_or(t.id, |n| n.max(t.id)));
            let Some(kind) = t.kind.as_deref() else {
                continue;
            };
            match kind {
                "inline" => {
                    let Some(text) = t.comment_text()? else {
                        continue;
                    };
                    let diff = t
                        .fields
                        .get("diff")
                        .and_then(|d| d.get("id"))
                        .and_then(Value::as_u64)
                        .ok_or(ReconcileError::MissingField {
                            transaction: t.id,
                            field: "diff",
                        })?;
                    result.updates.push(t.update(TransactionKind::Comment {
                        diff: Some(diff),
                        path: Some(t.str_field("path")?.to_string()),
                        line: Some(t.u64_field("line")?),
                        text,
                    }));
                }
                "comment" => {
                    if let Some(text) = t.comment_text()? {
                        result.updates.push(t.update(TransactionKind::Comment {
                            diff: None,
                            path: None,
                            line: None,
                            text,
                        }));
                    }
                }
                "status" => {
                    let status = t.str_field("new")?.to_string();
                    result.updates.push(t.update(TransactionKind::Status { status }));
                }
                "title" => {
                    let new_title = t.str_field("new")?.to_string();
                    if title.as_ref().is_none_or(|(id, _)| t.id > *id) {
                        title = Some((t.id, new_title));
                    }
                }
                "update" => {
                    let phid = t.str_field("new")?;
                    let diff_id =
                        source
                            .diff_id_for(phid)?
                            .ok_or_else(|| ReconcileError::UnresolvedDiff {
                                revision: revision_id.to_string(),
                                phid: phid.to_string(),
                            })?;
                    result.updates.push(t.update(TransactionKind::Diff { diff_id }));
                }
                action => {
                    if let Some(status) = user_status(action) {
                        result.updates.push(t.update(TransactionKind::UserStatus {
                            status: status.to_string(),
                        }));
                    }
                }
            }
        }

        let next = if incremental {
            page.cursor.before
        } else {
            page.cursor.after
        };
        // An empty cursor means the server has nothing further.
        let Some(next) = next.filter(|c| !c.is_empty()) else {
            break;
        };
        if incremental {
            request.before = Some(next);
        } else {
            request.after = Some(next);
        }
    }

    if let Some(newest) = newest {
        result.last_transaction = newest.to_string();
    }
    if let Some((_, t)) = title {
        result.title = t;
    }
    result.updates.sort_by_key(ReviewUpdate::timestamp);
    Ok(result)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves canned pages keyed by the cursor of the request.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub pages: HashMap<(Option<String>, Option<String>), TransactionPage>,
        pub diffs: HashMap<String, u64>,
        pub requests: RefCell<Vec<TransactionSearchRequest>>,
    }

    impl TransactionSource for FakeSource {
        fn transaction_search(
            &self,
            request: &TransactionSearchRequest,
        ) -> Result<TransactionPage, ReconcileError> {
            self.requests.borrow_mut().push(request.clone());
            Ok(self
                .pages
                .get(&(request.before.clone(), request.after.clone()))
                .cloned()
                .unwrap_or_default())
        }

        fn diff_id_for(&self, phid: &str) -> Result<Option<u64>, ReconcileError> {
            Ok(self.diffs.get(phid).copied())
        }
    }

    pub(crate) fn raw(value: serde_json::Value) -> RawTransaction {
        serde_json::from_value(value).expect("raw transaction")
    }

    pub(crate) fn comment_tx(id: u64, ts: i64, text: &str) -> RawTransaction {
        raw(json!({
            "id": id, "type": "comment", "authorPHID": "PHID-USER-a",
            "dateCreated": ts, "comments": [{"content": {"raw": text}}]
        }))
    }

    fn page(data: Vec<RawTransaction>, before: Option<&str>, after: Option<&str>) -> TransactionPage {
        TransactionPage {
            data,
            cursor: Cursor {
                before: before.map(str::to_string),
                after: after.map(str::to_string),
            },
        }
    }

    #[test]
    fn revision_ids() {
        assert!(validate_revision_id("D1").is_ok());
        assert!(validate_revision_id("D").is_err());
        assert!(validate_revision_id("d12").is_err());
        assert!(validate_revision_id("D12a").is_err());
        assert!(fetch_review_info(&FakeSource::default(), "1234", None, 100).is_err());
    }

    #[test]
    fn full_fetch_walks_after_cursor_and_maps_every_kind() {
        let mut source = FakeSource::default();
        source.diffs.insert("PHID-DIFF-x".to_string(), 77);
        source.pages.insert(
            (None, None),
            page(
                vec![
                    raw(json!({"id": 9, "type": "accept", "authorPHID": "PHID-USER-b", "dateCreated": 90})),
                    raw(json!({"id": 8, "type": "title", "dateCreated": 80, "fields": {"old": "a", "new": "Better"}})),
                    raw(json!({"id": 7, "type": "status", "dateCreated": 70, "fields": {"old": "x", "new": "accepted"}})),
                    raw(json!({"id": 6, "type": "subscribers", "dateCreated": 60})),
                ],
                None,
                Some("6"),
            ),
        );
        source.pages.insert(
            (None, Some("6".to_string())),
            page(
                vec![
                    raw(json!({"id": 5, "type": "update", "dateCreated": 50, "fields": {"new": "PHID-DIFF-x"}})),
                    raw(json!({
                        "id": 4, "type": "inline", "dateCreated": 40,
                        "fields": {"diff": {"id": 76}, "path": "src/main.rs", "line": 12},
                        "comments": [{"content": {"raw": "nit"}}]
                    })),
                    comment_tx(3, 30, "looks good"),
                    raw(json!({"id": 2, "type": null, "dateCreated": 20})),
                ],
                Some("3"),
                None,
            ),
        );

        let info = fetch_review_info(&source, "D42", None, 4).expect("fetch");
        assert_eq!(info.last_transaction, "9");
        assert_eq!(info.title, "Better");
        let kinds: Vec<&str> = info.updates.iter().map(|u| u.transaction.kind.name()).collect();
        assert_eq!(kinds, ["comment", "comment", "diff", "status", "user status"]);
        assert_eq!(
            info.updates[2].transaction.kind,
            TransactionKind::Diff { diff_id: 77 }
        );
        assert_eq!(
            info.updates[4].transaction.kind,
            TransactionKind::UserStatus { status: "accepted".to_string() }
        );
        assert_eq!(source.requests.borrow().len(), 2);
        assert!(source.requests.borrow().iter().all(|r| r.limit == 4));
    }

    #[test]
    fn incremental_fetch_walks_before_cursor() {
        let mut source = FakeSource::default();
        source.pages.insert(
            (Some("10".to_string()), None),
            page(vec![comment_tx(11, 110, "a")], Some("11"), None),
        );
        source.pages.insert(
            (Some("11".to_string()), None),
            page(vec![comment_tx(12, 120, "b")], None, Some("12")),
        );
        let info = fetch_review_info(&source, "D1", Some("10"), 1).expect("fetch");
        assert_eq!(info.updates.len(), 2);
        assert_eq!(info.last_transaction, "12");
    }

    #[test]
    fn empty_cursor_ends_the_walk() {
        let mut source = FakeSource::default();
        source.pages.insert(
            (None, None),
            page(vec![comment_tx(5, 50, "only")], Some(""), Some("")),
        );
        // Sending the empty cursor back would serve the first page again.
        source.pages.insert(
            (None, Some(String::new())),
            page(vec![comment_tx(5, 50, "only")], Some(""), Some("")),
        );
        let info = fetch_review_info(&source, "D1", None, 100).expect("fetch");
        assert_eq!(source.requests.borrow().len(), 1);
        assert_eq!(info.updates.len(), 1);

        source.pages.insert(
            (Some("5".to_string()), None),
            page(vec![comment_tx(6, 60, "next")], Some(""), None),
        );
        source.pages.insert(
            (Some(String::new()), None),
            page(vec![comment_tx(6, 60, "next")], Some(""), None),
        );
        source.requests.borrow_mut().clear();
        let info = fetch_review_info(&source, "D1", Some("5"), 100).expect("fetch");
        assert_eq!(source.requests.borrow().len(), 1);
        assert_eq!(info.last_transaction, "6");
    }

    #[test]
    fn nothing_new_keeps_the_watermark() {
        let info = fetch_review_info(&FakeSource::default(), "D1", Some("10"), 100).expect("fetch");
        assert!(info.updates.is_empty());
        assert_eq!(info.last_transaction, "10");
    }

    #[test]
    fn malformed_transactions_abort_the_fetch() {
        let mut source = FakeSource::default();
        source.pages.insert(
            (None, None),
            page(vec![raw(json!({"id": 3, "type": "status", "dateCreated": 1}))], None, None),
        );
        assert_eq!(
            fetch_review_info(&source, "D1", None, 100),
            Err(ReconcileError::MissingField { transaction: 3, field: "new" })
        );

        source.pages.insert(
            (None, None),
            page(
                vec![raw(json!({"id": 4, "type": "update", "dateCreated": 1, "fields": {"new": "PHID-DIFF-gone"}}))],
                None,
                None,
            ),
        );
        assert!(matches!(
            fetch_review_info(&source, "D1", None, 100),
            Err(ReconcileError::UnresolvedDiff { .. })
        ));
    }
}

//! Authors and actors.
//!
//! An [`Identity`] comes in three forms:
//!
//! - **Stub**: only the content id is known. This is what a persisted
//!   identity deserializes to until a resolver loads the full record.
//! - **Bare**: an ad hoc identity whose whole record travels inline with
//!   every operation it authors.
//! - **Full**: a record stored under `refs/identities/<id>`; serialized by
//!   reference as `{"id": ...}`.
//!
//! Identities compare and hash by id only, so a stub equals the full
//! identity it resolves to.

mod resolver;

pub use resolver::{
    IDENTITY_REF_PREFIX, IdentityResolver, MemResolver, RepoResolver, ResolveError,
    read_identity, store_identity,
};

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::canonical::to_canonical_string;
use crate::id::Id;
use crate::operation::ValidationError;
use crate::operation::validate::{check_no_control, check_one_line};

/// The descriptive part of an identity. Its canonical JSON hashes to the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Public keys, armored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}

impl IdentityRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            login: None,
            avatar_url: None,
            keys: Vec::new(),
        }
    }

    /// The content id of this record.
    #[must_use]
    pub fn id(&self) -> Id {
        Id::derive(to_canonical_string(self).as_bytes())
    }
}

#[derive(Debug, Clone)]
pub enum Identity {
    Stub(Id),
    Bare { id: Id, record: IdentityRecord },
    Full { id: Id, record: IdentityRecord },
}

impl Identity {
    /// An ad hoc identity carried inline.
    #[must_use]
    pub fn bare(name: impl Into<String>, email: impl Into<String>) -> Self {
        let record = IdentityRecord::new(name, email);
        Self::Bare {
            id: record.id(),
            record,
        }
    }

    /// A persisted identity.
    #[must_use]
    pub fn full(record: IdentityRecord) -> Self {
        Self::Full {
            id: record.id(),
            record,
        }
    }

    #[must_use]
    pub const fn stub(id: Id) -> Self {
        Self::Stub(id)
    }

    #[must_use]
    pub const fn id(&self) -> &Id {
        match self {
            Self::Stub(id) | Self::Bare { id, .. } | Self::Full { id, .. } => id,
        }
    }

    #[must_use]
    pub const fn is_stub(&self) -> bool {
        matches!(self, Self::Stub(_))
    }

    #[must_use]
    pub const fn record(&self) -> Option<&IdentityRecord> {
        match self {
            Self::Stub(_) => None,
            Self::Bare { record, .. } | Self::Full { record, .. } => Some(record),
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.record().map(|r| r.name.as_str())
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.record().map(|r| r.email.as_str())
    }

    /// Name to show in timelines: the login when set, else the name, else
    /// the short id of an unresolved stub.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.record() {
            Some(r) => r.login.clone().unwrap_or_else(|| r.name.clone()),
            None => self.id().human().to_string(),
        }
    }

    /// Check the identity is well formed.
    ///
    /// Stubs are accepted as-is; resolving them is the replay's job.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty or multi-line name, a
    /// malformed email, or an id that does not match the record.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let Some(record) = self.record() else {
            return Ok(());
        };
        check_one_line("identity name", &record.name)?;
        check_no_control("identity email", &record.email)?;
        if record.email.contains('\n') {
            return Err(ValidationError::MultiLine("identity email"));
        }
        if &record.id() != self.id() {
            return Err(ValidationError::IdentityIdMismatch(self.id().clone()));
        }
        Ok(())
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

#[derive(Serialize)]
struct IdRef<'a> {
    id: &'a Id,
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bare { record, .. } => record.serialize(serializer),
            Self::Stub(id) | Self::Full { id, .. } => IdRef { id }.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
struct RawIdentity {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: String,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    keys: Vec<String>,
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawIdentity::deserialize(deserializer)?;
        if let Some(id) = raw.id {
            return Ok(Self::Stub(id));
        }
        let Some(name) = raw.name else {
            return Err(serde::de::Error::custom(
                "identity has neither an id nor a name",
            ));
        };
        let record = IdentityRecord {
            name,
            email: raw.email,
            login: raw.login,
            avatar_url: raw.avatar_url,
            keys: raw.keys,
        };
        Ok(Self::Bare {
            id: record.id(),
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_id() {
        let full = Identity::full(IdentityRecord::new("Ren", "ren@example.com"));
        let stub = Identity::stub(full.id().clone());
        assert_eq!(full, stub);
        assert_ne!(full, Identity::bare("Ren", "other@example.com"));
    }

    #[test]
    fn bare_serializes_inline_and_round_trips() {
        let bare = Identity::bare("Ren", "ren@example.com");
        let json = serde_json::to_value(&bare).expect("serialize");
        assert_eq!(json["name"], "Ren");
        assert!(json.get("id").is_none());
        let back: Identity = serde_json::from_value(json).expect("deserialize");
        assert!(matches!(back, Identity::Bare { .. }));
        assert_eq!(back, bare);
    }

    #[test]
    fn full_serializes_by_reference() {
        let full = Identity::full(IdentityRecord::new("Ren", "ren@example.com"));
        let json = serde_json::to_string(&full).expect("serialize");
        assert_eq!(json, format!("{{\"id\":\"{}\"}}", full.id()));
        let back: Identity = serde_json::from_str(&json).expect("deserialize");
        assert!(back.is_stub());
        assert_eq!(back, full);
    }

    #[test]
    fn empty_object_is_rejected() {
        assert!(serde_json::from_str::<Identity>("{}").is_err());
    }

    #[test]
    fn validation() {
        assert!(Identity::bare("Ren", "ren@example.com").validate().is_ok());
        assert!(Identity::bare("", "ren@example.com").validate().is_err());
        assert!(Identity::bare("Ren\nX", "").validate().is_err());

        let tampered = Identity::Bare {
            id: Id::derive(b"other"),
            record: IdentityRecord::new("Ren", ""),
        };
        assert!(matches!(
            tampered.validate(),
            Err(ValidationError::IdentityIdMismatch(_))
        ));
    }

    #[test]
    fn display_name_prefers_login() {
        let mut record = IdentityRecord::new("Ren Ito", "ren@example.com");
        assert_eq!(Identity::full(record.clone()).display_name(), "Ren Ito");
        record.login = Some("ren".into());
        assert_eq!(Identity::full(record).display_name(), "ren");
        let stub = Identity::stub(Id::derive(b"x"));
        assert_eq!(stub.display_name(), Id::derive(b"x").human());
    }
}

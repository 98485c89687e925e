//! Content-derived identifiers.
//!
//! An [`Id`] is the lowercase hex BLAKE3 digest of an entity's canonical
//! JSON form. Ids are used for operations, identities and tickets (a
//! ticket is identified by the id of its `Create` operation), and are
//! embedded in ref names, so the textual form is plain hex with no prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length of the hex form of an id.
pub const ID_LEN: usize = 64;

/// Length used when displaying an id to humans.
pub const HUMAN_ID_LEN: usize = 7;

/// Errors from parsing an [`Id`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("id has length {0}, expected {ID_LEN}")]
    BadLength(usize),

    #[error("id contains a non-hex character: {0:?}")]
    NotHex(char),
}

/// A content-derived entity id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(String);

impl Id {
    /// Hash `bytes` into an id.
    #[must_use]
    pub fn derive(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// The full hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short prefix suitable for terminal output.
    #[must_use]
    pub fn human(&self) -> &str {
        &self.0[..HUMAN_ID_LEN]
    }

    /// Check that `s` is a well-formed id.
    ///
    /// # Errors
    ///
    /// Returns [`IdError`] if `s` is not 64 lowercase hex characters.
    pub fn validate(s: &str) -> Result<(), IdError> {
        if s.len() != ID_LEN {
            return Err(IdError::BadLength(s.len()));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !matches!(c, '0'..='9' | 'a'..='f'))
        {
            return Err(IdError::NotHex(c));
        }
        Ok(())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Id {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_stable_and_hex() {
        let a = Id::derive(b"hello");
        let b = Id::derive(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), ID_LEN);
        assert!(Id::validate(a.as_str()).is_ok());
        assert_ne!(a, Id::derive(b"hello!"));
    }

    #[test]
    fn human_is_prefix() {
        let id = Id::derive(b"x");
        assert_eq!(id.human().len(), HUMAN_ID_LEN);
        assert!(id.as_str().starts_with(id.human()));
    }

    #[test]
    fn rejects_bad_forms() {
        assert_eq!("abc".parse::<Id>(), Err(IdError::BadLength(3)));
        let upper = "A".repeat(ID_LEN);
        assert_eq!(upper.parse::<Id>(), Err(IdError::NotHex('A')));
    }

    #[test]
    fn serde_round_trip_and_rejects_garbage() {
        let id = Id::derive(b"y");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
        let back: Id = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
        assert!(serde_json::from_str::<Id>("\"nope\"").is_err());
    }
}

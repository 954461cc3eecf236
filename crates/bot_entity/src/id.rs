//! Bot identifiers.
//!
//! A [`BotId`] is an opaque string. Ids are either supplied by the caller
//! (replicated bots keep the id their creator chose) or generated as UUID v4
//! strings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique bot identifier.
///
/// Bots are addressed only by id. Tags never hold a live reference to another
/// bot, only its id (directly or through a [`BotLink`](crate::BotLink)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(String);

impl BotId {
    /// Create an id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is non-empty.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BotId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BotId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for BotId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

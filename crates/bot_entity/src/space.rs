//! Tag-mask space ordering.
//!
//! Spaces are listed highest priority first. The order comes from
//! configuration; nothing in the store hard-codes space names.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The default space list, most ephemeral first.
pub const DEFAULT_SPACES: [&str; 4] = ["tempLocal", "local", "tempShared", "shared"];

/// The space a bot lives in when none is given at creation.
pub const DEFAULT_BOT_SPACE: &str = "shared";

/// An ordered list of tag-mask spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceOrder {
    spaces: Vec<String>,
}

impl SpaceOrder {
    /// Create an order from the given spaces, highest priority first.
    /// Duplicates keep their first position.
    #[must_use]
    pub fn new<S: Into<String>>(spaces: impl IntoIterator<Item = S>) -> Self {
        let mut ordered: Vec<String> = Vec::new();
        for space in spaces {
            let space = space.into();
            if !ordered.contains(&space) {
                ordered.push(space);
            }
        }
        Self { spaces: ordered }
    }

    /// Returns the priority rank of a space (0 = highest).
    #[must_use]
    pub fn rank(&self, space: &str) -> Option<usize> {
        self.spaces.iter().position(|s| s == space)
    }

    /// Returns `true` if `space` is configured.
    #[must_use]
    pub fn contains(&self, space: &str) -> bool {
        self.rank(space).is_some()
    }

    /// Fails with [`StoreError::UnknownSpace`] if the space is not configured.
    pub fn check(&self, space: &str) -> Result<(), StoreError> {
        if self.contains(space) {
            Ok(())
        } else {
            Err(StoreError::UnknownSpace(space.to_string()))
        }
    }

    /// Iterate spaces from highest to lowest priority.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.spaces.iter().map(String::as_str)
    }

    /// The highest-priority space.
    #[must_use]
    pub fn highest(&self) -> Option<&str> {
        self.spaces.first().map(String::as_str)
    }

    /// Number of configured spaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    /// Returns `true` if no spaces are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

impl Default for SpaceOrder {
    fn default() -> Self {
        Self::new(DEFAULT_SPACES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let order = SpaceOrder::default();
        assert_eq!(order.rank("tempLocal"), Some(0));
        assert_eq!(order.rank("shared"), Some(3));
        assert_eq!(order.highest(), Some("tempLocal"));
    }

    #[test]
    fn test_duplicates_keep_first_position() {
        let order = SpaceOrder::new(["a", "b", "a"]);
        assert_eq!(order.len(), 2);
        assert_eq!(order.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_check_unknown_space() {
        let order = SpaceOrder::new(["a"]);
        assert!(order.check("a").is_ok());
        assert_eq!(order.check("z"), Err(StoreError::UnknownSpace("z".to_string())));
    }
}

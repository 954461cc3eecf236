//! Store error types.

use crate::id::BotId;

/// Errors returned by [`BotStore`](crate::BotStore) operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// No bot with this id exists.
    #[error("bot {0} not found")]
    BotNotFound(BotId),

    /// A bot with this id already exists.
    #[error("bot {0} already exists")]
    DuplicateBot(BotId),

    /// The id is empty or whitespace.
    #[error("invalid bot id {0:?}")]
    InvalidBotId(String),

    /// The tag can be neither written directly nor overlaid.
    #[error("tag '{0}' is protected")]
    ProtectedTag(String),

    /// The tag name is empty.
    #[error("invalid tag name {0:?}")]
    InvalidTagName(String),

    /// The space is not part of the configured space order.
    #[error("unknown tag mask space '{0}'")]
    UnknownSpace(String),
}

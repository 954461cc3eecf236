//! # bot_entity
//!
//! The data side of the bot scripting runtime: what a bot is, how its tags
//! are stored, and how tag-mask overlays and text edits are applied.
//!
//! This crate provides:
//!
//! - [`BotId`]: opaque string bot identifiers.
//! - [`TagValue`] / [`BotLink`]: JSON-shaped tag values with a dedicated
//!   variant for references to other bots.
//! - [`Bot`] / [`BotSpec`]: the bot record, generic over its listener type.
//! - [`BotStore`]: registration-ordered storage with cascading destroy and
//!   change tracking.
//! - [`SpaceOrder`]: the configured priority order of tag-mask spaces.
//! - Tag-mask reads/writes and text edits, as methods on [`BotStore`].

pub mod bot;
pub mod edits;
pub mod error;
pub mod id;
mod masks;
pub mod space;
pub mod store;
pub mod value;

pub use bot::{Bot, BotSpec, CREATOR_TAG, DESTROYABLE_TAG, PROTECTED_TAGS, is_protected_tag};
pub use edits::{EditDescriptor, EditOp, EditVersion, TagEdit, apply_ops, resolve_index};
pub use error::StoreError;
pub use id::BotId;
pub use space::{DEFAULT_BOT_SPACE, DEFAULT_SPACES, SpaceOrder};
pub use store::{BotStore, ChangeSet};
pub use value::{BOT_LINK_SIGIL, BotLink, TagValue};

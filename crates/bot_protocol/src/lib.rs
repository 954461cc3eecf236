//! # bot_protocol
//!
//! Wire types for the boundary between the bot runtime and the host that
//! executes its side effects.
//!
//! This crate provides:
//!
//! - [`action`]: opaque side-effect records ([`Action`]).
//! - [`task`]: task ids and rejection payloads.
//! - [`messages`]: task completions from the host and per-tick runtime output.
//! - [`codec`]: MessagePack and JSON helpers.
//! - [`error`]: protocol error types.

pub mod action;
pub mod codec;
pub mod error;
pub mod messages;
pub mod task;

pub use action::Action;
pub use codec::{decode, decode_json, encode, encode_json};
pub use error::ProtocolError;
pub use messages::{ErrorRecord, HostMessage, RuntimeOutput};
pub use task::{TaskError, TaskId};

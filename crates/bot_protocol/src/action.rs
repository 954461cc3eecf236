//! Side-effect action records.
//!
//! The runtime never performs side effects itself. It appends [`Action`]s to
//! an ordered log that the host drains and executes. Only the `type`
//! discriminator is meaningful to the runtime; the payload is opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::TaskId;

/// One side-effect request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Discriminator, e.g. `"show_toast"` or `"send_webhook"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Set when the host is expected to complete a task with the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Opaque payload.
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    /// A fire-and-forget action.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            task_id: None,
            payload,
        }
    }

    /// An action whose result the host reports back through `task_id`.
    #[must_use]
    pub fn with_task(kind: impl Into<String>, payload: Value, task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::new(kind, payload)
        }
    }
}

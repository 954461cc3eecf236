//! Messages exchanged between the runtime and its host.
//!
//! [`HostMessage`] is the task completion interface: the only way results
//! produced outside the runtime get back to waiting scripts. [`RuntimeOutput`]
//! is what the host drains after giving the runtime control.

use bot_entity::{BotId, TagEdit};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;
use crate::task::{TaskError, TaskId};

// ── Host → runtime ──────────────────────────────────────────────────────────

/// A task completion delivered by the host or by a remote peer.
///
/// `remote` marks completions that originate from another process; they are
/// honoured only for tasks created as remote-resolvable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostMessage {
    /// Resolve a task with a value.
    ResolveTask {
        task_id: TaskId,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        remote: bool,
    },
    /// Reject a task.
    RejectTask {
        task_id: TaskId,
        error: TaskError,
        #[serde(default)]
        remote: bool,
    },
    /// Deliver one intermediate item to a streaming task.
    Next {
        task_id: TaskId,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        remote: bool,
    },
    /// End a streaming task's sequence.
    Complete {
        task_id: TaskId,
        #[serde(default)]
        remote: bool,
    },
}

impl HostMessage {
    /// The task this message completes.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::ResolveTask { task_id, .. }
            | Self::RejectTask { task_id, .. }
            | Self::Next { task_id, .. }
            | Self::Complete { task_id, .. } => *task_id,
        }
    }
}

// ── Runtime → host ──────────────────────────────────────────────────────────

/// A failure captured at a single listener, timer or continuation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The bot whose code failed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<BotId>,
    /// The event, timer or watcher name being handled.
    pub source: String,
    /// The error message.
    pub message: String,
}

/// Everything the runtime produced since the host last drained it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOutput {
    /// Tick counter at the time of draining.
    pub tick: u64,
    /// Clock reading at the time of draining, in milliseconds.
    pub now_ms: u64,
    pub actions: Vec<Action>,
    pub edits: Vec<TagEdit>,
    pub errors: Vec<ErrorRecord>,
}

impl RuntimeOutput {
    /// Returns `true` if the tick produced nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.edits.is_empty() && self.errors.is_empty()
    }
}

//! Task identifiers and rejection payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies a task bridging a script call to an externally produced result.
///
/// Ids are issued by the runtime from a monotonically increasing counter and
/// are never reused within one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Why a task was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    /// Human-readable reason.
    pub message: String,
    /// Status code for network-style failures (e.g. HTTP 503).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Arbitrary extra data supplied by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskError {
    /// A rejection with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            data: None,
        }
    }

    /// A rejection carrying a status code.
    #[must_use]
    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    /// Attach structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display_is_message() {
        let err = TaskError::with_status("service unavailable", 503);
        assert_eq!(err.to_string(), "service unavailable");
        assert_eq!(err.status, Some(503));
    }

    #[test]
    fn test_task_error_omits_empty_fields() {
        let text = serde_json::to_string(&TaskError::new("boom")).unwrap();
        assert_eq!(text, r#"{"message":"boom"}"#);
    }
}

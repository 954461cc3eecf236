//! Runtime and script error types.

use bot_entity::StoreError;

use crate::timers::TimerId;

/// Errors returned by runtime operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// The energy budget ran out. Aborts the whole in-flight dispatch chain.
    #[error("ran out of energy")]
    EnergyExhausted,

    /// A malformed argument was passed to a runtime call.
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("timer not found: {0}")]
    UnknownTimer(TimerId),
}

/// What a handler, timer callback or task continuation fails with.
///
/// A [`ScriptError::Thrown`] is captured at the boundary of the single bot
/// that raised it. A [`ScriptError::Abort`] unwinds to the original caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("{message}")]
    Thrown { message: String },

    #[error(transparent)]
    Abort(RuntimeError),
}

impl ScriptError {
    /// A captured, non-fatal script failure.
    #[must_use]
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown {
            message: message.into(),
        }
    }

    /// Returns `true` if this error unwinds the dispatch chain.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::EnergyExhausted => Self::Abort(err),
            other => Self::thrown(other.to_string()),
        }
    }
}

impl From<StoreError> for ScriptError {
    fn from(err: StoreError) -> Self {
        Self::thrown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use bot_entity::BotId;

    use super::*;

    #[test]
    fn test_energy_exhaustion_aborts() {
        let err = ScriptError::from(RuntimeError::EnergyExhausted);
        assert_eq!(err, ScriptError::Abort(RuntimeError::EnergyExhausted));
        assert!(err.is_abort());
    }

    #[test]
    fn test_other_runtime_errors_are_thrown() {
        let err = ScriptError::from(RuntimeError::Store(StoreError::BotNotFound(BotId::new("x"))));
        assert!(!err.is_abort());
        assert_eq!(err.to_string(), "bot x not found");
    }
}

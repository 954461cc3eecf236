//! Handler model.
//!
//! A [`Handler`] is a script function attached to a bot. It receives the
//! runtime handle and an [`Invocation`] and returns an [`Outcome`]: either a
//! value straight away, or a suspending [`Sequence`] that yields intermediate
//! states before its result. Sequences are driven to completion on the spot
//! by [`SequenceDriver`], a three-state machine; nothing runs concurrently.

use std::fmt;
use std::rc::Rc;

use bot_entity::{BotId, TagValue};
use tracing::trace;

use crate::error::ScriptError;
use crate::runtime::Runtime;

/// The arguments a listener is called with.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// The bot the listener belongs to.
    pub bot: BotId,
    /// The event name.
    pub name: String,
    pub arg: TagValue,
}

/// One resumption of a suspending handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// An intermediate state; the sequence will be resumed again.
    Yield(TagValue),
    /// The terminal result. `None` is "undefined".
    Done(Option<TagValue>),
}

/// A suspending computation.
pub trait Sequence {
    fn resume(&mut self, rt: &mut Runtime) -> Result<Step, ScriptError>;
}

impl<F> Sequence for F
where
    F: FnMut(&mut Runtime) -> Result<Step, ScriptError>,
{
    fn resume(&mut self, rt: &mut Runtime) -> Result<Step, ScriptError> {
        self(rt)
    }
}

/// What a handler produced.
pub enum Outcome {
    /// An immediate result. `None` is "undefined", `Some(TagValue::Null)` is
    /// an explicit null.
    Value(Option<TagValue>),
    Sequence(Box<dyn Sequence>),
}

impl Outcome {
    /// An immediate "undefined" result.
    #[must_use]
    pub fn undefined() -> Self {
        Self::Value(None)
    }

    /// An immediate value.
    #[must_use]
    pub fn value(value: impl Into<TagValue>) -> Self {
        Self::Value(Some(value.into()))
    }

    /// A suspending result.
    #[must_use]
    pub fn sequence(seq: impl Sequence + 'static) -> Self {
        Self::Sequence(Box::new(seq))
    }

    /// A sequence that yields each of `states` in turn, then finishes with
    /// `result`.
    #[must_use]
    pub fn yielding(states: Vec<TagValue>, result: Option<TagValue>) -> Self {
        let mut states = states.into_iter();
        let mut result = Some(result);
        Self::sequence(move |_: &mut Runtime| -> Result<Step, ScriptError> {
            Ok(match states.next() {
                Some(state) => Step::Yield(state),
                None => Step::Done(result.take().flatten()),
            })
        })
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

type HandlerFn = dyn Fn(&mut Runtime, &Invocation) -> Result<Outcome, ScriptError>;

/// A listener function. Cheap to clone.
#[derive(Clone)]
pub struct Handler(Rc<HandlerFn>);

impl Handler {
    /// Wrap a handler function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Runtime, &Invocation) -> Result<Outcome, ScriptError> + 'static,
    {
        Self(Rc::new(f))
    }

    /// A handler that only computes a return value.
    pub fn returning<F>(f: F) -> Self
    where
        F: Fn(&mut Runtime, &Invocation) -> Result<Option<TagValue>, ScriptError> + 'static,
    {
        Self::new(move |rt, inv| f(rt, inv).map(Outcome::Value))
    }

    /// Invoke the handler.
    pub fn call(&self, rt: &mut Runtime, invocation: &Invocation) -> Result<Outcome, ScriptError> {
        (self.0)(rt, invocation)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Rc::as_ptr(&self.0))
    }
}

// ── Sequence driving ────────────────────────────────────────────────────────

/// Where a suspending handler is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceState {
    NotStarted,
    /// Suspended after yielding this value.
    Suspended(TagValue),
    Done(Option<TagValue>),
}

/// Drives a [`Sequence`] synchronously until it finishes.
pub struct SequenceDriver {
    seq: Box<dyn Sequence>,
    state: SequenceState,
    steps: usize,
    max_steps: usize,
}

impl SequenceDriver {
    /// Wrap `seq`, allowing at most `max_steps` yields.
    #[must_use]
    pub fn new(seq: Box<dyn Sequence>, max_steps: usize) -> Self {
        Self {
            seq,
            state: SequenceState::NotStarted,
            steps: 0,
            max_steps,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &SequenceState {
        &self.state
    }

    /// Number of intermediate states yielded so far.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Resume once. Returns the new state.
    pub fn step(&mut self, rt: &mut Runtime) -> Result<&SequenceState, ScriptError> {
        if matches!(self.state, SequenceState::Done(_)) {
            return Ok(&self.state);
        }
        self.state = match self.seq.resume(rt)? {
            Step::Yield(value) => {
                self.steps += 1;
                if self.steps > self.max_steps {
                    return Err(ScriptError::thrown(format!(
                        "sequence yielded more than {} states",
                        self.max_steps
                    )));
                }
                trace!(step = self.steps, "sequence yielded");
                SequenceState::Suspended(value)
            }
            Step::Done(result) => SequenceState::Done(result),
        };
        Ok(&self.state)
    }

    /// Resume until done and return the terminal value.
    pub fn run(mut self, rt: &mut Runtime) -> Result<Option<TagValue>, ScriptError> {
        loop {
            if let SequenceState::Done(result) = self.step(rt)? {
                return Ok(result.clone());
            }
        }
    }
}

impl Runtime {
    /// Call a handler and drive any sequence it returns to completion.
    pub(crate) fn run_handler(
        &mut self,
        handler: &Handler,
        invocation: &Invocation,
    ) -> Result<Option<TagValue>, ScriptError> {
        let outcome = handler.call(self, invocation)?;
        self.settle_outcome(outcome)
    }

    pub(crate) fn settle_outcome(&mut self, outcome: Outcome) -> Result<Option<TagValue>, ScriptError> {
        match outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Sequence(seq) => {
                SequenceDriver::new(seq, self.config().max_sequence_steps).run(self)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default())
    }

    #[test]
    fn test_driver_walks_states() {
        let mut rt = runtime();
        let Outcome::Sequence(seq) = Outcome::yielding(
            vec![TagValue::from(1), TagValue::from(2)],
            Some(TagValue::from("done")),
        ) else {
            panic!("expected a sequence");
        };
        let mut driver = SequenceDriver::new(seq, 10);
        assert_eq!(driver.state(), &SequenceState::NotStarted);
        assert_eq!(
            driver.step(&mut rt).unwrap(),
            &SequenceState::Suspended(TagValue::from(1))
        );
        assert_eq!(driver.run(&mut rt).unwrap(), Some(TagValue::from("done")));
    }

    #[test]
    fn test_driver_enforces_step_limit() {
        let mut rt = runtime();
        let endless = Box::new(|_: &mut Runtime| -> Result<Step, ScriptError> {
            Ok(Step::Yield(TagValue::Null))
        });
        let err = SequenceDriver::new(endless, 5).run(&mut rt).unwrap_err();
        assert!(err.to_string().contains("more than 5"));
    }

    #[test]
    fn test_error_mid_sequence_is_returned() {
        let mut rt = runtime();
        let mut calls = 0;
        let failing = Box::new(move |_: &mut Runtime| -> Result<Step, ScriptError> {
            calls += 1;
            if calls < 3 {
                Ok(Step::Yield(TagValue::from(calls)))
            } else {
                Err(ScriptError::thrown("midway"))
            }
        });
        let err = SequenceDriver::new(failing, 100).run(&mut rt).unwrap_err();
        assert_eq!(err, ScriptError::thrown("midway"));
    }

    #[test]
    fn test_returning_handler() {
        let mut rt = runtime();
        let handler = Handler::returning(|_, inv| Ok(Some(inv.arg.clone())));
        let inv = Invocation {
            bot: BotId::new("a"),
            name: "echo".to_string(),
            arg: TagValue::from(7),
        };
        assert_eq!(rt.run_handler(&handler, &inv).unwrap(), Some(TagValue::from(7)));
    }
}

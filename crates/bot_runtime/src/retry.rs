//! Retrying task-bridged calls.
//!
//! [`Runtime::call_with_retry`] issues an action-backed task and, when it is
//! rejected with a retryable status while retries remain, waits and re-issues
//! a fresh task with the same payload. The handle it returns settles with the
//! first success, or with the most recent rejection once retrying stops.

use std::cell::Cell;
use std::rc::Rc;

use bot_protocol::{TaskError, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RuntimeError;
use crate::handler::Outcome;
use crate::runtime::Runtime;
use crate::tasks::{TaskHandle, TaskOptions};
use crate::timers::Callback;

/// Statuses retried by default: request timeout, rate limiting and transient
/// server errors.
pub const DEFAULT_RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// When and how often to retry a rejected call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait between a rejection and the next attempt.
    pub delay_ms: u64,
    /// Rejection statuses that may be retried. A rejection without a status
    /// is never retried.
    pub statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 3000,
            statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// A policy allowing `max_retries` retries.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Set the wait between attempts.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the retryable statuses.
    #[must_use]
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Whether `error` may be retried after `retries_made` retries.
    #[must_use]
    pub fn should_retry(&self, error: &TaskError, retries_made: u32) -> bool {
        retries_made < self.max_retries
            && error.status.is_some_and(|status| self.statuses.contains(&status))
    }
}

struct RetryState {
    kind: String,
    payload: Value,
    policy: RetryPolicy,
    outer: TaskId,
    retries: Cell<u32>,
}

impl Runtime {
    /// Issue `kind` as a task-bridged action, retrying per `policy`.
    pub fn call_with_retry(&mut self, kind: &str, payload: Value, policy: RetryPolicy) -> Result<TaskHandle, RuntimeError> {
        if kind.trim().is_empty() {
            return Err(RuntimeError::Validation("action type is empty".to_string()));
        }
        let outer = self.create_task(TaskOptions::default());
        let state = Rc::new(RetryState {
            kind: kind.to_string(),
            payload,
            policy,
            outer: outer.id(),
            retries: Cell::new(0),
        });
        attempt(self, state)?;
        Ok(outer)
    }
}

fn attempt(rt: &mut Runtime, state: Rc<RetryState>) -> Result<(), RuntimeError> {
    let inner = rt.call_async(&state.kind, state.payload.clone(), TaskOptions::default());
    debug!(
        outer = %state.outer,
        inner = %inner.id(),
        retry = state.retries.get(),
        "call attempt issued"
    );
    rt.on_settled(&inner, move |rt, result| {
        match result {
            Ok(value) => {
                rt.resolve_task(state.outer, value, false)?;
            }
            Err(error) if state.policy.should_retry(&error, state.retries.get()) => {
                state.retries.set(state.retries.get() + 1);
                debug!(
                    outer = %state.outer,
                    status = ?error.status,
                    delay_ms = state.policy.delay_ms,
                    "retrying rejected call"
                );
                let delay = state.policy.delay_ms;
                let next = Rc::clone(&state);
                rt.set_timeout(
                    None,
                    delay,
                    Callback::new(move |rt, _| {
                        attempt(rt, Rc::clone(&next))?;
                        Ok(Outcome::undefined())
                    }),
                )?;
            }
            Err(error) => {
                rt.reject_task(state.outer, error, false)?;
            }
        }
        Ok(())
    })
}

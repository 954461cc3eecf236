//! Task bridge.
//!
//! A task connects a script call to a result produced outside the runtime.
//! The script holds a [`TaskHandle`] (a [`Future`]) or a [`TaskStream`] (a
//! [`Stream`]); the host later completes the task through
//! [`Runtime::resolve_task`], [`Runtime::reject_task`],
//! [`Runtime::next_task_value`] and [`Runtime::complete_task`], or by handing
//! the runtime a [`HostMessage`].
//!
//! Completion happens exactly once: the registry entry is removed when a
//! task settles, so later completions for the same id are ignored.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use bot_protocol::{Action, HostMessage, TaskError, TaskId};
use futures::Stream;
use serde_json::Value;
use tracing::debug;

use crate::error::{RuntimeError, ScriptError};
use crate::runtime::Runtime;

/// How a task may be completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Accept completions flagged as coming from a remote peer.
    pub allow_remote: bool,
}

impl TaskOptions {
    /// Options for a task a remote peer may complete.
    #[must_use]
    pub fn remote() -> Self {
        Self { allow_remote: true }
    }
}

/// The settled value of a task.
pub type TaskResult = Result<Value, TaskError>;

// ── Handles ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TaskSlot {
    result: Option<TaskResult>,
    wakers: Vec<Waker>,
}

#[derive(Debug, Default)]
struct StreamSlot {
    items: VecDeque<TaskResult>,
    done: bool,
    waker: Option<Waker>,
}

/// The script side of a single-result task. Every clone observes the same
/// result.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    slot: Rc<RefCell<TaskSlot>>,
}

impl TaskHandle {
    /// Returns the task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns `true` once the task has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.slot.borrow().result.is_some()
    }

    /// The result, if the task has settled.
    #[must_use]
    pub fn result(&self) -> Option<TaskResult> {
        self.slot.borrow().result.clone()
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        match &slot.result {
            Some(result) => Poll::Ready(result.clone()),
            None => {
                slot.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// The script side of a streaming task: an ordered sequence of items that
/// ends on completion or after a rejection.
#[derive(Debug)]
pub struct TaskStream {
    id: TaskId,
    slot: Rc<RefCell<StreamSlot>>,
}

impl TaskStream {
    /// Returns the task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Stream for TaskStream {
    type Item = TaskResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut slot = self.slot.borrow_mut();
        if let Some(item) = slot.items.pop_front() {
            return Poll::Ready(Some(item));
        }
        if slot.done {
            return Poll::Ready(None);
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// A script continuation run when a task settles.
pub type Continuation = Box<dyn FnOnce(&mut Runtime, TaskResult) -> Result<(), ScriptError>>;

#[derive(Debug)]
enum Pending {
    Single(Rc<RefCell<TaskSlot>>),
    Stream(Rc<RefCell<StreamSlot>>),
}

#[derive(Debug)]
struct TaskEntry {
    allow_remote: bool,
    pending: Pending,
}

/// Outstanding tasks, keyed by id.
#[derive(Default)]
pub struct TaskRegistry {
    next_id: u64,
    entries: HashMap<TaskId, TaskEntry>,
    continuations: HashMap<TaskId, Vec<Continuation>>,
}

impl TaskRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    /// Register a single-result task.
    pub fn create(&mut self, options: TaskOptions) -> TaskHandle {
        let id = self.issue();
        let slot = Rc::new(RefCell::new(TaskSlot::default()));
        self.entries.insert(
            id,
            TaskEntry {
                allow_remote: options.allow_remote,
                pending: Pending::Single(Rc::clone(&slot)),
            },
        );
        TaskHandle { id, slot }
    }

    /// Register a streaming task.
    pub fn create_stream(&mut self, options: TaskOptions) -> TaskStream {
        let id = self.issue();
        let slot = Rc::new(RefCell::new(StreamSlot::default()));
        self.entries.insert(
            id,
            TaskEntry {
                allow_remote: options.allow_remote,
                pending: Pending::Stream(Rc::clone(&slot)),
            },
        );
        TaskStream { id, slot }
    }

    /// Returns `true` if `id` is still outstanding.
    #[must_use]
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of outstanding tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no task is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn accepts(&self, id: TaskId, remote: bool) -> bool {
        match self.entries.get(&id) {
            None => {
                debug!(task = %id, "completion for unknown or settled task ignored");
                false
            }
            Some(entry) if remote && !entry.allow_remote => {
                debug!(task = %id, "remote completion for local-only task ignored");
                false
            }
            Some(_) => true,
        }
    }

    /// Settle a task. Returns the continuations to run, or `None` when the
    /// completion was ignored.
    pub fn settle(&mut self, id: TaskId, result: TaskResult, remote: bool) -> Option<Vec<Continuation>> {
        if !self.accepts(id, remote) {
            return None;
        }
        let entry = self.entries.remove(&id)?;
        match entry.pending {
            Pending::Single(slot) => {
                let wakers = {
                    let mut slot = slot.borrow_mut();
                    slot.result = Some(result);
                    std::mem::take(&mut slot.wakers)
                };
                wakers.into_iter().for_each(Waker::wake);
            }
            Pending::Stream(slot) => {
                let waker = {
                    let mut slot = slot.borrow_mut();
                    match result {
                        Ok(Value::Null) => {}
                        other => slot.items.push_back(other),
                    }
                    slot.done = true;
                    slot.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
        }
        Some(self.continuations.remove(&id).unwrap_or_default())
    }

    /// Deliver one item to a streaming task.
    pub fn push_next(&mut self, id: TaskId, value: Value, remote: bool) -> bool {
        if !self.accepts(id, remote) {
            return false;
        }
        let Some(TaskEntry {
            pending: Pending::Stream(slot),
            ..
        }) = self.entries.get(&id)
        else {
            debug!(task = %id, "next for non-streaming task ignored");
            return false;
        };
        let waker = {
            let mut slot = slot.borrow_mut();
            slot.items.push_back(Ok(value));
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// End a streaming task.
    pub fn complete(&mut self, id: TaskId, remote: bool) -> bool {
        if !matches!(
            self.entries.get(&id),
            Some(TaskEntry {
                pending: Pending::Stream(_),
                ..
            })
        ) {
            debug!(task = %id, "complete for unknown or non-streaming task ignored");
            return false;
        }
        self.settle(id, Ok(Value::Null), remote).is_some()
    }

    /// Run `continuation` when `id` settles.
    pub fn add_continuation(&mut self, id: TaskId, continuation: Continuation) {
        self.continuations.entry(id).or_default().push(continuation);
    }

    /// Reject every outstanding task and drop all continuations.
    pub fn reject_all(&mut self, error: &TaskError) -> usize {
        let ids: Vec<TaskId> = self.entries.keys().copied().collect();
        for id in &ids {
            self.settle(*id, Err(error.clone()), false);
        }
        self.continuations.clear();
        ids.len()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("next_id", &self.next_id)
            .field("pending", &self.entries.len())
            .field("continuations", &self.continuations.len())
            .finish()
    }
}

// ── Runtime API ─────────────────────────────────────────────────────────────

impl Runtime {
    /// Create a task completed by the host.
    pub fn create_task(&mut self, options: TaskOptions) -> TaskHandle {
        self.tasks.create(options)
    }

    /// Create a streaming task completed by the host.
    pub fn create_stream(&mut self, options: TaskOptions) -> TaskStream {
        self.tasks.create_stream(options)
    }

    /// Create a task and append an action carrying its id.
    pub fn call_async(&mut self, kind: &str, payload: Value, options: TaskOptions) -> TaskHandle {
        let handle = self.tasks.create(options);
        self.enqueue_action(Action::with_task(kind, payload, handle.id()));
        handle
    }

    /// Like [`call_async`](Self::call_async), for a streaming result.
    pub fn call_stream(&mut self, kind: &str, payload: Value, options: TaskOptions) -> TaskStream {
        let stream = self.tasks.create_stream(options);
        self.enqueue_action(Action::with_task(kind, payload, stream.id()));
        stream
    }

    /// Run `continuation` when `handle` settles, or right away if it already
    /// has.
    pub fn on_settled<F>(&mut self, handle: &TaskHandle, continuation: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut Runtime, TaskResult) -> Result<(), ScriptError> + 'static,
    {
        let continuation: Continuation = Box::new(continuation);
        match handle.result() {
            Some(result) => self.run_continuations(handle.id(), vec![continuation], result),
            None => {
                self.tasks.add_continuation(handle.id(), continuation);
                Ok(())
            }
        }
    }

    /// Resolve a task. Returns `false` if the completion was ignored.
    ///
    /// Fails only if a continuation ran out of energy.
    pub fn resolve_task(&mut self, id: TaskId, value: Value, remote: bool) -> Result<bool, RuntimeError> {
        self.settle_task(id, Ok(value), remote)
    }

    /// Reject a task. Returns `false` if the completion was ignored.
    pub fn reject_task(&mut self, id: TaskId, error: TaskError, remote: bool) -> Result<bool, RuntimeError> {
        self.settle_task(id, Err(error), remote)
    }

    /// Deliver an intermediate item to a streaming task.
    pub fn next_task_value(&mut self, id: TaskId, value: Value, remote: bool) -> bool {
        self.tasks.push_next(id, value, remote)
    }

    /// End a streaming task's sequence.
    pub fn complete_task(&mut self, id: TaskId, remote: bool) -> bool {
        self.tasks.complete(id, remote)
    }

    /// Apply a completion message from the host.
    pub fn handle_message(&mut self, message: HostMessage) -> Result<bool, RuntimeError> {
        match message {
            HostMessage::ResolveTask {
                task_id,
                value,
                remote,
            } => self.resolve_task(task_id, value, remote),
            HostMessage::RejectTask {
                task_id,
                error,
                remote,
            } => self.reject_task(task_id, error, remote),
            HostMessage::Next {
                task_id,
                value,
                remote,
            } => Ok(self.next_task_value(task_id, value, remote)),
            HostMessage::Complete { task_id, remote } => Ok(self.complete_task(task_id, remote)),
        }
    }

    fn settle_task(&mut self, id: TaskId, result: TaskResult, remote: bool) -> Result<bool, RuntimeError> {
        let Some(continuations) = self.tasks.settle(id, result.clone(), remote) else {
            return Ok(false);
        };
        debug!(task = %id, ok = result.is_ok(), "task settled");
        self.run_continuations(id, continuations, result)?;
        Ok(true)
    }

    fn run_continuations(
        &mut self,
        id: TaskId,
        continuations: Vec<Continuation>,
        result: TaskResult,
    ) -> Result<(), RuntimeError> {
        for continuation in continuations {
            match continuation(self, result.clone()) {
                Ok(()) => {}
                Err(ScriptError::Abort(err)) => return Err(err),
                Err(err) => self.record_error(None, &id.to_string(), &err),
            }
        }
        Ok(())
    }
}

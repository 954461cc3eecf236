//! Timer and watcher registry.
//!
//! Timeouts and intervals fire from [`Runtime::tick`] against the injected
//! clock. Bot and partition watchers fire from [`Runtime::process_changes`]
//! when the store reports a change. Every registration owned by a bot is
//! removed together when that bot is destroyed.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bot_entity::BotId;
use tracing::{debug, trace};

use crate::error::{RuntimeError, ScriptError};
use crate::handler::Outcome;
use crate::runtime::Runtime;

/// Identifies a timer or watcher registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({})", self.0)
    }
}

/// What a timer waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    Timeout { due_ms: u64 },
    Interval { due_ms: u64, period_ms: u64 },
    BotWatcher { target: BotId },
    PartitionWatcher { space: String },
}

impl TimerKind {
    fn due_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout { due_ms } | Self::Interval { due_ms, .. } => Some(*due_ms),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Interval { .. } => "interval",
            Self::BotWatcher { .. } => "bot watcher",
            Self::PartitionWatcher { .. } => "partition watcher",
        }
    }
}

/// Why a callback is being invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Timeout,
    Interval,
    BotChanged(BotId),
    PartitionChanged(String),
}

impl Trigger {
    fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Interval => "interval",
            Self::BotChanged(_) => "bot watcher",
            Self::PartitionChanged(_) => "partition watcher",
        }
    }
}

type CallbackFn = dyn Fn(&mut Runtime, &Trigger) -> Result<Outcome, ScriptError>;

/// A timer or watcher callback. May return a suspending sequence, which is
/// driven like a listener's.
#[derive(Clone)]
pub struct Callback(Rc<CallbackFn>);

impl Callback {
    /// Wrap a callback function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Runtime, &Trigger) -> Result<Outcome, ScriptError> + 'static,
    {
        Self(Rc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, rt: &mut Runtime, trigger: &Trigger) -> Result<Outcome, ScriptError> {
        (self.0)(rt, trigger)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.0))
    }
}

#[derive(Debug, Clone)]
struct Timer {
    kind: TimerKind,
    /// `None` for runtime-internal timers, such as retry back-off.
    owner: Option<BotId>,
    callback: Callback,
}

/// All live timers and watchers.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    next_id: u64,
    timers: BTreeMap<TimerId, Timer>,
}

impl TimerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer. Returns its id.
    pub fn insert(&mut self, kind: TimerKind, owner: Option<BotId>, callback: Callback) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        trace!(timer = %id, kind = kind.label(), "timer registered");
        self.timers.insert(
            id,
            Timer {
                kind,
                owner,
                callback,
            },
        );
        id
    }

    /// Remove a timer. Returns `false` if it was unknown.
    pub fn remove(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Remove every registration owned by `owner`. Returns how many were
    /// removed.
    pub fn remove_owned(&mut self, owner: &BotId) -> usize {
        let before = self.timers.len();
        self.timers.retain(|_, timer| timer.owner.as_ref() != Some(owner));
        before - self.timers.len()
    }

    /// Returns `true` if the timer is registered.
    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// What the timer waits for.
    #[must_use]
    pub fn kind(&self, id: TimerId) -> Option<&TimerKind> {
        self.timers.get(&id).map(|timer| &timer.kind)
    }

    /// The bot owning the timer.
    #[must_use]
    pub fn owner(&self, id: TimerId) -> Option<&BotId> {
        self.timers.get(&id).and_then(|timer| timer.owner.as_ref())
    }

    /// Timeouts and intervals due at `now_ms`, earliest first.
    #[must_use]
    pub fn due(&self, now_ms: u64) -> Vec<TimerId> {
        let mut due: Vec<(u64, TimerId)> = self
            .timers
            .iter()
            .filter_map(|(id, timer)| timer.kind.due_ms().map(|at| (at, *id)))
            .filter(|(at, _)| *at <= now_ms)
            .collect();
        due.sort_unstable();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Watchers of one bot, in registration order.
    #[must_use]
    pub fn bot_watchers(&self, target: &BotId) -> Vec<TimerId> {
        self.watchers(|kind| matches!(kind, TimerKind::BotWatcher { target: t } if t == target))
    }

    /// Watchers of one partition, in registration order.
    #[must_use]
    pub fn partition_watchers(&self, space: &str) -> Vec<TimerId> {
        self.watchers(|kind| matches!(kind, TimerKind::PartitionWatcher { space: s } if s == space))
    }

    fn watchers(&self, pred: impl Fn(&TimerKind) -> bool) -> Vec<TimerId> {
        self.timers
            .iter()
            .filter(|(_, timer)| pred(&timer.kind))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Prepare a due timer for firing: one-shot timers are removed, intervals
    /// are rescheduled. Missed periods are skipped, so an interval fires at
    /// most once per call.
    fn take_due(&mut self, id: TimerId, now_ms: u64) -> Option<(Callback, Option<BotId>, Trigger)> {
        if matches!(self.timers.get(&id)?.kind, TimerKind::Timeout { .. }) {
            let timer = self.timers.remove(&id)?;
            return Some((timer.callback, timer.owner, Trigger::Timeout));
        }
        let timer = self.timers.get_mut(&id)?;
        let TimerKind::Interval { due_ms, period_ms } = &mut timer.kind else {
            return None;
        };
        let mut next = due_ms.saturating_add(*period_ms);
        if next <= now_ms {
            next = now_ms.saturating_add(*period_ms);
        }
        *due_ms = next;
        Some((timer.callback.clone(), timer.owner.clone(), Trigger::Interval))
    }

    fn callback(&self, id: TimerId) -> Option<(Callback, Option<BotId>)> {
        self.timers
            .get(&id)
            .map(|timer| (timer.callback.clone(), timer.owner.clone()))
    }

    /// Number of registered timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Returns `true` if no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Remove every timer.
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

// ── Runtime API ─────────────────────────────────────────────────────────────

impl Runtime {
    /// Run `callback` once, `delay_ms` from now.
    pub fn set_timeout(
        &mut self,
        owner: Option<&BotId>,
        delay_ms: u64,
        callback: Callback,
    ) -> Result<TimerId, RuntimeError> {
        let due_ms = self.now_ms().saturating_add(delay_ms);
        self.register_timer(TimerKind::Timeout { due_ms }, owner, callback)
    }

    /// Run `callback` every `period_ms`, starting `period_ms` from now.
    pub fn set_interval(
        &mut self,
        owner: Option<&BotId>,
        period_ms: u64,
        callback: Callback,
    ) -> Result<TimerId, RuntimeError> {
        let due_ms = self.now_ms().saturating_add(period_ms);
        self.register_timer(TimerKind::Interval { due_ms, period_ms }, owner, callback)
    }

    /// Run `callback` whenever `target` changes or is destroyed.
    pub fn watch_bot(
        &mut self,
        owner: Option<&BotId>,
        target: &BotId,
        callback: Callback,
    ) -> Result<TimerId, RuntimeError> {
        if !target.is_valid() {
            return Err(RuntimeError::Validation("watched bot id is empty".to_string()));
        }
        let kind = TimerKind::BotWatcher {
            target: target.clone(),
        };
        self.register_timer(kind, owner, callback)
    }

    /// Run `callback` whenever any bot in `space` changes.
    pub fn watch_partition(
        &mut self,
        owner: Option<&BotId>,
        space: &str,
        callback: Callback,
    ) -> Result<TimerId, RuntimeError> {
        if space.trim().is_empty() {
            return Err(RuntimeError::Validation("watched partition is empty".to_string()));
        }
        let kind = TimerKind::PartitionWatcher {
            space: space.to_string(),
        };
        self.register_timer(kind, owner, callback)
    }

    /// Cancel a timer or watcher.
    pub fn clear_timer(&mut self, id: TimerId) -> Result<(), RuntimeError> {
        if self.timers.remove(id) {
            debug!(timer = %id, "timer cleared");
            Ok(())
        } else {
            Err(RuntimeError::UnknownTimer(id))
        }
    }

    /// The timer registry.
    #[must_use]
    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Fire watchers for everything the store changed since the last call.
    /// Returns the number of callbacks run.
    ///
    /// Changes made by the callbacks themselves are left for the next call.
    pub fn process_changes(&mut self) -> usize {
        let changes = self.store.take_changes();
        let mut fired = 0;
        for id in changes.bots.iter().chain(&changes.destroyed) {
            fired += self.notify_bot_changed(id);
        }
        for space in &changes.spaces {
            fired += self.notify_partition_changed(space);
        }
        fired
    }

    /// Fire the watchers of one bot. Returns the number of callbacks run.
    pub fn notify_bot_changed(&mut self, target: &BotId) -> usize {
        let trigger = Trigger::BotChanged(target.clone());
        let ids = self.timers.bot_watchers(target);
        self.fire_watchers(&ids, &trigger)
    }

    /// Fire the watchers of one partition. Returns the number of callbacks run.
    pub fn notify_partition_changed(&mut self, space: &str) -> usize {
        let trigger = Trigger::PartitionChanged(space.to_string());
        let ids = self.timers.partition_watchers(space);
        self.fire_watchers(&ids, &trigger)
    }

    fn fire_watchers(&mut self, ids: &[TimerId], trigger: &Trigger) -> usize {
        let mut fired = 0;
        for id in ids {
            // A previous callback may have removed this one.
            let Some((callback, owner)) = self.timers.callback(*id) else {
                continue;
            };
            self.run_callback(*id, owner.as_ref(), &callback, trigger);
            fired += 1;
        }
        fired
    }

    /// Fire every timeout and interval due at the current clock reading.
    pub(crate) fn fire_due_timers(&mut self) -> usize {
        let now = self.now_ms();
        let mut fired = 0;
        for id in self.timers.due(now) {
            let Some((callback, owner, trigger)) = self.timers.take_due(id, now) else {
                continue;
            };
            self.run_callback(id, owner.as_ref(), &callback, &trigger);
            fired += 1;
        }
        fired
    }

    fn register_timer(
        &mut self,
        kind: TimerKind,
        owner: Option<&BotId>,
        callback: Callback,
    ) -> Result<TimerId, RuntimeError> {
        if let Some(owner) = owner {
            self.store.bot(owner)?;
        }
        Ok(self.timers.insert(kind, owner.cloned(), callback))
    }

    /// Errors, including energy exhaustion, are queued rather than returned.
    fn run_callback(&mut self, id: TimerId, owner: Option<&BotId>, callback: &Callback, trigger: &Trigger) {
        let result = callback
            .call(self, trigger)
            .and_then(|outcome| self.settle_outcome(outcome));
        if let Err(err) = result {
            let source = format!("{} {id}", trigger.label());
            self.record_error(owner, &source, &err);
        }
    }
}

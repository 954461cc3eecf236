//! The runtime handle.
//!
//! [`Runtime`] owns one simulation: the bot store, the energy meter, the task,
//! timer and animation registries, the action log and the error queue. Every
//! engine call goes through it; handlers receive it as `&mut Runtime`.
//!
//! Lifecycle: construct once with [`Runtime::new`], drive with
//! [`Runtime::tick`] and the task completion calls, drain with
//! [`Runtime::drain_output`], and tear down once with [`Runtime::shutdown`].

use std::rc::Rc;

use bot_entity::{Bot, BotId, BotSpec, BotStore, EditDescriptor, TagEdit, TagValue};
use bot_protocol::{Action, ErrorRecord, RuntimeOutput, TaskError};
use tracing::{debug, info, warn};

use crate::animation::AnimationScheduler;
use crate::clock::{Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::energy::EnergyMeter;
use crate::error::{RuntimeError, ScriptError};
use crate::handler::Handler;
use crate::hooks::BotHooks;
use crate::tasks::TaskRegistry;
use crate::timers::TimerRegistry;

/// Rejection delivered to tasks still pending at shutdown.
pub const SHUTDOWN_MESSAGE: &str = "runtime shut down";

/// The runtime handle: every store, registry and queue of one simulation.
pub struct Runtime {
    config: RuntimeConfig,
    pub(crate) store: BotStore<Handler>,
    pub(crate) energy: EnergyMeter,
    pub(crate) tasks: TaskRegistry,
    pub(crate) timers: TimerRegistry,
    pub(crate) animations: AnimationScheduler,
    clock: Rc<dyn Clock>,
    hooks: Vec<Box<dyn BotHooks>>,
    actions: Vec<Action>,
    errors: Vec<ErrorRecord>,
    tick: u64,
}

impl Runtime {
    /// Create a runtime on the system clock.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let store = BotStore::new(config.spaces.clone()).with_site_id(config.site_id.clone());
        Self {
            energy: EnergyMeter::new(config.energy),
            store,
            tasks: TaskRegistry::new(),
            timers: TimerRegistry::new(),
            animations: AnimationScheduler::new(),
            clock: Rc::new(SystemClock::new()),
            hooks: Vec::new(),
            actions: Vec::new(),
            errors: Vec::new(),
            tick: 0,
            config,
        }
    }

    /// Replace the clock, e.g. with a [`VirtualClock`](crate::VirtualClock).
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Rc::new(clock);
        self
    }

    /// Register lifecycle hooks. Hooks run in registration order.
    pub fn add_hooks(&mut self, hooks: impl BotHooks + 'static) {
        self.hooks.push(Box::new(hooks));
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current clock reading in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Number of completed [`tick`](Self::tick) calls.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    // -- Energy --

    /// Energy units left.
    #[must_use]
    pub fn energy(&self) -> i64 {
        self.energy.remaining()
    }

    /// Overwrite the energy left.
    pub fn set_energy(&mut self, energy: i64) {
        self.energy.set(energy);
    }

    /// Restore the configured energy budget.
    pub fn reset_energy(&mut self) {
        self.energy.reset();
    }

    // -- Bots --

    /// The bot store.
    #[must_use]
    pub fn store(&self) -> &BotStore<Handler> {
        &self.store
    }

    /// Look up a bot.
    #[must_use]
    pub fn bot(&self, id: &BotId) -> Option<&Bot<Handler>> {
        self.store.get(id)
    }

    /// Create a bot and run creation hooks.
    pub fn create_bot(&mut self, spec: BotSpec<Handler>) -> Result<BotId, RuntimeError> {
        let id = self.store.create(spec)?;
        for hooks in &mut self.hooks {
            hooks.on_created(&id);
        }
        Ok(id)
    }

    /// Destroy a bot and its creator-linked descendants. Timers, watchers and
    /// animations owned by each destroyed bot go with it.
    pub fn destroy_bot(&mut self, id: &BotId) -> Vec<BotId> {
        let destroyed = self.store.destroy(id);
        for bot in &destroyed {
            let timers = self.timers.remove_owned(bot);
            if timers > 0 {
                debug!(bot = %bot, timers, "timers removed with bot");
            }
            if let Err(err) = self.cancel_animation(bot, None) {
                self.record_error(Some(bot), "destroy", &ScriptError::Abort(err));
            }
            for hooks in &mut self.hooks {
                hooks.on_destroyed(bot);
            }
        }
        destroyed
    }

    /// Ids of bots matching a predicate, in registration order.
    pub fn query_bots(&self, predicate: impl FnMut(&Bot<Handler>) -> bool) -> Vec<BotId> {
        self.store.query(predicate)
    }

    /// Attach a listener at runtime. It runs for effect only: its return
    /// value is never collected.
    pub fn add_listener(&mut self, id: &BotId, name: &str, handler: Handler) -> Result<(), RuntimeError> {
        if name.trim().is_empty() {
            return Err(RuntimeError::Validation("event name is empty".to_string()));
        }
        Ok(self.store.add_dynamic_listener(id, name, handler)?)
    }

    /// Remove the dynamic listeners for `name`. Returns how many were removed.
    pub fn remove_listeners(&mut self, id: &BotId, name: &str) -> Result<usize, RuntimeError> {
        Ok(self.store.clear_dynamic_listeners(id, name)?)
    }

    // -- Tags and masks --

    /// The base value of a tag, ignoring masks.
    #[must_use]
    pub fn get_tag(&self, id: &BotId, tag: &str) -> Option<&TagValue> {
        self.store.get_tag(id, tag)
    }

    /// The value of a tag as seen through its masks.
    #[must_use]
    pub fn effective_tag(&self, id: &BotId, tag: &str) -> Option<&TagValue> {
        self.store.effective_tag(id, tag)
    }

    /// Set a base tag.
    pub fn set_tag(&mut self, id: &BotId, tag: &str, value: TagValue) -> Result<(), RuntimeError> {
        Ok(self.store.set_tag(id, tag, value)?)
    }

    /// The mask value of a tag in one space.
    #[must_use]
    pub fn get_tag_mask(&self, id: &BotId, tag: &str, space: &str) -> Option<&TagValue> {
        self.store.tag_mask(id, tag, space)
    }

    /// Write a tag mask in one space.
    pub fn set_tag_mask(&mut self, id: &BotId, tag: &str, value: TagValue, space: &str) -> Result<(), RuntimeError> {
        Ok(self.store.set_tag_mask(id, tag, value, space)?)
    }

    /// Clear masks; see [`BotStore::clear_tag_masks`].
    pub fn clear_tag_masks(
        &mut self,
        id: &BotId,
        tag: Option<&str>,
        space: Option<&str>,
    ) -> Result<usize, RuntimeError> {
        Ok(self.store.clear_tag_masks(id, tag, space)?)
    }

    /// Insert text into a tag. See [`BotStore::insert_text`].
    pub fn insert_text(
        &mut self,
        id: &BotId,
        tag: &str,
        index: i64,
        text: &str,
        space: Option<&str>,
    ) -> Result<EditDescriptor, RuntimeError> {
        Ok(self.store.insert_text(id, tag, index, text, space)?)
    }

    /// Delete text from a tag. See [`BotStore::delete_text`].
    pub fn delete_text(
        &mut self,
        id: &BotId,
        tag: &str,
        index: i64,
        count: usize,
        space: Option<&str>,
    ) -> Result<EditDescriptor, RuntimeError> {
        Ok(self.store.delete_text(id, tag, index, count, space)?)
    }

    /// Apply an edit merged by the replicated-document layer.
    pub fn apply_edit(
        &mut self,
        id: &BotId,
        tag: &str,
        edit: &EditDescriptor,
        space: Option<&str>,
    ) -> Result<(), RuntimeError> {
        Ok(self.store.apply_edit(id, tag, edit, space)?)
    }

    /// Drain locally produced text edits.
    pub fn take_edits(&mut self) -> Vec<TagEdit> {
        self.store.take_edits()
    }

    // -- Action log and error queue --

    /// Append an action to the action log.
    pub fn enqueue_action(&mut self, action: Action) {
        debug!(kind = %action.kind, task = ?action.task_id, "action queued");
        self.actions.push(action);
    }

    /// Drain the action log.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    /// Errors captured since the last drain.
    #[must_use]
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Drain the error queue.
    pub fn take_errors(&mut self) -> Vec<ErrorRecord> {
        std::mem::take(&mut self.errors)
    }

    pub(crate) fn record_error(&mut self, bot: Option<&BotId>, source: &str, err: &ScriptError) {
        warn!(bot = ?bot.map(BotId::as_str), source, %err, "script error");
        self.errors.push(ErrorRecord {
            bot: bot.cloned(),
            source: source.to_string(),
            message: err.to_string(),
        });
    }

    // -- Driving --

    /// Advance the runtime to the current clock reading: fire due timers,
    /// step animations, then fire watchers for the resulting changes.
    pub fn tick(&mut self) {
        self.tick += 1;
        let timers = self.fire_due_timers();
        self.advance_animations();
        let watchers = self.process_changes();
        debug!(
            tick = self.tick,
            now_ms = self.now_ms(),
            timers,
            watchers,
            "tick complete"
        );
    }

    /// Everything produced since the last drain.
    pub fn drain_output(&mut self) -> RuntimeOutput {
        RuntimeOutput {
            tick: self.tick,
            now_ms: self.now_ms(),
            actions: self.take_actions(),
            edits: self.take_edits(),
            errors: self.take_errors(),
        }
    }

    /// Tear down: reject pending tasks and animations, drop all timers.
    /// Returns whatever output was still undrained.
    pub fn shutdown(mut self) -> RuntimeOutput {
        let animations = self.animations.clear().len();
        let tasks = self.tasks.reject_all(&TaskError::new(SHUTDOWN_MESSAGE));
        let timers = self.timers.len();
        self.timers.clear();
        info!(
            ticks = self.tick,
            bots = self.store.len(),
            tasks,
            animations,
            timers,
            "runtime shut down"
        );
        self.drain_output()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tick", &self.tick)
            .field("bots", &self.store.len())
            .field("energy", &self.energy.remaining())
            .field("tasks", &self.tasks)
            .field("timers", &self.timers.len())
            .field("animations", &self.animations.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::clock::VirtualClock;
    use crate::tasks::TaskOptions;
    use crate::timers::Callback;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default().with_site_id("site"))
    }

    #[test]
    fn test_mask_layer_through_runtime() {
        let mut rt = runtime();
        let id = rt
            .create_bot(BotSpec::new().with_id("a").with_tag("color", "red"))
            .unwrap();
        rt.set_tag_mask(&id, "color", TagValue::from("blue"), "local").unwrap();
        rt.set_tag_mask(&id, "color", TagValue::from("green"), "tempLocal")
            .unwrap();
        assert_eq!(rt.effective_tag(&id, "color"), Some(&TagValue::from("green")));

        assert_eq!(rt.clear_tag_masks(&id, None, Some("tempLocal")).unwrap(), 1);
        assert_eq!(rt.effective_tag(&id, "color"), Some(&TagValue::from("blue")));

        assert_eq!(rt.clear_tag_masks(&id, None, None).unwrap(), 1);
        assert_eq!(rt.effective_tag(&id, "color"), Some(&TagValue::from("red")));
    }

    #[test]
    fn test_text_edits_reach_output() {
        let mut rt = runtime();
        let id = rt
            .create_bot(BotSpec::new().with_id("a").with_tag("label", "abc"))
            .unwrap();
        let edit = rt.insert_text(&id, "label", -1, "X", None).unwrap();
        assert_eq!(edit.version.site, "site");
        assert_eq!(rt.get_tag(&id, "label"), Some(&TagValue::from("abXc")));

        let output = rt.drain_output();
        assert_eq!(output.edits.len(), 1);
        assert!(rt.drain_output().is_empty());
    }

    #[test]
    fn test_protected_tags_are_rejected() {
        let mut rt = runtime();
        let id = rt.create_bot(BotSpec::new().with_id("a")).unwrap();
        assert!(matches!(
            rt.set_tag(&id, "id", TagValue::from("b")),
            Err(RuntimeError::Store(_))
        ));
        assert!(matches!(
            rt.set_tag_mask(&id, "space", TagValue::from("x"), "local"),
            Err(RuntimeError::Store(_))
        ));
    }

    #[test]
    fn test_cascade_destroy_through_runtime() {
        let mut rt = runtime();
        let root = rt.create_bot(BotSpec::new().with_id("root")).unwrap();
        rt.create_bot(BotSpec::new().with_id("child").with_creator("root"))
            .unwrap();
        rt.create_bot(
            BotSpec::new()
                .with_id("keeper")
                .with_creator("root")
                .with_tag("destroyable", false),
        )
        .unwrap();
        let destroyed = rt.destroy_bot(&root);
        assert_eq!(destroyed, vec![BotId::new("root"), BotId::new("child")]);
        assert!(rt.bot(&BotId::new("keeper")).is_some());
        assert!(rt.destroy_bot(&BotId::new("ghost")).is_empty());
    }

    #[test]
    fn test_query_bots() {
        let mut rt = runtime();
        rt.create_bot(BotSpec::new().with_id("a").with_tag("kind", "tree"))
            .unwrap();
        rt.create_bot(BotSpec::new().with_id("b")).unwrap();
        let trees = rt.query_bots(|bot| bot.tag("kind").is_some());
        assert_eq!(trees, vec![BotId::new("a")]);
    }

    #[test]
    fn test_energy_reset() {
        let mut rt = Runtime::new(RuntimeConfig::default().with_energy(10));
        rt.set_energy(2);
        assert_eq!(rt.energy(), 2);
        rt.reset_energy();
        assert_eq!(rt.energy(), 10);
    }

    #[test]
    fn test_add_listener_validates_name() {
        let mut rt = runtime();
        let id = rt.create_bot(BotSpec::new().with_id("a")).unwrap();
        let handler = Handler::returning(|_, _| Ok(None));
        assert!(matches!(
            rt.add_listener(&id, " ", handler.clone()),
            Err(RuntimeError::Validation(_))
        ));
        rt.add_listener(&id, "go", handler).unwrap();
        assert_eq!(rt.remove_listeners(&id, "go").unwrap(), 1);
    }

    #[test]
    fn test_tick_counts_and_output_carries_time() {
        let clock = VirtualClock::new();
        let mut rt = runtime().with_clock(clock.clone());
        clock.advance(40);
        rt.tick();
        rt.tick();
        let output = rt.drain_output();
        assert_eq!(output.tick, 2);
        assert_eq!(output.now_ms, 40);
    }

    #[test]
    fn test_shutdown_rejects_pending_work() {
        let clock = VirtualClock::new();
        let mut rt = runtime().with_clock(clock);
        let bot = rt.create_bot(BotSpec::new().with_id("a")).unwrap();
        let task = rt.call_async("fetch", json!(null), TaskOptions::default());
        let animation = rt
            .animate(
                &[bot.clone()],
                "x",
                Some(crate::AnimationOptions::to(1, 10.0)),
            )
            .unwrap();
        rt.set_interval(
            Some(&bot),
            10,
            Callback::new(|_, _| Ok(crate::Outcome::undefined())),
        )
        .unwrap();

        let output = rt.shutdown();
        assert_eq!(output.actions.len(), 1);
        let err = task.now_or_never().unwrap().unwrap_err();
        assert_eq!(err.message, SHUTDOWN_MESSAGE);
        assert!(animation.result().unwrap().is_err());
    }
}

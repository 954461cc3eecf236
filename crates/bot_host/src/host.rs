//! Fixed-timestep host loop.
//!
//! Each tick:
//!
//! 1. Advance the virtual clock by one tick interval and refill energy.
//! 2. Deliver task completions that have come due.
//! 3. Apply the scenario events scheduled for this tick.
//! 4. Tick the runtime (timers, animations, watchers).
//! 5. Drain the output and schedule answers for new task-bearing actions.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use bot_protocol::{HostMessage, RuntimeOutput};
use bot_runtime::{Runtime, RuntimeConfig, RuntimeError, VirtualClock};
use tracing::{debug, info, warn};

use crate::scenario::{Event, Response, Scenario, ScheduledEvent};
use crate::script;

/// Configuration for the host tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Number of ticks to run.
    pub max_ticks: u64,
    /// Sleep between ticks to match wall-clock time.
    pub realtime: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 600,
            realtime: false,
        }
    }
}

impl TickConfig {
    /// Virtual milliseconds per tick, never zero.
    #[must_use]
    pub fn tick_ms(&self) -> u64 {
        ((1000.0 / self.tick_rate).round() as u64).max(1)
    }
}

/// The host's tick loop state.
#[derive(Debug)]
pub struct HostLoop {
    tick_id: u64,
    config: TickConfig,
    runtime: Runtime,
    clock: VirtualClock,
    /// Scenario events, sorted by tick.
    events: Vec<ScheduledEvent>,
    responses: BTreeMap<String, Vec<Response>>,
    /// How many answers each action type has used.
    answered: BTreeMap<String, usize>,
    /// Completions waiting for their tick.
    pending: Vec<(u64, HostMessage)>,
}

impl HostLoop {
    /// Build a runtime from `runtime_config` and create the scenario's bots.
    pub fn new(config: TickConfig, runtime_config: RuntimeConfig, scenario: Scenario) -> Result<Self> {
        anyhow::ensure!(
            config.tick_rate.is_finite() && config.tick_rate > 0.0,
            "tick rate must be positive, got {}",
            config.tick_rate
        );
        let clock = VirtualClock::new();
        let mut runtime = Runtime::new(runtime_config).with_clock(clock.clone());
        let bots = script::spawn(&mut runtime, &scenario.bots)?;
        info!(bots = bots.len(), events = scenario.events.len(), "scenario loaded");

        let mut events = scenario.events;
        events.sort_by_key(|event| event.tick);
        Ok(Self {
            tick_id: 0,
            config,
            runtime,
            clock,
            events,
            responses: scenario.responses,
            answered: BTreeMap::new(),
            pending: Vec::new(),
        })
    }

    /// Returns the current tick counter.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Returns the driven runtime.
    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run one tick and return what the runtime produced.
    pub fn tick(&mut self) -> Result<RuntimeOutput> {
        self.tick_id += 1;
        self.clock.advance(self.config.tick_ms());
        self.runtime.reset_energy();

        let due: Vec<HostMessage> = {
            let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|(tick, _)| *tick <= self.tick_id);
            self.pending = later;
            due.into_iter().map(|(_, message)| message).collect()
        };
        for message in due {
            let task_id = message.task_id();
            match self.runtime.handle_message(message) {
                Ok(true) => debug!(tick_id = self.tick_id, %task_id, "task completion delivered"),
                Ok(false) => debug!(tick_id = self.tick_id, %task_id, "task completion ignored"),
                Err(e) => warn!(tick_id = self.tick_id, %task_id, error = %e, "task continuation aborted"),
            }
        }

        let split = self.events.partition_point(|event| event.tick <= self.tick_id);
        let events: Vec<ScheduledEvent> = self.events.drain(..split).collect();
        for scheduled in events {
            if let Err(e) = self.apply(scheduled.event) {
                warn!(tick_id = self.tick_id, error = %e, "scenario event failed");
            }
        }

        self.runtime.tick();
        let output = self.runtime.drain_output();
        self.schedule_responses(&output);
        Ok(output)
    }

    /// Run the configured number of ticks, passing every non-empty output
    /// to `sink`. Returns the runtime's final output after shutdown.
    pub async fn run(mut self, mut sink: impl FnMut(&RuntimeOutput) -> Result<()>) -> Result<RuntimeOutput> {
        let tick_duration = Duration::from_secs_f64(1.0 / self.config.tick_rate);
        let mut interval = tokio::time::interval(tick_duration);
        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            realtime = self.config.realtime,
            "starting tick loop"
        );

        while self.tick_id < self.config.max_ticks {
            if self.config.realtime {
                interval.tick().await;
            }
            let start = Instant::now();
            let output = self.tick()?;
            if !output.is_empty() {
                sink(&output)?;
            }
            let elapsed = start.elapsed();
            if self.config.realtime && elapsed > tick_duration {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }

        info!(ticks = self.tick_id, pending = self.pending.len(), "tick loop complete");
        Ok(self.runtime.shutdown())
    }

    fn apply(&mut self, event: Event) -> Result<(), RuntimeError> {
        let rt = &mut self.runtime;
        match event {
            Event::Shout { name, arg } => {
                let responses = rt.shout(&name, arg)?;
                debug!(%name, responses = responses.len(), "shout");
            }
            Event::Whisper { bots, name, arg } => {
                let responses = rt.whisper(&bots, &name, arg)?;
                debug!(%name, responses = responses.len(), "whisper");
            }
            Event::PriorityShout { names, arg } => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                let response = rt.priority_shout(&names, arg)?;
                debug!(?names, answered = response.is_some(), "priority shout");
            }
            Event::SetTag {
                bot,
                tag,
                value,
                space,
            } => match space {
                Some(space) => rt.set_tag_mask(&bot, &tag, value, &space)?,
                None => rt.set_tag(&bot, &tag, value)?,
            },
            Event::InsertText {
                bot,
                tag,
                index,
                text,
                space,
            } => {
                rt.insert_text(&bot, &tag, index, &text, space.as_deref())?;
            }
            Event::DeleteText {
                bot,
                tag,
                index,
                count,
                space,
            } => {
                rt.delete_text(&bot, &tag, index, count, space.as_deref())?;
            }
            Event::ClearMasks { bot, tag, space } => {
                rt.clear_tag_masks(&bot, tag.as_deref(), space.as_deref())?;
            }
            Event::Destroy { bot } => {
                let destroyed = rt.destroy_bot(&bot);
                debug!(bot = %bot, destroyed = destroyed.len(), "destroy");
            }
            Event::Message(message) => {
                rt.handle_message(message)?;
            }
        }
        Ok(())
    }

    /// Queue the configured answer for every new task-bearing action.
    fn schedule_responses(&mut self, output: &RuntimeOutput) {
        for action in &output.actions {
            let Some(task_id) = action.task_id else {
                continue;
            };
            let Some(answers) = self.responses.get(&action.kind) else {
                continue;
            };
            let used = self.answered.entry(action.kind.clone()).or_default();
            let Some(answer) = answers.get(*used).or_else(|| answers.last()) else {
                continue;
            };
            *used += 1;
            let at = self.tick_id + answer.delay_ticks.max(1);
            debug!(%task_id, kind = %action.kind, at, "task answer scheduled");
            self.pending.push((at, answer.message(task_id)));
        }
    }
}

#[cfg(test)]
mod tests {
    use bot_entity::{BotId, TagValue};
    use serde_json::json;

    use super::*;

    fn tag(host: &HostLoop, bot: &str, name: &str) -> Option<TagValue> {
        host.runtime.effective_tag(&BotId::new(bot), name).cloned()
    }

    fn host(scenario: serde_json::Value) -> HostLoop {
        let scenario: Scenario = serde_json::from_value(scenario).unwrap();
        let config = TickConfig {
            tick_rate: 10.0,
            max_ticks: 20,
            realtime: false,
        };
        HostLoop::new(config, RuntimeConfig::default(), scenario).unwrap()
    }

    #[test]
    fn test_tick_advances_counter_and_clock() {
        let mut host = host(json!({}));
        assert_eq!(host.tick_id(), 0);
        let output = host.tick().unwrap();
        assert_eq!(host.tick_id(), 1);
        assert_eq!(output.now_ms, 100);
        assert!(output.is_empty());
    }

    #[test]
    fn test_events_fire_on_their_tick() {
        let mut host = host(json!({
            "bots": [{
                "id": "a",
                "listeners": { "go": [ { "action": { "type": "toast", "payload": "hi" } } ] }
            }],
            "events": [ { "tick": 2, "shout": { "name": "go" } } ]
        }));
        assert!(host.tick().unwrap().actions.is_empty());
        let output = host.tick().unwrap();
        assert_eq!(output.actions.len(), 1);
        assert_eq!(output.actions[0].kind, "toast");
    }

    #[test]
    fn test_responses_answer_tasks_after_delay() {
        let mut host = host(json!({
            "bots": [{
                "id": "a",
                "listeners": {
                    "go": [ { "call": { "type": "fetch", "reply": "done" } } ],
                    "done": [ { "set_tag": { "tag": "result", "value": "got it" } } ]
                }
            }],
            "events": [ { "tick": 1, "shout": { "name": "go" } } ],
            "responses": { "fetch": [ { "value": 1, "delay_ticks": 2 } ] }
        }));
        host.tick().unwrap();
        host.tick().unwrap();
        assert_eq!(tag(&host, "a", "result"), None);
        host.tick().unwrap();
        assert_eq!(tag(&host, "a", "result"), Some(TagValue::from("got it")));
    }

    #[test]
    fn test_retry_uses_answers_in_order() {
        let mut host = host(json!({
            "bots": [{
                "id": "a",
                "listeners": {
                    "go": [ { "call": {
                        "type": "fetch",
                        "retry": { "max_retries": 2, "delay_ms": 100 },
                        "reply": "done"
                    } } ],
                    "done": [ { "set_tag": { "tag": "result", "value": "ok" } } ]
                }
            }],
            "events": [ { "tick": 1, "shout": { "name": "go" } } ],
            "responses": { "fetch": [
                { "error": { "message": "busy", "status": 503 } },
                { "value": "fine" }
            ] }
        }));
        let mut fetches = 0;
        for _ in 0..10 {
            let output = host.tick().unwrap();
            fetches += output.actions.iter().filter(|a| a.kind == "fetch").count();
        }
        assert_eq!(fetches, 2);
        assert_eq!(tag(&host, "a", "result"), Some(TagValue::from("ok")));
    }

    #[test]
    fn test_animation_runs_on_virtual_clock() {
        let mut host = host(json!({
            "bots": [{
                "id": "a",
                "tags": { "x": 0 },
                "listeners": { "go": [ { "animate": {
                    "tag": "x", "to": 10, "duration": 0.5,
                    "easing": { "type": "linear", "mode": "inOut" }
                } } ] }
            }],
            "events": [ { "tick": 1, "shout": { "name": "go" } } ]
        }));
        host.tick().unwrap();
        for _ in 0..6 {
            host.tick().unwrap();
        }
        assert_eq!(tag(&host, "a", "x"), Some(TagValue::from(10)));
    }

    #[tokio::test]
    async fn test_run_stops_at_max_ticks_and_shuts_down() {
        let host = host(json!({
            "bots": [{
                "id": "a",
                "listeners": { "go": [ { "call": { "type": "never" } } ] }
            }],
            "events": [ { "tick": 1, "shout": { "name": "go" } } ]
        }));
        let mut seen = Vec::new();
        let last = host
            .run(|output| {
                seen.push(output.tick);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![1]);
        assert!(last.actions.is_empty());
    }
}

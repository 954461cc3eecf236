//! Scenario files.
//!
//! A scenario is a JSON document describing the bots to create, what their
//! listeners do, what happens on which tick, and how the host answers
//! task-bearing actions.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use bot_entity::{BotId, DEFAULT_BOT_SPACE, TagValue};
use bot_protocol::{HostMessage, TaskError};
use bot_runtime::{AnimationOptions, RetryPolicy, RuntimeConfig};
use serde::Deserialize;
use serde_json::Value;

/// A complete scenario file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Runtime configuration, used when no `--config` file is given.
    pub config: Option<RuntimeConfig>,
    pub bots: Vec<BotDef>,
    pub events: Vec<ScheduledEvent>,
    /// How the host answers task-bearing actions, keyed by action type.
    pub responses: BTreeMap<String, Vec<Response>>,
}

impl Scenario {
    /// Read and parse a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }
}

fn default_space() -> String {
    DEFAULT_BOT_SPACE.to_string()
}

/// A bot to create when the scenario starts.
#[derive(Debug, Clone, Deserialize)]
pub struct BotDef {
    #[serde(default)]
    pub id: Option<BotId>,
    #[serde(default = "default_space")]
    pub space: String,
    #[serde(default)]
    pub tags: BTreeMap<String, TagValue>,
    /// Static listeners: their return values are collected.
    #[serde(default)]
    pub listeners: BTreeMap<String, Vec<Reaction>>,
    /// Listeners attached after creation, run for effect only.
    #[serde(default)]
    pub dynamic_listeners: BTreeMap<String, Vec<Reaction>>,
}

/// One step of a declarative listener, run against the listening bot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reaction {
    SetTag {
        tag: String,
        value: TagValue,
        #[serde(default)]
        space: Option<String>,
    },
    Shout {
        name: String,
        #[serde(default)]
        arg: TagValue,
    },
    Whisper {
        bots: Vec<BotId>,
        name: String,
        #[serde(default)]
        arg: TagValue,
    },
    /// Append a fire-and-forget action.
    Action {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        payload: Value,
    },
    /// Append a task-bearing action; when it settles, whisper `reply` to this
    /// bot with the result (or `{ "error": message }`).
    Call {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        retry: Option<RetryPolicy>,
        #[serde(default)]
        reply: Option<String>,
    },
    Animate {
        tag: String,
        #[serde(flatten)]
        options: AnimationOptions,
    },
    /// Whisper `name` to this bot after `delay_ms`.
    Timeout { delay_ms: u64, name: String },
    /// Destroy a bot, or this bot when `bot` is absent.
    Destroy {
        #[serde(default)]
        bot: Option<BotId>,
    },
    Throw(String),
    /// Stop here and return a value.
    Return(TagValue),
}

/// An event with the tick it fires on.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledEvent {
    /// The tick the event is applied on, before the runtime ticks.
    pub tick: u64,
    #[serde(flatten)]
    pub event: Event,
}

/// Something the host does to the runtime between ticks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Shout {
        name: String,
        #[serde(default)]
        arg: TagValue,
    },
    Whisper {
        bots: Vec<BotId>,
        name: String,
        #[serde(default)]
        arg: TagValue,
    },
    PriorityShout {
        names: Vec<String>,
        #[serde(default)]
        arg: TagValue,
    },
    SetTag {
        bot: BotId,
        tag: String,
        value: TagValue,
        #[serde(default)]
        space: Option<String>,
    },
    InsertText {
        bot: BotId,
        tag: String,
        index: i64,
        text: String,
        #[serde(default)]
        space: Option<String>,
    },
    DeleteText {
        bot: BotId,
        tag: String,
        index: i64,
        count: usize,
        #[serde(default)]
        space: Option<String>,
    },
    ClearMasks {
        bot: BotId,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        space: Option<String>,
    },
    Destroy {
        bot: BotId,
    },
    /// Deliver a task completion as if from the network.
    Message(HostMessage),
}

/// One answer to a task-bearing action. Answers for an action type are used
/// in order; the last one repeats.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Response {
    pub value: Value,
    pub error: Option<TaskError>,
    /// Ticks between the action and its completion (at least one).
    pub delay_ticks: u64,
}

impl Response {
    /// The completion message for `task_id`.
    #[must_use]
    pub fn message(&self, task_id: bot_protocol::TaskId) -> HostMessage {
        match &self.error {
            Some(error) => HostMessage::RejectTask {
                task_id,
                error: error.clone(),
                remote: false,
            },
            None => HostMessage::ResolveTask {
                task_id,
                value: self.value.clone(),
                remote: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_scenario() {
        let scenario: Scenario = serde_json::from_value(json!({
            "bots": [
                {
                    "id": "lamp",
                    "tags": { "color": "red" },
                    "listeners": {
                        "onClick": [
                            { "set_tag": { "tag": "color", "value": "green" } },
                            { "animate": { "tag": "brightness", "to": 1, "duration": 0.5 } },
                            { "return": "clicked" }
                        ]
                    }
                }
            ],
            "events": [
                { "tick": 1, "shout": { "name": "onClick" } },
                { "tick": 4, "message": { "kind": "complete", "task_id": 2 } }
            ],
            "responses": {
                "fetch": [ { "error": { "message": "busy", "status": 503 } }, { "value": 1 } ]
            }
        }))
        .unwrap();

        let lamp = &scenario.bots[0];
        assert_eq!(lamp.space, "shared");
        assert_eq!(lamp.listeners["onClick"].len(), 3);
        assert!(matches!(
            &lamp.listeners["onClick"][1],
            Reaction::Animate { options, .. } if options.duration == 0.5
        ));
        assert!(matches!(scenario.events[0].event, Event::Shout { .. }));
        assert_eq!(scenario.responses["fetch"][0].error.as_ref().unwrap().status, Some(503));
    }

    #[test]
    fn test_response_message() {
        let ok = Response {
            value: json!("done"),
            ..Response::default()
        };
        assert!(matches!(
            ok.message(bot_protocol::TaskId(1)),
            HostMessage::ResolveTask { .. }
        ));
    }
}

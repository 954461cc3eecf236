//! # bot_runtime
//!
//! The scripting engine of the bot simulation: it resolves which bots respond
//! to an event, runs their handlers under an energy budget, isolates
//! per-bot failures, bridges script calls to externally completed tasks, and
//! drives timers, watchers and animations from an injectable clock.
//!
//! Execution is single-threaded and cooperative. All state lives in one
//! [`Runtime`] handle that is passed to every handler.
//!
//! This crate provides:
//!
//! - [`runtime`]: the [`Runtime`] handle and its bot, tag and mask API.
//! - [`dispatch`]: shout, whisper and priority shout.
//! - [`handler`]: listeners, suspending sequences and their driver.
//! - [`energy`]: the per-call energy meter.
//! - [`tasks`] / [`retry`]: the task bridge and retrying calls.
//! - [`timers`]: timeouts, intervals and change watchers.
//! - [`animation`]: eased, grouped tag animation.
//! - [`clock`]: system and virtual clocks.
//! - [`config`]: [`RuntimeConfig`].
//!
//! ## Usage
//!
//! ```rust
//! use bot_entity::{BotSpec, TagValue};
//! use bot_runtime::{Handler, Runtime, RuntimeConfig};
//!
//! let mut rt = Runtime::new(RuntimeConfig::default());
//! rt.create_bot(
//!     BotSpec::new()
//!         .with_id("greeter")
//!         .with_listener("sayHello", Handler::returning(|_, _| Ok(Some(TagValue::from("hi"))))),
//! )
//! .unwrap();
//!
//! let replies = rt.shout("sayHello", TagValue::Null).unwrap();
//! assert_eq!(replies, vec![Some(TagValue::from("hi"))]);
//! ```

pub mod animation;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod energy;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod retry;
pub mod runtime;
pub mod tasks;
pub mod timers;

pub use animation::{AnimationOptions, AnimationTarget, Easing, EasingMode, EasingType};
pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::{ListeningTags, RuntimeConfig};
pub use dispatch::{ON_ANY_LISTEN, ON_LISTEN};
pub use energy::EnergyMeter;
pub use error::{RuntimeError, ScriptError};
pub use handler::{Handler, Invocation, Outcome, Sequence, SequenceDriver, SequenceState, Step};
pub use hooks::BotHooks;
pub use retry::RetryPolicy;
pub use runtime::Runtime;
pub use tasks::{TaskHandle, TaskOptions, TaskResult, TaskStream};
pub use timers::{Callback, TimerId, Trigger};

pub use bot_protocol::{TaskError, TaskId};

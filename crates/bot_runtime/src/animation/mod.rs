//! Animation scheduler.
//!
//! `animate` starts one group per call covering every (bot, tag) pair it
//! names. Groups advance on discrete [`Runtime::tick`](crate::Runtime::tick)
//! calls against the injected clock, write interpolated values into a tag-mask
//! space (or base tags), and settle their task when done. Cancelling any
//! member cancels and rejects the whole group.

pub mod easing;
pub mod interpolate;
pub mod scheduler;

pub use easing::{Easing, EasingMode, EasingType};
pub use interpolate::{Animatable, interpolate};
pub use scheduler::{AnimationOptions, AnimationScheduler, AnimationTarget, GroupId};

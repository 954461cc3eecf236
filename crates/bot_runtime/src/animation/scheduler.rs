//! Animation groups and their runtime API.

use std::collections::BTreeMap;

use bot_entity::{BotId, TagValue, is_protected_tag};
use bot_protocol::{TaskError, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::easing::Easing;
use super::interpolate::interpolate;
use crate::error::{RuntimeError, ScriptError};
use crate::runtime::Runtime;
use crate::tasks::{TaskHandle, TaskOptions};

/// Message of the rejection delivered to cancelled groups.
pub const CANCELLED_MESSAGE: &str = "animation cancelled";

/// Identifies the group started by one `animate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u64);

/// What to animate: one tag, or several tags each with its own target.
#[derive(Debug, Clone, PartialEq)]
pub enum AnimationTarget {
    Tag(String),
    Tags(BTreeMap<String, TagValue>),
}

impl AnimationTarget {
    fn tag_names(&self) -> Vec<&str> {
        match self {
            Self::Tag(tag) => vec![tag.as_str()],
            Self::Tags(tags) => tags.keys().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for AnimationTarget {
    fn from(tag: &str) -> Self {
        Self::Tag(tag.to_string())
    }
}

impl From<String> for AnimationTarget {
    fn from(tag: String) -> Self {
        Self::Tag(tag)
    }
}

impl From<BTreeMap<String, TagValue>> for AnimationTarget {
    fn from(tags: BTreeMap<String, TagValue>) -> Self {
        Self::Tags(tags)
    }
}

/// Options for one `animate` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationOptions {
    /// Start value. Defaults to the tag's current effective value.
    pub from: Option<TagValue>,
    /// End value for a single-tag target. Ignored for a tag map.
    pub to: Option<TagValue>,
    /// Seconds.
    pub duration: f64,
    pub easing: Easing,
    /// Tag-mask space to write. Defaults to the configured animation space.
    pub space: Option<String>,
}

impl AnimationOptions {
    /// Animate towards `value` over `duration` seconds.
    #[must_use]
    pub fn to(value: impl Into<TagValue>, duration: f64) -> Self {
        Self {
            to: Some(value.into()),
            duration,
            ..Self::default()
        }
    }

    /// Start from `value` instead of the current tag value.
    #[must_use]
    pub fn with_from(mut self, value: impl Into<TagValue>) -> Self {
        self.from = Some(value.into());
        self
    }

    /// Use `easing` instead of the default.
    #[must_use]
    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// Write frames into the mask in `space`.
    #[must_use]
    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Track {
    bot: BotId,
    tag: String,
    from: TagValue,
    to: TagValue,
}

#[derive(Debug, Clone)]
struct Group {
    id: GroupId,
    task: TaskId,
    tracks: Vec<Track>,
    start_ms: u64,
    duration_ms: u64,
    easing: Easing,
    space: Option<String>,
}

impl Group {
    fn covers(&self, bot: &BotId, tag: Option<&str>) -> bool {
        self.tracks
            .iter()
            .any(|track| &track.bot == bot && tag.is_none_or(|tag| track.tag == tag))
    }
}

/// One tag write produced by a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub bot: BotId,
    pub tag: String,
    pub space: Option<String>,
    pub value: TagValue,
}

/// Everything one tick of the scheduler produced.
#[derive(Debug, Default)]
pub struct Advance {
    pub frames: Vec<Frame>,
    /// Tasks of groups that reached their end.
    pub finished: Vec<TaskId>,
}

/// Running animation groups, in start order.
#[derive(Debug, Default)]
pub struct AnimationScheduler {
    next_id: u64,
    groups: Vec<Group>,
}

impl AnimationScheduler {
    /// An empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of running groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` if nothing is animating.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Returns `true` if `tag` on `bot` is animating.
    #[must_use]
    pub fn is_animating(&self, bot: &BotId, tag: &str) -> bool {
        self.groups.iter().any(|group| group.covers(bot, Some(tag)))
    }

    /// Remove every group animating `tag` on `bot` (any tag when `None`).
    /// Returns the tasks of the removed groups.
    pub fn cancel(&mut self, bot: &BotId, tag: Option<&str>) -> Vec<TaskId> {
        let mut cancelled = Vec::new();
        self.groups.retain(|group| {
            if group.covers(bot, tag) {
                debug!(group = group.id.0, bot = %bot, "animation group cancelled");
                cancelled.push(group.task);
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// Remove all groups. Returns their tasks.
    pub fn clear(&mut self) -> Vec<TaskId> {
        self.groups.drain(..).map(|group| group.task).collect()
    }

    fn start(
        &mut self,
        task: TaskId,
        tracks: Vec<Track>,
        start_ms: u64,
        duration_ms: u64,
        easing: Easing,
        space: Option<String>,
    ) -> GroupId {
        self.next_id += 1;
        let id = GroupId(self.next_id);
        self.groups.push(Group {
            id,
            task,
            tracks,
            start_ms,
            duration_ms,
            easing,
            space,
        });
        id
    }

    /// Compute the frame for `now_ms` and retire finished groups. Finished
    /// tracks are written with their exact end value.
    pub fn advance(&mut self, now_ms: u64) -> Advance {
        let mut advance = Advance::default();
        self.groups.retain(|group| {
            let elapsed = now_ms.saturating_sub(group.start_ms);
            let progress = if group.duration_ms == 0 {
                1.0
            } else {
                (elapsed as f64 / group.duration_ms as f64).min(1.0)
            };
            let done = progress >= 1.0;
            let eased = group.easing.apply(progress);
            for track in &group.tracks {
                let value = if done {
                    track.to.clone()
                } else {
                    interpolate(&track.from, &track.to, eased)
                };
                advance.frames.push(Frame {
                    bot: track.bot.clone(),
                    tag: track.tag.clone(),
                    space: group.space.clone(),
                    value,
                });
            }
            if done {
                advance.finished.push(group.task);
            }
            !done
        });
        advance
    }
}

// ── Runtime API ─────────────────────────────────────────────────────────────

impl Runtime {
    /// Animate `target` on every bot in `bots` as one group.
    ///
    /// `None` options cancel (and reject) every group animating the named
    /// tags on those bots; the returned handle is then already resolved.
    /// Starting an animation on a tag that is already animating cancels the
    /// earlier group first.
    pub fn animate(
        &mut self,
        bots: &[BotId],
        target: impl Into<AnimationTarget>,
        options: Option<AnimationOptions>,
    ) -> Result<TaskHandle, RuntimeError> {
        let target = target.into();
        let tags = target.tag_names();
        if tags.is_empty() {
            return Err(RuntimeError::Validation("no tags to animate".to_string()));
        }
        for tag in &tags {
            if tag.trim().is_empty() {
                return Err(RuntimeError::Validation("tag name is empty".to_string()));
            }
            if is_protected_tag(tag) {
                return Err(bot_entity::StoreError::ProtectedTag(tag.to_string()).into());
            }
        }
        for bot in bots {
            self.store.bot(bot)?;
        }

        let Some(options) = options else {
            for bot in bots {
                for tag in &tags {
                    self.cancel_animation(bot, Some(*tag))?;
                }
            }
            let handle = self.create_task(TaskOptions::default());
            self.resolve_task(handle.id(), Value::Null, false)?;
            return Ok(handle);
        };

        if !options.duration.is_finite() || options.duration < 0.0 {
            return Err(RuntimeError::Validation(format!(
                "invalid animation duration {}",
                options.duration
            )));
        }
        let space = options
            .space
            .clone()
            .or_else(|| self.config().default_animation_space.clone());
        if let Some(space) = &space {
            self.config().spaces.check(space)?;
        }

        let mut tracks = Vec::new();
        for bot in bots {
            match &target {
                AnimationTarget::Tag(tag) => {
                    let to = options.to.clone().ok_or_else(|| {
                        RuntimeError::Validation("animation has no target value".to_string())
                    })?;
                    tracks.push(self.track(bot, tag, options.from.clone(), to));
                }
                AnimationTarget::Tags(map) => {
                    for (tag, to) in map {
                        tracks.push(self.track(bot, tag, options.from.clone(), to.clone()));
                    }
                }
            }
        }

        for track in &tracks {
            self.cancel_animation(&track.bot, Some(&track.tag))?;
        }

        let handle = self.create_task(TaskOptions::default());
        let duration_ms = (options.duration * 1000.0).round() as u64;
        let group = self.animations.start(
            handle.id(),
            tracks,
            self.now_ms(),
            duration_ms,
            options.easing,
            space,
        );
        debug!(group = group.0, task = %handle.id(), duration_ms, "animation started");
        Ok(handle)
    }

    /// Cancel and reject every group animating `tag` on `bot` (any tag when
    /// `None`). Returns how many groups were cancelled.
    pub fn cancel_animation(&mut self, bot: &BotId, tag: Option<&str>) -> Result<usize, RuntimeError> {
        let tasks = self.animations.cancel(bot, tag);
        for task in &tasks {
            self.reject_task(*task, TaskError::new(CANCELLED_MESSAGE), false)?;
        }
        Ok(tasks.len())
    }

    /// Returns `true` if `tag` on `bot` is animating.
    #[must_use]
    pub fn is_animating(&self, bot: &BotId, tag: &str) -> bool {
        self.animations.is_animating(bot, tag)
    }

    /// Write the current frame of every group and settle finished ones.
    /// Failures are queued.
    pub(crate) fn advance_animations(&mut self) {
        if self.animations.is_empty() {
            return;
        }
        let advance = self.animations.advance(self.now_ms());
        for frame in advance.frames {
            let written = match &frame.space {
                Some(space) => self.store.set_tag_mask(&frame.bot, &frame.tag, frame.value, space),
                None => self.store.set_tag(&frame.bot, &frame.tag, frame.value),
            };
            if let Err(err) = written {
                debug!(bot = %frame.bot, tag = %frame.tag, %err, "animation frame dropped");
            }
        }
        for task in advance.finished {
            if let Err(err) = self.resolve_task(task, Value::Null, false) {
                self.record_error(None, "animation", &ScriptError::Abort(err));
            }
        }
    }

    fn track(&self, bot: &BotId, tag: &str, from: Option<TagValue>, to: TagValue) -> Track {
        let from = from
            .or_else(|| self.store.effective_tag(bot, tag).cloned())
            .unwrap_or_else(|| match &to {
                TagValue::Number(_) => TagValue::Number(0.0),
                _ => to.clone(),
            });
        Track {
            bot: bot.clone(),
            tag: tag.to_string(),
            from,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use bot_entity::BotSpec;
    use futures::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::animation::easing::{EasingMode, EasingType};
    use crate::clock::VirtualClock;
    use crate::config::RuntimeConfig;

    fn setup() -> (Runtime, VirtualClock, BotId) {
        let clock = VirtualClock::new();
        let mut rt = Runtime::new(RuntimeConfig::default()).with_clock(clock.clone());
        let bot = rt
            .create_bot(BotSpec::new().with_id("bot").with_tag("abc", 0))
            .unwrap();
        (rt, clock, bot)
    }

    fn temp_local(rt: &Runtime, bot: &BotId, tag: &str) -> Option<TagValue> {
        rt.get_tag_mask(bot, tag, "tempLocal").cloned()
    }

    #[test]
    fn test_animation_reaches_exact_target() {
        let (mut rt, clock, bot) = setup();
        let handle = rt
            .animate(
                &[bot.clone()],
                "abc",
                Some(AnimationOptions::to(10, 0.5).with_from(0)),
            )
            .unwrap();

        clock.advance(250);
        rt.tick();
        let halfway = temp_local(&rt, &bot, "abc").unwrap().as_f64().unwrap();
        assert!((halfway - 5.0).abs() < 1e-9);
        assert!(!handle.is_settled());

        clock.advance(300);
        rt.tick();
        assert_eq!(temp_local(&rt, &bot, "abc"), Some(TagValue::from(10)));
        assert_eq!(rt.get_tag(&bot, "abc"), Some(&TagValue::from(0)));
        assert_eq!(handle.now_or_never(), Some(Ok(Value::Null)));
        assert!(!rt.is_animating(&bot, "abc"));
    }

    #[test]
    fn test_easing_is_applied() {
        let (mut rt, clock, bot) = setup();
        let easing = Easing::new(EasingType::Quadratic, EasingMode::In);
        rt.animate(
            &[bot.clone()],
            "abc",
            Some(AnimationOptions::to(100, 1.0).with_from(0).with_easing(easing)),
        )
        .unwrap();
        clock.advance(500);
        rt.tick();
        let value = temp_local(&rt, &bot, "abc").unwrap().as_f64().unwrap();
        assert!((value - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_completes_next_tick() {
        let (mut rt, _, bot) = setup();
        let handle = rt
            .animate(&[bot.clone()], "abc", Some(AnimationOptions::to(3, 0.0)))
            .unwrap();
        assert!(!handle.is_settled());
        rt.tick();
        assert!(handle.is_settled());
        assert_eq!(temp_local(&rt, &bot, "abc"), Some(TagValue::from(3)));
    }

    #[test]
    fn test_cancel_one_tag_rejects_whole_group() {
        let (mut rt, clock, bot) = setup();
        let other = rt.create_bot(BotSpec::new().with_id("other")).unwrap();
        let mut targets = BTreeMap::new();
        targets.insert("abc".to_string(), TagValue::from(10));
        targets.insert("def".to_string(), TagValue::from(20));
        let handle = rt
            .animate(
                &[bot.clone(), other.clone()],
                targets,
                Some(AnimationOptions {
                    duration: 1.0,
                    ..AnimationOptions::default()
                }),
            )
            .unwrap();
        assert!(rt.is_animating(&other, "def"));

        let cancel = rt.animate(&[bot.clone()], "def", None).unwrap();
        assert!(cancel.is_settled());

        let err = handle.now_or_never().unwrap().unwrap_err();
        assert_eq!(err.message, CANCELLED_MESSAGE);
        assert!(!rt.is_animating(&bot, "abc"));
        assert!(!rt.is_animating(&other, "abc"));

        clock.advance(2000);
        rt.tick();
        assert_eq!(temp_local(&rt, &other, "def"), None);
    }

    #[test]
    fn test_new_animation_replaces_previous_group() {
        let (mut rt, clock, bot) = setup();
        let first = rt
            .animate(&[bot.clone()], "abc", Some(AnimationOptions::to(10, 1.0)))
            .unwrap();
        let second = rt
            .animate(&[bot.clone()], "abc", Some(AnimationOptions::to(-10, 1.0)))
            .unwrap();
        assert!(first.result().unwrap().is_err());

        clock.advance(1000);
        rt.tick();
        assert_eq!(temp_local(&rt, &bot, "abc"), Some(TagValue::from(-10)));
        assert_eq!(second.result(), Some(Ok(Value::Null)));
    }

    #[test]
    fn test_destroying_bot_cancels_its_groups() {
        let (mut rt, _, bot) = setup();
        let handle = rt
            .animate(&[bot.clone()], "abc", Some(AnimationOptions::to(1, 5.0)))
            .unwrap();
        rt.destroy_bot(&bot);
        assert!(handle.result().unwrap().is_err());
        assert!(rt.animations.is_empty());
    }

    #[test]
    fn test_vector_animation_into_base_tags() {
        let clock = VirtualClock::new();
        let mut rt = Runtime::new(RuntimeConfig::default().with_default_animation_space(None))
            .with_clock(clock.clone());
        let bot = rt.create_bot(BotSpec::new().with_id("b")).unwrap();
        rt.animate(
            &[bot.clone()],
            "position",
            Some(
                AnimationOptions::to(TagValue::from(json!({ "x": 4, "y": 8 })), 1.0)
                    .with_from(TagValue::from(json!({ "x": 0, "y": 0 }))),
            ),
        )
        .unwrap();
        clock.advance(500);
        rt.tick();
        let position = rt.get_tag(&bot, "position").unwrap().as_object().unwrap().clone();
        assert_eq!(position["x"], TagValue::from(2));
        assert_eq!(position["y"], TagValue::from(4));
    }

    #[test]
    fn test_invalid_arguments() {
        let (mut rt, _, bot) = setup();
        assert!(matches!(
            rt.animate(&[bot.clone()], "abc", Some(AnimationOptions::default())),
            Err(RuntimeError::Validation(_))
        ));
        assert!(matches!(
            rt.animate(&[bot.clone()], "id", Some(AnimationOptions::to(1, 1.0))),
            Err(RuntimeError::Store(_))
        ));
        assert!(matches!(
            rt.animate(
                &[bot.clone()],
                "abc",
                Some(AnimationOptions::to(1, 1.0).with_space("nowhere"))
            ),
            Err(RuntimeError::Store(_))
        ));
        assert!(matches!(
            rt.animate(&[bot], "abc", Some(AnimationOptions::to(1, -1.0))),
            Err(RuntimeError::Validation(_))
        ));
    }
}

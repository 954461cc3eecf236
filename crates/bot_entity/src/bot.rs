//! The bot record and its creation spec.
//!
//! A [`Bot`] is generic over the listener type `L` so the store can hold
//! handler registrations without depending on the runtime that invokes them.

use std::collections::BTreeMap;

use crate::id::BotId;
use crate::space::DEFAULT_BOT_SPACE;
use crate::value::TagValue;

/// Tags that can never be written through the tag API or overlaid by a mask.
pub const PROTECTED_TAGS: [&str; 2] = ["id", "space"];

/// Tag holding the weak back-reference to the bot that created this one.
pub const CREATOR_TAG: &str = "creator";

/// Tag that, when explicitly `false`, stops destruction at this bot.
pub const DESTROYABLE_TAG: &str = "destroyable";

/// Returns `true` if `tag` is one of [`PROTECTED_TAGS`].
#[must_use]
pub fn is_protected_tag(tag: &str) -> bool {
    PROTECTED_TAGS.contains(&tag)
}

/// A bot: an id, a space, base tags, per-space mask overlays and listeners.
#[derive(Debug, Clone)]
pub struct Bot<L> {
    pub(crate) id: BotId,
    pub(crate) space: String,
    pub(crate) tags: BTreeMap<String, TagValue>,
    /// space -> tag -> value
    pub(crate) masks: BTreeMap<String, BTreeMap<String, TagValue>>,
    pub(crate) listeners: BTreeMap<String, L>,
    pub(crate) dynamic_listeners: BTreeMap<String, Vec<L>>,
}

impl<L> Bot<L> {
    /// Returns the bot's id.
    #[must_use]
    pub fn id(&self) -> &BotId {
        &self.id
    }

    /// The partition this bot lives in.
    #[must_use]
    pub fn space(&self) -> &str {
        &self.space
    }

    /// The base value of a tag, ignoring masks.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&TagValue> {
        self.tags.get(name)
    }

    /// All base tags, sorted by name.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, TagValue> {
        &self.tags
    }

    /// The mask value of a tag in one space.
    #[must_use]
    pub fn mask(&self, space: &str, name: &str) -> Option<&TagValue> {
        self.masks.get(space).and_then(|tags| tags.get(name))
    }

    /// All masks, keyed by space.
    #[must_use]
    pub fn masks(&self) -> &BTreeMap<String, BTreeMap<String, TagValue>> {
        &self.masks
    }

    /// Ids referenced by the `creator` tag.
    #[must_use]
    pub fn creator_ids(&self) -> Vec<BotId> {
        self.tags
            .get(CREATOR_TAG)
            .map(TagValue::referenced_ids)
            .unwrap_or_default()
    }

    /// `false` only when the `destroyable` tag is explicitly `false`.
    #[must_use]
    pub fn is_destroyable(&self) -> bool {
        !self
            .tags
            .get(DESTROYABLE_TAG)
            .is_some_and(TagValue::is_explicit_false)
    }

    /// The statically declared listener for an event, if any.
    #[must_use]
    pub fn listener(&self, name: &str) -> Option<&L> {
        self.listeners.get(name)
    }

    /// Listeners added at runtime for an event, in registration order.
    #[must_use]
    pub fn dynamic_listeners(&self, name: &str) -> &[L] {
        self.dynamic_listeners.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if either listener collection has an entry for `name`.
    #[must_use]
    pub fn has_listener(&self, name: &str) -> bool {
        self.listeners.contains_key(name) || !self.dynamic_listeners(name).is_empty()
    }

    /// Names of all statically declared listeners.
    pub fn listener_names(&self) -> impl Iterator<Item = &str> {
        self.listeners.keys().map(String::as_str)
    }
}

/// Everything needed to create a bot.
#[derive(Debug, Clone)]
pub struct BotSpec<L> {
    pub id: Option<BotId>,
    pub space: String,
    pub tags: BTreeMap<String, TagValue>,
    pub listeners: BTreeMap<String, L>,
}

impl<L> BotSpec<L> {
    /// An empty spec in the default space with a generated id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: None,
            space: DEFAULT_BOT_SPACE.to_string(),
            tags: BTreeMap::new(),
            listeners: BTreeMap::new(),
        }
    }

    /// Use a fixed id instead of a generated one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<BotId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Place the bot in `space`.
    #[must_use]
    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = space.into();
        self
    }

    /// Set a base tag.
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Set the `creator` tag to a link to `creator`.
    #[must_use]
    pub fn with_creator(self, creator: impl Into<BotId>) -> Self {
        self.with_tag(CREATOR_TAG, TagValue::from(creator.into()))
    }

    /// Declare a static listener for an event.
    #[must_use]
    pub fn with_listener(mut self, name: impl Into<String>, listener: L) -> Self {
        self.listeners.insert(name.into(), listener);
        self
    }
}

impl<L> Default for BotSpec<L> {
    fn default() -> Self {
        Self::new()
    }
}

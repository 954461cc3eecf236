//! Tag-mask layer.
//!
//! A mask is a per-space overlay value for a tag. Reads resolve through the
//! configured [`SpaceOrder`](crate::SpaceOrder): the first space (highest
//! priority) holding a non-null mask wins, otherwise the base tag is used.
//! Protected tags can never be masked.

use crate::error::StoreError;
use crate::id::BotId;
use crate::store::{BotStore, check_tag_name};
use crate::value::TagValue;

impl<L> BotStore<L> {
    /// The effective value of a tag: the highest-priority non-null mask, or
    /// the base tag.
    #[must_use]
    pub fn effective_tag(&self, id: &BotId, tag: &str) -> Option<&TagValue> {
        let bot = self.bots.get(id)?;
        self.spaces
            .iter()
            .filter_map(|space| bot.mask(space, tag))
            .find(|value| !value.is_null())
            .or_else(|| bot.tag(tag))
    }

    /// The space the effective value of a tag comes from, or `None` when it
    /// comes from the base tag (or is absent).
    #[must_use]
    pub fn effective_space(&self, id: &BotId, tag: &str) -> Option<&str> {
        let bot = self.bots.get(id)?;
        self.spaces
            .iter()
            .find(|space| bot.mask(space, tag).is_some_and(|v| !v.is_null()))
    }

    /// The mask value of a tag in one space.
    #[must_use]
    pub fn tag_mask(&self, id: &BotId, tag: &str, space: &str) -> Option<&TagValue> {
        self.bots.get(id).and_then(|bot| bot.mask(space, tag))
    }

    /// Write a mask in one space. Writing [`TagValue::Null`] removes it.
    pub fn set_tag_mask(
        &mut self,
        id: &BotId,
        tag: &str,
        value: TagValue,
        space: &str,
    ) -> Result<(), StoreError> {
        check_tag_name(tag)?;
        self.spaces.check(space)?;
        let bot = self.bot_mut(id)?;
        let changed = if value.is_null() {
            let removed = bot
                .masks
                .get_mut(space)
                .and_then(|tags| tags.remove(tag))
                .is_some();
            if bot.masks.get(space).is_some_and(|tags| tags.is_empty()) {
                bot.masks.remove(space);
            }
            removed
        } else {
            let tags = bot.masks.entry(space.to_string()).or_default();
            if tags.get(tag) == Some(&value) {
                false
            } else {
                tags.insert(tag.to_string(), value);
                true
            }
        };
        if changed {
            let bot_space = bot.space.clone();
            self.touch(id, &bot_space);
        }
        Ok(())
    }

    /// Clear masks on a bot.
    ///
    /// - `tag` and `space`: that one mask.
    /// - `tag` only: that tag in every space.
    /// - `space` only: every tag in that space.
    /// - neither: every mask on the bot.
    ///
    /// Returns the number of mask entries removed.
    pub fn clear_tag_masks(
        &mut self,
        id: &BotId,
        tag: Option<&str>,
        space: Option<&str>,
    ) -> Result<usize, StoreError> {
        if let Some(space) = space {
            self.spaces.check(space)?;
        }
        let bot = self.bot_mut(id)?;
        let mut removed = 0;
        bot.masks.retain(|mask_space, tags| {
            if space.is_some_and(|s| s != mask_space.as_str()) {
                return true;
            }
            match tag {
                Some(tag) => removed += usize::from(tags.remove(tag).is_some()),
                None => {
                    removed += tags.len();
                    tags.clear();
                }
            }
            !tags.is_empty()
        });
        if removed > 0 {
            let bot_space = bot.space.clone();
            self.touch(id, &bot_space);
        }
        Ok(removed)
    }
}

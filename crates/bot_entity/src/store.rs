//! Bot store: the single owner of every bot in a simulation.
//!
//! Bots are kept in registration order so that dispatch is stable. Every
//! mutation is recorded in a change set that the runtime drains to drive
//! watchers.
use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;

use crate::bot::{Bot, BotSpec, is_protected_tag};
use crate::edits::TagEdit;
use crate::error::StoreError;
use crate::id::BotId;
use crate::space::SpaceOrder;
use crate::value::TagValue;

/// Bots and spaces touched since the last [`BotStore::take_changes`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Bots whose tags or masks changed, or that were created, in first-touch order.
    pub bots: Vec<BotId>,
    /// Bots destroyed, in destruction order.
    pub destroyed: Vec<BotId>,
    /// Spaces (partitions) that saw any change.
    pub spaces: BTreeSet<String>,
}

impl ChangeSet {
    /// Returns `true` if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty() && self.destroyed.is_empty() && self.spaces.is_empty()
    }
}

/// The entity store.
#[derive(Debug)]
pub struct BotStore<L> {
    pub(crate) spaces: SpaceOrder,
    pub(crate) bots: HashMap<BotId, Bot<L>>,
    /// Registration order.
    order: Vec<BotId>,
    changes: ChangeSet,
    pub(crate) site_id: String,
    pub(crate) edit_counter: u64,
    pub(crate) pending_edits: Vec<TagEdit>,
}

impl<L> BotStore<L> {
    /// Create an empty store with the given mask space order.
    #[must_use]
    pub fn new(spaces: SpaceOrder) -> Self {
        Self {
            spaces,
            bots: HashMap::new(),
            order: Vec::new(),
            changes: ChangeSet::default(),
            site_id: uuid::Uuid::new_v4().to_string(),
            edit_counter: 0,
            pending_edits: Vec::new(),
        }
    }

    /// Override the site id stamped into edit version markers.
    #[must_use]
    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = site_id.into();
        self
    }

    /// The configured mask space order.
    #[must_use]
    pub fn spaces(&self) -> &SpaceOrder {
        &self.spaces
    }

    /// The site id stamped into text-edit versions.
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    // -- Bot lifecycle --

    /// Create a bot from a spec. A missing id is generated.
    pub fn create(&mut self, spec: BotSpec<L>) -> Result<BotId, StoreError> {
        let id = spec.id.unwrap_or_else(BotId::random);
        if !id.is_valid() {
            return Err(StoreError::InvalidBotId(id.to_string()));
        }
        if self.bots.contains_key(&id) {
            return Err(StoreError::DuplicateBot(id));
        }
        for name in spec.tags.keys() {
            check_tag_name(name)?;
        }

        let tags = spec.tags.into_iter().filter(|(_, v)| !v.is_null()).collect();
        let bot = Bot {
            id: id.clone(),
            space: spec.space,
            tags,
            masks: Default::default(),
            listeners: spec.listeners,
            dynamic_listeners: Default::default(),
        };

        self.touch(&id, &bot.space);
        self.bots.insert(id.clone(), bot);
        self.order.push(id.clone());
        debug!(bot = %id, "bot created");
        Ok(id)
    }

    /// Destroy a bot and, recursively, every bot whose creator chain resolves
    /// to a bot destroyed in this call.
    ///
    /// A bot whose `destroyable` tag is explicitly `false` is kept, and the
    /// cascade does not continue through it; other branches proceed. A missing
    /// id is a no-op. Returns the destroyed ids in destruction order.
    pub fn destroy(&mut self, id: &BotId) -> Vec<BotId> {
        let mut destroyed: Vec<BotId> = Vec::new();
        let mut queue: VecDeque<BotId> = VecDeque::new();

        match self.bots.get(id) {
            Some(bot) if bot.is_destroyable() => queue.push_back(id.clone()),
            Some(_) => {
                debug!(bot = %id, "bot is not destroyable");
                return destroyed;
            }
            None => return destroyed,
        }

        while let Some(next) = queue.pop_front() {
            let Some(bot) = self.bots.remove(&next) else {
                continue;
            };
            self.order.retain(|b| b != &next);
            self.changes.spaces.insert(bot.space.clone());
            self.changes.bots.retain(|b| b != &next);
            self.changes.destroyed.push(next.clone());
            destroyed.push(next.clone());

            for candidate in &self.order {
                let Some(child) = self.bots.get(candidate) else {
                    continue;
                };
                if queue.contains(candidate) || !child.creator_ids().contains(&next) {
                    continue;
                }
                if child.is_destroyable() {
                    queue.push_back(candidate.clone());
                } else {
                    debug!(bot = %candidate, "destroy cascade halted at non-destroyable bot");
                }
            }
        }

        debug!(root = %id, count = destroyed.len(), "bots destroyed");
        destroyed
    }

    /// Check if a bot exists.
    #[must_use]
    pub fn contains(&self, id: &BotId) -> bool {
        self.bots.contains_key(id)
    }

    /// Look up a bot.
    #[must_use]
    pub fn get(&self, id: &BotId) -> Option<&Bot<L>> {
        self.bots.get(id)
    }

    /// Like [`get`](Self::get) but fails with [`StoreError::BotNotFound`].
    pub fn bot(&self, id: &BotId) -> Result<&Bot<L>, StoreError> {
        self.bots
            .get(id)
            .ok_or_else(|| StoreError::BotNotFound(id.clone()))
    }

    pub(crate) fn bot_mut(&mut self, id: &BotId) -> Result<&mut Bot<L>, StoreError> {
        self.bots
            .get_mut(id)
            .ok_or_else(|| StoreError::BotNotFound(id.clone()))
    }

    /// All bot ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &BotId> {
        self.order.iter()
    }

    /// All bots in registration order.
    pub fn bots(&self) -> impl Iterator<Item = &Bot<L>> {
        self.order.iter().filter_map(|id| self.bots.get(id))
    }

    /// Ids of bots matching a predicate, in registration order.
    pub fn query(&self, mut predicate: impl FnMut(&Bot<L>) -> bool) -> Vec<BotId> {
        self.bots()
            .filter(|bot| predicate(bot))
            .map(|bot| bot.id.clone())
            .collect()
    }

    /// Number of bots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    /// Returns `true` if the store holds no bots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    // -- Tags --

    /// The base value of a tag.
    #[must_use]
    pub fn get_tag(&self, id: &BotId, tag: &str) -> Option<&TagValue> {
        self.bots.get(id).and_then(|bot| bot.tag(tag))
    }

    /// Write a base tag. Writing [`TagValue::Null`] deletes it.
    pub fn set_tag(&mut self, id: &BotId, tag: &str, value: TagValue) -> Result<(), StoreError> {
        check_tag_name(tag)?;
        let bot = self.bot_mut(id)?;
        let changed = if value.is_null() {
            bot.tags.remove(tag).is_some()
        } else if bot.tags.get(tag) == Some(&value) {
            false
        } else {
            bot.tags.insert(tag.to_string(), value);
            true
        };
        if changed {
            let space = bot.space.clone();
            self.touch(id, &space);
        }
        Ok(())
    }

    // -- Listeners --

    /// Attach a listener at runtime. Dynamic listeners run after the static
    /// one, in the order they were added.
    pub fn add_dynamic_listener(
        &mut self,
        id: &BotId,
        name: impl Into<String>,
        listener: L,
    ) -> Result<(), StoreError> {
        let bot = self.bot_mut(id)?;
        bot.dynamic_listeners
            .entry(name.into())
            .or_default()
            .push(listener);
        Ok(())
    }

    /// Remove every dynamic listener for `name`. Returns how many were removed.
    pub fn clear_dynamic_listeners(&mut self, id: &BotId, name: &str) -> Result<usize, StoreError> {
        let bot = self.bot_mut(id)?;
        Ok(bot.dynamic_listeners.remove(name).map_or(0, |l| l.len()))
    }

    // -- Change tracking --

    /// Drain the change set accumulated since the last call.
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Peek at pending changes without draining them.
    #[must_use]
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub(crate) fn touch(&mut self, id: &BotId, space: &str) {
        if !self.changes.bots.contains(id) {
            self.changes.bots.push(id.clone());
        }
        self.changes.spaces.insert(space.to_string());
    }
}

impl<L> Default for BotStore<L> {
    fn default() -> Self {
        Self::new(SpaceOrder::default())
    }
}

pub(crate) fn check_tag_name(tag: &str) -> Result<(), StoreError> {
    if tag.trim().is_empty() {
        return Err(StoreError::InvalidTagName(tag.to_string()));
    }
    if is_protected_tag(tag) {
        return Err(StoreError::ProtectedTag(tag.to_string()));
    }
    Ok(())
}

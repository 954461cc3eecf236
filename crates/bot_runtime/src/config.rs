//! Runtime configuration.

use bot_entity::{DEFAULT_SPACES, SpaceOrder};
use serde::{Deserialize, Serialize};

/// Default energy budget.
pub const DEFAULT_ENERGY: i64 = 100_000;

/// Default cap on the number of intermediate states a suspending handler may
/// yield.
pub const DEFAULT_MAX_SEQUENCE_STEPS: usize = 100_000;

/// The two tags that together decide whether a bot receives events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListeningTags {
    /// Checked first. When present, only an explicit `false` stops listening.
    pub primary: String,
    /// Consulted only when the primary tag is absent.
    pub legacy: String,
}

impl Default for ListeningTags {
    fn default() -> Self {
        Self {
            primary: "listening".to_string(),
            legacy: "auxListening".to_string(),
        }
    }
}

/// Configuration for one runtime instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Initial and reset value of the energy meter.
    pub energy: i64,
    /// Tag-mask spaces, highest priority first.
    pub spaces: SpaceOrder,
    /// Space `animate` writes to when the call names none. `None` writes base
    /// tags.
    pub default_animation_space: Option<String>,
    pub listening_tags: ListeningTags,
    /// Upper bound on yields from one suspending handler before it is failed.
    pub max_sequence_steps: usize,
    /// Stamped into text-edit version markers.
    pub site_id: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            energy: DEFAULT_ENERGY,
            spaces: SpaceOrder::new(DEFAULT_SPACES),
            default_animation_space: Some("tempLocal".to_string()),
            listening_tags: ListeningTags::default(),
            max_sequence_steps: DEFAULT_MAX_SEQUENCE_STEPS,
            site_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Create a config with every field defaulted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the energy budget.
    #[must_use]
    pub fn with_energy(mut self, energy: i64) -> Self {
        self.energy = energy;
        self
    }

    /// Set the mask space order, highest priority first.
    #[must_use]
    pub fn with_spaces<S: Into<String>>(mut self, spaces: impl IntoIterator<Item = S>) -> Self {
        self.spaces = SpaceOrder::new(spaces);
        self
    }

    /// Set the space `animate` writes to; `None` writes base tags.
    #[must_use]
    pub fn with_default_animation_space(mut self, space: Option<&str>) -> Self {
        self.default_animation_space = space.map(str::to_string);
        self
    }

    /// Set the tags that control listening.
    #[must_use]
    pub fn with_listening_tags(mut self, primary: impl Into<String>, legacy: impl Into<String>) -> Self {
        self.listening_tags = ListeningTags {
            primary: primary.into(),
            legacy: legacy.into(),
        };
        self
    }

    /// Set the yield limit for suspending handlers.
    #[must_use]
    pub fn with_max_sequence_steps(mut self, steps: usize) -> Self {
        self.max_sequence_steps = steps;
        self
    }

    /// Set the site id for text-edit versions.
    #[must_use]
    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = site_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.energy, 100_000);
        assert_eq!(config.spaces.highest(), Some("tempLocal"));
        assert_eq!(config.default_animation_space.as_deref(), Some("tempLocal"));
        assert_eq!(config.listening_tags.primary, "listening");
        assert!(!config.site_id.is_empty());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RuntimeConfig = serde_json::from_value(json!({
            "energy": 5,
            "spaces": ["local", "shared"],
            "listening_tags": { "legacy": "oldListening" }
        }))
        .unwrap();
        assert_eq!(config.energy, 5);
        assert_eq!(config.spaces.len(), 2);
        assert_eq!(config.listening_tags.primary, "listening");
        assert_eq!(config.listening_tags.legacy, "oldListening");
        assert_eq!(config.max_sequence_steps, DEFAULT_MAX_SEQUENCE_STEPS);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .with_energy(3)
            .with_default_animation_space(None)
            .with_site_id("site");
        assert_eq!(config.energy, 3);
        assert_eq!(config.default_animation_space, None);
        assert_eq!(config.site_id, "site");
    }
}

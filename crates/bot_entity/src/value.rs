//! Tag values.
//!
//! A [`TagValue`] is any JSON-representable value plus one extra variant,
//! [`TagValue::Link`], for references to other bots. On the wire a link is an
//! ordinary string prefixed with [`BOT_LINK_SIGIL`]; the sigil is parsed and
//! formatted only in the `serde_json::Value` conversions below, so the rest of
//! the runtime never sees it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::BotId;

/// Prefix marking a string tag value as a bot link.
pub const BOT_LINK_SIGIL: &str = "🔗";

/// A reference from a tag to one or more bots, by id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BotLink(Vec<BotId>);

impl BotLink {
    /// Create a link to the given ids.
    #[must_use]
    pub fn new(ids: impl IntoIterator<Item = BotId>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Parse a sigil-prefixed string such as `"🔗a,b"`.
    ///
    /// Returns `None` if the string does not carry the sigil or names no ids.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(BOT_LINK_SIGIL)?;
        let ids: Vec<BotId> = rest
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(BotId::new)
            .collect();
        if ids.is_empty() { None } else { Some(Self(ids)) }
    }

    /// Format the link back into its string encoding.
    #[must_use]
    pub fn format(&self) -> String {
        let ids: Vec<&str> = self.0.iter().map(BotId::as_str).collect();
        format!("{BOT_LINK_SIGIL}{}", ids.join(","))
    }

    /// The linked ids, in order.
    #[must_use]
    pub fn ids(&self) -> &[BotId] {
        &self.0
    }

    /// Returns `true` if the link points at `id`.
    #[must_use]
    pub fn contains(&self, id: &BotId) -> bool {
        self.0.contains(id)
    }
}

/// A tag value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum TagValue {
    /// Absent / null. Writing `Null` to a tag deletes it.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<TagValue>),
    Object(BTreeMap<String, TagValue>),
    /// A reference to other bots by id.
    Link(BotLink),
}

impl TagValue {
    /// Returns `true` for [`TagValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` only for an explicit boolean `false`.
    #[must_use]
    pub fn is_explicit_false(&self) -> bool {
        matches!(self, Self::Bool(false))
    }

    /// Returns the boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number, if this is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the entries, if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, TagValue>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the link, if this is one.
    #[must_use]
    pub fn as_link(&self) -> Option<&BotLink> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }

    /// The bot ids this value refers to: every id of a link, or a plain
    /// string treated as a single id.
    #[must_use]
    pub fn referenced_ids(&self) -> Vec<BotId> {
        match self {
            Self::Link(link) => link.ids().to_vec(),
            Self::String(s) if !s.trim().is_empty() => vec![BotId::new(s.as_str())],
            _ => Vec::new(),
        }
    }

    /// The value rendered as text, used as the basis for text edits.
    ///
    /// `Null` renders as the empty string; integral numbers render without a
    /// fractional part.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            Self::Link(link) => link.format(),
            Self::Array(_) | Self::Object(_) => Value::from(self.clone()).to_string(),
        }
    }

    /// Build an object value from `(key, value)` pairs.
    #[must_use]
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<TagValue>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Largest magnitude below which every integral `f64` fits an `i64` exactly.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_EXACT_INT {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

// ── JSON boundary ───────────────────────────────────────────────────────────

impl From<Value> for TagValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => match BotLink::parse(&s) {
                Some(link) => Self::Link(link),
                None => Self::String(s),
            },
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<TagValue> for Value {
    fn from(value: TagValue) -> Self {
        match value {
            TagValue::Null => Value::Null,
            TagValue::Bool(b) => Value::Bool(b),
            TagValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_EXACT_INT {
                    Value::from(n as i64)
                } else {
                    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
                }
            }
            TagValue::String(s) => Value::String(s),
            TagValue::Link(link) => Value::String(link.format()),
            TagValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            TagValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for TagValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for TagValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<BotLink> for TagValue {
    fn from(link: BotLink) -> Self {
        Self::Link(link)
    }
}

impl From<BotId> for TagValue {
    fn from(id: BotId) -> Self {
        Self::Link(BotLink::new([id]))
    }
}

impl<T: Into<TagValue>> From<Vec<T>> for TagValue {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

//! Type-aware interpolation between tag values.
//!
//! Numbers interpolate linearly. Objects shaped `{x, y}` and `{x, y, z}` are
//! 2D/3D vectors and interpolate component-wise. Objects shaped
//! `{x, y, z, w}` are rotations and interpolate spherically. Any other pair
//! of values holds `from` until the end, then jumps to `to`.

use glam::{DQuat, DVec2, DVec3};

use bot_entity::TagValue;

/// An interpolatable reading of a tag value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Animatable {
    Number(f64),
    Vec2(DVec2),
    Vec3(DVec3),
    Rotation(DQuat),
}

impl Animatable {
    /// Classify a tag value, or `None` if it cannot be interpolated.
    #[must_use]
    pub fn from_value(value: &TagValue) -> Option<Self> {
        if let Some(n) = value.as_f64() {
            return n.is_finite().then_some(Self::Number(n));
        }
        let fields = value.as_object()?;
        let component = |name: &str| fields.get(name).and_then(TagValue::as_f64);
        let x = component("x")?;
        let y = component("y")?;
        match (fields.len(), component("z"), component("w")) {
            (2, None, None) => Some(Self::Vec2(DVec2::new(x, y))),
            (3, Some(z), None) => Some(Self::Vec3(DVec3::new(x, y, z))),
            (4, Some(z), Some(w)) => {
                let q = DQuat::from_xyzw(x, y, z, w);
                (q.length_squared() > 0.0).then(|| Self::Rotation(q.normalize()))
            }
            _ => None,
        }
    }

    /// Convert back into a tag value.
    #[must_use]
    pub fn to_value(self) -> TagValue {
        match self {
            Self::Number(n) => TagValue::Number(n),
            Self::Vec2(v) => TagValue::object([("x", v.x), ("y", v.y)]),
            Self::Vec3(v) => TagValue::object([("x", v.x), ("y", v.y), ("z", v.z)]),
            Self::Rotation(q) => TagValue::object([("x", q.x), ("y", q.y), ("z", q.z), ("w", q.w)]),
        }
    }

    /// Interpolate towards `to`. `None` when the kinds differ.
    #[must_use]
    pub fn lerp(self, to: Self, t: f64) -> Option<Self> {
        match (self, to) {
            (Self::Number(a), Self::Number(b)) => Some(Self::Number(a + (b - a) * t)),
            (Self::Vec2(a), Self::Vec2(b)) => Some(Self::Vec2(a.lerp(b, t))),
            (Self::Vec3(a), Self::Vec3(b)) => Some(Self::Vec3(a.lerp(b, t))),
            (Self::Rotation(a), Self::Rotation(b)) => Some(Self::Rotation(a.slerp(b, t))),
            _ => None,
        }
    }
}

/// The value `t` of the way from `from` to `to`, where `t` is eased progress.
#[must_use]
pub fn interpolate(from: &TagValue, to: &TagValue, t: f64) -> TagValue {
    let eased = Animatable::from_value(from)
        .zip(Animatable::from_value(to))
        .and_then(|(a, b)| a.lerp(b, t));
    match eased {
        Some(value) => value.to_value(),
        None if t >= 1.0 => to.clone(),
        None => from.clone(),
    }
}

//! Easing curves.
//!
//! Each curve maps linear progress in `[0, 1]` to eased progress. Elastic and
//! back curves overshoot that range between the end points.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// The shape of an easing curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EasingType {
    #[default]
    Linear,
    Quadratic,
    Cubic,
    Quartic,
    Quintic,
    Sinusoidal,
    Exponential,
    Circular,
    Elastic,
    Back,
    Bounce,
}

/// Which end of the curve is eased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EasingMode {
    In,
    Out,
    #[default]
    InOut,
}

/// A curve and the end(s) it is applied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Easing {
    #[serde(rename = "type")]
    pub kind: EasingType,
    pub mode: EasingMode,
}

impl Easing {
    /// Combine a curve and a mode.
    #[must_use]
    pub fn new(kind: EasingType, mode: EasingMode) -> Self {
        Self { kind, mode }
    }

    /// Constant-speed easing.
    #[must_use]
    pub fn linear() -> Self {
        Self::default()
    }

    /// Eased progress for linear progress `t`, clamped to `[0, 1]` first.
    #[must_use]
    pub fn apply(&self, t: f64) -> f64 {
        let k = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let ease_in = curve_in(self.kind);
        match self.mode {
            EasingMode::In => ease_in(k),
            EasingMode::Out => 1.0 - ease_in(1.0 - k),
            EasingMode::InOut => {
                if k < 0.5 {
                    ease_in(2.0 * k) / 2.0
                } else {
                    1.0 - ease_in(2.0 - 2.0 * k) / 2.0
                }
            }
        }
    }
}

/// The "in" form of each curve; "out" and "in-out" are derived by reflection.
fn curve_in(kind: EasingType) -> fn(f64) -> f64 {
    match kind {
        EasingType::Linear => |k: f64| k,
        EasingType::Quadratic => |k: f64| k.powi(2),
        EasingType::Cubic => |k: f64| k.powi(3),
        EasingType::Quartic => |k: f64| k.powi(4),
        EasingType::Quintic => |k: f64| k.powi(5),
        EasingType::Sinusoidal => |k: f64| 1.0 - (k * PI / 2.0).cos(),
        EasingType::Exponential => |k: f64| if k == 0.0 { 0.0 } else { 1024f64.powf(k - 1.0) },
        EasingType::Circular => |k: f64| 1.0 - (1.0 - k * k).max(0.0).sqrt(),
        EasingType::Elastic => |k: f64| {
            if k == 0.0 || k == 1.0 {
                k
            } else {
                -(2f64.powf(10.0 * (k - 1.0))) * ((k - 1.1) * 5.0 * PI).sin()
            }
        },
        EasingType::Back => |k: f64| {
            const S: f64 = 1.70158;
            k * k * ((S + 1.0) * k - S)
        },
        EasingType::Bounce => |k: f64| 1.0 - bounce_out(1.0 - k),
    }
}

fn bounce_out(k: f64) -> f64 {
    const N: f64 = 7.5625;
    const D: f64 = 2.75;
    if k < 1.0 / D {
        N * k * k
    } else if k < 2.0 / D {
        let k = k - 1.5 / D;
        N * k * k + 0.75
    } else if k < 2.5 / D {
        let k = k - 2.25 / D;
        N * k * k + 0.9375
    } else {
        let k = k - 2.625 / D;
        N * k * k + 0.984375
    }
}

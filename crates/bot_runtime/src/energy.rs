//! Energy meter: the execution budget shared by a dispatch call tree.
//!
//! Every top-level dispatch call with at least one eligible listener costs
//! exactly one unit, however many listeners it invokes.

use tracing::warn;

use crate::error::RuntimeError;

/// Counts down the energy left for dispatch calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyMeter {
    remaining: i64,
    initial: i64,
}

impl EnergyMeter {
    /// Create a meter holding `initial` units.
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            remaining: initial,
            initial,
        }
    }

    /// Returns the units left.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    /// Overwrite the units left without changing the reset value.
    pub fn set(&mut self, energy: i64) {
        self.remaining = energy;
    }

    /// Restore the configured initial budget.
    pub fn reset(&mut self) {
        self.remaining = self.initial;
    }

    /// Consume one unit. Fails once the meter reaches zero.
    pub fn consume(&mut self) -> Result<(), RuntimeError> {
        self.remaining -= 1;
        if self.remaining <= 0 {
            warn!(remaining = self.remaining, "energy exhausted");
            return Err(RuntimeError::EnergyExhausted);
        }
        Ok(())
    }
}

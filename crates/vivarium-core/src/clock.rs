//! Simulated time in integer ticks.
//!
//! Processes declare their cadence as `f64` time units, but the scheduler
//! never accumulates floats: every timestep is converted once into a whole
//! number of ticks and all front arithmetic happens on `u64`. Adding ten
//! steps of `0.1` therefore lands exactly on `1.0`, which the
//! front-advancing loop relies on to finish every process at the same
//! instant.
//!
//! # Design Principles
//!
//! - All tick arithmetic is checked or explicitly saturating.
//! - Conversions back to `f64` happen only at the edges (process
//!   intervals, emitted timestamps, public accessors).

/// Number of ticks in one simulated time unit.
pub const TICKS_PER_UNIT: u64 = 1_000_000_000;

#[allow(clippy::cast_precision_loss)]
const TICKS_PER_UNIT_F64: f64 = TICKS_PER_UNIT as f64;

// Rounds up to 2^64, so any tick count strictly below it fits in a u64.
#[allow(clippy::cast_precision_loss)]
const TICK_LIMIT_F64: f64 = u64::MAX as f64;

/// Errors that can occur when converting or advancing simulated time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockError {
    /// The value is negative, NaN, or too large to represent.
    #[error("invalid time value {value}: must be finite, non-negative, and representable in ticks")]
    InvalidTime {
        /// The rejected value.
        value: f64,
    },

    /// A timestep rounds to zero ticks.
    #[error("timestep {value} is shorter than one tick (1/{TICKS_PER_UNIT})")]
    TimestepTooSmall {
        /// The rejected timestep.
        value: f64,
    },

    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,
}

/// A point in (or span of) simulated time, measured in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

impl SimTime {
    /// Time zero.
    pub const ZERO: Self = Self(0);

    /// The largest representable time; used for "never due" cadences.
    pub const MAX: Self = Self(u64::MAX);

    /// Wrap a raw tick count.
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// The raw tick count.
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Convert a time in units into ticks, rounding to the nearest tick.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidTime`] for negative, non-finite, or
    /// out-of-range values.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_units(value: f64) -> Result<Self, ClockError> {
        if !value.is_finite() || value < 0.0 {
            return Err(ClockError::InvalidTime { value });
        }
        let ticks = (value * TICKS_PER_UNIT_F64).round();
        if ticks >= TICK_LIMIT_F64 {
            return Err(ClockError::InvalidTime { value });
        }
        Ok(Self(ticks as u64))
    }

    /// Convert a process cadence into ticks.
    ///
    /// Positive infinity maps to [`SimTime::MAX`], meaning the process only
    /// runs once per external step.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TimestepTooSmall`] if the step rounds to zero
    /// ticks, or [`ClockError::InvalidTime`] if it is not a valid time.
    pub fn timestep(value: f64) -> Result<Self, ClockError> {
        if value.is_infinite() && value > 0.0 {
            return Ok(Self::MAX);
        }
        let step = Self::from_units(value)?;
        if step == Self::ZERO {
            return Err(ClockError::TimestepTooSmall { value });
        }
        Ok(step)
    }

    /// The time in units.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_units(self) -> f64 {
        self.0 as f64 / TICKS_PER_UNIT_F64
    }

    /// Checked addition.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] on overflow.
    pub fn checked_add(self, other: Self) -> Result<Self, ClockError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(ClockError::TickOverflow)
    }

    /// Addition clamped at [`SimTime::MAX`].
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtraction clamped at zero.
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl core::fmt::Display for SimTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_units())
    }
}

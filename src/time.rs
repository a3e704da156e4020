//! Simulation time.
//!
//! Simulated time is kept as an integer count of nanosecond ticks so that
//! checkpoint instants compare exactly. Values coming from floating point
//! seconds are rounded to the nearest tick on entry.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Ticks per simulated second.
pub const TICKS_PER_SECOND: u64 = 1_000_000_000;

/// An instant (or span) of simulated time, in nanosecond ticks.
///
/// # Examples
///
/// ```
/// use simverify::SimTime;
///
/// let t = SimTime::from_secs_f64(0.2);
/// assert_eq!(t, SimTime::from_millis(200));
/// assert_eq!(t.to_string(), "0.2");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// Time zero.
    pub const ZERO: Self = Self(0);

    /// Creates a time from raw ticks.
    #[must_use]
    pub const fn from_nanos(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Creates a time from whole milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Creates a time from seconds, rounding to the nearest tick.
    ///
    /// Negative and non-finite inputs map to zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::ZERO;
        }
        let ticks = (secs * TICKS_PER_SECOND as f64).round();
        if ticks >= u64::MAX as f64 {
            Self(u64::MAX)
        } else {
            Self(ticks as u64)
        }
    }

    /// Returns the raw tick count.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time in seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    /// Returns true if this is time zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns `self * numerator / denominator`, rounded down to a tick.
    ///
    /// Returns `None` if `denominator` is zero or the result overflows.
    #[must_use]
    pub fn scaled(self, numerator: u64, denominator: u64) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let value = u128::from(self.0) * u128::from(numerator) / u128::from(denominator);
        u64::try_from(value).ok().map(Self)
    }

    /// Checked addition.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Saturating subtraction.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl Add for SimTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SimTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_secs_f64())
    }
}

//! Checkpoint schedules.
//!
//! A schedule is an ordered set of strictly increasing instants, all after
//! time zero, built once per verification run and never mutated.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::SimTime;

/// Strictly increasing simulation instants `t_1 < t_2 < ... < t_n`.
///
/// # Examples
///
/// ```
/// use simverify::{CheckpointSchedule, SimTime};
///
/// let schedule = CheckpointSchedule::evenly_spaced(SimTime::from_secs_f64(1.0), 5).unwrap();
/// assert_eq!(schedule.len(), 5);
/// assert_eq!(schedule.instants()[0], SimTime::from_millis(200));
/// assert_eq!(schedule.end(), SimTime::from_millis(1000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SimTime>", into = "Vec<SimTime>")]
pub struct CheckpointSchedule {
    instants: Vec<SimTime>,
}

impl CheckpointSchedule {
    /// `t_k = k * duration / count` for `k = 1..=count`.
    ///
    /// # Errors
    ///
    /// - `EmptySchedule` if `count == 0`
    /// - `NonPositiveDuration` if `duration` is zero
    /// - `NonIncreasingSchedule` if the spacing rounds below one tick
    pub fn evenly_spaced(duration: SimTime, count: usize) -> Result<Self, ValidationError> {
        if count == 0 {
            return Err(ValidationError::EmptySchedule);
        }
        if duration.is_zero() {
            return Err(ValidationError::NonPositiveDuration { duration });
        }
        let n = count as u64;
        let mut instants = Vec::with_capacity(count);
        for k in 1..=n {
            let t = duration.scaled(k, n).ok_or_else(|| ValidationError::InvalidConfig {
                reason: format!("checkpoint {k} of {n} overflows"),
            })?;
            instants.push(t);
        }
        Self::from_instants(instants)
    }

    /// `interval, 2*interval, ...` up to and including `duration`.
    ///
    /// # Errors
    ///
    /// - `NonPositiveInterval` if `interval` is zero
    /// - `NonPositiveDuration` if `duration` is zero
    /// - `EmptySchedule` if `interval > duration`
    pub fn with_stride(duration: SimTime, interval: SimTime) -> Result<Self, ValidationError> {
        if interval.is_zero() {
            return Err(ValidationError::NonPositiveInterval { interval });
        }
        if duration.is_zero() {
            return Err(ValidationError::NonPositiveDuration { duration });
        }
        let count = duration.as_nanos() / interval.as_nanos();
        let instants: Vec<SimTime> = (1..=count)
            .map(|k| SimTime::from_nanos(interval.as_nanos() * k))
            .collect();
        Self::from_instants(instants)
    }

    /// Validate an explicit list of instants.
    ///
    /// # Errors
    ///
    /// - `EmptySchedule` if `instants` is empty
    /// - `NonIncreasingSchedule` if an instant is not after its predecessor
    ///   (the first instant must be after time zero)
    pub fn from_instants(instants: Vec<SimTime>) -> Result<Self, ValidationError> {
        if instants.is_empty() {
            return Err(ValidationError::EmptySchedule);
        }
        let mut previous = SimTime::ZERO;
        for (index, &next) in instants.iter().enumerate() {
            if next <= previous {
                return Err(ValidationError::NonIncreasingSchedule { index, previous, next });
            }
            previous = next;
        }
        Ok(Self { instants })
    }

    /// Returns a copy of this schedule shifted later by `offset`.
    #[must_use]
    pub fn offset_by(&self, offset: SimTime) -> Self {
        Self {
            instants: self.instants.iter().map(|t| *t + offset).collect(),
        }
    }

    /// Instants in increasing order.
    #[must_use]
    pub fn instants(&self) -> &[SimTime] {
        &self.instants
    }

    /// Number of checkpoints (always at least one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.instants.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    /// The last instant.
    #[must_use]
    pub fn end(&self) -> SimTime {
        self.instants.last().copied().unwrap_or(SimTime::ZERO)
    }

    /// The instant before checkpoint `k` (0-based), or zero for the first.
    #[must_use]
    pub fn previous(&self, k: usize) -> SimTime {
        if k == 0 {
            SimTime::ZERO
        } else {
            self.instants.get(k - 1).copied().unwrap_or(SimTime::ZERO)
        }
    }

    /// Iterate over the instants.
    pub fn iter(&self) -> impl Iterator<Item = SimTime> + '_ {
        self.instants.iter().copied()
    }
}

impl TryFrom<Vec<SimTime>> for CheckpointSchedule {
    type Error = ValidationError;

    fn try_from(value: Vec<SimTime>) -> Result<Self, Self::Error> {
        Self::from_instants(value)
    }
}

impl From<CheckpointSchedule> for Vec<SimTime> {
    fn from(value: CheckpointSchedule) -> Self {
        value.instants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_count_is_empty_schedule() {
        let err = CheckpointSchedule::evenly_spaced(SimTime::from_secs_f64(1.0), 0).unwrap_err();
        assert_eq!(err, ValidationError::EmptySchedule);
    }

    #[test]
    fn evenly_spaced_is_strictly_increasing() {
        for n in 1..=40 {
            let s = CheckpointSchedule::evenly_spaced(SimTime::from_secs_f64(2.5), n).unwrap();
            assert_eq!(s.len(), n);
            assert!(s.instants().windows(2).all(|w| w[0] < w[1]));
            assert_eq!(s.end(), SimTime::from_secs_f64(2.5));
        }
    }

    #[test]
    fn evenly_spaced_matches_k_t_over_n() {
        let s = CheckpointSchedule::evenly_spaced(SimTime::from_secs_f64(1.0), 5).unwrap();
        let expected: Vec<SimTime> = [200, 400, 600, 800, 1000].iter().map(|&ms| SimTime::from_millis(ms)).collect();
        assert_eq!(s.instants(), expected.as_slice());
    }

    #[test]
    fn spacing_below_one_tick_is_rejected() {
        let err = CheckpointSchedule::evenly_spaced(SimTime::from_nanos(3), 5).unwrap_err();
        assert!(matches!(err, ValidationError::NonIncreasingSchedule { .. }));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = CheckpointSchedule::evenly_spaced(SimTime::ZERO, 3).unwrap_err();
        assert!(matches!(err, ValidationError::NonPositiveDuration { .. }));
    }

    #[test]
    fn stride_includes_endpoint() {
        let s = CheckpointSchedule::with_stride(SimTime::from_secs_f64(1.0), SimTime::from_secs_f64(0.1)).unwrap();
        assert_eq!(s.len(), 10);
        assert_eq!(s.instants()[0], SimTime::from_millis(100));
        assert_eq!(s.end(), SimTime::from_millis(1000));
    }

    #[test]
    fn stride_longer_than_duration_is_empty() {
        let err = CheckpointSchedule::with_stride(SimTime::from_millis(50), SimTime::from_millis(100)).unwrap_err();
        assert_eq!(err, ValidationError::EmptySchedule);
    }

    #[test]
    fn explicit_instants_must_increase() {
        let t = SimTime::from_millis;
        assert!(CheckpointSchedule::from_instants(vec![t(1), t(2), t(3)]).is_ok());
        assert!(CheckpointSchedule::from_instants(vec![t(2), t(2)]).is_err());
        assert!(CheckpointSchedule::from_instants(vec![SimTime::ZERO]).is_err());
    }

    #[test]
    fn previous_and_offset() {
        let s = CheckpointSchedule::evenly_spaced(SimTime::from_secs_f64(1.0), 4).unwrap();
        assert_eq!(s.previous(0), SimTime::ZERO);
        assert_eq!(s.previous(2), SimTime::from_millis(500));
        let shifted = s.offset_by(SimTime::from_millis(100));
        assert_eq!(shifted.instants()[0], SimTime::from_millis(350));
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let s = CheckpointSchedule::evenly_spaced(SimTime::from_millis(10), 2).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "[5000000,10000000]");
        assert!(serde_json::from_str::<CheckpointSchedule>("[3,1]").is_err());
    }
}

//! Harness and engine configuration.
//!
//! Determinism-affecting engine switches (thread count, stabilization,
//! solver shortcuts) are collected in [`EngineConfig`] and handed to the
//! engine factory once, before a suite runs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, ValidationError};
use crate::oracle::Verbosity;

/// Position stabilization applied by the engine after each step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stabilization {
    /// Mass-weighted projection.
    #[default]
    GlobalMass,
    /// Stiffness-weighted projection.
    GlobalStiffness,
    /// No stabilization.
    None,
}

/// Global engine switches that affect reproducibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Solver thread count. Anything above 1 can reorder floating point
    /// reductions between runs.
    pub thread_count: usize,
    /// Position stabilization method.
    pub stabilization: Stabilization,
    /// Allow the hybrid direct/iterative solve.
    pub hybrid_solve: bool,
    /// Enable accelerated collision detection.
    pub collision_acceleration: bool,
    /// Apply stiffness damping to incompressibility terms.
    pub incompressible_damping: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            stabilization: Stabilization::GlobalMass,
            hybrid_solve: false,
            collision_acceleration: false,
            incompressible_damping: true,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `thread_count` is zero.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.thread_count == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "thread_count must be > 0".to_string(),
            });
        }
        Ok(self)
    }

    /// Returns true if runs are expected to be bit-reproducible.
    #[must_use]
    pub const fn is_deterministic(&self) -> bool {
        self.thread_count == 1 && !self.hybrid_solve
    }
}

/// Per-session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on how long `run` waits for the engine to stop. `None` waits
    /// indefinitely.
    #[serde(rename = "stop_timeout_ms", with = "duration_ms")]
    pub stop_timeout: Option<Duration>,
    /// Capture auxiliary state (multipliers, integrator and component
    /// history) in addition to positions and velocities.
    pub deep_snapshots: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    /// Session config with deep snapshots and no stop timeout.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stop_timeout: None,
            deep_snapshots: true,
        }
    }

    /// Bound the wait for the engine to stop.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Engine switches applied once at suite start.
    pub engine: EngineConfig,
    /// Session behavior.
    pub session: SessionConfig,
    /// Mismatch diagnostic detail.
    pub verbosity: Verbosity,
    /// Stop the suite at the first FAILED outcome.
    pub abort_on_failure: bool,
}

impl HarnessConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed JSON or invalid values.
    pub fn from_json_str(s: &str) -> Result<Self, HarnessError> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("parse harness config: {e}"),
        })?;
        Ok(cfg.validate()?)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first section error.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let engine = self.engine.validate()?;
        if let Some(t) = self.session.stop_timeout {
            if t.is_zero() {
                return Err(ValidationError::InvalidConfig {
                    reason: "stop_timeout_ms must be > 0 when set".to_string(),
                });
            }
        }
        Ok(Self { engine, ..self })
    }
}

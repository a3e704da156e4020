//! Engine command/query interface.
//!
//! The harness never touches a concrete simulator. Every engine version is
//! driven through [`SimulationEngine`], created by an [`EngineFactory`] that
//! has been configured once with the suite's [`EngineConfig`].

#[cfg(feature = "reference")]
pub mod reference;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, ValidationError};
use crate::format::NumberFormat;
use crate::integrator::Integrator;
use crate::snapshot::Snapshot;
use crate::time::SimTime;

/// Scenario name plus ordered construction arguments.
///
/// # Examples
///
/// ```
/// use simverify::ScenarioDescriptor;
///
/// let d = ScenarioDescriptor::parse("TetBeam3d [-quadratic]").unwrap();
/// assert_eq!(d.name(), "TetBeam3d");
/// assert_eq!(d.args(), &["-quadratic".to_string()]);
/// assert_eq!(d.to_string(), "TetBeam3d [-quadratic]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    name: String,
    args: Vec<String>,
}

impl ScenarioDescriptor {
    /// Descriptor without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append a construction argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse `Name`, `Name arg1 arg2` or `Name [arg1 arg2]`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for an empty descriptor or
    /// unbalanced brackets.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidConfig {
            reason: format!("scenario descriptor '{s}': {reason}"),
        };
        let s = s.trim();
        let (name, rest) = match s.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (s, ""),
        };
        if name.is_empty() || name.contains(['[', ']']) {
            return Err(invalid("missing scenario name"));
        }
        let rest = match (rest.strip_prefix('['), rest.ends_with(']')) {
            (Some(inner), true) => inner.strip_suffix(']').unwrap_or(inner),
            (None, false) => rest,
            _ => return Err(invalid("unbalanced brackets")),
        };
        if rest.contains(['[', ']']) {
            return Err(invalid("nested brackets"));
        }
        Ok(Self {
            name: name.to_string(),
            args: rest.split_whitespace().map(str::to_string).collect(),
        })
    }

    /// Scenario constructor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Construction arguments in order.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns true if `arg` was given.
    #[must_use]
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for ScenarioDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} [{}]", self.name, self.args.join(" "))
        }
    }
}

/// Numeric precision for `save_model`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFormat {
    /// `None` writes doubles at full precision.
    pub precision: Option<NumberFormat>,
}

impl SaveFormat {
    /// Full precision; every double survives a round trip bit-exactly.
    #[must_use]
    pub const fn full() -> Self {
        Self { precision: None }
    }

    /// Values are rounded through `format` before writing.
    #[must_use]
    pub const fn with_precision(format: NumberFormat) -> Self {
        Self {
            precision: Some(format),
        }
    }

    /// Parse a printf-style precision such as `%.10g`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidNumberFormat` for bad formats.
    pub fn parse(format: &str) -> Result<Self, ValidationError> {
        Ok(Self::with_precision(NumberFormat::parse(format)?))
    }

    /// Round a value the way this format writes it.
    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        self.precision.map_or(value, |p| p.round(value))
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.precision {
            Some(p) => write!(f, "{p}"),
            None => f.write_str("full"),
        }
    }
}

/// Result of waiting for a started run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The engine published its stopped event at `time`.
    Stopped(SimTime),
    /// The wait bound elapsed first.
    StillRunning,
}

/// Command/query interface a verifier drives an engine through.
///
/// `start` and `wait_for_stop` form the blocking run pair; every other
/// command fails with `EngineError::Busy` while a run is outstanding.
pub trait SimulationEngine: Send {
    /// Construct a scenario from the engine's catalog.
    ///
    /// # Errors
    ///
    /// `ScenarioNotFound` if no constructor matches.
    fn load_scenario(&mut self, descriptor: &ScenarioDescriptor) -> Result<(), EngineError>;

    /// Descriptor of the loaded scenario.
    fn descriptor(&self) -> Option<&ScenarioDescriptor>;

    /// Select the integrator for subsequent runs.
    fn set_integrator(&mut self, integrator: Integrator) -> Result<(), EngineError>;

    /// Current integrator.
    fn integrator(&self) -> Result<Integrator, EngineError>;

    /// Bound the integration step.
    fn set_max_step_size(&mut self, step: SimTime) -> Result<(), EngineError>;

    /// Register an instant at which the engine retains a deep state copy
    /// and clips its step.
    fn add_waypoint(&mut self, time: SimTime) -> Result<(), EngineError>;

    /// Drop every registered waypoint except time zero.
    fn clear_waypoints(&mut self) -> Result<(), EngineError>;

    /// Begin advancing until `stop_at`.
    fn start(&mut self, stop_at: SimTime) -> Result<(), EngineError>;

    /// Block until the started run stops, or until `timeout` elapses.
    fn wait_for_stop(&mut self, timeout: Option<Duration>) -> Result<WaitStatus, EngineError>;

    /// Current simulation time.
    fn time(&self) -> Result<SimTime, EngineError>;

    /// Return to time zero, clearing retained state past zero.
    fn reset(&mut self) -> Result<(), EngineError>;

    /// Relocate to a retained waypoint.
    ///
    /// # Errors
    ///
    /// `NoWaypoint` if nothing is retained at `time`.
    fn restore_waypoint(&mut self, time: SimTime) -> Result<(), EngineError>;

    /// The deep state retained at waypoint `time`, if any.
    fn retained_state(&self, time: SimTime) -> Result<Option<Snapshot>, EngineError>;

    /// Query dynamic state at the current instant.
    fn get_state(&self, deep: bool) -> Result<Snapshot, EngineError>;

    /// Overwrite dynamic state.
    fn set_state(&mut self, snapshot: &Snapshot) -> Result<(), EngineError>;

    /// Write the loaded scenario to a self-describing document.
    fn save_model(&self, format: &SaveFormat) -> Result<Vec<u8>, EngineError>;

    /// Replace the loaded scenario with one read by `save_model`.
    ///
    /// # Errors
    ///
    /// `Format` if the document fails structural validation.
    fn load_model(&mut self, bytes: &[u8]) -> Result<(), EngineError>;
}

/// Creates engines that share one global configuration.
pub trait EngineFactory {
    /// Apply determinism-affecting switches. Called once before a suite.
    fn configure(&mut self, config: &EngineConfig) -> Result<(), EngineError>;

    /// The configuration currently applied.
    fn config(&self) -> &EngineConfig;

    /// Create an engine with nothing loaded.
    fn spawn(&self) -> Result<Box<dyn SimulationEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parse_forms() {
        let plain = ScenarioDescriptor::parse("SpringMesh").unwrap();
        assert_eq!(plain, ScenarioDescriptor::new("SpringMesh"));
        assert_eq!(plain.to_string(), "SpringMesh");

        let bare = ScenarioDescriptor::parse("TetBeam3d -quadratic -coarse").unwrap();
        let bracketed = ScenarioDescriptor::parse("  TetBeam3d [-quadratic -coarse] ").unwrap();
        assert_eq!(bare, bracketed);
        assert!(bare.has_arg("-coarse"));
        assert_eq!(
            bare,
            ScenarioDescriptor::new("TetBeam3d").arg("-quadratic").arg("-coarse")
        );
    }

    #[test]
    fn descriptor_display_round_trips() {
        let d = ScenarioDescriptor::new("ViscousBeam").arg("-coarse");
        assert_eq!(ScenarioDescriptor::parse(&d.to_string()).unwrap(), d);
    }

    #[test]
    fn descriptor_parse_rejects_malformed() {
        assert!(ScenarioDescriptor::parse("").is_err());
        assert!(ScenarioDescriptor::parse("[-x]").is_err());
        assert!(ScenarioDescriptor::parse("A [-x").is_err());
        assert!(ScenarioDescriptor::parse("A [-x [y]]").is_err());
    }

    #[test]
    fn save_format_apply() {
        let full = SaveFormat::full();
        assert_eq!(full.apply(1.0 / 3.0).to_bits(), (1.0f64 / 3.0).to_bits());
        let g10 = SaveFormat::parse("%.10g").unwrap();
        assert_ne!(g10.apply(1.0 / 3.0).to_bits(), (1.0f64 / 3.0).to_bits());
        assert_eq!(g10.to_string(), "%.10g");
        assert_eq!(full.to_string(), "full");
    }
}

//! Regression suite driver.
//!
//! Applies one [`EngineConfig`](crate::config::EngineConfig) to the engine
//! factory, then runs each catalog entry's determinism and round-trip plans
//! in order, collecting everything into one [`RegressionReport`].

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::engine::{EngineFactory, ScenarioDescriptor};
use crate::error::{HarnessError, HarnessResult};
use crate::report::{Check, Outcome, RegressionReport, Verdict};
use crate::verify::{DeterminismPlan, DeterminismVerifier, RoundTripPlan, RoundTripValidator};

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteEntry {
    /// Scenario to load.
    pub descriptor: ScenarioDescriptor,
    /// Determinism plan, if the scenario is checked for determinism.
    pub determinism: Option<DeterminismPlan>,
    /// Round-trip plan, if the scenario is checked for persistence.
    pub round_trip: Option<RoundTripPlan>,
}

impl SuiteEntry {
    /// Entry with no plans.
    #[must_use]
    pub const fn new(descriptor: ScenarioDescriptor) -> Self {
        Self {
            descriptor,
            determinism: None,
            round_trip: None,
        }
    }

    /// Verify determinism with `plan`.
    #[must_use]
    pub fn determinism(mut self, plan: DeterminismPlan) -> Self {
        self.determinism = Some(plan);
        self
    }

    /// Validate the persistence round trip with `plan`.
    #[must_use]
    pub fn round_trip(mut self, plan: RoundTripPlan) -> Self {
        self.round_trip = Some(plan);
        self
    }
}

/// A configured engine factory plus an ordered catalog.
///
/// # Examples
///
/// ```
/// use simverify::engine::reference::ReferenceFactory;
/// use simverify::suite::{RegressionSuite, SuiteEntry};
/// use simverify::verify::DeterminismPlan;
/// use simverify::{HarnessConfig, ScenarioDescriptor, SimTime};
///
/// let suite = RegressionSuite::new(ReferenceFactory::new(), HarnessConfig::default())
///     .unwrap()
///     .with_entry(
///         SuiteEntry::new(ScenarioDescriptor::new("SpringMesh").arg("-coarse"))
///             .determinism(DeterminismPlan::new(SimTime::from_millis(100), 2)),
///     );
/// let report = suite.run().unwrap();
/// assert_eq!(report.exit_code(), 0);
/// ```
pub struct RegressionSuite<F: EngineFactory> {
    factory: F,
    config: HarnessConfig,
    entries: Vec<SuiteEntry>,
}

impl<F: EngineFactory> RegressionSuite<F> {
    /// Validate `config` and apply its engine configuration to `factory`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an invalid configuration, or `Session` if
    /// the factory rejects the engine configuration.
    pub fn new(mut factory: F, config: HarnessConfig) -> HarnessResult<Self> {
        let config = config.validate()?;
        factory.configure(&config.engine)?;
        if !config.engine.is_deterministic() {
            warn!(
                thread_count = config.engine.thread_count,
                hybrid_solve = config.engine.hybrid_solve,
                "engine configuration is not expected to be bitwise reproducible"
            );
        }
        Ok(Self {
            factory,
            config,
            entries: Vec::new(),
        })
    }

    /// Append an entry.
    #[must_use]
    pub fn with_entry(mut self, entry: SuiteEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Append an entry in place.
    pub fn push(&mut self, entry: SuiteEntry) {
        self.entries.push(entry);
    }

    /// Catalog entries in run order.
    #[must_use]
    pub fn entries(&self) -> &[SuiteEntry] {
        &self.entries
    }

    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every entry into a fresh report.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if abort-on-failure is set and an outcome FAILED.
    pub fn run(&self) -> HarnessResult<RegressionReport> {
        let mut report = RegressionReport::new();
        self.run_into(&mut report)?;
        Ok(report)
    }

    /// Run every entry, appending to `report`. On abort, `report` keeps
    /// everything recorded up to and including the failure.
    ///
    /// # Errors
    ///
    /// Returns `Aborted` if abort-on-failure is set and an outcome FAILED.
    pub fn run_into(&self, report: &mut RegressionReport) -> HarnessResult<()> {
        info!(report = %report.id(), entries = self.entries.len(), "regression suite started");
        let determinism = DeterminismVerifier::new(&self.factory, &self.config);
        let round_trip = RoundTripValidator::new(&self.factory, &self.config);

        for entry in &self.entries {
            if let Some(plan) = &entry.determinism {
                let result = determinism.verify(&entry.descriptor, plan, report);
                self.settle(result, &entry.descriptor, report)?;
            }
            if let Some(plan) = &entry.round_trip {
                let result = round_trip.validate(&entry.descriptor, plan, report);
                self.settle(result, &entry.descriptor, report)?;
            }
        }

        let summary = report.summary();
        info!(
            ok = summary.ok,
            failed = summary.failed,
            skipped = summary.skipped,
            "regression suite finished"
        );
        Ok(())
    }

    /// An invalid plan fails its own entry only; anything else propagates.
    fn settle(
        &self,
        result: HarnessResult<()>,
        descriptor: &ScenarioDescriptor,
        report: &mut RegressionReport,
    ) -> HarnessResult<()> {
        match result {
            Err(HarnessError::Validation(err)) => {
                error!(scenario = %descriptor, error = %err, "invalid verification plan");
                report.record(
                    Outcome::new(descriptor.to_string(), Check::Load, Verdict::Failed)
                        .diagnostic(format!("invalid plan: {err}")),
                );
                if self.config.abort_on_failure {
                    return Err(HarnessError::Aborted {
                        scenario: descriptor.to_string(),
                        reason: err.to_string(),
                    });
                }
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(all(test, feature = "reference"))]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::reference::ReferenceFactory;
    use crate::time::SimTime;

    #[test]
    fn invalid_plan_fails_only_its_entry() {
        let suite = RegressionSuite::new(ReferenceFactory::new(), HarnessConfig::default())
            .unwrap()
            .with_entry(
                SuiteEntry::new(ScenarioDescriptor::new("SpringMesh"))
                    .determinism(DeterminismPlan::new(SimTime::from_millis(100), 0)),
            )
            .with_entry(
                SuiteEntry::new(ScenarioDescriptor::new("SpringMesh").arg("-coarse"))
                    .round_trip(RoundTripPlan::new(SimTime::from_millis(100), SimTime::from_millis(50))),
            );
        let report = suite.run().unwrap();
        let summary = report.summary();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ok, 2);
        assert!(report.failures().next().unwrap().diagnostic.as_deref().unwrap().contains("invalid plan"));
    }

    #[test]
    fn zero_threads_is_rejected() {
        let config = HarnessConfig {
            engine: EngineConfig {
                thread_count: 0,
                ..EngineConfig::default()
            },
            ..HarnessConfig::default()
        };
        let err = RegressionSuite::new(ReferenceFactory::new(), config).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn abort_keeps_partial_report() {
        let config = HarnessConfig {
            abort_on_failure: true,
            ..HarnessConfig::default()
        };
        let suite = RegressionSuite::new(ReferenceFactory::new(), config)
            .unwrap()
            .with_entry(
                SuiteEntry::new(ScenarioDescriptor::new("SpringMesh").arg("-bogus"))
                    .determinism(DeterminismPlan::new(SimTime::from_millis(100), 1)),
            )
            .with_entry(SuiteEntry::new(ScenarioDescriptor::new("TetBeam3d")).determinism(DeterminismPlan::new(
                SimTime::from_millis(100),
                1,
            )));
        let mut report = RegressionReport::new();
        assert!(suite.run_into(&mut report).unwrap_err().is_aborted());
        assert_eq!(report.len(), 1);
        assert_eq!(report.outcomes()[0].check, Check::Load);
    }
}

//! Persistence round-trip validator.
//!
//! Serializes a loaded (optionally settled) scenario, rebuilds it in a
//! fresh engine, then advances both sessions in lockstep and compares them
//! at every sample instant.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::{HarnessConfig, SessionConfig};
use crate::engine::{EngineFactory, SaveFormat, ScenarioDescriptor};
use crate::error::{HarnessResult, SessionError};
use crate::integrator::Integrator;
use crate::oracle::{Comparison, EqualityOracle};
use crate::report::{Check, RegressionReport, Verdict};
use crate::schedule::CheckpointSchedule;
use crate::session::ScenarioSession;
use crate::snapshot::Snapshot;
use crate::time::SimTime;

use super::{describe, load_or_record, Recorder};

/// What to validate for one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTripPlan {
    /// Length of the lockstep run after reload (`tsim`).
    pub duration: SimTime,
    /// Sample spacing (`hsim`).
    pub interval: SimTime,
    /// Run this long before serializing.
    pub settle: Option<SimTime>,
    /// Numeric precision of the written document.
    pub format: SaveFormat,
    /// Integrator override applied before settling.
    pub integrator: Option<Integrator>,
    /// Engine max step override.
    pub max_step: Option<SimTime>,
}

impl RoundTripPlan {
    /// Compare every `interval` over `duration`, full precision, no settle.
    #[must_use]
    pub fn new(duration: SimTime, interval: SimTime) -> Self {
        Self {
            duration,
            interval,
            settle: None,
            format: SaveFormat::full(),
            integrator: None,
            max_step: None,
        }
    }

    /// Run for `settle` before serializing.
    #[must_use]
    pub fn settle(mut self, settle: SimTime) -> Self {
        self.settle = Some(settle);
        self
    }

    /// Write the document with this precision.
    #[must_use]
    pub fn format(mut self, format: SaveFormat) -> Self {
        self.format = format;
        self
    }

    /// Select the integrator.
    #[must_use]
    pub fn integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = Some(integrator);
        self
    }

    /// Override the engine's max step.
    #[must_use]
    pub fn max_step(mut self, step: SimTime) -> Self {
        self.max_step = Some(step);
        self
    }
}

/// Drives [`RoundTripPlan`]s against one engine factory.
pub struct RoundTripValidator<'f> {
    factory: &'f dyn EngineFactory,
    session: SessionConfig,
    oracle: EqualityOracle,
    abort_on_failure: bool,
}

impl<'f> RoundTripValidator<'f> {
    /// Validator using `config`'s session, verbosity and abort settings.
    #[must_use]
    pub fn new(factory: &'f dyn EngineFactory, config: &HarnessConfig) -> Self {
        Self {
            factory,
            session: config.session.clone(),
            oracle: EqualityOracle::new(config.verbosity),
            abort_on_failure: config.abort_on_failure,
        }
    }

    /// Replace the comparison oracle.
    #[must_use]
    pub const fn with_oracle(mut self, oracle: EqualityOracle) -> Self {
        self.oracle = oracle;
        self
    }

    /// Validate one scenario, appending outcomes to `report`. Sampling
    /// stops at the first FAILED comparison.
    ///
    /// # Errors
    ///
    /// - `Validation` if the sampling stride is invalid
    /// - `Aborted` if abort-on-failure is set and an outcome FAILED
    #[instrument(skip_all, fields(scenario = %descriptor))]
    pub fn validate(
        &self,
        descriptor: &ScenarioDescriptor,
        plan: &RoundTripPlan,
        report: &mut RegressionReport,
    ) -> HarnessResult<()> {
        let stride = CheckpointSchedule::with_stride(plan.duration, plan.interval)?;
        let mut recorder = Recorder::new(report, descriptor, self.abort_on_failure);

        let Some(mut original) = load_or_record(self.factory, descriptor, &self.session, &mut recorder)? else {
            return Ok(());
        };

        if let Err(err) = Self::settle(&mut original, plan) {
            let outcome = recorder
                .outcome(Check::Run, Verdict::Failed)
                .integrator(original.integrator())
                .at(original.time())
                .diagnostic(describe(&err));
            return recorder.record(outcome);
        }
        let integrator = original.integrator();

        let mut reloaded = match self.reload(&original, &plan.format) {
            Ok(session) => session,
            Err(err) => {
                let outcome = recorder
                    .outcome(Check::Serialize, Verdict::Failed)
                    .integrator(integrator)
                    .at(original.time())
                    .diagnostic(describe(&err));
                return recorder.record(outcome);
            }
        };

        let samples = stride.offset_by(original.time());
        info!(
            from = %original.time(),
            samples = samples.len(),
            precision = %plan.format,
            "round-trip validation started"
        );
        for t in samples.iter() {
            let compared = Self::advance_both(&mut original, &mut reloaded, t)
                .map(|(left, right)| (self.oracle.compare(&left, &right), left.digest().to_hex()));
            let outcome = match compared {
                Ok((Comparison::Equal, digest)) => recorder
                    .outcome(Check::RoundTrip, Verdict::Ok)
                    .integrator(integrator)
                    .at(t)
                    .digest(digest),
                Ok((Comparison::Unequal(mismatch), _)) => recorder
                    .outcome(Check::RoundTrip, Verdict::Failed)
                    .integrator(integrator)
                    .at(t)
                    .diagnostic(mismatch.to_string()),
                Err(err) => recorder
                    .outcome(Check::Run, Verdict::Failed)
                    .integrator(integrator)
                    .at(t)
                    .diagnostic(describe(&err)),
            };
            debug!(integrator = %integrator, time = %t, verdict = %outcome.verdict, "sample compared");
            let failed = outcome.is_failed();
            recorder.record(outcome)?;
            if failed {
                break;
            }
        }
        info!(outcomes = recorder.recorded(), "round-trip validation finished");
        Ok(())
    }

    fn settle(session: &mut ScenarioSession, plan: &RoundTripPlan) -> Result<(), SessionError> {
        if let Some(integrator) = plan.integrator {
            session.set_integrator(integrator)?;
        }
        if let Some(step) = plan.max_step {
            session.set_max_step_size(step)?;
        }
        if let Some(settle) = plan.settle {
            let target = session.time() + settle;
            session.run_until(target)?;
        }
        Ok(())
    }

    fn reload(&self, original: &ScenarioSession, format: &SaveFormat) -> Result<ScenarioSession, SessionError> {
        let bytes = original.serialize(format)?;
        ScenarioSession::deserialize(self.factory, &bytes, self.session.clone())
    }

    fn advance_both(
        original: &mut ScenarioSession,
        reloaded: &mut ScenarioSession,
        t: SimTime,
    ) -> Result<(Snapshot, Snapshot), SessionError> {
        original.run_until(t)?;
        reloaded.run_until(t)?;
        Ok((original.capture_snapshot()?, reloaded.capture_snapshot()?))
    }
}

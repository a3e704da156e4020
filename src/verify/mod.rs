//! Verifiers: determinism (rewind and replay) and persistence round trip.
//!
//! Both convert every per-scenario failure into an [`Outcome`]. Only plan
//! validation errors and an explicit abort escape as `Err`.

mod determinism;
mod roundtrip;

pub use determinism::{DeterminismPlan, DeterminismVerifier, RewindTarget};
pub use roundtrip::{RoundTripPlan, RoundTripValidator};

use tracing::warn;

use crate::engine::{EngineFactory, ScenarioDescriptor};
use crate::error::{HarnessError, HarnessResult, SessionError};
use crate::config::SessionConfig;
use crate::report::{Check, Outcome, RegressionReport, Verdict};
use crate::session::ScenarioSession;

/// Human-readable diagnostic for a session failure.
pub(crate) fn describe(err: &SessionError) -> String {
    match err {
        SessionError::Timeout { waited_ms } => format!("timed out after {waited_ms}ms"),
        other => other.to_string(),
    }
}

/// Appends outcomes for one scenario and enforces abort-on-failure.
pub(crate) struct Recorder<'r> {
    report: &'r mut RegressionReport,
    scenario: String,
    abort_on_failure: bool,
    recorded: usize,
}

impl<'r> Recorder<'r> {
    pub(crate) fn new(report: &'r mut RegressionReport, descriptor: &ScenarioDescriptor, abort_on_failure: bool) -> Self {
        Self {
            report,
            scenario: descriptor.to_string(),
            abort_on_failure,
            recorded: 0,
        }
    }

    pub(crate) fn outcome(&self, check: Check, verdict: Verdict) -> Outcome {
        Outcome::new(self.scenario.clone(), check, verdict)
    }

    /// Outcomes recorded so far for this scenario.
    pub(crate) const fn recorded(&self) -> usize {
        self.recorded
    }

    /// Append `outcome`; a FAILED outcome under abort-on-failure ends the
    /// suite.
    pub(crate) fn record(&mut self, outcome: Outcome) -> HarnessResult<()> {
        if outcome.verdict != Verdict::Ok {
            warn!(
                scenario = %outcome.scenario,
                integrator = ?outcome.integrator,
                time = ?outcome.time.map(|t| t.to_string()),
                check = %outcome.check,
                verdict = %outcome.verdict,
                diagnostic = outcome.diagnostic.as_deref().unwrap_or(""),
                "non-OK outcome"
            );
        }
        let abort = self.abort_on_failure && outcome.is_failed();
        let reason = outcome.diagnostic.clone().unwrap_or_else(|| outcome.check.to_string());
        self.report.record(outcome);
        self.recorded += 1;
        if abort {
            return Err(HarnessError::Aborted {
                scenario: self.scenario.clone(),
                reason,
            });
        }
        Ok(())
    }
}

/// Load a scenario, recording SKIPPED (not found) or FAILED (anything
/// else) on failure.
pub(crate) fn load_or_record(
    factory: &dyn EngineFactory,
    descriptor: &ScenarioDescriptor,
    config: &SessionConfig,
    recorder: &mut Recorder<'_>,
) -> HarnessResult<Option<ScenarioSession>> {
    match ScenarioSession::load(factory, descriptor, config.clone()) {
        Ok(session) => Ok(Some(session)),
        Err(err) => {
            let verdict = if matches!(err, SessionError::ScenarioNotFound { .. }) {
                Verdict::Skipped
            } else {
                Verdict::Failed
            };
            let outcome = recorder.outcome(Check::Load, verdict).diagnostic(describe(&err));
            recorder.record(outcome)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_timeout() {
        assert_eq!(describe(&SessionError::Timeout { waited_ms: 50 }), "timed out after 50ms");
        assert!(describe(&SessionError::Poisoned).contains("poisoned"));
    }

    #[test]
    fn recorder_aborts_only_on_failure() {
        let mut report = RegressionReport::new();
        let descriptor = ScenarioDescriptor::new("SpringMesh");
        let mut recorder = Recorder::new(&mut report, &descriptor, true);
        let skipped = recorder.outcome(Check::Load, Verdict::Skipped);
        assert!(recorder.record(skipped).is_ok());
        let failed = recorder.outcome(Check::Run, Verdict::Failed).diagnostic("boom");
        let err = recorder.record(failed).unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(report.len(), 2);
    }
}

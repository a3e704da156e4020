//! Determinism verifier.
//!
//! Per scenario and integrator: run forward to each checkpoint `t_k`,
//! capture, check the engine's retained checkpoint against the live
//! capture, rewind, replay to `t_k`, capture again, and compare. Checkpoints
//! the replay passes through are compared with what the engine retained
//! for them before the rewind. The direct-run state at `t_k` is written
//! back before the next forward leg.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::{HarnessConfig, SessionConfig};
use crate::engine::{EngineFactory, ScenarioDescriptor};
use crate::error::{HarnessResult, SessionError};
use crate::integrator::{Integrator, IntegratorSelection};
use crate::oracle::{Comparison, EqualityOracle};
use crate::report::{Check, Outcome, RegressionReport, Verdict};
use crate::schedule::CheckpointSchedule;
use crate::session::ScenarioSession;
use crate::snapshot::Snapshot;
use crate::time::SimTime;

use super::{describe, load_or_record, Recorder};

/// Where the replay for checkpoint `t_k` starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewindTarget {
    /// Time zero.
    #[default]
    Start,
    /// `t_{k-1}` (zero for the first checkpoint).
    PreviousCheckpoint,
}

/// What to verify for one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismPlan {
    /// Total simulated duration `T`.
    pub duration: SimTime,
    /// Checkpoint count `n`.
    pub checkpoints: usize,
    /// Integrators to run, in order.
    pub integrators: IntegratorSelection,
    /// Replay start.
    pub rewind: RewindTarget,
    /// Also check that writing a captured state back is lossless.
    pub verify_state_restore: bool,
    /// Engine max step override.
    pub max_step: Option<SimTime>,
}

impl DeterminismPlan {
    /// `checkpoints` evenly spaced checkpoints over `duration`, default
    /// integrator, replay from the start.
    #[must_use]
    pub fn new(duration: SimTime, checkpoints: usize) -> Self {
        Self {
            duration,
            checkpoints,
            integrators: IntegratorSelection::default(),
            rewind: RewindTarget::Start,
            verify_state_restore: false,
            max_step: None,
        }
    }

    /// Select the integrators.
    #[must_use]
    pub fn integrators(mut self, integrators: IntegratorSelection) -> Self {
        self.integrators = integrators;
        self
    }

    /// Set the replay start.
    #[must_use]
    pub fn rewind(mut self, rewind: RewindTarget) -> Self {
        self.rewind = rewind;
        self
    }

    /// Enable the state write-back check.
    #[must_use]
    pub fn verify_state_restore(mut self, enabled: bool) -> Self {
        self.verify_state_restore = enabled;
        self
    }

    /// Override the engine's max step.
    #[must_use]
    pub fn max_step(mut self, step: SimTime) -> Self {
        self.max_step = Some(step);
        self
    }
}

/// Drives [`DeterminismPlan`]s against one engine factory.
pub struct DeterminismVerifier<'f> {
    factory: &'f dyn EngineFactory,
    session: SessionConfig,
    oracle: EqualityOracle,
    abort_on_failure: bool,
}

/// Result of one checkpoint, before it is recorded. A check carries a
/// diagnostic only when it failed.
struct CheckpointResult {
    checks: Vec<(Check, SimTime, Option<String>)>,
    digest: String,
}

fn diagnostic(comparison: Comparison) -> Option<String> {
    comparison.mismatch().map(ToString::to_string)
}

impl<'f> DeterminismVerifier<'f> {
    /// Verifier using `config`'s session, verbosity and abort settings.
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

    /// Verify one scenario, appending outcomes to `report`.
    ///
    /// # Errors
    ///
    /// - `Validation` if the plan's schedule or integrator set is invalid
    /// - `Aborted` if abort-on-failure is set and an outcome FAILED
    #[instrument(skip_all, fields(scenario = %descriptor))]
    pub fn verify(
        &self,
        descriptor: &ScenarioDescriptor,
        plan: &DeterminismPlan,
        report: &mut RegressionReport,
    ) -> HarnessResult<()> {
        let schedule = CheckpointSchedule::evenly_spaced(plan.duration, plan.checkpoints)?;
        let integrators = plan.integrators.resolve()?;
        let mut recorder = Recorder::new(report, descriptor, self.abort_on_failure);

        let Some(mut session) = load_or_record(self.factory, descriptor, &self.session, &mut recorder)? else {
            return Ok(());
        };
        info!(checkpoints = schedule.len(), integrators = integrators.len(), "determinism verification started");

        let baseline = match Self::prepare(&mut session, plan, &schedule) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let outcome = recorder.outcome(Check::Load, Verdict::Failed).diagnostic(describe(&err));
                return recorder.record(outcome);
            }
        };

        for (pass, &integrator) in integrators.iter().enumerate() {
            if pass > 0 && !self.check_reset(&mut session, integrator, &baseline, &mut recorder)? {
                return Ok(());
            }

            if let Err(err) = session.set_integrator(integrator) {
                let outcome = recorder
                    .outcome(Check::Run, Verdict::Failed)
                    .integrator(integrator)
                    .diagnostic(describe(&err));
                return recorder.record(outcome);
            }

            if !self.run_pass(&mut session, integrator, plan, &schedule, &mut recorder)? {
                break;
            }
        }
        info!(outcomes = recorder.recorded(), "determinism verification finished");
        Ok(())
    }

    /// Reset and compare against the post-load baseline. Returns false if
    /// the reset itself failed.
    fn check_reset(
        &self,
        session: &mut ScenarioSession,
        integrator: Integrator,
        baseline: &Snapshot,
        recorder: &mut Recorder<'_>,
    ) -> HarnessResult<bool> {
        let outcome = recorder.outcome(Check::ResetIdempotence, Verdict::Ok).integrator(integrator);
        match session.reset().and_then(|()| session.capture_snapshot()) {
            Ok(after_reset) => {
                let outcome = outcome.at(after_reset.time());
                let outcome = match self.oracle.compare(baseline, &after_reset) {
                    Comparison::Equal => outcome.digest(after_reset.digest().to_hex()),
                    Comparison::Unequal(m) => Outcome {
                        verdict: Verdict::Failed,
                        ..outcome.diagnostic(m.to_string())
                    },
                };
                recorder.record(outcome)?;
                Ok(true)
            }
            Err(err) => {
                recorder.record(Outcome {
                    verdict: Verdict::Failed,
                    ..outcome.diagnostic(describe(&err))
                })?;
                Ok(false)
            }
        }
    }

    fn prepare(
        session: &mut ScenarioSession,
        plan: &DeterminismPlan,
        schedule: &CheckpointSchedule,
    ) -> Result<Snapshot, SessionError> {
        if let Some(step) = plan.max_step {
            session.set_max_step_size(step)?;
        }
        session.set_schedule(schedule)?;
        session.capture_snapshot()
    }

    /// One integrator pass. Returns false if the session can no longer be
    /// used.
    fn run_pass(
        &self,
        session: &mut ScenarioSession,
        integrator: Integrator,
        plan: &DeterminismPlan,
        schedule: &CheckpointSchedule,
        recorder: &mut Recorder<'_>,
    ) -> HarnessResult<bool> {
        for (k, t_k) in schedule.iter().enumerate() {
            let rewind_to = match plan.rewind {
                RewindTarget::Start => SimTime::ZERO,
                RewindTarget::PreviousCheckpoint => schedule.previous(k),
            };
            match self.checkpoint(session, schedule, t_k, rewind_to, plan.verify_state_restore) {
                Ok(result) => Self::record_checkpoint(recorder, integrator, t_k, result)?,
                Err(err) => {
                    let outcome = recorder
                        .outcome(Check::Run, Verdict::Failed)
                        .integrator(integrator)
                        .at(t_k)
                        .diagnostic(describe(&err));
                    recorder.record(outcome)?;
                    return Ok(!session.is_poisoned());
                }
            }
        }
        Ok(true)
    }

    fn checkpoint(
        &self,
        session: &mut ScenarioSession,
        schedule: &CheckpointSchedule,
        t_k: SimTime,
        rewind_to: SimTime,
        verify_state_restore: bool,
    ) -> Result<CheckpointResult, SessionError> {
        session.run_until(t_k)?;
        let live = session.capture_snapshot_with(true)?;
        let live_view = if session.config().deep_snapshots {
            live.clone()
        } else {
            session.capture_snapshot()?
        };

        let mut checks = Vec::with_capacity(3);
        let retained = session.retained_snapshot(t_k)?;
        let vs_live = match retained {
            Some(retained) => diagnostic(self.oracle.compare(&retained, &live)),
            None => Some(format!("no checkpoint retained at t={t_k}")),
        };
        checks.push((Check::CheckpointVsLive, t_k, vs_live));

        let mut passed = Vec::new();
        for t_j in schedule.iter().filter(|&t| rewind_to < t && t < t_k) {
            if let Some(before) = session.retained_snapshot(t_j)? {
                passed.push((t_j, before));
            }
        }

        session.rewind(rewind_to)?;
        session.run_until(t_k)?;
        let replayed = session.capture_snapshot()?;
        checks.push((Check::RewindReplay, t_k, diagnostic(self.oracle.compare(&live_view, &replayed))));

        for (t_j, before) in passed {
            let again = match session.retained_snapshot(t_j)? {
                Some(after) => diagnostic(self.oracle.compare(&before, &after)),
                None => Some(format!("checkpoint at t={t_j} not retained on replay")),
            };
            checks.push((Check::CheckpointVsLive, t_j, again));
        }

        if verify_state_restore {
            let restore = session.check_state_restore(&self.oracle)?;
            checks.push((Check::StateRestore, t_k, diagnostic(restore)));
        }
        session.restore_snapshot(&live)?;

        debug!(
            integrator = %session.integrator(),
            time = %t_k,
            rewind_to = %rewind_to,
            digest = %live.digest(),
            equal = checks.iter().all(|(_, _, d)| d.is_none()),
            "checkpoint compared"
        );
        Ok(CheckpointResult {
            checks,
            digest: live.digest().to_hex(),
        })
    }

    fn record_checkpoint(
        recorder: &mut Recorder<'_>,
        integrator: Integrator,
        t_k: SimTime,
        result: CheckpointResult,
    ) -> HarnessResult<()> {
        if result.checks.iter().all(|(_, _, d)| d.is_none()) {
            let outcome = recorder
                .outcome(Check::RewindReplay, Verdict::Ok)
                .integrator(integrator)
                .at(t_k)
                .digest(result.digest);
            return recorder.record(outcome);
        }
        for (check, time, failure) in result.checks {
            if let Some(diagnostic) = failure {
                let outcome = recorder
                    .outcome(check, Verdict::Failed)
                    .integrator(integrator)
                    .at(time)
                    .diagnostic(diagnostic);
                recorder.record(outcome)?;
            }
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "reference"))]
mod tests {
    use super::*;
    use crate::engine::reference::{FaultPlan, ReferenceFactory};
    use crate::error::ValidationError;

    fn verify(factory: &ReferenceFactory, name: &str, plan: &DeterminismPlan) -> RegressionReport {
        let config = HarnessConfig::default();
        let verifier = DeterminismVerifier::new(factory, &config);
        let mut report = RegressionReport::new();
        verifier
            .verify(&ScenarioDescriptor::new(name), plan, &mut report)
            .unwrap();
        report
    }

    #[test]
    fn clean_engine_passes_every_checkpoint() {
        let plan = DeterminismPlan::new(SimTime::from_millis(300), 3)
            .integrators(IntegratorSelection::Single(Integrator::Trapezoidal))
            .verify_state_restore(true);
        let report = verify(&ReferenceFactory::new(), "ViscousBeam", &plan);
        assert_eq!(report.len(), 3);
        assert!(report.outcomes().iter().all(|o| o.verdict == Verdict::Ok));
        assert!(report.outcomes().iter().all(|o| o.digest.is_some()));
    }

    #[test]
    fn previous_checkpoint_rewind_passes() {
        let plan = DeterminismPlan::new(SimTime::from_millis(400), 4).rewind(RewindTarget::PreviousCheckpoint);
        let report = verify(&ReferenceFactory::new(), "TetBeam3d", &plan);
        assert_eq!(report.summary().ok, 4);
    }

    #[test]
    fn empty_schedule_is_a_validation_error() {
        let factory = ReferenceFactory::new();
        let config = HarnessConfig::default();
        let verifier = DeterminismVerifier::new(&factory, &config);
        let mut report = RegressionReport::new();
        let err = verifier
            .verify(
                &ScenarioDescriptor::new("SpringMesh"),
                &DeterminismPlan::new(SimTime::from_millis(100), 0),
                &mut report,
            )
            .unwrap_err();
        assert!(matches!(err, crate::HarnessError::Validation(ValidationError::EmptySchedule)));
        assert!(report.is_empty());
    }

    #[test]
    fn missing_scenario_is_skipped() {
        let plan = DeterminismPlan::new(SimTime::from_millis(100), 1);
        let report = verify(&ReferenceFactory::new(), "Nope", &plan);
        assert_eq!(report.len(), 1);
        assert_eq!(report.outcomes()[0].verdict, Verdict::Skipped);
        assert_eq!(report.outcomes()[0].check, Check::Load);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn corrupt_checkpoint_is_reported_separately() {
        let factory = ReferenceFactory::new().with_faults(FaultPlan::new().corrupt_waypoint_at(SimTime::from_millis(200)));
        let plan = DeterminismPlan::new(SimTime::from_millis(300), 3);
        let report = verify(&factory, "SpringMesh", &plan);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].check, Check::CheckpointVsLive);
        assert_eq!(failures[0].time, Some(SimTime::from_millis(200)));
        assert_eq!(report.summary().ok, 2);
    }

    #[test]
    fn each_checkpoint_is_judged_against_the_direct_run() {
        let factory = ReferenceFactory::new().with_faults(FaultPlan::new().nondeterministic_replay());
        let plan = DeterminismPlan::new(SimTime::from_millis(300), 3);
        let report = verify(&factory, "SpringMesh", &plan);
        let failed: Vec<_> = report.failures().map(|o| (o.check, o.time)).collect();
        assert_eq!(
            failed,
            [100, 200, 300]
                .map(|ms| (Check::RewindReplay, Some(SimTime::from_millis(ms))))
                .to_vec()
        );
    }

    #[test]
    fn abort_on_failure_stops_at_first_failure() {
        let factory = ReferenceFactory::new().with_faults(FaultPlan::new().nondeterministic_replay());
        let config = HarnessConfig {
            abort_on_failure: true,
            ..HarnessConfig::default()
        };
        let verifier = DeterminismVerifier::new(&factory, &config);
        let mut report = RegressionReport::new();
        let err = verifier
            .verify(
                &ScenarioDescriptor::new("SpringMesh"),
                &DeterminismPlan::new(SimTime::from_millis(300), 3),
                &mut report,
            )
            .unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(report.len(), 1);
        assert_eq!(report.outcomes()[0].check, Check::RewindReplay);
    }
}

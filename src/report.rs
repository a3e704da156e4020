//! Regression report.
//!
//! The report is append-only: verifiers push [`Outcome`] records and never
//! modify them afterwards. A driver reads the summary and the exit code.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HarnessError, HarnessResult};
use crate::integrator::Integrator;
use crate::time::SimTime;

/// Unique identifier for a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(Uuid);

impl ReportId {
    /// Creates a new random report ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verdict of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Passed.
    Ok,
    /// A check found a difference or the engine failed.
    Failed,
    /// Not run, e.g. the scenario does not exist.
    Skipped,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        })
    }
}

/// What an outcome checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    /// Scenario construction.
    Load,
    /// Advancing the clock.
    Run,
    /// Engine-retained checkpoint vs. the live capture at the same instant.
    CheckpointVsLive,
    /// Forward run vs. rewind-and-replay.
    RewindReplay,
    /// State after `reset()` vs. state after load.
    ResetIdempotence,
    /// Capture, write back, capture again.
    StateRestore,
    /// Serializing or deserializing a session.
    Serialize,
    /// Original vs. reloaded session at one sample.
    RoundTrip,
}

impl Check {
    /// Returns the snake_case name used in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Run => "run",
            Self::CheckpointVsLive => "checkpoint_vs_live",
            Self::RewindReplay => "rewind_replay",
            Self::ResetIdempotence => "reset_idempotence",
            Self::StateRestore => "state_restore",
            Self::Serialize => "serialize",
            Self::RoundTrip => "round_trip",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One immutable verification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Scenario descriptor, rendered.
    pub scenario: String,
    /// Integrator, when the check ran under one.
    pub integrator: Option<Integrator>,
    /// Checkpoint or sample time.
    pub time: Option<SimTime>,
    /// Kind of check.
    pub check: Check,
    /// Result.
    pub verdict: Verdict,
    /// Mismatch or failure description.
    pub diagnostic: Option<String>,
    /// Snapshot digest for OK comparisons.
    pub digest: Option<String>,
}

impl Outcome {
    /// Start an outcome for `scenario`.
    #[must_use]
    pub fn new(scenario: impl Into<String>, check: Check, verdict: Verdict) -> Self {
        Self {
            scenario: scenario.into(),
            integrator: None,
            time: None,
            check,
            verdict,
            diagnostic: None,
            digest: None,
        }
    }

    /// Set the integrator.
    #[must_use]
    pub const fn integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = Some(integrator);
        self
    }

    /// Set the checkpoint time.
    #[must_use]
    pub const fn at(mut self, time: SimTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Attach a diagnostic.
    #[must_use]
    pub fn diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    /// Attach a snapshot digest.
    #[must_use]
    pub fn digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Returns true if the verdict is FAILED.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.verdict == Verdict::Failed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verdict, self.scenario)?;
        if let Some(i) = self.integrator {
            write!(f, " {i}")?;
        }
        write!(f, " {}", self.check)?;
        if let Some(t) = self.time {
            write!(f, " t={t}")?;
        }
        if let Some(d) = &self.diagnostic {
            write!(f, ": {d}")?;
        }
        Ok(())
    }
}

/// Counts by verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// OK outcomes.
    pub ok: usize,
    /// FAILED outcomes.
    pub failed: usize,
    /// SKIPPED outcomes.
    pub skipped: usize,
}

impl Summary {
    /// Total records.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.ok + self.failed + self.skipped
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} outcomes: {} OK, {} FAILED, {} SKIPPED",
            self.total(),
            self.ok,
            self.failed,
            self.skipped
        )
    }
}

/// Append-only list of outcomes from one suite run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionReport {
    id: ReportId,
    started_at: DateTime<Utc>,
    outcomes: Vec<Outcome>,
}

impl Default for RegressionReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RegressionReport {
    /// Empty report stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ReportId::new(),
            started_at: Utc::now(),
            outcomes: Vec::new(),
        }
    }

    /// Report identifier.
    #[must_use]
    pub const fn id(&self) -> ReportId {
        self.id
    }

    /// When the report was created.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Append an outcome.
    pub fn record(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    /// Every outcome in recording order.
    #[must_use]
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Number of outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Counts by verdict.
    #[must_use]
    pub fn summary(&self) -> Summary {
        self.outcomes.iter().fold(Summary::default(), |mut s, o| {
            match o.verdict {
                Verdict::Ok => s.ok += 1,
                Verdict::Failed => s.failed += 1,
                Verdict::Skipped => s.skipped += 1,
            }
            s
        })
    }

    /// FAILED outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    /// Outcomes that are not OK.
    pub fn non_ok(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.verdict != Verdict::Ok)
    }

    /// Returns true if any outcome FAILED.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Process exit code: 1 if any outcome FAILED, else 0.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failures())
    }

    /// Pretty JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Internal` if encoding fails.
    pub fn to_json_pretty(&self) -> HarnessResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| HarnessError::internal(format!("encode report: {e}")))
    }
}

/// Summary line followed by one line per non-OK outcome.
impl fmt::Display for RegressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "report {} ({})", self.id, self.started_at.to_rfc3339())?;
        writeln!(f, "{}", self.summary())?;
        for outcome in self.non_ok() {
            writeln!(f, "  {outcome}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(t: u64) -> Outcome {
        Outcome::new("SpringMesh", Check::RewindReplay, Verdict::Ok)
            .integrator(Integrator::RungeKutta4)
            .at(SimTime::from_millis(t))
    }

    #[test]
    fn summary_counts_and_exit_code() {
        let mut report = RegressionReport::new();
        assert_eq!(report.exit_code(), 0);
        report.record(ok(200));
        report.record(Outcome::new("Missing", Check::Load, Verdict::Skipped).diagnostic("not found"));
        assert_eq!(report.exit_code(), 0);
        report.record(
            Outcome::new("SpringMesh", Check::CheckpointVsLive, Verdict::Failed)
                .at(SimTime::from_millis(400))
                .diagnostic("unequal 'positions' at i=4: 1 vs. 2"),
        );
        let s = report.summary();
        assert_eq!((s.ok, s.failed, s.skipped, s.total()), (1, 1, 1, 3));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.non_ok().count(), 2);
    }

    #[test]
    fn display_lists_non_ok_outcomes() {
        let mut report = RegressionReport::new();
        report.record(ok(200));
        report.record(
            Outcome::new("TetBeam3d", Check::RoundTrip, Verdict::Failed)
                .at(SimTime::from_millis(100))
                .diagnostic("unequal 'positions' at i=94"),
        );
        let text = report.to_string();
        assert!(text.contains("2 outcomes: 1 OK, 1 FAILED, 0 SKIPPED"));
        assert!(text.contains("FAILED TetBeam3d round_trip t=0.1: unequal 'positions' at i=94"));
        assert!(!text.contains("OK SpringMesh"));
    }

    #[test]
    fn json_uses_upper_case_verdicts() {
        let mut report = RegressionReport::new();
        report.record(ok(200).digest("abc"));
        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"OK\""));
        assert!(json.contains("\"rewind_replay\""));
        let back: RegressionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}

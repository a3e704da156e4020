//! Scenario sessions.
//!
//! A [`ScenarioSession`] owns one engine instance for one verification
//! pass. Every command is synchronous: `run` returns only after the engine
//! has published its stopped event (or the configured wait bound expired).

pub mod archive;

use std::collections::BTreeSet;

use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::engine::{EngineFactory, SaveFormat, ScenarioDescriptor, SimulationEngine, WaitStatus};
use crate::error::SessionError;
use crate::integrator::Integrator;
use crate::oracle::{Comparison, EqualityOracle};
use crate::schedule::CheckpointSchedule;
use crate::snapshot::Snapshot;
use crate::time::SimTime;

use archive::ArchiveHeader;

/// Exclusive handle on one loaded scenario.
///
/// # Examples
///
/// ```
/// use simverify::engine::reference::ReferenceFactory;
/// use simverify::{ScenarioDescriptor, ScenarioSession, SessionConfig, SimTime};
///
/// let factory = ReferenceFactory::new();
/// let descriptor = ScenarioDescriptor::new("SpringMesh");
/// let mut session = ScenarioSession::load(&factory, &descriptor, SessionConfig::default()).unwrap();
/// session.run_until(SimTime::from_millis(50)).unwrap();
/// assert_eq!(session.time(), SimTime::from_millis(50));
/// ```
pub struct ScenarioSession {
    engine: Box<dyn SimulationEngine>,
    descriptor: ScenarioDescriptor,
    config: SessionConfig,
    integrator: Integrator,
    max_step: Option<SimTime>,
    breakpoints: BTreeSet<SimTime>,
    now: SimTime,
    /// Furthest instant reached before the outstanding rewind, if any.
    rewound_from: Option<SimTime>,
    poisoned: bool,
}

impl std::fmt::Debug for ScenarioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioSession")
            .field("descriptor", &self.descriptor)
            .field("integrator", &self.integrator)
            .field("now", &self.now)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl ScenarioSession {
    /// Construct `descriptor` in a fresh engine.
    ///
    /// # Errors
    ///
    /// `ScenarioNotFound` if the engine has no matching constructor.
    pub fn load(
        factory: &dyn EngineFactory,
        descriptor: &ScenarioDescriptor,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let mut engine = factory.spawn()?;
        engine.load_scenario(descriptor)?;
        let session = Self::attach(engine, descriptor.clone(), config)?;
        info!(scenario = %descriptor, integrator = %session.integrator, "scenario loaded");
        Ok(session)
    }

    fn attach(
        engine: Box<dyn SimulationEngine>,
        descriptor: ScenarioDescriptor,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let integrator = engine.integrator()?;
        let now = engine.time()?;
        Ok(Self {
            engine,
            descriptor,
            config,
            integrator,
            max_step: None,
            breakpoints: BTreeSet::new(),
            now,
            rewound_from: None,
            poisoned: false,
        })
    }

    /// The loaded scenario.
    #[must_use]
    pub const fn descriptor(&self) -> &ScenarioDescriptor {
        &self.descriptor
    }

    /// The selected integrator.
    #[must_use]
    pub const fn integrator(&self) -> Integrator {
        self.integrator
    }

    /// Current simulation time.
    #[must_use]
    pub const fn time(&self) -> SimTime {
        self.now
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns true once a run outlived the stop timeout. A poisoned
    /// session rejects every further command.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn ensure_usable(&self) -> Result<(), SessionError> {
        if self.poisoned {
            Err(SessionError::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Select the integrator for the next run.
    ///
    /// # Errors
    ///
    /// `Poisoned` after a timeout, or the engine's rejection.
    pub fn set_integrator(&mut self, integrator: Integrator) -> Result<(), SessionError> {
        self.ensure_usable()?;
        trace!(integrator = %integrator, "set integrator");
        self.engine.set_integrator(integrator)?;
        self.integrator = integrator;
        Ok(())
    }

    /// Bound the engine's integration step.
    ///
    /// # Errors
    ///
    /// `InvalidCommand` for a zero step.
    pub fn set_max_step_size(&mut self, step: SimTime) -> Result<(), SessionError> {
        self.ensure_usable()?;
        if step.is_zero() {
            return Err(SessionError::InvalidCommand {
                reason: "max step size must be positive".to_string(),
            });
        }
        self.engine.set_max_step_size(step)?;
        self.max_step = Some(step);
        Ok(())
    }

    /// Install `schedule` as the engine's breakpoints, replacing any
    /// previous set.
    ///
    /// # Errors
    ///
    /// Fails if the engine rejects a waypoint; the installed set is then
    /// partial.
    pub fn set_schedule(&mut self, schedule: &CheckpointSchedule) -> Result<(), SessionError> {
        self.ensure_usable()?;
        self.engine.clear_waypoints()?;
        self.breakpoints.clear();
        for t in schedule.iter() {
            self.add_breakpoint(t)?;
        }
        Ok(())
    }

    /// Add one breakpoint.
    ///
    /// # Errors
    ///
    /// `Poisoned`, or the engine's rejection of the waypoint.
    pub fn add_breakpoint(&mut self, time: SimTime) -> Result<(), SessionError> {
        self.ensure_usable()?;
        self.engine.add_waypoint(time)?;
        self.breakpoints.insert(time);
        Ok(())
    }

    /// Installed breakpoints in increasing order.
    pub fn breakpoints(&self) -> impl Iterator<Item = SimTime> + '_ {
        self.breakpoints.iter().copied()
    }

    /// Advance to the next breakpoint after the current time.
    ///
    /// # Errors
    ///
    /// `InvalidCommand` if no breakpoint lies ahead; otherwise see
    /// [`run_until`](Self::run_until).
    pub fn run(&mut self) -> Result<SimTime, SessionError> {
        self.ensure_usable()?;
        let next = self
            .breakpoints
            .range(SimTime::from_nanos(self.now.as_nanos().saturating_add(1))..)
            .next()
            .copied()
            .ok_or_else(|| SessionError::InvalidCommand {
                reason: format!("no breakpoint after t={}", self.now),
            })?;
        self.run_until(next)
    }

    /// Advance to `time` and block until the engine stops.
    ///
    /// # Errors
    ///
    /// - `InvalidCommand` if `time` is in the past
    /// - `SimulationFault` if the engine failed mid-run
    /// - `Timeout` if the stop timeout elapsed; the session is poisoned
    pub fn run_until(&mut self, time: SimTime) -> Result<SimTime, SessionError> {
        self.ensure_usable()?;
        if time < self.now {
            return Err(SessionError::InvalidCommand {
                reason: format!("cannot run backwards from t={} to t={time}", self.now),
            });
        }
        if time == self.now {
            return Ok(self.now);
        }
        trace!(from = %self.now, to = %time, "run");
        self.engine.start(time)?;
        match self.engine.wait_for_stop(self.config.stop_timeout) {
            Ok(WaitStatus::Stopped(t)) => {
                self.now = t;
                if self.rewound_from.is_some_and(|high| t >= high) {
                    self.rewound_from = None;
                }
                debug!(scenario = %self.descriptor, time = %t, "engine stopped");
                Ok(t)
            }
            Ok(WaitStatus::StillRunning) => {
                self.poisoned = true;
                let waited_ms = self
                    .config
                    .stop_timeout
                    .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
                warn!(scenario = %self.descriptor, target = %time, waited_ms, "engine did not stop in time");
                Err(SessionError::Timeout { waited_ms })
            }
            Err(err) => {
                if let Ok(t) = self.engine.time() {
                    self.now = t;
                }
                Err(err.into())
            }
        }
    }

    /// Return to the session origin, keeping scenario structure and
    /// integrator. The origin is time zero for a loaded scenario and the
    /// archived instant for a deserialized one.
    ///
    /// # Errors
    ///
    /// `Poisoned`, or an engine error if the origin state cannot be restored.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_usable()?;
        trace!(scenario = %self.descriptor, "reset");
        self.engine.reset()?;
        self.now = self.engine.time()?;
        self.rewound_from = None;
        Ok(())
    }

    /// Relocate to an earlier instant the engine retained.
    ///
    /// # Errors
    ///
    /// `InvalidCommand` if `time` is ahead of the clock; an engine error if
    /// nothing was retained there.
    pub fn rewind(&mut self, time: SimTime) -> Result<(), SessionError> {
        self.ensure_usable()?;
        if time > self.now {
            return Err(SessionError::InvalidCommand {
                reason: format!("cannot rewind forward from t={} to t={time}", self.now),
            });
        }
        trace!(from = %self.now, to = %time, "rewind");
        self.engine.restore_waypoint(time)?;
        let high = self.rewound_from.map_or(self.now, |h| h.max(self.now));
        self.rewound_from = Some(high);
        self.now = time;
        Ok(())
    }

    /// Move back toward the instant a rewind left from.
    ///
    /// Without an outstanding rewind this is a no-op. A retained state at
    /// `time` is restored directly; otherwise the engine replays to it.
    ///
    /// # Errors
    ///
    /// `InvalidCommand` if `time` lies outside the rewound span.
    pub fn forward(&mut self, time: SimTime) -> Result<SimTime, SessionError> {
        self.ensure_usable()?;
        let Some(high) = self.rewound_from else {
            return Ok(self.now);
        };
        if time < self.now || time > high {
            return Err(SessionError::InvalidCommand {
                reason: format!("forward target t={time} outside [{}, {high}]", self.now),
            });
        }
        if self.engine.retained_state(time)?.is_some() {
            trace!(from = %self.now, to = %time, "forward via retained state");
            self.engine.restore_waypoint(time)?;
            self.now = time;
            if time >= high {
                self.rewound_from = None;
            }
            Ok(time)
        } else {
            self.run_until(time)
        }
    }

    /// Capture dynamic state at the current instant, deep or shallow per
    /// the session configuration.
    ///
    /// # Errors
    ///
    /// `Poisoned`, or the engine's capture error.
    pub fn capture_snapshot(&self) -> Result<Snapshot, SessionError> {
        self.capture_snapshot_with(self.config.deep_snapshots)
    }

    /// Capture with an explicit depth.
    ///
    /// # Errors
    ///
    /// `Poisoned`, or the engine's capture error.
    pub fn capture_snapshot_with(&self, deep: bool) -> Result<Snapshot, SessionError> {
        self.ensure_usable()?;
        Ok(self.engine.get_state(deep)?)
    }

    /// The deep state the engine retained at breakpoint `time`.
    ///
    /// # Errors
    ///
    /// `Poisoned`, or the engine's query error.
    pub fn retained_snapshot(&self, time: SimTime) -> Result<Option<Snapshot>, SessionError> {
        self.ensure_usable()?;
        Ok(self.engine.retained_state(time)?)
    }

    /// Write a deep capture back into the engine and move the clock to its
    /// instant. A pending rewind is cleared.
    ///
    /// # Errors
    ///
    /// `Poisoned`, or the engine's rejection of the state.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), SessionError> {
        self.ensure_usable()?;
        trace!(from = %self.now, to = %snapshot.time(), "restore snapshot");
        self.engine.set_state(snapshot)?;
        self.now = self.engine.time()?;
        self.rewound_from = None;
        Ok(())
    }

    /// Capture, write the same state back, capture again, and compare.
    ///
    /// # Errors
    ///
    /// `Poisoned`, or an engine error from the capture or the write.
    pub fn check_state_restore(&mut self, oracle: &EqualityOracle) -> Result<Comparison, SessionError> {
        self.ensure_usable()?;
        let before = self.engine.get_state(true)?;
        self.engine.set_state(&before)?;
        let after = self.engine.get_state(true)?;
        Ok(oracle.compare(&before, &after))
    }

    /// Write the scenario and session context to an archive.
    ///
    /// # Errors
    ///
    /// `Poisoned`, the engine's save error, or `CorruptOrIncompatibleFormat`
    /// if the header cannot be encoded.
    pub fn serialize(&self, format: &SaveFormat) -> Result<Vec<u8>, SessionError> {
        self.ensure_usable()?;
        let payload = self.engine.save_model(format)?;
        let header = ArchiveHeader {
            descriptor: self.descriptor.clone(),
            integrator: self.integrator,
            max_step: self.max_step,
            time: self.now,
            breakpoints: self.breakpoints.iter().copied().collect(),
            precision: format.to_string(),
        };
        let bytes = archive::encode(&header, &payload)?;
        debug!(scenario = %self.descriptor, time = %self.now, precision = %format, bytes = bytes.len(), "session serialized");
        Ok(bytes)
    }

    /// Rebuild a session from [`serialize`](Self::serialize) output in a
    /// fresh engine.
    ///
    /// # Errors
    ///
    /// `CorruptOrIncompatibleFormat` if the archive or the engine payload
    /// fails validation, or if they disagree.
    pub fn deserialize(
        factory: &dyn EngineFactory,
        bytes: &[u8],
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let (header, payload) = archive::decode(bytes)?;
        let mut engine = factory.spawn()?;
        engine.load_model(&payload)?;

        if engine.descriptor() != Some(&header.descriptor) {
            return Err(SessionError::CorruptOrIncompatibleFormat {
                reason: format!("payload scenario does not match header '{}'", header.descriptor),
            });
        }
        let mut session = Self::attach(engine, header.descriptor.clone(), config)?;
        if session.now != header.time {
            return Err(SessionError::CorruptOrIncompatibleFormat {
                reason: format!("payload time {} does not match header time {}", session.now, header.time),
            });
        }
        session.set_integrator(header.integrator)?;
        if let Some(step) = header.max_step {
            session.set_max_step_size(step)?;
        }
        for t in header.breakpoints {
            session.add_breakpoint(t)?;
        }
        info!(scenario = %session.descriptor, time = %session.now, "session deserialized");
        Ok(session)
    }
}

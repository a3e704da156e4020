//! In-tree reference engine.
//!
//! A small deterministic particle/spring simulator implementing
//! [`SimulationEngine`]. It exists so every harness path can be exercised
//! without an external engine: the catalog holds `SpringMesh`, `TetBeam3d`
//! and `ViscousBeam`, all six integrators are supported, and a
//! [`FaultPlan`] injects the failures the verifiers must detect.
//!
//! # Example
//!
//! ```
//! use simverify::engine::reference::ReferenceFactory;
//! use simverify::{EngineFactory, ScenarioDescriptor, SimTime, SimulationEngine};
//!
//! let factory = ReferenceFactory::new();
//! let mut engine = factory.spawn().unwrap();
//! engine.load_scenario(&ScenarioDescriptor::new("SpringMesh")).unwrap();
//! engine.start(SimTime::from_millis(100)).unwrap();
//! engine.wait_for_stop(None).unwrap();
//! assert_eq!(engine.time().unwrap(), SimTime::from_millis(100));
//! ```

mod integrate;
mod model;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{trace, warn};

use crate::config::EngineConfig;
use crate::engine::{EngineFactory, SaveFormat, ScenarioDescriptor, SimulationEngine, WaitStatus};
use crate::error::EngineError;
use crate::integrator::Integrator;
use crate::snapshot::Snapshot;
use crate::time::SimTime;

use model::Model;
use worker::{Job, RunOutcome, Sim, Worker};

static ENGINE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A single-bit mutation applied to state read by `load_model`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFlip {
    /// State field, e.g. `positions`.
    pub field: String,
    /// Entry index within the field.
    pub index: usize,
    /// Bit to flip (0 is the least significant mantissa bit).
    pub bit: u32,
}

/// Failures to inject into reference engine runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultPlan {
    pub(crate) fault_at: Option<SimTime>,
    pub(crate) stall: Option<(SimTime, Duration)>,
    pub(crate) corrupt_waypoint_at: Option<SimTime>,
    pub(crate) nondeterministic_replay: bool,
    pub(crate) flip_on_load: Option<BitFlip>,
}

impl FaultPlan {
    /// No faults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any run that would advance past `time`.
    #[must_use]
    pub const fn fault_at(mut self, time: SimTime) -> Self {
        self.fault_at = Some(time);
        self
    }

    /// Block the worker for `duration` the first time it reaches `time`.
    #[must_use]
    pub const fn stall_at(mut self, time: SimTime, duration: Duration) -> Self {
        self.stall = Some((time, duration));
        self
    }

    /// Corrupt the state retained at waypoint `time`.
    #[must_use]
    pub const fn corrupt_waypoint_at(mut self, time: SimTime) -> Self {
        self.corrupt_waypoint_at = Some(time);
        self
    }

    /// Perturb the first step after every rewind by flipping a mantissa bit
    /// of one velocity.
    #[must_use]
    pub const fn nondeterministic_replay(mut self) -> Self {
        self.nondeterministic_replay = true;
        self
    }

    /// Flip one bit of the state read back by `load_model`.
    #[must_use]
    pub fn flip_bit_on_load(mut self, field: impl Into<String>, index: usize, bit: u32) -> Self {
        self.flip_on_load = Some(BitFlip {
            field: field.into(),
            index,
            bit,
        });
        self
    }
}

/// Factory for [`ReferenceEngine`].
#[derive(Debug, Clone, Default)]
pub struct ReferenceFactory {
    config: EngineConfig,
    faults: FaultPlan,
}

impl ReferenceFactory {
    /// Factory with the default (deterministic) configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject faults into every engine this factory spawns.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }
}

impl EngineFactory for ReferenceFactory {
    fn configure(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        self.config = config.clone().validate().map_err(|e| EngineError::Construction {
            scenario: String::new(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn spawn(&self) -> Result<Box<dyn SimulationEngine>, EngineError> {
        Ok(Box::new(ReferenceEngine::new(self.config.clone(), self.faults.clone())?))
    }
}

/// Reference engine handle.
///
/// Commands other than `wait_for_stop` fail with `EngineError::Busy` while
/// a run is outstanding.
pub struct ReferenceEngine {
    config: EngineConfig,
    faults: FaultPlan,
    descriptor: Option<ScenarioDescriptor>,
    sim: Option<Box<Sim>>,
    pending: Option<Receiver<RunOutcome>>,
    epoch: u64,
    worker: Worker,
}

impl ReferenceEngine {
    /// Create an engine with its own run worker.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Disconnected` if the worker thread cannot start.
    pub fn new(config: EngineConfig, faults: FaultPlan) -> Result<Self, EngineError> {
        let seq = ENGINE_SEQ.fetch_add(1, Ordering::Relaxed);
        let worker = Worker::start(format!("simverify-reference-{seq}"))?;
        Ok(Self {
            config,
            faults,
            descriptor: None,
            sim: None,
            pending: None,
            epoch: 0,
            worker,
        })
    }

    fn sim(&self) -> Result<&Sim, EngineError> {
        if self.pending.is_some() {
            return Err(EngineError::Busy);
        }
        self.sim.as_deref().ok_or(EngineError::NotLoaded)
    }

    fn sim_mut(&mut self) -> Result<&mut Sim, EngineError> {
        if self.pending.is_some() {
            return Err(EngineError::Busy);
        }
        self.sim.as_deref_mut().ok_or(EngineError::NotLoaded)
    }

    fn install(&mut self, model: Model) {
        self.descriptor = Some(model.descriptor.clone());
        self.sim = Some(Box::new(Sim::new(model, self.faults.clone(), self.config.clone())));
    }

    fn take_outcome(&mut self, outcome: RunOutcome) -> Result<WaitStatus, EngineError> {
        self.pending = None;
        self.sim = Some(outcome.sim);
        outcome.result.map(WaitStatus::Stopped)
    }
}

impl SimulationEngine for ReferenceEngine {
    fn load_scenario(&mut self, descriptor: &ScenarioDescriptor) -> Result<(), EngineError> {
        if self.pending.is_some() {
            return Err(EngineError::Busy);
        }
        let model = Model::build(descriptor)?;
        trace!(scenario = %descriptor, particles = model.particles.len(), springs = model.springs.len(), "reference scenario built");
        self.install(model);
        Ok(())
    }

    fn descriptor(&self) -> Option<&ScenarioDescriptor> {
        self.descriptor.as_ref()
    }

    fn set_integrator(&mut self, integrator: Integrator) -> Result<(), EngineError> {
        self.sim_mut()?.model.integrator = integrator;
        Ok(())
    }

    fn integrator(&self) -> Result<Integrator, EngineError> {
        Ok(self.sim()?.model.integrator)
    }

    fn set_max_step_size(&mut self, step: SimTime) -> Result<(), EngineError> {
        self.sim_mut()?.model.max_step = step.max(SimTime::from_nanos(1));
        Ok(())
    }

    fn add_waypoint(&mut self, time: SimTime) -> Result<(), EngineError> {
        self.sim_mut()?.waypoints.entry(time).or_insert(None);
        Ok(())
    }

    fn clear_waypoints(&mut self) -> Result<(), EngineError> {
        let sim = self.sim_mut()?;
        let start = sim.initial.time();
        sim.waypoints.retain(|t, _| *t == start);
        Ok(())
    }

    fn start(&mut self, stop_at: SimTime) -> Result<(), EngineError> {
        self.sim()?;
        let Some(sim) = self.sim.take() else {
            return Err(EngineError::NotLoaded);
        };
        self.epoch += 1;
        let (reply, rx) = bounded(1);
        let job = Job::Run {
            sim,
            stop_at,
            epoch: self.epoch,
            reply,
        };
        match self.worker.submit(job) {
            Ok(()) => {
                self.pending = Some(rx);
                Ok(())
            }
            Err((err, sim)) => {
                self.sim = Some(sim);
                Err(err)
            }
        }
    }

    fn wait_for_stop(&mut self, timeout: Option<Duration>) -> Result<WaitStatus, EngineError> {
        let Some(rx) = self.pending.as_ref() else {
            return Ok(WaitStatus::Stopped(self.sim()?.model.state.time));
        };
        let received = match timeout {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(t) => rx.recv_timeout(t),
        };
        match received {
            Ok(outcome) => self.take_outcome(outcome),
            Err(RecvTimeoutError::Timeout) => Ok(WaitStatus::StillRunning),
            Err(RecvTimeoutError::Disconnected) => {
                self.pending = None;
                Err(EngineError::Disconnected)
            }
        }
    }

    fn time(&self) -> Result<SimTime, EngineError> {
        Ok(self.sim()?.model.state.time)
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        let sim = self.sim_mut()?;
        let initial = sim.initial.clone();
        sim.model.restore(&initial)?;
        for (t, slot) in &mut sim.waypoints {
            if *t != initial.time() {
                *slot = None;
            }
        }
        sim.perturb_next = false;
        Ok(())
    }

    fn restore_waypoint(&mut self, time: SimTime) -> Result<(), EngineError> {
        let sim = self.sim_mut()?;
        let retained = sim
            .waypoints
            .get(&time)
            .and_then(Option::clone)
            .ok_or(EngineError::NoWaypoint { time })?;
        sim.model.restore(&retained)?;
        sim.perturb_next = sim.faults.nondeterministic_replay;
        Ok(())
    }

    fn retained_state(&self, time: SimTime) -> Result<Option<Snapshot>, EngineError> {
        Ok(self.sim()?.waypoints.get(&time).cloned().flatten())
    }

    fn get_state(&self, deep: bool) -> Result<Snapshot, EngineError> {
        Ok(self.sim()?.model.snapshot(deep))
    }

    fn set_state(&mut self, snapshot: &Snapshot) -> Result<(), EngineError> {
        self.sim_mut()?.model.restore(snapshot)
    }

    fn save_model(&self, format: &SaveFormat) -> Result<Vec<u8>, EngineError> {
        self.sim()?.model.to_document(format)
    }

    fn load_model(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        if self.pending.is_some() {
            return Err(EngineError::Busy);
        }
        let mut model = Model::from_document(bytes)?;
        if let Some(flip) = &self.faults.flip_on_load {
            match model.snapshot(true).with_flipped_bit(&flip.field, flip.index, flip.bit) {
                Some(mutated) => model.restore(&mutated)?,
                None => warn!(field = %flip.field, index = flip.index, bit = flip.bit, "bit flip target not found"),
            }
        }
        self.install(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(faults: FaultPlan) -> ReferenceEngine {
        let mut e = ReferenceEngine::new(EngineConfig::default(), faults).unwrap();
        e.load_scenario(&ScenarioDescriptor::new("TetBeam3d").arg("-coarse")).unwrap();
        e
    }

    fn run_to(e: &mut ReferenceEngine, t: SimTime) {
        e.start(t).unwrap();
        assert_eq!(e.wait_for_stop(None).unwrap(), WaitStatus::Stopped(t));
    }

    #[test]
    fn commands_require_a_scenario() {
        let mut e = ReferenceEngine::new(EngineConfig::default(), FaultPlan::new()).unwrap();
        assert_eq!(e.time(), Err(EngineError::NotLoaded));
        assert_eq!(e.start(SimTime::from_millis(10)), Err(EngineError::NotLoaded));
        assert!(e.descriptor().is_none());
    }

    #[test]
    fn busy_while_running_then_stopped() {
        let mut e = engine(FaultPlan::new().stall_at(SimTime::ZERO, Duration::from_millis(200)));
        e.start(SimTime::from_millis(20)).unwrap();
        assert_eq!(e.time(), Err(EngineError::Busy));
        assert_eq!(e.start(SimTime::from_millis(30)), Err(EngineError::Busy));
        assert_eq!(
            e.wait_for_stop(Some(Duration::from_millis(1))).unwrap(),
            WaitStatus::StillRunning
        );
        assert_eq!(
            e.wait_for_stop(None).unwrap(),
            WaitStatus::Stopped(SimTime::from_millis(20))
        );
        assert_eq!(e.time().unwrap(), SimTime::from_millis(20));
    }

    #[test]
    fn rewind_and_replay_is_bit_exact() {
        let mut e = engine(FaultPlan::new());
        let t = SimTime::from_millis(200);
        e.add_waypoint(t).unwrap();
        run_to(&mut e, t);
        let live = e.get_state(true).unwrap();
        assert_eq!(e.retained_state(t).unwrap().unwrap().digest(), live.digest());

        e.restore_waypoint(SimTime::ZERO).unwrap();
        run_to(&mut e, t);
        assert_eq!(e.get_state(true).unwrap().digest(), live.digest());
    }

    #[test]
    fn replay_perturbation_diverges() {
        let mut e = engine(FaultPlan::new().nondeterministic_replay());
        let t = SimTime::from_millis(100);
        run_to(&mut e, t);
        let live = e.get_state(true).unwrap();
        e.restore_waypoint(SimTime::ZERO).unwrap();
        run_to(&mut e, t);
        assert_ne!(e.get_state(true).unwrap().digest(), live.digest());
    }

    #[test]
    fn reset_returns_to_load_state() {
        let mut e = engine(FaultPlan::new());
        let loaded = e.get_state(true).unwrap();
        e.add_waypoint(SimTime::from_millis(50)).unwrap();
        run_to(&mut e, SimTime::from_millis(70));
        e.reset().unwrap();
        assert_eq!(e.get_state(true).unwrap().digest(), loaded.digest());
        assert!(e.retained_state(SimTime::from_millis(50)).unwrap().is_none());
        assert_eq!(
            e.restore_waypoint(SimTime::from_millis(50)),
            Err(EngineError::NoWaypoint {
                time: SimTime::from_millis(50)
            })
        );
    }

    #[test]
    fn save_and_load_preserves_state() {
        let mut e = engine(FaultPlan::new());
        run_to(&mut e, SimTime::from_millis(300));
        let bytes = e.save_model(&SaveFormat::full()).unwrap();
        let before = e.get_state(true).unwrap();

        let mut other = ReferenceEngine::new(EngineConfig::default(), FaultPlan::new()).unwrap();
        other.load_model(&bytes).unwrap();
        assert_eq!(other.get_state(true).unwrap().digest(), before.digest());
        assert_eq!(other.descriptor(), e.descriptor());
        assert!(other.load_model(b"not a model").is_err());
    }

    #[test]
    fn flip_on_load_mutates_state() {
        let e = engine(FaultPlan::new());
        let bytes = e.save_model(&SaveFormat::full()).unwrap();
        let mut other = ReferenceEngine::new(
            EngineConfig::default(),
            FaultPlan::new().flip_bit_on_load("positions", 13, 51),
        )
        .unwrap();
        other.load_model(&bytes).unwrap();
        assert_ne!(
            other.get_state(true).unwrap().digest(),
            e.get_state(true).unwrap().digest()
        );
    }

    #[test]
    fn factory_rejects_invalid_config() {
        let mut factory = ReferenceFactory::new();
        let bad = EngineConfig {
            thread_count: 0,
            ..EngineConfig::default()
        };
        assert!(factory.configure(&bad).is_err());
        assert_eq!(factory.config().thread_count, 1);
    }
}

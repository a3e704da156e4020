//! Run worker for the reference engine.
//!
//! The simulation state moves into the worker thread for the duration of a
//! run and is handed back on a per-run reply channel, so the caller can
//! bound its wait with `recv_timeout` while the engine keeps stepping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::trace;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::snapshot::Snapshot;
use crate::time::SimTime;

use super::integrate::{self, Forces, StepContext, IMPLICIT_ITERATIONS};
use super::model::{Model, FIELD_POSITIONS};
use super::FaultPlan;

/// Mantissa bit flipped by an injected replay perturbation.
const PERTURB_MASK: u64 = 1 << 32;

/// Poll interval while an injected stall waits.
const STALL_POLL: Duration = Duration::from_millis(5);

/// A loaded scenario plus everything a run needs.
#[derive(Debug, Clone)]
pub(crate) struct Sim {
    pub model: Model,
    /// State at load time; `reset` returns here.
    pub initial: Snapshot,
    /// Registered waypoints and the deep state retained at each.
    pub waypoints: BTreeMap<SimTime, Option<Snapshot>>,
    pub faults: FaultPlan,
    pub config: EngineConfig,
    /// Set by a rewind when replay perturbation is injected.
    pub perturb_next: bool,
    pub stalled: bool,
}

impl Sim {
    pub(crate) fn new(model: Model, faults: FaultPlan, config: EngineConfig) -> Self {
        let initial = model.snapshot(true);
        let mut waypoints = BTreeMap::new();
        waypoints.insert(initial.time(), Some(initial.clone()));
        Self {
            model,
            initial,
            waypoints,
            faults,
            config,
            perturb_next: false,
            stalled: false,
        }
    }

    fn step_context(&self, epoch: u64) -> StepContext {
        let lanes = self.config.thread_count.max(1);
        let rotation = usize::try_from(epoch % lanes as u64).unwrap_or(0);
        let iterations = if self.config.hybrid_solve {
            IMPLICIT_ITERATIONS + usize::from(epoch % 2 == 1)
        } else {
            IMPLICIT_ITERATIONS
        };
        StepContext {
            forces: Forces::new(lanes, rotation, self.config.incompressible_damping),
            iterations,
            stabilization: self.config.stabilization,
        }
    }

    /// End of the next step: the next max-step grid line, clipped at the
    /// next waypoint and at `stop_at`.
    fn next_stop(&self, now: SimTime, stop_at: SimTime) -> SimTime {
        let max = self.model.max_step.as_nanos().max(1);
        let grid = SimTime::from_nanos((now.as_nanos() / max + 1) * max);
        let waypoint = self
            .waypoints
            .range(SimTime::from_nanos(now.as_nanos() + 1)..)
            .next()
            .map_or(grid, |(t, _)| *t);
        grid.min(waypoint).min(stop_at)
    }

    fn retain(&mut self, time: SimTime) {
        let Some(slot) = self.waypoints.get_mut(&time) else {
            return;
        };
        let mut snapshot = self.model.snapshot(true);
        if self.faults.corrupt_waypoint_at == Some(time) {
            let index = 3 * self.model.particles.iter().position(|p| !p.pinned).unwrap_or(0) + 1;
            if let Some(corrupt) = snapshot.with_flipped_bit(FIELD_POSITIONS, index, 0) {
                snapshot = corrupt;
            }
        }
        *slot = Some(snapshot);
    }

    /// Step until `stop_at`, retaining state at each waypoint passed.
    pub(crate) fn advance(&mut self, stop_at: SimTime, epoch: u64, cancel: &AtomicBool) -> Result<SimTime, EngineError> {
        let ctx = self.step_context(epoch);
        while self.model.state.time < stop_at {
            let now = self.model.state.time;
            if let Some((at, duration)) = self.faults.stall {
                if !self.stalled && now >= at {
                    self.stalled = true;
                    stall(duration, cancel);
                }
            }
            if cancel.load(Ordering::Acquire) {
                return Err(EngineError::Disconnected);
            }
            if let Some(at) = self.faults.fault_at {
                if now >= at {
                    return Err(EngineError::Fault {
                        time: now,
                        message: "injected solver failure".to_string(),
                    });
                }
            }

            let next = self.next_stop(now, stop_at);
            integrate::step(&mut self.model, (next - now).as_secs_f64(), &ctx);
            if std::mem::take(&mut self.perturb_next) {
                self.perturb();
            }
            self.model.state.time = next;
            self.model.state.steps += 1;
            self.retain(next);
        }
        Ok(self.model.state.time)
    }

    fn perturb(&mut self) {
        let Some(i) = self.model.particles.iter().position(|p| !p.pinned) else {
            return;
        };
        let v = &mut self.model.state.velocities[i][1];
        *v = f64::from_bits(v.to_bits() ^ PERTURB_MASK);
    }
}

fn stall(duration: Duration, cancel: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !cancel.load(Ordering::Acquire) {
        thread::sleep(STALL_POLL);
    }
}

pub(crate) struct RunOutcome {
    pub sim: Box<Sim>,
    pub result: Result<SimTime, EngineError>,
}

pub(crate) enum Job {
    Run {
        sim: Box<Sim>,
        stop_at: SimTime,
        epoch: u64,
        reply: Sender<RunOutcome>,
    },
}

/// Single background thread that executes runs in submission order.
pub(crate) struct Worker {
    tx: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn start(name: String) -> Result<Self, EngineError> {
        let (tx, rx) = bounded::<Job>(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run_loop(&rx, &flag))
            .map_err(|_| EngineError::Disconnected)?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            cancel,
        })
    }

    fn run_loop(rx: &Receiver<Job>, cancel: &AtomicBool) {
        while let Ok(job) = rx.recv() {
            match job {
                Job::Run {
                    mut sim,
                    stop_at,
                    epoch,
                    reply,
                } => {
                    trace!(stop_at = %stop_at, epoch, "reference run started");
                    let result = sim.advance(stop_at, epoch, cancel);
                    let _ = reply.send(RunOutcome { sim, result });
                }
            }
        }
    }

    /// Queue a run, handing the state back if the worker cannot take it.
    pub(crate) fn submit(&self, job: Job) -> Result<(), (EngineError, Box<Sim>)> {
        let Some(tx) = self.tx.as_ref() else {
            let Job::Run { sim, .. } = job;
            return Err((EngineError::Disconnected, sim));
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Job::Run { sim, .. })) => Err((EngineError::Busy, sim)),
            Err(TrySendError::Disconnected(Job::Run { sim, .. })) => Err((EngineError::Disconnected, sim)),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

//! # simverify
//!
//! Determinism and persistence verification for simulation engines.
//!
//! The harness drives an engine through a small command surface (load,
//! run, rewind, reset, capture, serialize) and checks two properties:
//!
//! - **Determinism**: a run rewound to an earlier instant and replayed
//!   reproduces the original state bit for bit, under every selected
//!   integrator.
//! - **Persistence**: a scenario serialized, reloaded into a fresh engine
//!   and advanced in lockstep with the original stays bit-identical to it.
//!
//! Failures are never thrown past a verifier. Each one becomes an
//! [`Outcome`] in a [`RegressionReport`].
//!
//! ## Core Concepts
//!
//! - **Snapshot**: the full dynamic state of a scenario at one instant
//! - **Checkpoint schedule**: the instants at which state is captured
//! - **Equality oracle**: exact, field-by-field snapshot comparison
//! - **Scenario session**: exclusive handle on one loaded scenario
//!
//! ## Usage
//!
//! ```
//! use simverify::engine::reference::ReferenceFactory;
//! use simverify::verify::{DeterminismPlan, DeterminismVerifier};
//! use simverify::{HarnessConfig, Integrator, IntegratorSelection, RegressionReport, ScenarioDescriptor, SimTime};
//!
//! let factory = ReferenceFactory::new();
//! let config = HarnessConfig::default();
//! let plan = DeterminismPlan::new(SimTime::from_millis(200), 2)
//!     .integrators(IntegratorSelection::Single(Integrator::RungeKutta4));
//!
//! let mut report = RegressionReport::new();
//! DeterminismVerifier::new(&factory, &config)
//!     .verify(&ScenarioDescriptor::new("SpringMesh"), &plan, &mut report)
//!     .unwrap();
//! assert_eq!(report.summary().ok, 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod format;
pub mod integrator;
pub mod oracle;
pub mod schedule;
pub mod snapshot;
pub mod time;

// Engine surface and sessions
pub mod config;
pub mod engine;
pub mod session;

// Verification and reporting
pub mod report;
pub mod suite;
pub mod trace;
pub mod verify;

pub use config::{EngineConfig, HarnessConfig, SessionConfig, Stabilization};
pub use engine::{EngineFactory, SaveFormat, ScenarioDescriptor, SimulationEngine, WaitStatus};
pub use error::{EngineError, HarnessError, HarnessResult, SessionError, ValidationError};
pub use format::NumberFormat;
pub use integrator::{Integrator, IntegratorSelection};
pub use oracle::{Comparison, EqualityOracle, FieldMismatch, StateMismatch, Tolerance, Verbosity};
pub use report::{Check, Outcome, RegressionReport, ReportId, Summary, Verdict};
pub use schedule::CheckpointSchedule;
pub use session::ScenarioSession;
pub use snapshot::{FieldData, Snapshot, SnapshotDigest, StateField};
pub use suite::{RegressionSuite, SuiteEntry};
pub use time::SimTime;
pub use trace::{TraceRecorder, TraceWriter};
pub use verify::{DeterminismPlan, DeterminismVerifier, RewindTarget, RoundTripPlan, RoundTripValidator};

//! End-to-end persistence round trips against the reference engine.

#![cfg(feature = "reference")]

use std::time::Duration;

use simverify::engine::reference::{FaultPlan, ReferenceFactory};
use simverify::{
    Check, EngineConfig, EngineError, EngineFactory, HarnessConfig, Integrator, NumberFormat, RegressionReport,
    RoundTripPlan, RoundTripValidator, SaveFormat, ScenarioDescriptor, SimTime, SimulationEngine, Snapshot, Verdict,
    WaitStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ten_digits() -> SaveFormat {
    SaveFormat::with_precision(NumberFormat::parse("%.10g").unwrap())
}

fn validate(factory: &dyn EngineFactory, descriptor: &ScenarioDescriptor, plan: &RoundTripPlan) -> RegressionReport {
    init_tracing();
    let mut report = RegressionReport::new();
    RoundTripValidator::new(factory, &HarnessConfig::default())
        .validate(descriptor, plan, &mut report)
        .unwrap();
    report
}

#[test]
fn tet_beam_round_trip_at_ten_digits() {
    let plan = RoundTripPlan::new(SimTime::from_millis(1000), SimTime::from_millis(100)).format(ten_digits());
    let report = validate(&ReferenceFactory::new(), &ScenarioDescriptor::new("TetBeam3d"), &plan);

    assert_eq!(report.len(), 10);
    assert!(report.outcomes().iter().all(|o| o.verdict == Verdict::Ok), "{report}");
    assert_eq!(report.outcomes()[0].time, Some(SimTime::from_millis(100)));
    assert_eq!(report.outcomes()[9].time, Some(SimTime::from_millis(1000)));
}

#[test]
fn single_bit_flip_on_reload_is_caught_at_first_sample() {
    let factory = ReferenceFactory::new().with_faults(FaultPlan::new().flip_bit_on_load("positions", 94, 51));
    let plan = RoundTripPlan::new(SimTime::from_millis(1000), SimTime::from_millis(100)).format(ten_digits());
    let report = validate(&factory, &ScenarioDescriptor::new("TetBeam3d"), &plan);

    assert_eq!(report.len(), 1);
    let failure = &report.outcomes()[0];
    assert_eq!(failure.verdict, Verdict::Failed);
    assert_eq!(failure.check, Check::RoundTrip);
    assert_eq!(failure.time, Some(SimTime::from_millis(100)));
    assert!(failure.diagnostic.as_deref().unwrap().contains("'positions'"));
}

#[test]
fn settled_state_loses_bits_at_reduced_precision() {
    let descriptor = ScenarioDescriptor::new("ViscousBeam");
    let plan = RoundTripPlan::new(SimTime::from_millis(300), SimTime::from_millis(100))
        .settle(SimTime::from_millis(250))
        .integrator(Integrator::Trapezoidal);

    let lossy = validate(&ReferenceFactory::new(), &descriptor, &plan.clone().format(ten_digits()));
    assert_eq!(lossy.summary().failed, 1);
    assert_eq!(lossy.outcomes()[0].time, Some(SimTime::from_millis(350)));
    assert_eq!(lossy.outcomes()[0].integrator, Some(Integrator::Trapezoidal));

    let exact = validate(&ReferenceFactory::new(), &descriptor, &plan);
    assert_eq!(exact.summary().ok, 3, "{exact}");
}

#[test]
fn missing_scenario_is_skipped() {
    let plan = RoundTripPlan::new(SimTime::from_millis(100), SimTime::from_millis(50));
    let report = validate(&ReferenceFactory::new(), &ScenarioDescriptor::new("SoftTissue"), &plan);
    assert_eq!(report.summary().skipped, 1);
}

/// Engine adapter whose saved documents lose their second half.
struct Truncating(Box<dyn SimulationEngine>);

impl SimulationEngine for Truncating {
    fn load_scenario(&mut self, descriptor: &ScenarioDescriptor) -> Result<(), EngineError> {
        self.0.load_scenario(descriptor)
    }
    fn descriptor(&self) -> Option<&ScenarioDescriptor> {
        self.0.descriptor()
    }
    fn set_integrator(&mut self, integrator: Integrator) -> Result<(), EngineError> {
        self.0.set_integrator(integrator)
    }
    fn integrator(&self) -> Result<Integrator, EngineError> {
        self.0.integrator()
    }
    fn set_max_step_size(&mut self, step: SimTime) -> Result<(), EngineError> {
        self.0.set_max_step_size(step)
    }
    fn add_waypoint(&mut self, time: SimTime) -> Result<(), EngineError> {
        self.0.add_waypoint(time)
    }
    fn clear_waypoints(&mut self) -> Result<(), EngineError> {
        self.0.clear_waypoints()
    }
    fn start(&mut self, stop_at: SimTime) -> Result<(), EngineError> {
        self.0.start(stop_at)
    }
    fn wait_for_stop(&mut self, timeout: Option<Duration>) -> Result<WaitStatus, EngineError> {
        self.0.wait_for_stop(timeout)
    }
    fn time(&self) -> Result<SimTime, EngineError> {
        self.0.time()
    }
    fn reset(&mut self) -> Result<(), EngineError> {
        self.0.reset()
    }
    fn restore_waypoint(&mut self, time: SimTime) -> Result<(), EngineError> {
        self.0.restore_waypoint(time)
    }
    fn retained_state(&self, time: SimTime) -> Result<Option<Snapshot>, EngineError> {
        self.0.retained_state(time)
    }
    fn get_state(&self, deep: bool) -> Result<Snapshot, EngineError> {
        self.0.get_state(deep)
    }
    fn set_state(&mut self, snapshot: &Snapshot) -> Result<(), EngineError> {
        self.0.set_state(snapshot)
    }
    fn save_model(&self, format: &SaveFormat) -> Result<Vec<u8>, EngineError> {
        let mut bytes = self.0.save_model(format)?;
        bytes.truncate(bytes.len() / 2);
        Ok(bytes)
    }
    fn load_model(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.0.load_model(bytes)
    }
}

struct TruncatingFactory(ReferenceFactory);

impl EngineFactory for TruncatingFactory {
    fn configure(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        self.0.configure(config)
    }
    fn config(&self) -> &EngineConfig {
        self.0.config()
    }
    fn spawn(&self) -> Result<Box<dyn SimulationEngine>, EngineError> {
        Ok(Box::new(Truncating(self.0.spawn()?)))
    }
}

#[test]
fn unreadable_document_fails_the_serialize_check() {
    let factory = TruncatingFactory(ReferenceFactory::new());
    let plan = RoundTripPlan::new(SimTime::from_millis(200), SimTime::from_millis(100));
    let report = validate(&factory, &ScenarioDescriptor::new("SpringMesh"), &plan);

    assert_eq!(report.len(), 1);
    let failure = &report.outcomes()[0];
    assert_eq!(failure.check, Check::Serialize);
    assert_eq!(failure.verdict, Verdict::Failed);
    assert!(failure.diagnostic.as_deref().unwrap().contains("Corrupt or incompatible format"), "{failure}");
}

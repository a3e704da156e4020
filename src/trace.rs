//! Print-state traces.
//!
//! A trace is a plain-text regression artifact: one header line per
//! integrator pass, then for each sample a `t=<time>:` line followed by one
//! line per state field.
//!
//! ```text
//! SpringMesh ConstrainedBackwardEuler
//! t=0:
//! positions: 0 0 0 0.25 0 0
//! step_count: 0
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::engine::{EngineFactory, ScenarioDescriptor};
use crate::error::HarnessResult;
use crate::format::NumberFormat;
use crate::integrator::{Integrator, IntegratorSelection};
use crate::schedule::CheckpointSchedule;
use crate::session::ScenarioSession;
use crate::snapshot::{FieldData, Snapshot};
use crate::time::SimTime;

/// Writes snapshots as text.
pub struct TraceWriter<W: Write> {
    out: W,
    format: NumberFormat,
}

impl TraceWriter<BufWriter<File>> {
    /// Create (or truncate) a trace file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Io` if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, format: NumberFormat) -> HarnessResult<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file), format))
    }
}

impl<W: Write> TraceWriter<W> {
    /// Wrap `out`, formatting doubles with `format`.
    pub const fn new(out: W, format: NumberFormat) -> Self {
        Self { out, format }
    }

    /// Write the `<scenario> <integrator>` header.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Io` on write failure.
    pub fn write_header(&mut self, descriptor: &ScenarioDescriptor, integrator: Integrator) -> HarnessResult<()> {
        writeln!(self.out, "{} {integrator}", descriptor.name())?;
        Ok(())
    }

    /// Write one sample.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Io` on write failure.
    pub fn write_state(&mut self, snapshot: &Snapshot) -> HarnessResult<()> {
        writeln!(self.out, "t={}:", self.format.format(snapshot.time().as_secs_f64()))?;
        for field in snapshot.fields() {
            let values: Vec<String> = match field.data() {
                FieldData::Doubles(v) => v.iter().map(|x| self.format.format(*x)).collect(),
                FieldData::Ints(v) => v.iter().map(ToString::to_string).collect(),
                FieldData::Labels(v) => v.clone(),
            };
            writeln!(self.out, "{}: {}", field.name(), values.join(" "))?;
        }
        Ok(())
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Io` if the flush fails.
    pub fn finish(mut self) -> HarnessResult<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Runs a scenario under each selected integrator and writes a trace.
pub struct TraceRecorder<'f> {
    factory: &'f dyn EngineFactory,
    session: SessionConfig,
    integrators: IntegratorSelection,
}

impl<'f> TraceRecorder<'f> {
    /// Recorder for the default integrator.
    #[must_use]
    pub fn new(factory: &'f dyn EngineFactory, session: SessionConfig) -> Self {
        Self {
            factory,
            session,
            integrators: IntegratorSelection::default(),
        }
    }

    /// Select the integrators to trace.
    #[must_use]
    pub fn integrators(mut self, integrators: IntegratorSelection) -> Self {
        self.integrators = integrators;
        self
    }

    /// Load `descriptor`, then per integrator write the header, the initial
    /// state and a sample every `interval` up to `duration`, resetting
    /// between passes.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad stride or empty integrator set,
    /// a session error if the scenario cannot be loaded or run, and `Io` on
    /// write failure.
    pub fn record<W: Write>(
        &self,
        descriptor: &ScenarioDescriptor,
        duration: SimTime,
        interval: SimTime,
        writer: &mut TraceWriter<W>,
    ) -> HarnessResult<()> {
        let samples = CheckpointSchedule::with_stride(duration, interval)?;
        let integrators = self.integrators.resolve()?;
        let mut session = ScenarioSession::load(self.factory, descriptor, self.session.clone())?;
        info!(scenario = %descriptor, samples = samples.len(), "recording trace");

        for (pass, integrator) in integrators.into_iter().enumerate() {
            if pass > 0 {
                session.reset()?;
            }
            session.set_integrator(integrator)?;
            writer.write_header(descriptor, integrator)?;
            writer.write_state(&session.capture_snapshot()?)?;
            for t in samples.iter() {
                session.run_until(t)?;
                writer.write_state(&session.capture_snapshot()?)?;
            }
            debug!(scenario = %descriptor, integrator = %integrator, "trace pass written");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_fields_with_chosen_precision() {
        let snapshot = Snapshot::builder(SimTime::from_millis(100))
            .doubles("positions", vec![0.123_456_789, -1.0])
            .ints("step_count", vec![10])
            .labels("phase", vec!["settled".to_string()])
            .build();
        let mut writer = TraceWriter::new(Vec::new(), NumberFormat::parse("%.3g").unwrap());
        writer
            .write_header(&ScenarioDescriptor::new("SpringMesh").arg("-coarse"), Integrator::RungeKutta4)
            .unwrap();
        writer.write_state(&snapshot).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("SpringMesh {}", Integrator::RungeKutta4));
        assert_eq!(lines[1], "t=0.1:");
        assert_eq!(lines[2], "positions: 0.123 -1");
        assert_eq!(lines[3], "step_count: 10");
        assert_eq!(lines[4], "phase: settled");
    }

    #[cfg(feature = "reference")]
    #[test]
    fn recorder_writes_one_block_per_integrator() {
        use crate::engine::reference::ReferenceFactory;

        let factory = ReferenceFactory::new();
        let recorder = TraceRecorder::new(&factory, SessionConfig::default())
            .integrators(IntegratorSelection::Custom(vec![Integrator::ForwardEuler, Integrator::Trapezoidal]));
        let mut writer = TraceWriter::new(Vec::new(), NumberFormat::default());
        recorder
            .record(
                &ScenarioDescriptor::new("SpringMesh").arg("-coarse"),
                SimTime::from_millis(20),
                SimTime::from_millis(10),
                &mut writer,
            )
            .unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("SpringMesh ")).count(), 2);
        assert_eq!(text.lines().filter(|l| l.starts_with("t=")).count(), 6);
        assert_eq!(text.lines().filter(|l| *l == "t=0.02:").count(), 2);
    }
}

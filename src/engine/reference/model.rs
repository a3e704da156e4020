//! Scenario catalog, dynamic state, and the persisted model document.

use serde::{Deserialize, Serialize};

use crate::engine::{SaveFormat, ScenarioDescriptor};
use crate::error::EngineError;
use crate::integrator::Integrator;
use crate::snapshot::{FieldData, Snapshot};
use crate::time::SimTime;

use super::integrate;

pub(crate) type Vec3 = [f64; 3];

/// Lattice spacing. A power of two, so rest geometry prints exactly.
const SPACING: f64 = 0.25;
const GRAVITY: f64 = -9.8;
const PARTICLE_MASS: f64 = 0.5;
const AXIAL_STIFFNESS: f64 = 20.0;
const DIAGONAL_STIFFNESS: f64 = 10.0;
const SPRING_DAMPING: f64 = 0.5;

/// Default maximum step: 10ms.
pub(crate) const DEFAULT_MAX_STEP: SimTime = SimTime::from_millis(10);

const DOCUMENT_KIND: &str = "simverify-reference-model";
const DOCUMENT_VERSION: u32 = 1;

pub(crate) const FIELD_POSITIONS: &str = "positions";
pub(crate) const FIELD_VELOCITIES: &str = "velocities";
pub(crate) const FIELD_MULTIPLIERS: &str = "multipliers";
pub(crate) const FIELD_AUX: &str = "integrator_aux";
pub(crate) const FIELD_HISTORY: &str = "viscous_history";
pub(crate) const FIELD_STEPS: &str = "step_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SpringLaw {
    Linear,
    Quadratic,
}

/// Lagged strain-rate damping carried as per-spring history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Viscosity {
    /// Relaxation rate of the history toward the current strain rate (1/s).
    pub relaxation: f64,
    pub coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Params {
    pub gravity: f64,
    pub law: SpringLaw,
    pub viscosity: Option<Viscosity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Particle {
    pub rest: Vec3,
    pub mass: f64,
    pub pinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Spring {
    pub a: usize,
    pub b: usize,
    pub stiffness: f64,
    pub damping: f64,
}

/// Everything that evolves with time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DynamicState {
    pub time: SimTime,
    pub steps: u64,
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    /// Constraint reactions, three per pinned particle.
    pub multipliers: Vec<f64>,
    /// Last evaluated accelerations; the trapezoidal rule reuses them.
    pub aux: Vec<Vec3>,
    /// Per-spring strain-rate history; empty without viscosity.
    pub history: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Model {
    pub descriptor: ScenarioDescriptor,
    pub integrator: Integrator,
    pub max_step: SimTime,
    pub params: Params,
    pub particles: Vec<Particle>,
    pub springs: Vec<Spring>,
    pub state: DynamicState,
    #[serde(skip)]
    pub rest_lengths: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct ModelDocument {
    kind: String,
    version: u32,
    precision: String,
    model: Model,
}

fn format_error(message: impl Into<String>) -> EngineError {
    EngineError::Format {
        message: message.into(),
    }
}

struct Lattice {
    particles: Vec<Particle>,
    springs: Vec<Spring>,
}

impl Lattice {
    /// Nodes on an `nx * ny * nz` grid, springs between every pair of
    /// nodes no more than one cell apart along each axis.
    fn build(dims: [usize; 3], pinned: impl Fn([usize; 3]) -> bool, layout: impl Fn([usize; 3]) -> Vec3) -> Self {
        let [nx, ny, nz] = dims;
        let index = |i: usize, j: usize, k: usize| (i * ny + j) * nz + k;
        let mut particles = Vec::with_capacity(nx * ny * nz);
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    particles.push(Particle {
                        rest: layout([i, j, k]),
                        mass: PARTICLE_MASS,
                        pinned: pinned([i, j, k]),
                    });
                }
            }
        }

        let mut springs = Vec::new();
        let offsets: Vec<[isize; 3]> = (-1..=1)
            .flat_map(|di| (-1..=1).flat_map(move |dj| (-1..=1).map(move |dk| [di, dj, dk])))
            .filter(|d| d.iter().find(|c| **c != 0).is_some_and(|c| *c > 0))
            .collect();
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    for d in &offsets {
                        let (Some(ti), Some(tj), Some(tk)) = (
                            i.checked_add_signed(d[0]),
                            j.checked_add_signed(d[1]),
                            k.checked_add_signed(d[2]),
                        ) else {
                            continue;
                        };
                        if ti >= nx || tj >= ny || tk >= nz {
                            continue;
                        }
                        let a = index(i, j, k);
                        let b = index(ti, tj, tk);
                        if particles[a].pinned && particles[b].pinned {
                            continue;
                        }
                        let axial = d.iter().filter(|c| **c != 0).count() == 1;
                        springs.push(Spring {
                            a,
                            b,
                            stiffness: if axial { AXIAL_STIFFNESS } else { DIAGONAL_STIFFNESS },
                            damping: SPRING_DAMPING,
                        });
                    }
                }
            }
        }
        Self { particles, springs }
    }
}

#[allow(clippy::cast_precision_loss)]
fn coord(i: usize) -> f64 {
    i as f64 * SPACING
}

impl Model {
    /// Construct a catalog scenario at time zero.
    pub(crate) fn build(descriptor: &ScenarioDescriptor) -> Result<Self, EngineError> {
        let mut law = SpringLaw::Linear;
        let mut coarse = false;
        for arg in descriptor.args() {
            match arg.as_str() {
                "-quadratic" => law = SpringLaw::Quadratic,
                "-coarse" => coarse = true,
                other => {
                    return Err(EngineError::Construction {
                        scenario: descriptor.name().to_string(),
                        reason: format!("unknown argument '{other}'"),
                    })
                }
            }
        }

        let (lattice, viscosity) = match descriptor.name() {
            "SpringMesh" => {
                let n = if coarse { 4 } else { 6 };
                let lattice = Lattice::build([n, n, 1], |[_, j, _]| j == 0, |[i, j, _]| [coord(i), -coord(j), 0.0]);
                (lattice, None)
            }
            "TetBeam3d" => {
                let n = if coarse { 4 } else { 8 };
                let lattice = Lattice::build([n, 2, 2], |[i, _, _]| i == 0, |[i, j, k]| [coord(i), coord(j), coord(k)]);
                (lattice, None)
            }
            "ViscousBeam" => {
                let n = if coarse { 4 } else { 6 };
                let lattice = Lattice::build([n, 2, 2], |[i, _, _]| i == 0, |[i, j, k]| [coord(i), coord(j), coord(k)]);
                let viscosity = Viscosity {
                    relaxation: 5.0,
                    coefficient: 0.2,
                };
                (lattice, Some(viscosity))
            }
            other => {
                return Err(EngineError::ScenarioNotFound {
                    name: other.to_string(),
                })
            }
        };

        let n = lattice.particles.len();
        let pinned = lattice.particles.iter().filter(|p| p.pinned).count();
        let history_len = if viscosity.is_some() { lattice.springs.len() } else { 0 };
        let mut model = Self {
            descriptor: descriptor.clone(),
            integrator: Integrator::default(),
            max_step: DEFAULT_MAX_STEP,
            params: Params {
                gravity: GRAVITY,
                law,
                viscosity,
            },
            state: DynamicState {
                time: SimTime::ZERO,
                steps: 0,
                positions: lattice.particles.iter().map(|p| p.rest).collect(),
                velocities: vec![[0.0; 3]; n],
                multipliers: vec![0.0; 3 * pinned],
                aux: vec![[0.0; 3]; n],
                history: vec![0.0; history_len],
            },
            particles: lattice.particles,
            springs: lattice.springs,
            rest_lengths: Vec::new(),
        };
        model.rest_lengths = model.compute_rest_lengths()?;
        let initial = integrate::Forces::serial().evaluate(&model, &model.state.positions, &model.state.velocities, &model.state.history);
        model.state.aux = initial.accelerations;
        Ok(model)
    }

    fn compute_rest_lengths(&self) -> Result<Vec<f64>, EngineError> {
        self.springs
            .iter()
            .map(|s| {
                let len = integrate::distance(self.particles[s.a].rest, self.particles[s.b].rest);
                if len > 0.0 && len.is_finite() {
                    Ok(len)
                } else {
                    Err(format_error(format!("spring {}-{} has zero rest length", s.a, s.b)))
                }
            })
            .collect()
    }

    pub(crate) fn pinned_count(&self) -> usize {
        self.particles.iter().filter(|p| p.pinned).count()
    }

    /// Capture the dynamic state. Shallow captures carry positions and
    /// velocities only.
    pub(crate) fn snapshot(&self, deep: bool) -> Snapshot {
        let s = &self.state;
        let mut builder = Snapshot::builder(s.time)
            .deep(deep)
            .doubles(FIELD_POSITIONS, flatten(&s.positions))
            .doubles(FIELD_VELOCITIES, flatten(&s.velocities));
        if deep {
            builder = builder
                .doubles(FIELD_MULTIPLIERS, s.multipliers.clone())
                .doubles(FIELD_AUX, flatten(&s.aux));
            if self.params.viscosity.is_some() {
                builder = builder.doubles(FIELD_HISTORY, s.history.clone());
            }
            builder = builder.ints(FIELD_STEPS, vec![i64::try_from(s.steps).unwrap_or(i64::MAX)]);
        }
        builder.build()
    }

    /// Replace the dynamic state with `snapshot`. Fields a shallow capture
    /// lacks keep their current values.
    pub(crate) fn restore(&mut self, snapshot: &Snapshot) -> Result<(), EngineError> {
        let n = self.particles.len();
        let mut next = self.state.clone();
        next.time = snapshot.time();
        next.positions = vectors(snapshot, FIELD_POSITIONS, n)?
            .ok_or_else(|| format_error("snapshot has no positions"))?;
        next.velocities = vectors(snapshot, FIELD_VELOCITIES, n)?
            .ok_or_else(|| format_error("snapshot has no velocities"))?;
        if let Some(aux) = vectors(snapshot, FIELD_AUX, n)? {
            next.aux = aux;
        }
        if let Some(m) = doubles(snapshot, FIELD_MULTIPLIERS, 3 * self.pinned_count())? {
            next.multipliers = m;
        }
        if let Some(h) = doubles(snapshot, FIELD_HISTORY, self.state.history.len())? {
            next.history = h;
        }
        if let Some(field) = snapshot.field(FIELD_STEPS) {
            match field.data() {
                FieldData::Ints(v) if v.len() == 1 => {
                    next.steps = u64::try_from(v[0]).map_err(|_| format_error("negative step count"))?;
                }
                _ => return Err(format_error("step_count must be a single integer")),
            }
        }
        self.state = next;
        Ok(())
    }

    /// Serialize the whole model, rounding doubles through `format`.
    pub(crate) fn to_document(&self, format: &SaveFormat) -> Result<Vec<u8>, EngineError> {
        let mut model = self.clone();
        model.round_values(format);
        let doc = ModelDocument {
            kind: DOCUMENT_KIND.to_string(),
            version: DOCUMENT_VERSION,
            precision: format.to_string(),
            model,
        };
        serde_json::to_vec(&doc).map_err(|e| format_error(format!("encode model: {e}")))
    }

    /// Parse and structurally validate a model written by `to_document`.
    pub(crate) fn from_document(bytes: &[u8]) -> Result<Self, EngineError> {
        let doc: ModelDocument =
            serde_json::from_slice(bytes).map_err(|e| format_error(format!("decode model: {e}")))?;
        if doc.kind != DOCUMENT_KIND {
            return Err(format_error(format!("unexpected document kind '{}'", doc.kind)));
        }
        if doc.version != DOCUMENT_VERSION {
            return Err(format_error(format!("unsupported model version {}", doc.version)));
        }
        let mut model = doc.model;
        model.validate()?;
        model.rest_lengths = model.compute_rest_lengths()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let n = self.particles.len();
        let s = &self.state;
        if n == 0 {
            return Err(format_error("model has no particles"));
        }
        if self.max_step.is_zero() {
            return Err(format_error("max step must be positive"));
        }
        if s.positions.len() != n || s.velocities.len() != n || s.aux.len() != n {
            return Err(format_error(format!(
                "state sized for {}/{}/{} particles, model has {n}",
                s.positions.len(),
                s.velocities.len(),
                s.aux.len()
            )));
        }
        if s.multipliers.len() != 3 * self.pinned_count() {
            return Err(format_error("multiplier count does not match pinned particles"));
        }
        let history_len = if self.params.viscosity.is_some() { self.springs.len() } else { 0 };
        if s.history.len() != history_len {
            return Err(format_error("viscous history does not match springs"));
        }
        if let Some(bad) = self.springs.iter().find(|sp| sp.a >= n || sp.b >= n || sp.a == sp.b) {
            return Err(format_error(format!("spring {}-{} references invalid particles", bad.a, bad.b)));
        }
        if self.particles.iter().any(|p| p.mass <= 0.0 || !p.mass.is_finite()) {
            return Err(format_error("particle mass must be positive"));
        }
        Ok(())
    }

    fn round_values(&mut self, format: &SaveFormat) {
        if format.precision.is_none() {
            return;
        }
        let r = |v: &mut f64| *v = format.apply(*v);
        let rv = |v: &mut Vec3| v.iter_mut().for_each(r);

        r(&mut self.params.gravity);
        if let Some(visc) = self.params.viscosity.as_mut() {
            r(&mut visc.relaxation);
            r(&mut visc.coefficient);
        }
        for p in &mut self.particles {
            rv(&mut p.rest);
            r(&mut p.mass);
        }
        for s in &mut self.springs {
            r(&mut s.stiffness);
            r(&mut s.damping);
        }
        let st = &mut self.state;
        st.positions.iter_mut().for_each(rv);
        st.velocities.iter_mut().for_each(rv);
        st.aux.iter_mut().for_each(rv);
        st.multipliers.iter_mut().for_each(r);
        st.history.iter_mut().for_each(r);
    }
}

fn flatten(v: &[Vec3]) -> Vec<f64> {
    v.iter().flatten().copied().collect()
}

fn doubles(snapshot: &Snapshot, name: &str, expected: usize) -> Result<Option<Vec<f64>>, EngineError> {
    let Some(field) = snapshot.field(name) else {
        return Ok(None);
    };
    let values = field
        .data()
        .as_doubles()
        .ok_or_else(|| format_error(format!("field '{name}' must hold doubles")))?;
    if values.len() != expected {
        return Err(format_error(format!(
            "field '{name}' has {} entries, expected {expected}",
            values.len()
        )));
    }
    Ok(Some(values.to_vec()))
}

fn vectors(snapshot: &Snapshot, name: &str, count: usize) -> Result<Option<Vec<Vec3>>, EngineError> {
    Ok(doubles(snapshot, name, 3 * count)?.map(|flat| flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(s: &str) -> Model {
        Model::build(&ScenarioDescriptor::parse(s).unwrap()).unwrap()
    }

    #[test]
    fn catalog_shapes() {
        let mesh = build("SpringMesh");
        assert_eq!(mesh.particles.len(), 36);
        assert_eq!(mesh.pinned_count(), 6);
        assert!(mesh.params.viscosity.is_none());

        let beam = build("TetBeam3d -coarse");
        assert_eq!(beam.particles.len(), 16);
        assert_eq!(beam.pinned_count(), 4);

        let visc = build("ViscousBeam");
        assert_eq!(visc.state.history.len(), visc.springs.len());
        assert!(visc.springs.iter().all(|s| !(visc.particles[s.a].pinned && visc.particles[s.b].pinned)));
    }

    #[test]
    fn unknown_names_and_args() {
        let err = Model::build(&ScenarioDescriptor::new("Pendulum")).unwrap_err();
        assert!(matches!(err, EngineError::ScenarioNotFound { .. }));
        let err = Model::build(&ScenarioDescriptor::new("SpringMesh").arg("-cubic")).unwrap_err();
        assert!(matches!(err, EngineError::Construction { .. }));
    }

    #[test]
    fn initial_accelerations_are_gravity() {
        let beam = build("TetBeam3d");
        for (p, a) in beam.particles.iter().zip(&beam.state.aux) {
            let expected = if p.pinned { 0.0 } else { GRAVITY };
            assert_eq!(a[1].to_bits(), expected.to_bits());
        }
    }

    #[test]
    fn snapshot_restore_preserves_state() {
        let mut beam = build("ViscousBeam -coarse");
        let snap = beam.snapshot(true);
        assert_eq!(snap.field(FIELD_STEPS).unwrap().data(), &FieldData::Ints(vec![0]));
        beam.state.velocities[5][0] = 1.0;
        beam.restore(&snap).unwrap();
        assert_eq!(beam.state.velocities[5][0], 0.0);

        let shallow = beam.snapshot(false);
        assert!(shallow.field(FIELD_AUX).is_none());
        beam.restore(&shallow).unwrap();
    }

    #[test]
    fn restore_rejects_wrong_sizes() {
        let mut mesh = build("SpringMesh -coarse");
        let bad = Snapshot::builder(SimTime::ZERO)
            .doubles(FIELD_POSITIONS, vec![0.0; 3])
            .doubles(FIELD_VELOCITIES, vec![0.0; 3])
            .build();
        assert!(matches!(mesh.restore(&bad), Err(EngineError::Format { .. })));
    }

    #[test]
    fn document_round_trip_at_full_precision() {
        let mesh = build("SpringMesh -quadratic");
        let bytes = mesh.to_document(&SaveFormat::full()).unwrap();
        let back = Model::from_document(&bytes).unwrap();
        assert_eq!(back.state, mesh.state);
        assert_eq!(back.rest_lengths, mesh.rest_lengths);
        assert_eq!(back.params, mesh.params);
        assert_eq!(back.descriptor, mesh.descriptor);
    }

    #[test]
    fn document_rejects_garbage_and_inconsistency() {
        assert!(Model::from_document(b"{}").is_err());
        let mesh = build("SpringMesh -coarse");
        let mut broken = mesh.clone();
        broken.state.positions.pop();
        let bytes = broken.to_document(&SaveFormat::full()).unwrap();
        assert!(matches!(Model::from_document(&bytes), Err(EngineError::Format { .. })));
    }
}

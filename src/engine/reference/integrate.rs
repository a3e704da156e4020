//! Force evaluation and the six time-stepping schemes.
//!
//! Every scheme is a pure function of the dynamic state and the step
//! length. Implicit schemes run a fixed number of fixed-point iterations
//! instead of iterating to a residual.

use crate::config::Stabilization;
use crate::integrator::Integrator;

use super::model::{Model, SpringLaw, Vec3};

/// Fixed-point iterations for implicit schemes.
pub(crate) const IMPLICIT_ITERATIONS: usize = 4;

fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn distance(a: Vec3, b: Vec3) -> f64 {
    let d = sub(b, a);
    dot(d, d).sqrt()
}

/// `x + h * d`, element-wise.
fn axpy(x: &[Vec3], h: f64, d: &[Vec3]) -> Vec<Vec3> {
    x.iter().zip(d).map(|(x, d)| add(*x, scale(*d, h))).collect()
}

/// Accelerations and constraint reactions at one state.
#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    pub accelerations: Vec<Vec3>,
    pub reactions: Vec<f64>,
}

/// Force accumulation policy.
///
/// With more than one lane, spring forces are summed into per-lane
/// partial buffers that are reduced starting at `rotation`, the way a
/// parallel reduction reorders additions between runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Forces {
    lanes: usize,
    rotation: usize,
    damping: bool,
}

impl Forces {
    pub(crate) const fn serial() -> Self {
        Self {
            lanes: 1,
            rotation: 0,
            damping: true,
        }
    }

    pub(crate) fn new(lanes: usize, rotation: usize, damping: bool) -> Self {
        let lanes = lanes.max(1);
        Self {
            lanes,
            rotation: rotation % lanes,
            damping,
        }
    }

    fn spring_force(&self, model: &Model, idx: usize, x: &[Vec3], v: &[Vec3], history: &[f64]) -> Vec3 {
        let s = &model.springs[idx];
        let d = sub(x[s.b], x[s.a]);
        let len = dot(d, d).sqrt();
        if len == 0.0 {
            return [0.0; 3];
        }
        let dir = scale(d, 1.0 / len);
        let rest = model.rest_lengths[idx];
        let stretch = len - rest;
        let mut magnitude = match model.params.law {
            SpringLaw::Linear => s.stiffness * stretch,
            SpringLaw::Quadratic => s.stiffness * stretch * (1.0 + (stretch / rest).abs()),
        };
        if self.damping {
            magnitude += s.damping * dot(sub(v[s.b], v[s.a]), dir);
        }
        if let Some(visc) = model.params.viscosity {
            magnitude += visc.coefficient * history[idx] * rest;
        }
        scale(dir, magnitude)
    }

    pub(crate) fn evaluate(&self, model: &Model, x: &[Vec3], v: &[Vec3], history: &[f64]) -> Evaluation {
        let n = model.particles.len();
        let mut partial = vec![vec![[0.0; 3]; n]; self.lanes];
        for (idx, s) in model.springs.iter().enumerate() {
            let f = self.spring_force(model, idx, x, v, history);
            let lane = &mut partial[idx % self.lanes];
            lane[s.a] = add(lane[s.a], f);
            lane[s.b] = sub(lane[s.b], f);
        }

        let mut accelerations = Vec::with_capacity(n);
        let mut reactions = Vec::new();
        for (i, p) in model.particles.iter().enumerate() {
            let mut total = [0.0, p.mass * model.params.gravity, 0.0];
            for k in 0..self.lanes {
                total = add(total, partial[(k + self.rotation) % self.lanes][i]);
            }
            if p.pinned {
                reactions.extend(total.iter().map(|c| -*c));
                accelerations.push([0.0; 3]);
            } else {
                accelerations.push([total[0] / p.mass, total[1] / p.mass, total[2] / p.mass]);
            }
        }
        Evaluation {
            accelerations,
            reactions,
        }
    }
}

/// Per-step settings derived from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepContext {
    pub forces: Forces,
    pub iterations: usize,
    pub stabilization: Stabilization,
}

impl Default for StepContext {
    fn default() -> Self {
        Self {
            forces: Forces::serial(),
            iterations: IMPLICIT_ITERATIONS,
            stabilization: Stabilization::GlobalMass,
        }
    }
}

fn strain_rates(model: &Model, x: &[Vec3], v: &[Vec3]) -> Vec<f64> {
    model
        .springs
        .iter()
        .zip(&model.rest_lengths)
        .map(|(s, rest)| {
            let d = sub(x[s.b], x[s.a]);
            let len = dot(d, d).sqrt();
            if len == 0.0 {
                0.0
            } else {
                dot(sub(v[s.b], v[s.a]), scale(d, 1.0 / len)) / rest
            }
        })
        .collect()
}

fn integrate(model: &Model, h: f64, ctx: &StepContext) -> (Vec<Vec3>, Vec<Vec3>, Evaluation) {
    let s = &model.state;
    let (x0, v0, hist) = (&s.positions, &s.velocities, &s.history);
    let eval = |x: &[Vec3], v: &[Vec3]| ctx.forces.evaluate(model, x, v, hist);

    match model.integrator {
        Integrator::ForwardEuler => {
            let e = eval(x0, v0);
            let x1 = axpy(x0, h, v0);
            let v1 = axpy(v0, h, &e.accelerations);
            (x1, v1, e)
        }
        Integrator::SymplecticEuler => {
            let e = eval(x0, v0);
            let v1 = axpy(v0, h, &e.accelerations);
            let x1 = axpy(x0, h, &v1);
            (x1, v1, e)
        }
        Integrator::RungeKutta4 => {
            let half = 0.5 * h;
            let k1 = eval(x0, v0);
            let x2 = axpy(x0, half, v0);
            let v2 = axpy(v0, half, &k1.accelerations);
            let k2 = eval(&x2, &v2);
            let x3 = axpy(x0, half, &v2);
            let v3 = axpy(v0, half, &k2.accelerations);
            let k3 = eval(&x3, &v3);
            let x4 = axpy(x0, h, &v3);
            let v4 = axpy(v0, h, &k3.accelerations);
            let k4 = eval(&x4, &v4);

            let sixth = h / 6.0;
            let combine = |base: &[Vec3], d1: &[Vec3], d2: &[Vec3], d3: &[Vec3], d4: &[Vec3]| -> Vec<Vec3> {
                (0..base.len())
                    .map(|i| {
                        let sum = add(add(d1[i], scale(d2[i], 2.0)), add(scale(d3[i], 2.0), d4[i]));
                        add(base[i], scale(sum, sixth))
                    })
                    .collect()
            };
            let x1 = combine(x0, v0, &v2, &v3, &v4);
            let v1 = combine(v0, &k1.accelerations, &k2.accelerations, &k3.accelerations, &k4.accelerations);
            (x1, v1, k1)
        }
        Integrator::BackwardEuler | Integrator::ConstrainedBackwardEuler => {
            let mut e = eval(x0, v0);
            let mut v1 = axpy(v0, h, &e.accelerations);
            let mut x1 = axpy(x0, h, &v1);
            for _ in 0..ctx.iterations {
                e = eval(&x1, &v1);
                v1 = axpy(v0, h, &e.accelerations);
                x1 = axpy(x0, h, &v1);
            }
            (x1, v1, e)
        }
        Integrator::Trapezoidal => {
            let half = 0.5 * h;
            let a0 = &s.aux;
            let mut v1 = axpy(v0, h, a0);
            let mut x1: Vec<Vec3> = (0..x0.len()).map(|i| add(x0[i], scale(add(v0[i], v1[i]), half))).collect();
            for _ in 0..ctx.iterations {
                let e = eval(&x1, &v1);
                v1 = (0..v0.len())
                    .map(|i| add(v0[i], scale(add(a0[i], e.accelerations[i]), half)))
                    .collect();
                x1 = (0..x0.len()).map(|i| add(x0[i], scale(add(v0[i], v1[i]), half))).collect();
            }
            let e = eval(&x1, &v1);
            (x1, v1, e)
        }
    }
}

/// Advance the state by `h` seconds. The caller owns the clock.
pub(crate) fn step(model: &mut Model, h: f64, ctx: &StepContext) {
    let (mut x1, mut v1, last) = integrate(model, h, ctx);

    if model.integrator.is_constrained() && ctx.stabilization != Stabilization::None {
        for (i, p) in model.particles.iter().enumerate() {
            if p.pinned {
                x1[i] = p.rest;
                v1[i] = [0.0; 3];
            }
        }
    }

    if let Some(visc) = model.params.viscosity {
        let rates = strain_rates(model, &x1, &v1);
        for (hist, rate) in model.state.history.iter_mut().zip(rates) {
            *hist += h * visc.relaxation * (rate - *hist);
        }
    }

    let state = &mut model.state;
    state.positions = x1;
    state.velocities = v1;
    state.aux = last.accelerations;
    state.multipliers = last.reactions;
}

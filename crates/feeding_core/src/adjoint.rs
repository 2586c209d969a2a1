//! Backward adjoint sweep over a recorded solve.
//!
//! The costate obeys `dz/dt = -J_D(x(t))ᵀ z` inside each segment and is pulled
//! back through every transition with the transpose of the forward jump, so
//! `⟨z, v⟩` is constant along the whole hybrid trajectory. Started from
//! [`terminal_condition`], `z` is the infinitesimal phase response curve.

use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::error::{ModelError, Result};
use crate::field::{constrained_rates, reduced_jacobian};
use crate::params::{ModelConfig, ModelParams, PHYSICAL_DIM, TANGENT_DIM};
use crate::solvers::RK4;
use crate::trajectory::{Segment, Trajectory};
use crate::transition::TransitionRecord;
use crate::traits::{DynamicalSystem, Steppable};

/// Adjoint samples in chronological order. At every transition time there are
/// two samples, before and after the pull-back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResponse {
    pub times: Vec<f64>,
    pub adjoint: Vec<[f64; TANGENT_DIM]>,
}

impl PhaseResponse {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Costate at the start of the trajectory.
    pub fn initial(&self) -> Option<[f64; TANGENT_DIM]> {
        self.adjoint.first().copied()
    }
}

/// `z = f / (|f|² T)`, so that `⟨z, f⟩ = 1/T`.
pub fn terminal_condition(flow: &Vector6<f64>, period: f64) -> Result<[f64; TANGENT_DIM]> {
    let norm_sq = flow.norm_squared();
    if !(norm_sq > 0.0 && norm_sq.is_finite()) {
        return Err(ModelError::Numerical(
            "cannot normalise against a vanishing flow direction".to_string(),
        ));
    }
    if !(period > 0.0 && period.is_finite()) {
        return Err(ModelError::InvalidConfig(format!(
            "period must be positive and finite, got {period}."
        )));
    }
    let z = flow / (norm_sq * period);
    let mut out = [0.0; TANGENT_DIM];
    out.copy_from_slice(z.as_slice());
    Ok(out)
}

/// Cubic Hermite interpolant of the physical state between two samples.
struct HermiteInterval {
    t0: f64,
    dt: f64,
    x0: [f64; PHYSICAL_DIM],
    x1: [f64; PHYSICAL_DIM],
    f0: [f64; PHYSICAL_DIM],
    f1: [f64; PHYSICAL_DIM],
}

impl HermiteInterval {
    fn at(&self, t: f64) -> [f64; PHYSICAL_DIM] {
        let s = (t - self.t0) / self.dt;
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 1.0 - 3.0 * s2 + 2.0 * s3;
        let h10 = s - 2.0 * s2 + s3;
        let h01 = 3.0 * s2 - 2.0 * s3;
        let h11 = s3 - s2;
        let mut x = [0.0; PHYSICAL_DIM];
        for i in 0..PHYSICAL_DIM {
            x[i] = h00 * self.x0[i]
                + h10 * self.dt * self.f0[i]
                + h01 * self.x1[i]
                + h11 * self.dt * self.f1[i];
        }
        x
    }
}

struct AdjointField<'a> {
    params: &'a ModelParams,
    domain: Domain,
    interval: HermiteInterval,
}

impl DynamicalSystem for AdjointField<'_> {
    fn dimension(&self) -> usize {
        TANGENT_DIM
    }

    fn apply(&self, t: f64, z: &[f64], out: &mut [f64]) {
        let x = self.interval.at(t);
        let jac = reduced_jacobian(self.params, self.domain, &x);
        let dz = -(jac.transpose() * Vector6::from_column_slice(z));
        out.copy_from_slice(dz.as_slice());
    }
}

fn physical(state: &[f64]) -> [f64; PHYSICAL_DIM] {
    let mut x = [0.0; PHYSICAL_DIM];
    x.copy_from_slice(&state[..PHYSICAL_DIM]);
    x
}

fn sweep_segment(
    params: &ModelParams,
    segment: &Segment,
    max_step: f64,
    stepper: &mut RK4,
    z: &mut [f64; TANGENT_DIM],
    times: &mut Vec<f64>,
    adjoint: &mut Vec<[f64; TANGENT_DIM]>,
) {
    let rates = |x: &[f64]| constrained_rates(params, segment.domain, segment.grasper, x);
    let n = segment.times.len();
    times.push(segment.times[n - 1]);
    adjoint.push(*z);

    for i in (0..n - 1).rev() {
        let (t0, t1) = (segment.times[i], segment.times[i + 1]);
        let span = t1 - t0;
        if span > 0.0 {
            let x0 = physical(&segment.states[i]);
            let x1 = physical(&segment.states[i + 1]);
            let field = AdjointField {
                params,
                domain: segment.domain,
                interval: HermiteInterval {
                    t0,
                    dt: span,
                    x0,
                    x1,
                    f0: rates(&x0),
                    f1: rates(&x1),
                },
            };
            let substeps = (span / max_step).ceil().max(1.0) as usize;
            let dt = -span / substeps as f64;
            let mut t = t1;
            for _ in 0..substeps {
                stepper.step(&field, &mut t, &mut z[..], dt);
            }
        }
        times.push(t0);
        adjoint.push(*z);
    }
}

/// Integrates the adjoint backward from `terminal` at the end of `trajectory`.
pub fn phase_response(
    config: &ModelConfig,
    trajectory: &Trajectory,
    transitions: &[TransitionRecord],
    terminal: &[f64],
) -> Result<PhaseResponse> {
    if terminal.len() != TANGENT_DIM {
        return Err(ModelError::InvalidConfig(format!(
            "adjoint direction must have {TANGENT_DIM} entries, got {}.",
            terminal.len()
        )));
    }
    if terminal.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::InvalidConfig(
            "adjoint direction must be finite.".to_string(),
        ));
    }
    let segments = &trajectory.segments;
    if segments.is_empty() || transitions.len() + 1 != segments.len() {
        return Err(ModelError::Numerical(format!(
            "{} segments do not match {} transitions",
            segments.len(),
            transitions.len()
        )));
    }

    let mut z = [0.0; TANGENT_DIM];
    z.copy_from_slice(terminal);
    let mut stepper = RK4::new(TANGENT_DIM);
    let mut times = Vec::with_capacity(trajectory.len() + segments.len());
    let mut adjoint = Vec::with_capacity(times.capacity());

    for (s, segment) in segments.iter().enumerate().rev() {
        if segment.times.is_empty() {
            continue;
        }
        sweep_segment(
            &config.params,
            segment,
            config.solver.adjoint_step,
            &mut stepper,
            &mut z,
            &mut times,
            &mut adjoint,
        );
        if s > 0 {
            let m: &Matrix6<f64> = &transitions[s - 1].jump.matrix;
            let pulled = m.transpose() * Vector6::from_column_slice(&z);
            z.copy_from_slice(pulled.as_slice());
        }
    }

    times.reverse();
    adjoint.reverse();
    Ok(PhaseResponse { times, adjoint })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::tangent_rates;
    use crate::model::FeedingModel;
    use crate::params::DEFAULT_HORIZON;

    fn solved_default() -> FeedingModel {
        let mut model = FeedingModel::new(ModelConfig::default()).expect("config should be valid");
        model.solve().expect("solve should succeed");
        model
    }

    fn terminal_for(model: &FeedingModel) -> [f64; TANGENT_DIM] {
        let segment = model
            .trajectory()
            .expect("solved")
            .segments
            .last()
            .cloned()
            .expect("at least one segment");
        let end = segment.states[segment.states.len() - 1];
        let flow = tangent_rates(
            &model.config().params,
            segment.domain,
            segment.grasper,
            &end,
        );
        terminal_condition(&flow, DEFAULT_HORIZON).expect("non-zero flow")
    }

    #[test]
    fn phase_response_conserves_pairing_with_flow() {
        let model = solved_default();
        let response = model
            .phase_response(&terminal_for(&model))
            .expect("adjoint should integrate");

        let trajectory = model.trajectory().expect("solved");
        let mut k = 0;
        for segment in &trajectory.segments {
            for (&t, state) in segment.times.iter().zip(&segment.states) {
                assert_eq!(response.times[k], t);
                let f = tangent_rates(
                    &model.config().params,
                    segment.domain,
                    segment.grasper,
                    state,
                );
                let z = Vector6::from_column_slice(&response.adjoint[k]);
                let pairing = z.dot(&f) * DEFAULT_HORIZON;
                assert!((pairing - 1.0).abs() < 1e-4, "⟨z, f⟩·T = {pairing} at t = {t}");
                k += 1;
            }
        }
        assert_eq!(k, response.len());
    }

    #[test]
    fn adjoint_pairs_with_forward_variation() {
        let model = solved_default();
        let terminal = terminal_for(&model);
        let response = model.phase_response(&terminal).expect("adjoint should integrate");

        let v0 = Vector6::from_column_slice(model.initial_tangent());
        let end = model.final_state().expect("solved");
        let v_end = Vector6::from_column_slice(&end[PHYSICAL_DIM..]);
        let z0 = Vector6::from_column_slice(&response.initial().expect("samples"));
        let z_end = Vector6::from_column_slice(&terminal);

        let start = z0.dot(&v0);
        let finish = z_end.dot(&v_end);
        let scale = z0.norm() * v0.norm() + z_end.norm() * v_end.norm();
        assert!(
            (start - finish).abs() < 1e-6 * scale,
            "⟨z, v⟩: {start} vs {finish}"
        );
    }

    #[test]
    fn rejects_malformed_terminal_direction() {
        let model = solved_default();
        assert!(matches!(
            model.phase_response(&[1.0, 0.0]),
            Err(ModelError::InvalidConfig(_))
        ));
        assert!(matches!(
            model.phase_response(&[f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0]),
            Err(ModelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn terminal_condition_normalises_against_flow() {
        let flow = Vector6::new(3.0, 0.0, 4.0, 0.0, 0.0, 0.0);
        let z = terminal_condition(&flow, 2.0).expect("non-zero flow");
        let pairing = Vector6::from_column_slice(&z).dot(&flow);
        assert!((pairing - 0.5).abs() < 1e-15);
        assert!(terminal_condition(&Vector6::zeros(), 1.0).is_err());
    }

    #[test]
    fn hermite_interval_reproduces_cubic() {
        let cubic = |t: f64| t * t * t - 2.0 * t;
        let slope = |t: f64| 3.0 * t * t - 2.0;
        let mut x0 = [0.0; PHYSICAL_DIM];
        let mut x1 = [0.0; PHYSICAL_DIM];
        let mut f0 = [0.0; PHYSICAL_DIM];
        let mut f1 = [0.0; PHYSICAL_DIM];
        x0[5] = cubic(0.5);
        x1[5] = cubic(1.25);
        f0[5] = slope(0.5);
        f1[5] = slope(1.25);
        let interval = HermiteInterval {
            t0: 0.5,
            dt: 0.75,
            x0,
            x1,
            f0,
            f1,
        };
        for t in [0.5, 0.7, 1.0, 1.25] {
            assert!((interval.at(t)[5] - cubic(t)).abs() < 1e-12);
        }
    }
}

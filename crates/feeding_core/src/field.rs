//! Domain-dependent vector field of the feeding apparatus and its tangent system.
//!
//! Every function takes the domain and grasper flag explicitly, so callers can
//! evaluate the branch on either side of a switching surface.

use nalgebra::{Matrix6, Vector6};

use crate::domain::{Domain, Grasper};
use crate::params::{
    ModelParams, PerturbationSpec, FORCE_INDEX, LOAD_INDEX, PHYSICAL_DIM, STATE_DIM, TANGENT_DIM,
};
use crate::traits::DynamicalSystem;

/// Length-tension curve `φ(ξ) = -κ ξ (ξ - 1)(ξ + 1)`.
pub fn muscle_shape(kappa: f64, xi: f64) -> f64 {
    -kappa * xi * (xi - 1.0) * (xi + 1.0)
}

pub fn muscle_shape_slope(kappa: f64, xi: f64) -> f64 {
    -kappa * (3.0 * xi * xi - 1.0)
}

/// Net muscle force on the mechanical coordinate.
pub fn muscle_force(params: &ModelParams, u0: f64, u1: f64, xr: f64) -> f64 {
    let xi0 = (params.protractor_center - xr) / params.protractor_width;
    let xi1 = (params.retractor_center - xr) / params.retractor_width;
    muscle_shape(params.kappa, xi0) * u0 + muscle_shape(params.kappa, xi1) * u1
}

/// Physical rates ignoring every wall constraint.
pub fn unconstrained_rates(
    params: &ModelParams,
    grasper: Grasper,
    x: &[f64],
) -> [f64; PHYSICAL_DIM] {
    let mut rates = [0.0; PHYSICAL_DIM];
    let xr = x[5];
    for i in 0..3 {
        let j = (i + 1) % 3;
        let feedback =
            params.feedback_gains[i] * (xr - params.setpoints[i]) * params.feedback_signs[i];
        rates[i] = (x[i] * (1.0 - x[i] - params.gamma * x[j]) + params.mu + feedback) / params.tau_a;
    }
    rates[3] = ((x[0] + x[1]) * params.u_max - x[3]) / params.tau_m;
    rates[4] = (x[2] * params.u_max - x[4]) / params.tau_m;

    let load = if grasper.is_closed() { x[FORCE_INDEX] } else { 0.0 };
    rates[5] = (muscle_force(params, x[3], x[4], xr) + load) / params.damping;
    rates[LOAD_INDEX] = if grasper.is_closed() { rates[5] } else { 0.0 };
    rates[FORCE_INDEX] = 0.0;
    rates
}

/// Physical rates of `domain`: pinned activities may only grow.
pub fn constrained_rates(
    params: &ModelParams,
    domain: Domain,
    grasper: Grasper,
    x: &[f64],
) -> [f64; PHYSICAL_DIM] {
    let mut rates = unconstrained_rates(params, grasper, x);
    for &k in domain.pinned() {
        rates[k] = rates[k].max(0.0);
    }
    rates
}

/// Jacobian of the first six unconstrained rates with respect to `(a0, a1, a2, u0, u1, xr)`.
pub fn jacobian(params: &ModelParams, x: &[f64]) -> Matrix6<f64> {
    let mut jac = Matrix6::zeros();
    let inv_ta = 1.0 / params.tau_a;
    for i in 0..3 {
        let j = (i + 1) % 3;
        jac[(i, i)] = (1.0 - 2.0 * x[i] - params.gamma * x[j]) * inv_ta;
        jac[(i, j)] = -params.gamma * x[i] * inv_ta;
        jac[(i, 5)] = params.feedback_gains[i] * params.feedback_signs[i] * inv_ta;
    }

    let inv_tm = 1.0 / params.tau_m;
    jac[(3, 0)] = params.u_max * inv_tm;
    jac[(3, 1)] = params.u_max * inv_tm;
    jac[(3, 3)] = -inv_tm;
    jac[(4, 2)] = params.u_max * inv_tm;
    jac[(4, 4)] = -inv_tm;

    let xr = x[5];
    let xi0 = (params.protractor_center - xr) / params.protractor_width;
    let xi1 = (params.retractor_center - xr) / params.retractor_width;
    let inv_b = 1.0 / params.damping;
    jac[(5, 3)] = muscle_shape(params.kappa, xi0) * inv_b;
    jac[(5, 4)] = muscle_shape(params.kappa, xi1) * inv_b;
    jac[(5, 5)] = -(muscle_shape_slope(params.kappa, xi0) * x[3] / params.protractor_width
        + muscle_shape_slope(params.kappa, xi1) * x[4] / params.retractor_width)
        * inv_b;
    jac
}

/// `P J P`: rows and columns of the pinned coordinates removed.
pub fn reduced_jacobian(params: &ModelParams, domain: Domain, x: &[f64]) -> Matrix6<f64> {
    let mut jac = jacobian(params, x);
    for &k in domain.pinned() {
        jac.row_mut(k).fill(0.0);
        jac.column_mut(k).fill(0.0);
    }
    jac
}

/// First six constrained rates as a tangent vector.
pub fn tangent_rates(params: &ModelParams, domain: Domain, grasper: Grasper, x: &[f64]) -> Vector6<f64> {
    let rates = constrained_rates(params, domain, grasper, x);
    Vector6::from_column_slice(&rates[..TANGENT_DIM])
}

/// Inhomogeneous term of the tangent equation for a sustained perturbation.
pub fn forcing_term(
    params: &ModelParams,
    perturbation: &PerturbationSpec,
    domain: Domain,
    grasper: Grasper,
    x: &[f64],
) -> Vector6<f64> {
    let mut b = Vector6::zeros();
    let nu = perturbation.time_scaling.factor(grasper);
    if nu != 0.0 {
        b += tangent_rates(params, domain, grasper, x) * nu;
    }
    if grasper.is_closed() {
        if let Some(forcing) = perturbation.closed_forcing {
            b += Vector6::from_column_slice(&forcing);
        }
    }
    for &k in domain.pinned() {
        b[k] = 0.0;
    }
    b
}

/// Full 14-component derivative for a state in `domain` with the given grasper flag.
pub fn evaluate(
    params: &ModelParams,
    perturbation: &PerturbationSpec,
    domain: Domain,
    grasper: Grasper,
    state: &[f64],
    out: &mut [f64],
) {
    let rates = constrained_rates(params, domain, grasper, state);
    out[..PHYSICAL_DIM].copy_from_slice(&rates);

    let jac = reduced_jacobian(params, domain, state);
    let v = Vector6::from_column_slice(&state[PHYSICAL_DIM..STATE_DIM]);
    let mut dv = jac * v;
    if perturbation.is_active() {
        dv += forcing_term(params, perturbation, domain, grasper, state);
    }
    out[PHYSICAL_DIM..STATE_DIM].copy_from_slice(dv.as_slice());
}

/// The hybrid field frozen to one branch, for use with the generic steppers.
pub struct HybridField<'a> {
    pub params: &'a ModelParams,
    pub perturbation: &'a PerturbationSpec,
    pub domain: Domain,
    pub grasper: Grasper,
}

impl DynamicalSystem for HybridField<'_> {
    fn dimension(&self) -> usize {
        STATE_DIM
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        evaluate(self.params, self.perturbation, self.domain, self.grasper, x, out);
    }
}

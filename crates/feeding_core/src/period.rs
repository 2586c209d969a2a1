//! Horizon bisection for the period of the limit cycle.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::FeedingModel;
use crate::params::TANGENT_DIM;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodSearchSettings {
    pub max_iterations: usize,
    /// Width of the horizon bracket at which the search stops.
    pub tolerance: f64,
}

impl Default for PeriodSearchSettings {
    fn default() -> Self {
        Self {
            max_iterations: 60,
            tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeriodEstimate {
    pub period: f64,
    /// Largest deviation of the first six coordinates from the initial state.
    pub residual: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Solves to `horizon` and returns the displacement from the initial state
/// projected on the initial flow direction, with the max-norm residual.
fn return_offset(model: &mut FeedingModel, horizon: f64) -> Result<(f64, f64)> {
    model.set_horizon(horizon)?;
    model
        .solve()
        .with_context(|| format!("solve failed at horizon {horizon}"))?;
    let end = model.final_state()?;
    let start = &model.config().initial_physical;
    let flow = model.initial_flow();
    let mut projected = 0.0;
    let mut residual: f64 = 0.0;
    for i in 0..TANGENT_DIM {
        let delta = end[i] - start[i];
        projected += flow[i] * delta;
        residual = residual.max(delta.abs());
    }
    Ok((projected, residual))
}

pub fn estimate_period(model: &mut FeedingModel, lower: f64, upper: f64) -> Result<PeriodEstimate> {
    estimate_period_with(model, lower, upper, PeriodSearchSettings::default())
}

/// Bisects the horizon in `[lower, upper]` until the trajectory returns to its
/// initial state. Leaves `model` solved at the returned period. Running out of
/// iterations is not an error: the best estimate is returned with a warning.
pub fn estimate_period_with(
    model: &mut FeedingModel,
    lower: f64,
    upper: f64,
    settings: PeriodSearchSettings,
) -> Result<PeriodEstimate> {
    if !(lower.is_finite() && upper.is_finite()) {
        bail!("Period bracket must be finite.");
    }
    if lower <= 0.0 || upper <= lower {
        bail!("Period bracket must satisfy 0 < lower < upper, got [{lower}, {upper}].");
    }
    if !(settings.tolerance > 0.0) {
        bail!("tolerance must be positive.");
    }

    let (g_lower, _) = return_offset(model, lower)?;
    let (g_upper, _) = return_offset(model, upper)?;
    if g_lower == 0.0 {
        let (_, residual) = return_offset(model, lower)?;
        return Ok(PeriodEstimate {
            period: lower,
            residual,
            iterations: 0,
            converged: true,
        });
    }
    if g_lower * g_upper > 0.0 {
        bail!(
            "Period is not bracketed by [{lower}, {upper}] (return offsets {g_lower:e} and {g_upper:e})."
        );
    }

    let (mut lo, mut hi) = (lower, upper);
    let mut g_lo = g_lower;
    let mut iterations = 0usize;
    while hi - lo > settings.tolerance && iterations < settings.max_iterations {
        let mid = 0.5 * (lo + hi);
        let (g_mid, _) = return_offset(model, mid)?;
        iterations += 1;
        debug!(iterations, mid, g_mid, "period bisection");
        if g_mid == 0.0 {
            lo = mid;
            hi = mid;
            break;
        }
        if g_mid.signum() == g_lo.signum() {
            lo = mid;
            g_lo = g_mid;
        } else {
            hi = mid;
        }
    }

    let converged = hi - lo <= settings.tolerance;
    let period = 0.5 * (lo + hi);
    let (_, residual) = return_offset(model, period)?;
    if !converged {
        warn!(
            period,
            bracket = hi - lo,
            iterations,
            "period search did not converge; returning best estimate"
        );
    }
    Ok(PeriodEstimate {
        period,
        residual,
        iterations,
        converged,
    })
}

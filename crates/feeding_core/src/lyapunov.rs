//! Running estimate of the leading Lyapunov exponent from the tangent half.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::params::{PHYSICAL_DIM, STATE_DIM};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LyapunovTrace {
    pub times: Vec<f64>,
    pub exponents: Vec<f64>,
    /// Accumulated log growth at the end of the solve.
    pub scale: f64,
}

impl LyapunovTrace {
    pub fn last(&self) -> Option<f64> {
        self.exponents.last().copied()
    }
}

/// Accumulates `ln ‖v‖` across renormalisations so the exponent is continuous
/// over segment boundaries.
#[derive(Debug, Clone)]
pub struct LyapunovAccumulator {
    scale: f64,
    trace: LyapunovTrace,
}

fn tangent_norm(state: &[f64]) -> f64 {
    state[PHYSICAL_DIM..STATE_DIM]
        .iter()
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt()
}

impl LyapunovAccumulator {
    pub fn new(initial_tangent: &[f64]) -> Result<Self> {
        let norm = initial_tangent.iter().map(|v| v * v).sum::<f64>().sqrt();
        if !(norm > 0.0 && norm.is_finite()) {
            return Err(ModelError::InvalidConfig(
                "Lyapunov tracking needs a non-zero initial variational state.".to_string(),
            ));
        }
        Ok(Self {
            scale: -norm.ln(),
            trace: LyapunovTrace::default(),
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Records `(scale + ½ ln Σ v²) / t` for every sample with `t > 0`.
    pub fn observe(&mut self, times: &[f64], states: &[[f64; STATE_DIM]]) -> Result<()> {
        for (&t, state) in times.iter().zip(states) {
            if t <= 0.0 {
                continue;
            }
            let squared: f64 = state[PHYSICAL_DIM..].iter().map(|v| v * v).sum();
            if !(squared > 0.0) {
                return Err(ModelError::Numerical(format!(
                    "variational state collapsed at t = {t}"
                )));
            }
            self.trace.times.push(t);
            self.trace.exponents.push((self.scale + 0.5 * squared.ln()) / t);
        }
        Ok(())
    }

    /// Folds `ln ‖v‖` into the scale and rescales the live tangent to unit length.
    pub fn renormalize(&mut self, state: &mut [f64; STATE_DIM]) -> Result<()> {
        let norm = tangent_norm(state);
        if !(norm > 0.0 && norm.is_finite()) {
            return Err(ModelError::Numerical(format!(
                "cannot renormalise variational state with norm {norm}"
            )));
        }
        self.scale += norm.ln();
        for v in &mut state[PHYSICAL_DIM..] {
            *v /= norm;
        }
        Ok(())
    }

    pub fn finish(mut self) -> LyapunovTrace {
        self.trace.scale = self.scale;
        self.trace
    }
}

use anyhow::{bail, Context, Result};
use nalgebra::{Matrix6, Vector6};
use num_complex::Complex;
use serde::Serialize;

use crate::model::FeedingModel;
use crate::params::{ModelConfig, PerturbationSpec, LOAD_INDEX, PHYSICAL_DIM, TANGENT_DIM};
use crate::trajectory::Trajectory;

/// Indices where the load has been flat for two samples and then starts moving
/// forward again.
pub fn plateau_ends(load: &[f64]) -> Vec<usize> {
    if load.len() < 4 {
        return Vec::new();
    }
    let diffs: Vec<f64> = load.windows(2).map(|w| w[1] - w[0]).collect();
    (2..diffs.len())
        .filter(|&e| diffs[e - 2] == 0.0 && diffs[e - 1] == 0.0 && diffs[e] > 0.0)
        .collect()
}

/// Net load displacement per unit time between the first two plateau ends.
/// Zero when the series has fewer than two plateau ends.
pub fn intake_rate_from_series(times: &[f64], load: &[f64]) -> Result<f64> {
    if times.len() != load.len() {
        bail!(
            "Time and load series differ in length ({} vs {}).",
            times.len(),
            load.len()
        );
    }
    let ends = plateau_ends(load);
    if ends.len() < 2 {
        return Ok(0.0);
    }
    let (first, second) = (ends[0], ends[1]);
    let elapsed = times[second] - times[first];
    if elapsed <= 0.0 {
        bail!("Plateau ends at {first} and {second} are not separated in time.");
    }
    Ok((load[second] - load[first]) / elapsed)
}

pub fn intake_rate(trajectory: &Trajectory) -> Result<f64> {
    intake_rate_from_series(&trajectory.times(), &trajectory.component(LOAD_INDEX))
}

#[derive(Debug, Clone, Serialize)]
pub struct FloquetResult {
    /// Monodromy matrix over the configured horizon, row-major.
    pub monodromy: Vec<f64>,
    /// Eigenvalues of the monodromy matrix, largest modulus first.
    pub multipliers: Vec<Complex<f64>>,
}

/// Monodromy matrix from six variational solves over `config.horizon`, which
/// should be one period of the cycle through `config.initial_physical`.
pub fn floquet_multipliers(config: &ModelConfig) -> Result<FloquetResult> {
    let mut columns = Vec::with_capacity(TANGENT_DIM);
    for i in 0..TANGENT_DIM {
        let mut direction = vec![0.0; TANGENT_DIM];
        direction[i] = 1.0;
        let column_config = config
            .clone()
            .with_initial_variational(&direction)
            .with_lyapunov(false)
            .with_perturbation(PerturbationSpec::default());
        let mut model = FeedingModel::new(column_config)?;
        model
            .solve()
            .with_context(|| format!("variational solve for column {i} failed"))?;
        let end = model.final_state()?;
        columns.push(Vector6::from_column_slice(&end[PHYSICAL_DIM..]));
    }

    let monodromy = Matrix6::from_columns(&columns);
    if monodromy.iter().any(|v| !v.is_finite()) {
        bail!("Monodromy matrix contains non-finite entries.");
    }
    let mut multipliers: Vec<Complex<f64>> =
        monodromy.complex_eigenvalues().iter().copied().collect();
    multipliers.sort_by(|a, b| {
        b.norm()
            .partial_cmp(&a.norm())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut row_major = Vec::with_capacity(TANGENT_DIM * TANGENT_DIM);
    for r in 0..TANGENT_DIM {
        for c in 0..TANGENT_DIM {
            row_major.push(monodromy[(r, c)]);
        }
    }

    Ok(FloquetResult {
        monodromy: row_major,
        multipliers,
    })
}

//! Jump and saltation matrices applied to the tangent vector at transitions.

use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Domain, Grasper};
use crate::error::{ModelError, Result};
use crate::field::tangent_rates;
use crate::params::{ModelParams, SwitchingSurface, PHYSICAL_DIM, TANGENT_DIM};

/// Below this `|nᵀ f⁻|` the approach is treated as grazing.
const GRAZING_DENOMINATOR: f64 = 1e-14;
/// Smallest acceptable ratio of extreme singular values of the switching basis.
const MIN_BASIS_CONDITION: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpKind {
    WallEntry { coordinate: usize },
    WallExit { coordinate: usize },
    GraspSwitch,
}

/// Linear map applied to the tangent vector, with its inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jump {
    pub kind: JumpKind,
    pub matrix: Matrix6<f64>,
    /// Algebraic inverse; the Moore-Penrose inverse when `matrix` is a projection.
    pub inverse: Matrix6<f64>,
}

impl Jump {
    /// `v ← M v` on the tangent half of a full state.
    pub fn apply(&self, state: &mut [f64]) {
        let v = Vector6::from_column_slice(&state[PHYSICAL_DIM..PHYSICAL_DIM + TANGENT_DIM]);
        let mapped = self.matrix * v;
        state[PHYSICAL_DIM..PHYSICAL_DIM + TANGENT_DIM].copy_from_slice(mapped.as_slice());
    }
}

fn unit(k: usize) -> Vector6<f64> {
    let mut e = Vector6::zeros();
    e[k] = 1.0;
    e
}

/// `I - e_k e_kᵀ`.
pub fn projection(coordinates: &[usize]) -> Matrix6<f64> {
    let mut p = Matrix6::identity();
    for &k in coordinates {
        p[(k, k)] = 0.0;
    }
    p
}

/// `S = I + (f⁺ - f⁻) nᵀ / (nᵀ f⁻)`, or `None` when the approach is grazing.
pub fn saltation_matrix(
    f_minus: &Vector6<f64>,
    f_plus: &Vector6<f64>,
    normal: &Vector6<f64>,
) -> Option<Matrix6<f64>> {
    let denominator = normal.dot(f_minus);
    if denominator.abs() < GRAZING_DENOMINATOR {
        return None;
    }
    Some(Matrix6::identity() + (f_plus - f_minus) * normal.transpose() / denominator)
}

/// Entry into a wall or edge that newly pins `coordinate`.
pub fn wall_entry(
    params: &ModelParams,
    from: Domain,
    to: Domain,
    grasper: Grasper,
    coordinate: usize,
    x: &[f64],
) -> Result<Jump> {
    let f_minus = tangent_rates(params, from, grasper, x);
    let f_plus = tangent_rates(params, to, grasper, x);
    let fallback = projection(&[coordinate]);
    let matrix = match saltation_matrix(&f_minus, &f_plus, &unit(coordinate)) {
        Some(s) => s,
        None => {
            warn!(
                ?from,
                ?to,
                rate = f_minus[coordinate],
                "grazing wall entry, using projection jump"
            );
            fallback
        }
    };
    let inverse = matrix
        .pseudo_inverse(1e-12)
        .map_err(|e| ModelError::Numerical(format!("wall entry pseudo-inverse failed: {e}")))?;
    Ok(Jump {
        kind: JumpKind::WallEntry { coordinate },
        matrix,
        inverse,
    })
}

/// Departure from a wall that releases `coordinate`.
pub fn wall_exit(coordinate: usize) -> Jump {
    let p = projection(&[coordinate]);
    Jump {
        kind: JumpKind::WallExit { coordinate },
        matrix: p,
        inverse: p,
    }
}

/// Columns fixed by the grasp switch besides the flow direction.
fn switching_basis(flow: &Vector6<f64>, surface: &SwitchingSurface) -> Matrix6<f64> {
    let tangent = Vector6::from_column_slice(&surface.tangent());
    Matrix6::from_columns(&[*flow, unit(0), unit(3), unit(4), unit(5), tangent])
}

fn condition_ratio(basis: &Matrix6<f64>) -> f64 {
    let singular = basis.singular_values();
    let max = singular.max();
    if max == 0.0 {
        0.0
    } else {
        singular.min() / max
    }
}

/// Jump across the threshold surface from the fields on either side.
///
/// Solves `A [f⁺ | T] = [f⁻ | T]` and applies `A⁻¹`, so that `f⁻ ↦ f⁺` while the
/// constraint directions `T` are left untouched.
pub fn grasp_switch_from_fields(
    f_minus: &Vector6<f64>,
    f_plus: &Vector6<f64>,
    surface: &SwitchingSurface,
) -> Result<Jump> {
    let before = switching_basis(f_minus, surface);
    let after = switching_basis(f_plus, surface);
    for (side, basis) in [("pre-switch", &before), ("post-switch", &after)] {
        let ratio = condition_ratio(basis);
        if !(ratio >= MIN_BASIS_CONDITION) {
            return Err(ModelError::Numerical(format!(
                "{side} switching basis is ill-conditioned (σ_min/σ_max = {ratio:e}); \
                 the flow is tangent to the threshold surface"
            )));
        }
    }

    // A B⁺ = B⁻  ⇔  (B⁺)ᵀ Aᵀ = (B⁻)ᵀ
    let a_transpose = after
        .transpose()
        .lu()
        .solve(&before.transpose())
        .ok_or_else(|| ModelError::Numerical("switching basis is singular".to_string()))?;
    let a = a_transpose.transpose();
    let matrix = a
        .try_inverse()
        .ok_or_else(|| ModelError::Numerical("grasp switch map is singular".to_string()))?;
    Ok(Jump {
        kind: JumpKind::GraspSwitch,
        matrix,
        inverse: a,
    })
}

/// Grasp switch at `x` while flowing in `domain`.
pub fn grasp_switch(
    params: &ModelParams,
    surface: &SwitchingSurface,
    domain: Domain,
    before: Grasper,
    x: &[f64],
) -> Result<Jump> {
    let f_minus = tangent_rates(params, domain, before, x);
    let f_plus = tangent_rates(params, domain, before.flipped(), x);
    grasp_switch_from_fields(&f_minus, &f_plus, surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DEFAULT_INITIAL_STATE;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vector(rng: &mut StdRng) -> Vector6<f64> {
        Vector6::from_fn(|_, _| rng.gen_range(-1.0..1.0))
    }

    fn loaded_state() -> [f64; PHYSICAL_DIM] {
        let mut x = DEFAULT_INITIAL_STATE;
        x[1] = 0.45;
        x[2] = 0.05;
        x[7] = 0.2;
        x
    }

    #[test]
    fn saltation_maps_incoming_to_outgoing_flow() {
        let mut rng = StdRng::seed_from_u64(7);
        let f_minus = random_vector(&mut rng);
        let f_plus = random_vector(&mut rng);
        let n = random_vector(&mut rng);
        let s = saltation_matrix(&f_minus, &f_plus, &n).expect("transversal");
        assert_relative_eq!(s * f_minus, f_plus, epsilon = 1e-9);
        let mut w = random_vector(&mut rng);
        w -= n * (n.dot(&w) / n.norm_squared());
        assert_relative_eq!(s * w, w, epsilon = 1e-9);
    }

    #[test]
    fn grazing_saltation_is_rejected() {
        let f = Vector6::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let n = Vector6::new(0.0, 1.0, 0.0, 0.0, 0.0, 0.0);
        assert!(saltation_matrix(&f, &f, &n).is_none());
    }

    #[test]
    fn grasp_switch_matches_closed_form_saltation() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let x = loaded_state();
        let jump = grasp_switch(&params, &surface, Domain::Interior, Grasper::Open, &x)
            .expect("transversal switch");
        let f_minus = tangent_rates(&params, Domain::Interior, Grasper::Open, &x);
        let f_plus = tangent_rates(&params, Domain::Interior, Grasper::Closed, &x);
        let n = Vector6::from_column_slice(&surface.normal());
        let expected = saltation_matrix(&f_minus, &f_plus, &n).expect("transversal");
        assert_relative_eq!(jump.matrix, expected, epsilon = 1e-9);
        assert_relative_eq!(jump.matrix * f_minus, f_plus, epsilon = 1e-9);
        assert_relative_eq!(jump.matrix * jump.inverse, Matrix6::identity(), epsilon = 1e-9);
    }

    #[test]
    fn grasp_switch_round_trip_is_identity() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let x = loaded_state();
        let close = grasp_switch(&params, &surface, Domain::Interior, Grasper::Open, &x)
            .expect("open to closed");
        let open = grasp_switch(&params, &surface, Domain::Interior, Grasper::Closed, &x)
            .expect("closed to open");
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let v = random_vector(&mut rng);
            assert_relative_eq!(open.matrix * (close.matrix * v), v, epsilon = 1e-9);
        }
    }

    #[test]
    fn tangential_switch_is_reported_as_ill_conditioned() {
        let surface = SwitchingSurface::default();
        let tangent = Vector6::from_column_slice(&surface.tangent());
        let f_minus = tangent + Vector6::new(0.3, 0.0, 0.0, 0.1, 0.0, 0.0);
        let f_plus = f_minus + Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.5);
        let err = grasp_switch_from_fields(&f_minus, &f_plus, &surface)
            .expect_err("tangential approach must fail");
        assert!(matches!(err, ModelError::Numerical(_)));
        assert!(format!("{err}").contains("ill-conditioned"));
    }

    #[test]
    fn wall_entry_then_exit_preserves_wall_tangent_vectors() {
        let params = ModelParams::default();
        let mut x = DEFAULT_INITIAL_STATE;
        x[0] = 0.0;
        x[5] = 0.9;
        let entry = wall_entry(&params, Domain::Interior, Domain::WallX, Grasper::Closed, 0, &x)
            .expect("transversal entry");
        let exit = wall_exit(0);
        let f_minus = tangent_rates(&params, Domain::Interior, Grasper::Closed, &x);
        assert!(f_minus[0] < 0.0);
        assert_relative_eq!(
            entry.matrix * f_minus,
            tangent_rates(&params, Domain::WallX, Grasper::Closed, &x),
            epsilon = 1e-12
        );

        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let mut v = random_vector(&mut rng);
            v[0] = 0.0;
            assert_relative_eq!(exit.matrix * (entry.matrix * v), v, epsilon = 1e-12);
        }
        let any = random_vector(&mut rng);
        assert_eq!((entry.matrix * any)[0], 0.0);
    }

    #[test]
    fn wall_entry_inverse_is_pseudo_inverse() {
        let params = ModelParams::default();
        let mut x = DEFAULT_INITIAL_STATE;
        x[2] = 0.0;
        x[5] = 0.2;
        let entry = wall_entry(&params, Domain::Interior, Domain::WallZ, Grasper::Open, 2, &x)
            .expect("transversal entry");
        let m = entry.matrix;
        assert_relative_eq!(m * entry.inverse * m, m, epsilon = 1e-9);
        assert_eq!(entry.kind, JumpKind::WallEntry { coordinate: 2 });
    }

    #[test]
    fn apply_touches_only_tangent_half() {
        let jump = wall_exit(1);
        let mut state = [1.0; PHYSICAL_DIM + TANGENT_DIM];
        jump.apply(&mut state);
        assert!(state[..PHYSICAL_DIM].iter().all(|&v| v == 1.0));
        assert_eq!(state[PHYSICAL_DIM + 1], 0.0);
        assert_eq!(state[PHYSICAL_DIM + 2], 1.0);
    }
}

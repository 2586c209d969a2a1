//! Model constants, switching geometry, perturbation and solver configuration.

use serde::{Deserialize, Serialize};

use crate::domain::{Domain, Grasper};
use crate::error::{ModelError, Result};

pub const PHYSICAL_DIM: usize = 8;
pub const TANGENT_DIM: usize = 6;
pub const STATE_DIM: usize = PHYSICAL_DIM + TANGENT_DIM;

/// Index of the load displacement `S` in the physical half.
pub const LOAD_INDEX: usize = 6;
/// Index of the constant load force `F` in the physical half.
pub const FORCE_INDEX: usize = 7;

/// One period of the default limit cycle.
pub const DEFAULT_HORIZON: f64 = 4.883985706;

/// A point on the default limit cycle, half a time unit after the grasper closes.
pub const DEFAULT_INITIAL_STATE: [f64; PHYSICAL_DIM] = [
    0.0023514899431919946,
    0.9894432788052568,
    4.7143503079548186e-05,
    0.7411457027902676,
    0.22735047579216017,
    0.601128573056045,
    0.0,
    0.0,
];

/// Immutable constants of the vector field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Time constant of the activity units.
    pub tau_a: f64,
    /// Time constant of the muscle activations.
    pub tau_m: f64,
    /// Strength of the cyclic inhibition.
    pub gamma: f64,
    /// Constant drive keeping the units off the heteroclinic cycle.
    pub mu: f64,
    /// Proprioceptive feedback gains `ε_i`.
    pub feedback_gains: [f64; 3],
    /// Positions `s_i` at which the feedback to unit `i` changes sign.
    pub setpoints: [f64; 3],
    /// Feedback polarities `σ_i`.
    pub feedback_signs: [f64; 3],
    pub u_max: f64,
    /// Damping of the mechanical coordinate.
    pub damping: f64,
    pub protractor_center: f64,
    pub protractor_width: f64,
    pub retractor_center: f64,
    pub retractor_width: f64,
    /// Amplitude of the muscle length-tension curve.
    pub kappa: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            tau_a: 0.11,
            tau_m: 1.24,
            gamma: 2.4,
            mu: 1e-6,
            feedback_gains: [1e-4, 1e-4, 1e-4],
            setpoints: [0.5, 0.5, 0.5],
            feedback_signs: [-1.0, -1.0, 1.0],
            u_max: 1.0,
            damping: 0.4,
            protractor_center: 1.0,
            protractor_width: 2.0,
            retractor_center: 0.0,
            retractor_width: 1.1,
            kappa: 1.5 * 3f64.sqrt(),
        }
    }
}

impl ModelParams {
    fn validate(&self) -> Result<()> {
        let scalars = [
            ("tau_a", self.tau_a),
            ("tau_m", self.tau_m),
            ("gamma", self.gamma),
            ("mu", self.mu),
            ("u_max", self.u_max),
            ("damping", self.damping),
            ("protractor_center", self.protractor_center),
            ("protractor_width", self.protractor_width),
            ("retractor_center", self.retractor_center),
            ("retractor_width", self.retractor_width),
            ("kappa", self.kappa),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(ModelError::InvalidConfig(format!("{name} must be finite.")));
            }
        }
        for (name, value) in [
            ("tau_a", self.tau_a),
            ("tau_m", self.tau_m),
            ("damping", self.damping),
            ("protractor_width", self.protractor_width),
            ("retractor_width", self.retractor_width),
        ] {
            if value <= 0.0 {
                return Err(ModelError::InvalidConfig(format!("{name} must be positive.")));
            }
        }
        let arrays = [
            ("feedback_gains", self.feedback_gains),
            ("setpoints", self.setpoints),
            ("feedback_signs", self.feedback_signs),
        ];
        for (name, values) in arrays {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ModelError::InvalidConfig(format!(
                    "{name} entries must be finite."
                )));
            }
        }
        Ok(())
    }
}

/// Threshold surface `w_y·y + w_z·z = threshold` at which the grasper switches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchingSurface {
    pub weights: [f64; 2],
    pub threshold: f64,
}

impl Default for SwitchingSurface {
    fn default() -> Self {
        Self {
            weights: [1.0, 1.0],
            threshold: 0.5,
        }
    }
}

impl SwitchingSurface {
    /// Surface with normal direction `θ` in the `(y, z)` plane; `θ = π/4` is the default.
    pub fn from_angle(theta: f64, threshold: f64) -> Self {
        let scale = std::f64::consts::SQRT_2;
        Self {
            weights: [scale * theta.cos(), scale * theta.sin()],
            threshold,
        }
    }

    pub fn value(&self, state: &[f64]) -> f64 {
        self.weights[0] * state[1] + self.weights[1] * state[2] - self.threshold
    }

    /// Gradient of [`value`](Self::value) over the six tangent coordinates.
    pub fn normal(&self) -> [f64; TANGENT_DIM] {
        [0.0, self.weights[0], self.weights[1], 0.0, 0.0, 0.0]
    }

    /// Direction in the `(y, z)` plane along which the surface is flat.
    pub fn tangent(&self) -> [f64; TANGENT_DIM] {
        [0.0, self.weights[1], -self.weights[0], 0.0, 0.0, 0.0]
    }

    pub fn grasper_at(&self, state: &[f64]) -> Grasper {
        if self.value(state) >= 0.0 {
            Grasper::Closed
        } else {
            Grasper::Open
        }
    }

    fn validate(&self) -> Result<()> {
        if self.weights.iter().any(|w| !w.is_finite()) || !self.threshold.is_finite() {
            return Err(ModelError::InvalidConfig(
                "Switching surface must have finite weights and threshold.".to_string(),
            ));
        }
        if self.weights[0] == 0.0 && self.weights[1] == 0.0 {
            return Err(ModelError::InvalidConfig(
                "Switching surface weights cannot both be zero.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Multiple of the physical rate added to the tangent equation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeScaling {
    #[default]
    None,
    Uniform {
        rate: f64,
    },
    PhaseDependent {
        open: f64,
        closed: f64,
    },
}

impl TimeScaling {
    pub fn factor(&self, grasper: Grasper) -> f64 {
        match *self {
            TimeScaling::None => 0.0,
            TimeScaling::Uniform { rate } => rate,
            TimeScaling::PhaseDependent { open, closed } => match grasper {
                Grasper::Open => open,
                Grasper::Closed => closed,
            },
        }
    }
}

/// Sustained perturbation driving the tangent equation inhomogeneously.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbationSpec {
    pub time_scaling: TimeScaling,
    /// Constant forcing injected while the grasper is closed.
    pub closed_forcing: Option<[f64; TANGENT_DIM]>,
}

impl PerturbationSpec {
    /// Sensitivity to a sustained change of the load force: the load enters only
    /// the mechanical equation, and only while closed.
    pub fn load_force(params: &ModelParams, nu_open: f64, nu_closed: f64) -> Self {
        let mut forcing = [0.0; TANGENT_DIM];
        forcing[5] = 1.0 / params.damping;
        Self {
            time_scaling: TimeScaling::PhaseDependent {
                open: nu_open,
                closed: nu_closed,
            },
            closed_forcing: Some(forcing),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.time_scaling, TimeScaling::None) || self.closed_forcing.is_some()
    }

    fn validate(&self) -> Result<()> {
        let finite = match self.time_scaling {
            TimeScaling::None => true,
            TimeScaling::Uniform { rate } => rate.is_finite(),
            TimeScaling::PhaseDependent { open, closed } => open.is_finite() && closed.is_finite(),
        };
        let forcing_finite = self
            .closed_forcing
            .map_or(true, |f| f.iter().all(|v| v.is_finite()));
        if !finite || !forcing_finite {
            return Err(ModelError::InvalidConfig(
                "Perturbation coefficients must be finite.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings of the adaptive integrator and the driver loop guards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub initial_step: f64,
    pub max_step: f64,
    pub min_step: f64,
    pub max_steps: usize,
    /// Width of the final bracket when locating an event time.
    pub root_tolerance: f64,
    /// Segments shorter than this count as making no progress.
    pub zero_length: f64,
    pub max_zero_length_segments: usize,
    /// Largest RK4 step used by the backward adjoint sweep.
    pub adjoint_step: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            rel_tol: 1e-10,
            abs_tol: 1e-12,
            initial_step: 1e-3,
            max_step: 0.05,
            min_step: 1e-14,
            max_steps: 1_000_000,
            root_tolerance: 1e-13,
            zero_length: 1e-12,
            max_zero_length_segments: 8,
            adjoint_step: 2.5e-3,
        }
    }
}

impl SolverSettings {
    fn validate(&self) -> Result<()> {
        let positive = [
            ("rel_tol", self.rel_tol),
            ("abs_tol", self.abs_tol),
            ("initial_step", self.initial_step),
            ("max_step", self.max_step),
            ("min_step", self.min_step),
            ("root_tolerance", self.root_tolerance),
            ("adjoint_step", self.adjoint_step),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ModelError::InvalidConfig(format!(
                    "{name} must be positive and finite."
                )));
            }
        }
        if !(self.zero_length.is_finite() && self.zero_length >= 0.0) {
            return Err(ModelError::InvalidConfig(
                "zero_length must be non-negative and finite.".to_string(),
            ));
        }
        if self.min_step > self.max_step {
            return Err(ModelError::InvalidConfig(
                "min_step cannot exceed max_step.".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(ModelError::InvalidConfig(
                "max_steps must be greater than zero.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to construct a [`FeedingModel`](crate::model::FeedingModel).
/// Every field has a default, so a partial JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub params: ModelParams,
    pub surface: SwitchingSurface,
    pub initial_physical: Vec<f64>,
    pub initial_variational: Vec<f64>,
    pub horizon: f64,
    pub perturbation: PerturbationSpec,
    pub track_lyapunov: bool,
    pub solver: SolverSettings,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut initial_variational = vec![0.0; TANGENT_DIM];
        initial_variational[0] = 1.0;
        Self {
            params: ModelParams::default(),
            surface: SwitchingSurface::default(),
            initial_physical: DEFAULT_INITIAL_STATE.to_vec(),
            initial_variational,
            horizon: DEFAULT_HORIZON,
            perturbation: PerturbationSpec::default(),
            track_lyapunov: false,
            solver: SolverSettings::default(),
        }
    }
}

impl ModelConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_feedback_gains(mut self, eps1: f64, eps2: f64, eps3: f64) -> Self {
        self.params.feedback_gains = [eps1, eps2, eps3];
        self
    }

    pub fn with_initial_physical(mut self, state: &[f64]) -> Self {
        self.initial_physical = state.to_vec();
        self
    }

    pub fn with_initial_variational(mut self, tangent: &[f64]) -> Self {
        self.initial_variational = tangent.to_vec();
        self
    }

    pub fn with_horizon(mut self, horizon: f64) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_perturbation(mut self, perturbation: PerturbationSpec) -> Self {
        self.perturbation = perturbation;
        self
    }

    pub fn with_surface(mut self, surface: SwitchingSurface) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_lyapunov(mut self, enabled: bool) -> Self {
        self.track_lyapunov = enabled;
        self
    }

    pub fn with_load_force(mut self, force: f64) -> Self {
        if self.initial_physical.len() == PHYSICAL_DIM {
            self.initial_physical[FORCE_INDEX] = force;
        }
        self
    }

    /// Checks the configuration and derives the initial domain and grasper state.
    pub fn validate(&self) -> Result<(Domain, Grasper)> {
        self.params.validate()?;
        self.surface.validate()?;
        self.perturbation.validate()?;
        self.solver.validate()?;

        check_vector("initial_physical", &self.initial_physical, PHYSICAL_DIM)?;
        check_vector(
            "initial_variational",
            &self.initial_variational,
            TANGENT_DIM,
        )?;
        if !(self.horizon.is_finite() && self.horizon > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "horizon must be positive and finite, got {}.",
                self.horizon
            )));
        }

        let domain = Domain::classify(&self.initial_physical)?;
        let grasper = self.surface.grasper_at(&self.initial_physical);
        Ok((domain, grasper))
    }
}

fn check_vector(name: &str, values: &[f64], expected: usize) -> Result<()> {
    if values.is_empty() {
        return Err(ModelError::InvalidConfig(format!("{name} cannot be empty.")));
    }
    if values.len() != expected {
        return Err(ModelError::InvalidConfig(format!(
            "{name} must have {expected} entries, got {}.",
            values.len()
        )));
    }
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(ModelError::InvalidConfig(format!(
            "{name}[{idx}] is not a finite number."
        )));
    }
    Ok(())
}

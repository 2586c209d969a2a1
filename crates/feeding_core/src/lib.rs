/// The `feeding_core` crate integrates a hybrid (piecewise-smooth) model of a
/// feeding apparatus: three neural activities, two muscle activations and a
/// grasper position, with a food load driven only while the grasper is closed.
///
/// Key components:
/// - **Domains**: `Domain`, `Grasper` and the event tables that say which boundary is watched where.
/// - **Field**: constrained vector field, Jacobian and the variational extension.
/// - **Solve**: adaptive Dormand-Prince segments with root location, joined by jump matrices.
/// - **Analysis**: Lyapunov exponent, adjoint phase response, period search, Floquet multipliers and intake rate.
pub mod adjoint;
pub mod analysis;
pub mod domain;
pub mod error;
pub mod events;
pub mod field;
pub mod jump;
pub mod lyapunov;
pub mod model;
pub mod params;
pub mod period;
pub mod segment;
pub mod solvers;
pub mod trajectory;
pub mod traits;
pub mod transition;

pub use adjoint::{terminal_condition, PhaseResponse};
pub use analysis::{floquet_multipliers, intake_rate, FloquetResult};
pub use domain::{Domain, Grasper};
pub use error::{ModelError, Result};
pub use model::FeedingModel;
pub use params::{
    ModelConfig, ModelParams, PerturbationSpec, SolverSettings, SwitchingSurface, TimeScaling,
};
pub use period::{estimate_period, PeriodEstimate};
pub use trajectory::{Segment, Trajectory};

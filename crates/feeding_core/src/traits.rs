/// A continuous-time system `dx/dt = f(t, x)` evaluated into a caller-owned buffer.
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);
}

/// A fixed-step solver that can advance a system in place.
pub trait Steppable {
    /// Performs one step of size dt. Negative `dt` integrates backward.
    fn step(&mut self, system: &impl DynamicalSystem, t: &mut f64, state: &mut [f64], dt: f64);
}

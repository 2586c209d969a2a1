use crate::traits::{DynamicalSystem, Steppable};

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RK4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for RK4 {
    fn step(&mut self, system: &impl DynamicalSystem, t: &mut f64, state: &mut [f64], dt: f64) {
        let t0 = *t;
        let half = 0.5 * dt;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k1[i];
        }
        system.apply(t0 + half, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + half * self.k2[i];
        }
        system.apply(t0 + half, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] += dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

// Dormand-Prince 5(4) tableau.
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th order weights (also the last stage row)
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between the 5th and embedded 4th order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

/// Embedded Dormand-Prince 5(4) pair.
///
/// [`attempt`](Self::attempt) computes a trial step without committing it, so the
/// caller can reject it or re-step from the same start with a shorter `dt` while
/// bracketing an event.
pub struct DormandPrince {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
}

impl DormandPrince {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }

    /// Writes the 5th order solution at `t + dt` into `out` and returns the RMS
    /// norm of the embedded error estimate, scaled by `abs_tol + rel_tol * |y|`.
    /// A norm `<= 1` means the step meets the tolerances.
    #[allow(clippy::too_many_arguments)]
    pub fn attempt(
        &mut self,
        system: &impl DynamicalSystem,
        t: f64,
        state: &[f64],
        dt: f64,
        out: &mut [f64],
        rel_tol: f64,
        abs_tol: f64,
    ) -> f64 {
        let n = state.len();

        system.apply(t, state, &mut self.k1);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * A21 * self.k1[i];
        }
        system.apply(t + C2 * dt, &self.tmp, &mut self.k2);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        system.apply(t + C3 * dt, &self.tmp, &mut self.k3);

        for i in 0..n {
            self.tmp[i] =
                state[i] + dt * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        system.apply(t + C4 * dt, &self.tmp, &mut self.k4);

        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        system.apply(t + C5 * dt, &self.tmp, &mut self.k5);

        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        system.apply(t + dt, &self.tmp, &mut self.k6);

        for i in 0..n {
            out[i] = state[i]
                + dt * (B1 * self.k1[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }
        system.apply(t + dt, out, &mut self.k7);

        let mut sum = 0.0;
        for i in 0..n {
            let err = dt
                * (E1 * self.k1[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
            let scale = abs_tol + rel_tol * state[i].abs().max(out[i].abs());
            let ratio = err / scale;
            sum += ratio * ratio;
        }
        if n == 0 {
            0.0
        } else {
            (sum / n as f64).sqrt()
        }
    }

    /// Step size to try after a step of size `dt` produced `error_norm`.
    pub fn next_step(dt: f64, error_norm: f64) -> f64 {
        let factor = if error_norm <= 0.0 {
            5.0
        } else {
            (0.9 * error_norm.powf(-0.2)).clamp(0.2, 5.0)
        };
        dt * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay;

    impl DynamicalSystem for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[0];
        }
    }

    struct Oscillator;

    impl DynamicalSystem for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    #[test]
    fn rk4_matches_exponential_decay() {
        let mut solver = RK4::new(1);
        let mut state = vec![1.0];
        let mut t = 0.0;
        for _ in 0..100 {
            solver.step(&Decay, &mut t, &mut state, 0.01);
        }
        assert!((t - 1.0).abs() < 1e-12);
        assert!((state[0] - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn rk4_backward_steps_undo_forward_steps() {
        let mut solver = RK4::new(2);
        let mut state = vec![1.0, 0.0];
        let mut t = 0.0;
        for _ in 0..50 {
            solver.step(&Oscillator, &mut t, &mut state, 0.02);
        }
        for _ in 0..50 {
            solver.step(&Oscillator, &mut t, &mut state, -0.02);
        }
        assert!(t.abs() < 1e-12);
        assert!((state[0] - 1.0).abs() < 1e-9);
        assert!(state[1].abs() < 1e-9);
    }

    #[test]
    fn dormand_prince_step_is_fifth_order_accurate() {
        let mut solver = DormandPrince::new(2);
        let state = [1.0, 0.0];
        let mut out = [0.0; 2];
        let dt = 0.1;
        solver.attempt(&Oscillator, 0.0, &state, dt, &mut out, 1e-6, 1e-9);
        assert!((out[0] - dt.cos()).abs() < 1e-8);
        assert!((out[1] + dt.sin()).abs() < 1e-8);
    }

    #[test]
    fn dormand_prince_error_estimate_shrinks_with_step() {
        let mut solver = DormandPrince::new(2);
        let state = [1.0, 0.0];
        let mut out = [0.0; 2];
        let coarse = solver.attempt(&Oscillator, 0.0, &state, 0.1, &mut out, 1e-10, 1e-12);
        let fine = solver.attempt(&Oscillator, 0.0, &state, 0.05, &mut out, 1e-10, 1e-12);
        assert!(coarse > 0.0);
        assert!(coarse / fine > 12.0, "ratio {}", coarse / fine);
    }

    #[test]
    fn next_step_is_bounded() {
        assert_eq!(DormandPrince::next_step(0.1, 0.0), 0.5);
        assert!((DormandPrince::next_step(0.1, 1e12) - 0.02).abs() < 1e-15);
        let grown = DormandPrince::next_step(0.1, 0.5);
        assert!(grown > 0.1 && grown < 0.5);
        let shrunk = DormandPrince::next_step(0.1, 2.0);
        assert!(shrunk < 0.1 && shrunk > 0.02);
    }
}

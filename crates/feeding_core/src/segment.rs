//! Adaptive integration of one smooth segment up to its first terminal event.

use tracing::trace;

use crate::error::{ModelError, Result};
use crate::events::EventSet;
use crate::field::HybridField;
use crate::params::{SolverSettings, STATE_DIM};
use crate::solvers::DormandPrince;

const MAX_BISECTIONS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    Horizon,
    /// Root `index` of the active domain fired at the last sample.
    Event { index: usize },
}

#[derive(Debug, Clone)]
pub struct SegmentOutcome {
    pub times: Vec<f64>,
    pub states: Vec<[f64; STATE_DIM]>,
    pub end: SegmentEnd,
    /// Step size to start the next segment with.
    pub next_step: f64,
}

impl SegmentOutcome {
    pub fn final_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    pub fn final_state(&self) -> [f64; STATE_DIM] {
        self.states.last().copied().unwrap_or([0.0; STATE_DIM])
    }
}

/// Integrates `field` from `(t0, start)` until the horizon or the first crossing
/// of `events`. Every accepted step is recorded as a sample; on an event the
/// last sample is the located state on the post-crossing side. An event that is
/// already past at `start` ends the segment with the single sample `start`.
#[allow(clippy::too_many_arguments)]
pub fn integrate_segment(
    field: &HybridField<'_>,
    events: &EventSet<'_>,
    settings: &SolverSettings,
    t0: f64,
    start: [f64; STATE_DIM],
    horizon: f64,
    step_hint: f64,
) -> Result<SegmentOutcome> {
    let mut stepper = DormandPrince::new(STATE_DIM);
    let mut times = vec![t0];
    let mut states = vec![start];

    let mut t = t0;
    let mut y = start;
    let mut y_new = [0.0; STATE_DIM];
    let mut g_prev = Vec::with_capacity(events.len());
    let mut g_new = Vec::with_capacity(events.len());
    events.evaluate(&y, &mut g_prev);
    if let Some(index) = events.pending(&g_prev) {
        return Ok(SegmentOutcome {
            times,
            states,
            end: SegmentEnd::Event { index },
            next_step: step_hint,
        });
    }

    let mut h = step_hint.clamp(settings.min_step, settings.max_step);
    let mut steps = 0usize;

    while t < horizon {
        if steps >= settings.max_steps {
            return Err(ModelError::StepLimitExceeded {
                time: t,
                limit: settings.max_steps,
            });
        }
        steps += 1;

        let last = t + h >= horizon;
        let dt = if last { horizon - t } else { h };
        let norm = stepper.attempt(
            field,
            t,
            &y,
            dt,
            &mut y_new,
            settings.rel_tol,
            settings.abs_tol,
        );

        if !norm.is_finite() || norm > 1.0 {
            h = if norm.is_finite() {
                DormandPrince::next_step(dt, norm)
            } else {
                0.2 * dt
            };
            trace!(t, dt, norm, "rejected step");
            if h < settings.min_step {
                return Err(ModelError::StepSizeUnderflow { time: t, step: h });
            }
            continue;
        }

        events.evaluate(&y_new, &mut g_new);
        let fired = events.crossings(&g_prev, &g_new);
        if !fired.is_empty() {
            let (index, tau) =
                locate_first_root(&mut stepper, field, events, settings, t, &y, dt, &g_prev, &fired);
            stepper.attempt(
                field,
                t,
                &y,
                tau,
                &mut y_new,
                settings.rel_tol,
                settings.abs_tol,
            );
            times.push(t + tau);
            states.push(y_new);
            return Ok(SegmentOutcome {
                times,
                states,
                end: SegmentEnd::Event { index },
                next_step: dt,
            });
        }

        t = if last { horizon } else { t + dt };
        y = y_new;
        times.push(t);
        states.push(y);
        std::mem::swap(&mut g_prev, &mut g_new);
        h = DormandPrince::next_step(dt, norm).min(settings.max_step);
        if last {
            // The final step was truncated; keep the free-running size.
            h = h.max(settings.min_step);
        }
    }

    Ok(SegmentOutcome {
        times,
        states,
        end: SegmentEnd::Horizon,
        next_step: h,
    })
}

/// Bisects each fired event inside `(0, dt]` by re-stepping from the step start
/// and returns the earliest `(index, tau)`. Ties within the root tolerance go to
/// the highest index.
#[allow(clippy::too_many_arguments)]
fn locate_first_root(
    stepper: &mut DormandPrince,
    field: &HybridField<'_>,
    events: &EventSet<'_>,
    settings: &SolverSettings,
    t: f64,
    y: &[f64; STATE_DIM],
    dt: f64,
    g_start: &[f64],
    fired: &[usize],
) -> (usize, f64) {
    let mut probe = [0.0; STATE_DIM];
    let mut best: Option<(usize, f64)> = None;

    for &index in fired {
        let direction = events.direction(index);
        let mut lo = 0.0;
        let mut hi = dt;
        let mut g_lo = g_start[index];
        let mut iterations = 0usize;

        while hi - lo > settings.root_tolerance && iterations < MAX_BISECTIONS {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            stepper.attempt(
                field,
                t,
                y,
                mid,
                &mut probe,
                settings.rel_tol,
                settings.abs_tol,
            );
            let g_mid = events.value(index, &probe);
            if direction.crossed(g_lo, g_mid) {
                hi = mid;
            } else {
                lo = mid;
                g_lo = g_mid;
            }
            iterations += 1;
        }

        best = match best {
            None => Some((index, hi)),
            Some((_, tau)) if hi < tau - settings.root_tolerance => Some((index, hi)),
            Some((_, tau)) if (hi - tau).abs() <= settings.root_tolerance => Some((index, hi)),
            keep => keep,
        };
    }

    best.unwrap_or((fired[fired.len() - 1], dt))
}

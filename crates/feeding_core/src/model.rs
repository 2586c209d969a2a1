//! The hybrid driver: integrates domain by domain and applies transitions.

use nalgebra::Vector6;
use tracing::info;

use crate::adjoint::{self, PhaseResponse};
use crate::domain::{Domain, Grasper};
use crate::error::{ModelError, Result};
use crate::events::EventSet;
use crate::field::{tangent_rates, HybridField};
use crate::jump::projection;
use crate::lyapunov::{LyapunovAccumulator, LyapunovTrace};
use crate::params::{ModelConfig, PHYSICAL_DIM, STATE_DIM, TANGENT_DIM};
use crate::segment::{integrate_segment, SegmentEnd};
use crate::trajectory::{Segment, Trajectory};
use crate::transition::{SwitchLog, TransitionEngine, TransitionRecord};

#[derive(Debug, Clone)]
struct Solution {
    trajectory: Trajectory,
    transitions: Vec<TransitionRecord>,
    switches: SwitchLog,
    lyapunov: Option<LyapunovTrace>,
}

/// One configured instance of the feeding apparatus.
#[derive(Debug, Clone)]
pub struct FeedingModel {
    config: ModelConfig,
    initial_domain: Domain,
    initial_grasper: Grasper,
    /// Configured variational state restricted to the free coordinates of
    /// `initial_domain`.
    initial_tangent: [f64; TANGENT_DIM],
    solution: Option<Solution>,
}

impl FeedingModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let (initial_domain, initial_grasper) = config.validate()?;
        let projected = projection(initial_domain.pinned())
            * Vector6::from_column_slice(&config.initial_variational);
        if config.track_lyapunov && projected.norm() == 0.0 {
            return Err(ModelError::InvalidConfig(format!(
                "initial variational state has no component off the walls of {initial_domain:?}."
            )));
        }
        let mut initial_tangent = [0.0; TANGENT_DIM];
        initial_tangent.copy_from_slice(projected.as_slice());
        Ok(Self {
            config,
            initial_domain,
            initial_grasper,
            initial_tangent,
            solution: None,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn initial_domain(&self) -> Domain {
        self.initial_domain
    }

    pub fn initial_grasper(&self) -> Grasper {
        self.initial_grasper
    }

    pub fn initial_tangent(&self) -> &[f64; TANGENT_DIM] {
        &self.initial_tangent
    }

    pub fn horizon(&self) -> f64 {
        self.config.horizon
    }

    /// Changes the horizon and discards any previous solution.
    pub fn set_horizon(&mut self, horizon: f64) -> Result<()> {
        if !(horizon.is_finite() && horizon > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "horizon must be positive and finite, got {horizon}."
            )));
        }
        self.config.horizon = horizon;
        self.solution = None;
        Ok(())
    }

    /// Flow direction of the first six coordinates at the initial state.
    pub fn initial_flow(&self) -> Vector6<f64> {
        tangent_rates(
            &self.config.params,
            self.initial_domain,
            self.initial_grasper,
            &self.config.initial_physical,
        )
    }

    pub fn is_solved(&self) -> bool {
        self.solution.is_some()
    }

    fn initial_state(&self) -> [f64; STATE_DIM] {
        let mut state = [0.0; STATE_DIM];
        state[..PHYSICAL_DIM].copy_from_slice(&self.config.initial_physical);
        state[PHYSICAL_DIM..].copy_from_slice(&self.initial_tangent);
        state
    }

    /// Integrates from the initial condition to the horizon, replacing every log.
    pub fn solve(&mut self) -> Result<()> {
        self.solution = None;

        let config = &self.config;
        let settings = &config.solver;
        let engine = TransitionEngine::new(&config.params, &config.surface);

        let mut trajectory = Trajectory::default();
        let mut transitions = Vec::new();
        let mut switches = SwitchLog::default();
        let mut lyapunov = if config.track_lyapunov {
            Some(LyapunovAccumulator::new(&self.initial_tangent)?)
        } else {
            None
        };

        let mut domain = self.initial_domain;
        let mut grasper = self.initial_grasper;
        let mut state = self.initial_state();
        let mut t = 0.0;
        let mut step_hint = settings.initial_step;
        let mut zero_length_run = 0usize;

        loop {
            let field = HybridField {
                params: &config.params,
                perturbation: &config.perturbation,
                domain,
                grasper,
            };
            let events = EventSet::new(&config.params, &config.surface, domain, grasper);
            let outcome =
                integrate_segment(&field, &events, settings, t, state, config.horizon, step_hint)?;
            step_hint = outcome.next_step;

            let end_time = outcome.final_time();
            let mut end_state = outcome.final_state();
            if end_time - t <= settings.zero_length {
                zero_length_run += 1;
                if zero_length_run > settings.max_zero_length_segments {
                    return Err(ModelError::NoProgress {
                        time: t,
                        domain,
                        count: zero_length_run,
                    });
                }
            } else {
                zero_length_run = 0;
            }

            if let Some(acc) = lyapunov.as_mut() {
                acc.observe(&outcome.times, &outcome.states)?;
            }
            trajectory.push(Segment {
                domain,
                grasper,
                times: outcome.times,
                states: outcome.states,
            });

            let index = match outcome.end {
                SegmentEnd::Horizon => break,
                SegmentEnd::Event { index } => index,
            };

            if let Some(acc) = lyapunov.as_mut() {
                acc.renormalize(&mut end_state)?;
            }
            let record = engine.apply(domain, grasper, index, end_time, t, &mut end_state)?;
            switches.record(&record);
            domain = record.entered;
            grasper = record.grasper_after;
            transitions.push(record);

            t = end_time;
            state = end_state;
        }

        let lyapunov = lyapunov.map(LyapunovAccumulator::finish);
        info!(
            horizon = config.horizon,
            segments = trajectory.segments.len(),
            transitions = transitions.len(),
            exponent = lyapunov.as_ref().and_then(LyapunovTrace::last),
            "solve complete"
        );

        self.solution = Some(Solution {
            trajectory,
            transitions,
            switches,
            lyapunov,
        });
        Ok(())
    }

    fn solution(&self, query: &'static str) -> Result<&Solution> {
        self.solution.as_ref().ok_or(ModelError::NotSolved(query))
    }

    pub fn trajectory(&self) -> Result<&Trajectory> {
        Ok(&self.solution("trajectory")?.trajectory)
    }

    pub fn transitions(&self) -> Result<&[TransitionRecord]> {
        Ok(&self.solution("transitions")?.transitions)
    }

    pub fn switch_log(&self) -> Result<&SwitchLog> {
        Ok(&self.solution("switch_log")?.switches)
    }

    /// `None` when Lyapunov tracking is disabled.
    pub fn lyapunov(&self) -> Result<Option<&LyapunovTrace>> {
        Ok(self.solution("lyapunov")?.lyapunov.as_ref())
    }

    pub fn final_state(&self) -> Result<[f64; STATE_DIM]> {
        self.solution("final_state")?
            .trajectory
            .final_state()
            .ok_or_else(|| ModelError::Numerical("solve produced no samples".to_string()))
    }

    /// Backward adjoint sweep over the last solve, from `terminal` at the horizon.
    pub fn phase_response(&self, terminal: &[f64]) -> Result<PhaseResponse> {
        let solution = self.solution("phase_response")?;
        adjoint::phase_response(
            &self.config,
            &solution.trajectory,
            &solution.transitions,
            terminal,
        )
    }
}

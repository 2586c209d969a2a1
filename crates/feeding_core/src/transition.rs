//! Resolution of terminal events into domain changes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Domain, Grasper};
use crate::error::{ModelError, Result};
use crate::jump::{grasp_switch, wall_entry, wall_exit, Jump, JumpKind};
use crate::params::{ModelParams, SwitchingSurface, STATE_DIM};

/// Largest offset from zero a newly pinned coordinate may carry into the clamp.
const CLAMP_TOLERANCE: f64 = 1e-8;

/// One applied domain change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Time at which `exited` was entered.
    pub entered_at: f64,
    pub time: f64,
    pub exited: Domain,
    /// Geometric domain active after the transition. A grasp switch resolves back
    /// to the domain it was triggered from.
    pub entered: Domain,
    pub grasper_before: Grasper,
    pub grasper_after: Grasper,
    /// Switching-surface function at the transition state.
    pub threshold: f64,
    pub jump: Jump,
}

impl TransitionRecord {
    pub fn is_grasp_switch(&self) -> bool {
        matches!(self.jump.kind, JumpKind::GraspSwitch)
    }
}

/// Grasper flag and switching-surface value right after a switch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraspSample {
    pub time: f64,
    pub grasper: Grasper,
    pub threshold: f64,
}

/// Grasper switch times and hard-wall contact times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchLog {
    /// Every grasp switch in order, with the value it switched to.
    pub grasp_switches: Vec<GraspSample>,
    pub grasp_closed: Vec<f64>,
    pub grasp_opened: Vec<f64>,
    pub wall_x_entries: Vec<f64>,
    pub wall_x_exits: Vec<f64>,
    pub wall_z_entries: Vec<f64>,
    pub wall_z_exits: Vec<f64>,
}

impl SwitchLog {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn record(&mut self, transition: &TransitionRecord) {
        let time = transition.time;
        match transition.jump.kind {
            JumpKind::GraspSwitch => {
                self.grasp_switches.push(GraspSample {
                    time,
                    grasper: transition.grasper_after,
                    threshold: transition.threshold,
                });
                match transition.grasper_after {
                    Grasper::Closed => self.grasp_closed.push(time),
                    Grasper::Open => self.grasp_opened.push(time),
                }
            }
            JumpKind::WallEntry { coordinate: 0 } => self.wall_x_entries.push(time),
            JumpKind::WallEntry { coordinate: 2 } => self.wall_z_entries.push(time),
            JumpKind::WallExit { coordinate: 0 } => self.wall_x_exits.push(time),
            JumpKind::WallExit { coordinate: 2 } => self.wall_z_exits.push(time),
            _ => {}
        }
    }
}

pub struct TransitionEngine<'a> {
    params: &'a ModelParams,
    surface: &'a SwitchingSurface,
}

impl<'a> TransitionEngine<'a> {
    pub fn new(params: &'a ModelParams, surface: &'a SwitchingSurface) -> Self {
        Self { params, surface }
    }

    /// Applies root `root` of `domain` at `time` to `state` in place: builds the
    /// jump, maps the tangent half, and snaps the destination's pinned
    /// coordinates to zero. A pinned coordinate further than round-off from
    /// zero means an event was missed and is reported instead of snapped.
    pub fn apply(
        &self,
        domain: Domain,
        grasper: Grasper,
        root: usize,
        time: f64,
        entered_at: f64,
        state: &mut [f64; STATE_DIM],
    ) -> Result<TransitionRecord> {
        let target = domain.successor(root).ok_or_else(|| {
            ModelError::Numerical(format!("no transition for root {root} in {domain:?}"))
        })?;

        let entered = if target == Domain::GraspSwitch {
            domain
        } else {
            target
        };
        for &k in entered.pinned() {
            if !(state[k].abs() <= CLAMP_TOLERANCE) {
                return Err(ModelError::Numerical(format!(
                    "coordinate {k} is {} at t = {time} while {entered:?} pins it",
                    state[k]
                )));
            }
        }

        let threshold = self.surface.value(&state[..]);
        let (grasper_after, jump) = if target == Domain::GraspSwitch {
            let jump = grasp_switch(self.params, self.surface, domain, grasper, &state[..])?;
            (grasper.flipped(), jump)
        } else {
            (grasper, self.boundary_jump(domain, target, grasper, &state[..])?)
        };

        jump.apply(&mut state[..]);
        for &k in entered.pinned() {
            state[k] = 0.0;
        }

        debug!(
            time,
            from = ?domain,
            to = ?entered,
            grasper = ?grasper_after,
            kind = ?jump.kind,
            "transition"
        );

        Ok(TransitionRecord {
            entered_at,
            time,
            exited: domain,
            entered,
            grasper_before: grasper,
            grasper_after,
            threshold,
            jump,
        })
    }

    fn boundary_jump(
        &self,
        from: Domain,
        to: Domain,
        grasper: Grasper,
        x: &[f64],
    ) -> Result<Jump> {
        if let Some(&k) = to.pinned().iter().find(|&&k| !from.is_pinned(k)) {
            return wall_entry(self.params, from, to, grasper, k, x);
        }
        if let Some(&k) = from.pinned().iter().find(|&&k| !to.is_pinned(k)) {
            return Ok(wall_exit(k));
        }
        Err(ModelError::Numerical(format!(
            "{from:?} -> {to:?} neither pins nor releases a coordinate"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{DEFAULT_INITIAL_STATE, PHYSICAL_DIM};

    fn state_with(physical: [f64; PHYSICAL_DIM], tangent: [f64; 6]) -> [f64; STATE_DIM] {
        let mut state = [0.0; STATE_DIM];
        state[..PHYSICAL_DIM].copy_from_slice(&physical);
        state[PHYSICAL_DIM..].copy_from_slice(&tangent);
        state
    }

    #[test]
    fn wall_arrival_snaps_coordinate_and_logs_entry() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let engine = TransitionEngine::new(&params, &surface);
        let mut physical = DEFAULT_INITIAL_STATE;
        physical[0] = -3e-17;
        physical[5] = 0.9;
        let mut state = state_with(physical, [0.4, 0.1, 0.2, 0.3, 0.0, -0.1]);

        let record = engine
            .apply(Domain::Interior, Grasper::Closed, 0, 0.4, 0.0, &mut state)
            .expect("transition should apply");
        assert_eq!(record.entered, Domain::WallX);
        assert_eq!(state[0].to_bits(), 0.0f64.to_bits());
        assert_eq!(state[PHYSICAL_DIM], 0.0);
        assert!(!record.is_grasp_switch());

        let mut log = SwitchLog::default();
        log.record(&record);
        assert_eq!(log.wall_x_entries, vec![0.4]);
        assert!(log.wall_z_entries.is_empty());
    }

    #[test]
    fn grasp_switch_returns_to_the_same_domain_and_flips_flag() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let engine = TransitionEngine::new(&params, &surface);
        let mut physical = DEFAULT_INITIAL_STATE;
        physical[1] = 0.5;
        physical[2] = 0.0;
        physical[7] = 0.1;
        let mut state = state_with(physical, [0.0, 1.0, 0.0, 0.0, 0.5, 0.0]);

        let record = engine
            .apply(Domain::WallZ, Grasper::Open, 3, 4.38, 4.22, &mut state)
            .expect("transition should apply");
        assert_eq!(record.exited, Domain::WallZ);
        assert_eq!(record.entered, Domain::WallZ);
        assert_eq!(record.grasper_after, Grasper::Closed);
        assert!(record.is_grasp_switch());
        assert_eq!(state[2], 0.0);

        let back = engine
            .apply(Domain::WallZ, Grasper::Closed, 3, 4.38, 4.38, &mut state)
            .expect("transition should apply");
        assert_eq!(back.grasper_after, Grasper::Open);
        let tangent = &state[PHYSICAL_DIM..];
        let expected = [0.0, 1.0, 0.0, 0.0, 0.5, 0.0];
        for (a, b) in tangent.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9);
        }

        let mut log = SwitchLog::default();
        log.record(&record);
        log.record(&back);
        assert_eq!(log.grasp_closed, vec![4.38]);
        assert_eq!(log.grasp_opened, vec![4.38]);
        let samples: Vec<Grasper> = log.grasp_switches.iter().map(|s| s.grasper).collect();
        assert_eq!(samples, vec![Grasper::Closed, Grasper::Open]);
        assert!(log.grasp_switches.iter().all(|s| s.threshold.abs() < 1e-15));
    }

    #[test]
    fn edge_departure_releases_one_coordinate() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let engine = TransitionEngine::new(&params, &surface);
        let mut physical = DEFAULT_INITIAL_STATE;
        physical[0] = 0.0;
        physical[2] = 0.0;
        let mut state = state_with(physical, [0.0, 0.3, 0.0, 0.1, 0.1, 0.1]);
        let record = engine
            .apply(Domain::EdgeXZ, Grasper::Open, 1, 2.0, 1.5, &mut state)
            .expect("transition should apply");
        assert_eq!(record.entered, Domain::WallX);
        assert_eq!(record.jump.kind, JumpKind::WallExit { coordinate: 2 });
        assert_eq!(state[0], 0.0);

        let mut log = SwitchLog::default();
        log.record(&record);
        assert_eq!(log.wall_z_exits, vec![2.0]);
    }

    #[test]
    fn far_off_pinned_coordinate_is_not_snapped() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let engine = TransitionEngine::new(&params, &surface);
        let mut physical = DEFAULT_INITIAL_STATE;
        physical[0] = 0.43;
        physical[1] = 0.2;
        physical[2] = 0.3;
        let mut state = state_with(physical, [0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        let before = state;
        let err = engine
            .apply(Domain::WallX, Grasper::Open, 3, 1.97, 0.67, &mut state)
            .expect_err("x is not on its wall");
        assert!(matches!(err, ModelError::Numerical(_)));
        assert_eq!(state, before);
    }

    #[test]
    fn unknown_root_is_an_error() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let engine = TransitionEngine::new(&params, &surface);
        let mut state = state_with(DEFAULT_INITIAL_STATE, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(engine
            .apply(Domain::EdgeXY, Grasper::Open, 3, 0.0, 0.0, &mut state)
            .is_err());
    }
}

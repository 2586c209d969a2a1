//! Domain topology of the hybrid flow.
//!
//! The admissible region `a0, a1, a2 >= 0` is split by the coordinate walls into
//! an interior, three walls and three edges. Which event functions are watched in
//! each domain, and where each of them leads, is kept here as static tables so the
//! topology can be inspected and tested without integrating anything.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Active flow regime. The discriminants match the numeric domain codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Interior = 0,
    WallX = 1,
    WallY = 2,
    WallZ = 3,
    /// Pseudo-domain for a threshold crossing; resolved in zero time.
    GraspSwitch = 4,
    EdgeXY = 5,
    EdgeXZ = 6,
    EdgeYZ = 7,
}

/// Binary state of the grasper, independent of the geometric domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grasper {
    Open,
    Closed,
}

impl Grasper {
    pub fn flipped(self) -> Self {
        match self {
            Grasper::Open => Grasper::Closed,
            Grasper::Closed => Grasper::Open,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Grasper::Closed)
    }
}

/// A scalar crossing function watched while a domain is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    /// Activity coordinate reaching its wall (decreasing through zero).
    Arrival(usize),
    /// Unconstrained rate of a pinned coordinate turning positive (increasing through zero).
    Departure(usize),
    /// Threshold surface of the grasper (either direction).
    Threshold,
}

const INTERIOR_WATCHES: [Watch; 4] = [
    Watch::Arrival(0),
    Watch::Arrival(1),
    Watch::Arrival(2),
    Watch::Threshold,
];
const WALL_X_WATCHES: [Watch; 4] = [
    Watch::Departure(0),
    Watch::Arrival(1),
    Watch::Arrival(2),
    Watch::Threshold,
];
const WALL_Y_WATCHES: [Watch; 4] = [
    Watch::Departure(1),
    Watch::Arrival(0),
    Watch::Arrival(2),
    Watch::Threshold,
];
const WALL_Z_WATCHES: [Watch; 4] = [
    Watch::Departure(2),
    Watch::Arrival(0),
    Watch::Arrival(1),
    Watch::Threshold,
];
const EDGE_XY_WATCHES: [Watch; 3] = [Watch::Departure(0), Watch::Departure(1), Watch::Threshold];
const EDGE_XZ_WATCHES: [Watch; 3] = [Watch::Departure(0), Watch::Departure(2), Watch::Threshold];
const EDGE_YZ_WATCHES: [Watch; 3] = [Watch::Departure(1), Watch::Departure(2), Watch::Threshold];

use Domain::*;

const INTERIOR_NEXT: [Domain; 4] = [WallX, WallY, WallZ, GraspSwitch];
const WALL_X_NEXT: [Domain; 4] = [Interior, EdgeXY, EdgeXZ, GraspSwitch];
const WALL_Y_NEXT: [Domain; 4] = [Interior, EdgeXY, EdgeYZ, GraspSwitch];
const WALL_Z_NEXT: [Domain; 4] = [Interior, EdgeXZ, EdgeYZ, GraspSwitch];
const EDGE_XY_NEXT: [Domain; 3] = [WallY, WallX, GraspSwitch];
const EDGE_XZ_NEXT: [Domain; 3] = [WallZ, WallX, GraspSwitch];
const EDGE_YZ_NEXT: [Domain; 3] = [WallZ, WallY, GraspSwitch];

impl Domain {
    /// The seven domains a trajectory can actually flow in.
    pub const GEOMETRIC: [Domain; 7] = [Interior, WallX, WallY, WallZ, EdgeXY, EdgeXZ, EdgeYZ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Interior),
            1 => Some(WallX),
            2 => Some(WallY),
            3 => Some(WallZ),
            4 => Some(GraspSwitch),
            5 => Some(EdgeXY),
            6 => Some(EdgeXZ),
            7 => Some(EdgeYZ),
            _ => None,
        }
    }

    /// Classifies a state by which of its first three coordinates are exactly zero.
    pub fn classify(state: &[f64]) -> Result<Domain> {
        if state.len() < 3 {
            return Err(ModelError::InvalidConfig(format!(
                "Domain classification needs three activity coordinates, got {}.",
                state.len()
            )));
        }
        let (x, y, z) = (state[0], state[1], state[2]);
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            return Err(ModelError::InvalidConfig(
                "Activity coordinates must be finite.".to_string(),
            ));
        }
        if x < 0.0 || y < 0.0 || z < 0.0 {
            return Err(ModelError::InvalidConfig(format!(
                "Activity coordinates must be non-negative, got ({x}, {y}, {z})."
            )));
        }
        match (x == 0.0, y == 0.0, z == 0.0) {
            (false, false, false) => Ok(Interior),
            (true, false, false) => Ok(WallX),
            (false, true, false) => Ok(WallY),
            (false, false, true) => Ok(WallZ),
            (true, true, false) => Ok(EdgeXY),
            (true, false, true) => Ok(EdgeXZ),
            (false, true, true) => Ok(EdgeYZ),
            (true, true, true) => Err(ModelError::InvalidConfig(
                "All three activity coordinates are zero; this corner is never reached by the flow."
                    .to_string(),
            )),
        }
    }

    /// Activity coordinates held at zero in this domain.
    pub fn pinned(self) -> &'static [usize] {
        match self {
            Interior | GraspSwitch => &[],
            WallX => &[0],
            WallY => &[1],
            WallZ => &[2],
            EdgeXY => &[0, 1],
            EdgeXZ => &[0, 2],
            EdgeYZ => &[1, 2],
        }
    }

    pub fn is_pinned(self, coordinate: usize) -> bool {
        self.pinned().contains(&coordinate)
    }

    /// Crossing functions watched in this domain, in root-index order.
    pub fn watches(self) -> &'static [Watch] {
        match self {
            Interior | GraspSwitch => &INTERIOR_WATCHES,
            WallX => &WALL_X_WATCHES,
            WallY => &WALL_Y_WATCHES,
            WallZ => &WALL_Z_WATCHES,
            EdgeXY => &EDGE_XY_WATCHES,
            EdgeXZ => &EDGE_XZ_WATCHES,
            EdgeYZ => &EDGE_YZ_WATCHES,
        }
    }

    /// Destination reached when root `root` (0-based) of this domain fires.
    pub fn successor(self, root: usize) -> Option<Domain> {
        let table: &[Domain] = match self {
            Interior => &INTERIOR_NEXT,
            WallX => &WALL_X_NEXT,
            WallY => &WALL_Y_NEXT,
            WallZ => &WALL_Z_NEXT,
            EdgeXY => &EDGE_XY_NEXT,
            EdgeXZ => &EDGE_XZ_NEXT,
            EdgeYZ => &EDGE_YZ_NEXT,
            GraspSwitch => return None,
        };
        table.get(root).copied()
    }
}

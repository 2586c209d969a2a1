//! Crossing functions watched by the integrator.

use serde::{Deserialize, Serialize};

use crate::domain::{Domain, Grasper, Watch};
use crate::field::unconstrained_rates;
use crate::params::{ModelParams, SwitchingSurface};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventDirection {
    Increasing,
    Decreasing,
    Either,
}

impl EventDirection {
    /// Whether moving from `before` to `after` counts as a crossing.
    /// `after` is always strictly on the far side of zero.
    pub fn crossed(self, before: f64, after: f64) -> bool {
        match self {
            EventDirection::Increasing => before <= 0.0 && after > 0.0,
            EventDirection::Decreasing => before >= 0.0 && after < 0.0,
            EventDirection::Either => before * after < 0.0,
        }
    }

    /// Whether `value` already lies on the far side of zero, so the event must
    /// fire before any time passes.
    pub fn already_past(self, value: f64) -> bool {
        match self {
            EventDirection::Increasing => value > 0.0,
            EventDirection::Decreasing => value < 0.0,
            EventDirection::Either => false,
        }
    }
}

impl Watch {
    pub fn direction(self) -> EventDirection {
        match self {
            Watch::Arrival(_) => EventDirection::Decreasing,
            Watch::Departure(_) => EventDirection::Increasing,
            Watch::Threshold => EventDirection::Either,
        }
    }

    pub fn evaluate(
        self,
        params: &ModelParams,
        surface: &SwitchingSurface,
        grasper: Grasper,
        x: &[f64],
    ) -> f64 {
        match self {
            Watch::Arrival(k) => x[k],
            Watch::Departure(k) => unconstrained_rates(params, grasper, x)[k],
            Watch::Threshold => surface.value(x),
        }
    }
}

/// Terminal event functions of one domain and grasper state.
#[derive(Clone, Copy)]
pub struct EventSet<'a> {
    params: &'a ModelParams,
    surface: &'a SwitchingSurface,
    domain: Domain,
    grasper: Grasper,
}

impl<'a> EventSet<'a> {
    pub fn new(
        params: &'a ModelParams,
        surface: &'a SwitchingSurface,
        domain: Domain,
        grasper: Grasper,
    ) -> Self {
        Self {
            params,
            surface,
            domain,
            grasper,
        }
    }

    pub fn len(&self) -> usize {
        self.domain.watches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, index: usize, x: &[f64]) -> f64 {
        self.domain.watches()[index].evaluate(self.params, self.surface, self.grasper, x)
    }

    pub fn direction(&self, index: usize) -> EventDirection {
        self.domain.watches()[index].direction()
    }

    /// Writes every event function at `x` into `out`, in root-index order.
    pub fn evaluate(&self, x: &[f64], out: &mut Vec<f64>) {
        out.clear();
        out.extend(
            self.domain
                .watches()
                .iter()
                .map(|w| w.evaluate(self.params, self.surface, self.grasper, x)),
        );
    }

    /// Indices of the events that fire between two consecutive evaluations.
    pub fn crossings(&self, before: &[f64], after: &[f64]) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.direction(i).crossed(before[i], after[i]))
            .collect()
    }

    /// Highest index whose event is already past at the values of `start`.
    /// A wall or edge entered at the same instant as another boundary event
    /// leaves that event pending here.
    pub fn pending(&self, start: &[f64]) -> Option<usize> {
        (0..self.len())
            .rev()
            .find(|&i| self.direction(i).already_past(start[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DEFAULT_INITIAL_STATE;

    #[test]
    fn direction_rules() {
        assert!(EventDirection::Decreasing.crossed(0.1, -0.1));
        assert!(EventDirection::Decreasing.crossed(0.0, -0.1));
        assert!(!EventDirection::Decreasing.crossed(-0.1, 0.1));
        assert!(!EventDirection::Decreasing.crossed(0.0, 0.0));

        assert!(EventDirection::Increasing.crossed(-0.1, 0.1));
        assert!(EventDirection::Increasing.crossed(0.0, 1e-300));
        assert!(!EventDirection::Increasing.crossed(0.1, -0.1));

        assert!(EventDirection::Either.crossed(0.2, -0.2));
        assert!(EventDirection::Either.crossed(-0.2, 0.2));
        assert!(!EventDirection::Either.crossed(0.0, 0.2));
    }

    #[test]
    fn interior_events_track_coordinates_and_threshold() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let events = EventSet::new(&params, &surface, Domain::Interior, Grasper::Closed);
        let mut values = Vec::new();
        events.evaluate(&DEFAULT_INITIAL_STATE, &mut values);
        assert_eq!(values.len(), 4);
        assert_eq!(values[0], DEFAULT_INITIAL_STATE[0]);
        assert_eq!(values[2], DEFAULT_INITIAL_STATE[2]);
        assert!(values[3] > 0.0, "default state is on the closed side");
    }

    #[test]
    fn wall_departure_uses_unconstrained_rate() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let mut x = DEFAULT_INITIAL_STATE;
        x[0] = 0.0;
        let events = EventSet::new(&params, &surface, Domain::WallX, Grasper::Open);
        let expected = unconstrained_rates(&params, Grasper::Open, &x)[0];
        assert_eq!(events.value(0, &x), expected);
        assert_eq!(events.direction(0), EventDirection::Increasing);
        assert_eq!(events.direction(3), EventDirection::Either);
    }

    #[test]
    fn crossings_report_every_qualifying_index() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let events = EventSet::new(&params, &surface, Domain::Interior, Grasper::Open);
        let before = [0.1, 0.2, 0.3, -0.1];
        let after = [-0.1, 0.1, 0.4, 0.1];
        assert_eq!(events.crossings(&before, &after), vec![0, 3]);
    }

    #[test]
    fn pending_picks_highest_index_already_past() {
        let params = ModelParams::default();
        let surface = SwitchingSurface::default();
        let edge = EventSet::new(&params, &surface, Domain::EdgeXY, Grasper::Open);
        assert_eq!(edge.pending(&[-0.1, -0.2, 0.3]), None);
        assert_eq!(edge.pending(&[0.1, 0.0, -0.3]), Some(0));
        assert_eq!(edge.pending(&[0.1, 0.1, 0.3]), Some(1));

        let wall = EventSet::new(&params, &surface, Domain::WallX, Grasper::Open);
        assert_eq!(wall.pending(&[-0.1, 0.0, 0.2, -0.4]), None);
        assert_eq!(wall.pending(&[-0.1, 0.2, -1e-15, 0.4]), Some(2));
    }
}

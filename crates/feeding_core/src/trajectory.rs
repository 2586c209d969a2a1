use serde::{Deserialize, Serialize};

use crate::domain::{Domain, Grasper};
use crate::params::STATE_DIM;

/// Samples of one smooth piece of the solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub domain: Domain,
    pub grasper: Grasper,
    pub times: Vec<f64>,
    pub states: Vec<[f64; STATE_DIM]>,
}

impl Segment {
    pub fn start_time(&self) -> f64 {
        self.times.first().copied().unwrap_or(0.0)
    }

    pub fn end_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }
}

/// Piecewise solution of a full solve, in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub segments: Vec<Segment>,
}

impl Trajectory {
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    fn flat_samples(&self) -> impl Iterator<Item = (f64, &[f64; STATE_DIM])> + '_ {
        self.segments.iter().enumerate().flat_map(|(i, seg)| {
            // Later segments open with the post-jump copy of the previous end.
            let skip = usize::from(i > 0);
            seg.times
                .iter()
                .copied()
                .zip(seg.states.iter())
                .skip(skip)
        })
    }

    pub fn times(&self) -> Vec<f64> {
        self.flat_samples().map(|(t, _)| t).collect()
    }

    pub fn states(&self) -> Vec<[f64; STATE_DIM]> {
        self.flat_samples().map(|(_, s)| *s).collect()
    }

    /// One state component over the flattened samples.
    pub fn component(&self, index: usize) -> Vec<f64> {
        self.flat_samples().map(|(_, s)| s[index]).collect()
    }

    pub fn len(&self) -> usize {
        self.flat_samples().count()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn final_time(&self) -> Option<f64> {
        self.segments.last().map(Segment::end_time)
    }

    pub fn final_state(&self) -> Option<[f64; STATE_DIM]> {
        self.segments
            .last()
            .and_then(|seg| seg.states.last().copied())
    }
}

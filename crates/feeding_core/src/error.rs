use thiserror::Error;

use crate::domain::Domain;

/// Failures raised by the hybrid engine.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("{0} requires a completed solve; call solve() first.")]
    NotSolved(&'static str),

    #[error(
        "No progress: {count} consecutive zero-length segments in {domain:?} at t = {time}."
    )]
    NoProgress {
        time: f64,
        domain: Domain,
        count: usize,
    },

    #[error("Step size underflow at t = {time} (h = {step:e}).")]
    StepSizeUnderflow { time: f64, step: f64 },

    #[error("Exceeded {limit} integration steps in a single segment (t = {time}).")]
    StepLimitExceeded { time: f64, limit: usize },

    #[error("Numerical error: {0}")]
    Numerical(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

//! error.rs — Failure taxonomy for the locator core
//!
//! Non-convergence is deliberately NOT in here: a solve that runs out of
//! iterations still produces a `SolveResult` with `SolveStatus::NotConverged`
//! so batch callers can keep going.

use boom_types::NetworkError;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, LocatorError>;

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    /// Fewer scalar observations than free parameters
    #[error("under-determined input: {observations} observations for {parameters} free parameters")]
    UnderDetermined { observations: usize, parameters: usize },

    /// Placement or search retries exhausted
    #[error("degenerate geometry after {attempts} attempts: {reason}")]
    DegenerateGeometry { attempts: usize, reason: String },

    #[error("initial guess has {found} events but observations carry {expected}")]
    LayoutMismatch { expected: usize, found: usize },

    #[error("invalid subset: {0}")]
    InvalidSubset(String),

    #[error("truth has {sources} source positions but {times} emission times")]
    TruthMismatch { sources: usize, times: usize },

    #[error("optimizer failure: {0}")]
    Optimizer(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

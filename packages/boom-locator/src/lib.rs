//! # boom-locator
//!
//! Locates sonic booms from arrival times at fixed ground stations, and plans
//! which stations are worth deploying.
//!
//! ## Pipeline
//!
//! ```text
//! geometry → propagation → residuals → solver → orchestrator
//!                                                  ↑
//!                               search → evaluator ┘
//! ```
//!
//! - [`geometry`]: local frame, geodetic projection, distance tables
//! - [`propagation`]: t_arrival = t0 + dist / c, synthetic arrivals, noise
//! - [`params`], [`constraints`], [`residuals`]: what is solved for and how it is scored
//! - [`solver`]: Levenberg-Marquardt with Nelder-Mead fallback
//! - [`orchestrator`]: per-event, augmented, joint and noise-averaged batches
//! - [`evaluator`]: subset volatility, random subset search, size sweep
//! - [`search`]: greedy spread and genetic station selection
//!
//! Every stochastic entry point takes an explicit `&mut impl Rng`; seed a
//! `StdRng` for reproducible runs.

pub mod config;
pub mod constraints;
pub mod error;
pub mod evaluator;
pub mod geometry;
pub mod input;
pub mod orchestrator;
pub mod params;
pub mod propagation;
pub mod residuals;
pub mod search;
pub mod solver;

pub use config::{ConfigError, LocatorConfig};
pub use constraints::Constraint;
pub use error::{LocatorError, Result};
pub use evaluator::{SearchOutcome, SubsetEvaluator, SubsetScore, SubsetSearch, SweepOutcome};
pub use orchestrator::{BatchReport, EventOutcome, MultiSourceLocator};
pub use params::{ParamName, SourceParams};
pub use propagation::PropagationModel;
pub use solver::{ClampEvent, SolveResult, SolveStatus, SolverDriver, SolverMethod, SolverSettings};

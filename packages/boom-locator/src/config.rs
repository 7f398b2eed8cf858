//! config.rs — TOML configuration
//!
//! Every section is optional; missing keys fall back to the defaults below,
//! which match the embedded `config.toml`.

use std::path::Path;

use boom_types::Vec3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::evaluator::{EvaluationSettings, SearchSettings, SubsetEvaluator};
use crate::orchestrator::MultiSourceLocator;
use crate::params::SourceParams;
use crate::propagation::PropagationModel;
use crate::residuals::SoftPenalties;
use crate::search::genetic::GeneticConfig;
use crate::solver::{SolverDriver, SolverSettings};

/// Shipped defaults, used when no config file can be read
pub const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Propagation speed must be positive, got {0}")]
    InvalidSpeed(f64),
    #[error("Solver iteration limits must be non-zero")]
    InvalidIterations,
    #[error("Invalid solver tolerance: {0}")]
    InvalidTolerance(String),
    #[error("Initial guess must be finite")]
    InvalidGuess,
    #[error("Event window {index} is empty or not finite")]
    InvalidWindow { index: usize },
    #[error("Placement region is empty: min {min:?} exceeds max {max:?}")]
    InvalidRegion { min: Vec3, max: Vec3 },
    #[error("Maximum range must be positive")]
    InvalidRange,
    #[error("Emission time window [{min}, {max}] is empty")]
    InvalidTimeWindow { min: f64, max: f64 },
    #[error("Noise sigma must be non-negative, got {0}")]
    InvalidNoise(f64),
    #[error("Subset sizes {min}..={max} are invalid (need 4 ≤ min ≤ max)")]
    InvalidSizeRange { min: usize, max: usize },
    #[error("Target size {target} outside {min}..={max}")]
    InvalidTargetSize { target: usize, min: usize, max: usize },
    #[error("Search needs at least one collection, draw and trial")]
    InvalidSearchBudget,
    #[error("Population size must be at least 1")]
    PopulationTooSmall,
    #[error("Mutation rate must lie in [0, 1], got {0}")]
    InvalidMutationRate(f64),
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSection {
    /// Starting point [x, y, z, t] for every per-event solve
    pub initial_guess: [f64; 4],
    #[serde(flatten)]
    pub settings: SolverSettings,
}

impl Default for SolverSection {
    fn default() -> Self {
        Self { initial_guess: [500.0, 500.0, 300.0, 0.0], settings: SolverSettings::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSection {
    /// Sources may not sit below this altitude (m)
    pub altitude_floor: Option<f64>,
    /// Emission times may not exceed this (s)
    pub time_ceiling: Option<f64>,
    /// Per-event [min, max] emission-time windows for the joint solve
    pub event_windows: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Seed for every random draw; entropy when unset
    pub seed: Option<u64>,
    pub propagation: PropagationModel,
    pub solver: SolverSection,
    pub constraints: ConstraintSection,
    pub evaluation: EvaluationSettings,
    pub search: SearchSettings,
    pub genetic: GeneticConfig,
}

impl LocatorConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: LocatorConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `path`, falling back to the embedded defaults when it cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).unwrap_or_else(|_| {
            warn!("config {} not readable, using built-in defaults", path.display());
            DEFAULT_CONFIG.to_string()
        });
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let speed = self.propagation.speed;
        if !(speed.is_finite() && speed > 0.0) {
            return Err(ConfigError::InvalidSpeed(speed));
        }

        let s = &self.solver.settings;
        if s.max_iterations == 0 || s.nm_max_iterations == 0 {
            return Err(ConfigError::InvalidIterations);
        }
        for (name, v) in [
            ("step_tolerance", s.step_tolerance),
            ("cost_tolerance", s.cost_tolerance),
            ("nm_sd_tolerance", s.nm_sd_tolerance),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(ConfigError::InvalidTolerance(format!("{name} = {v}")));
            }
        }
        for (name, v) in [
            ("initial_damping", s.initial_damping),
            ("nm_step_m", s.nm_step_m),
            ("nm_step_s", s.nm_step_s),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(ConfigError::InvalidTolerance(format!("{name} = {v}")));
            }
        }
        if self.solver.initial_guess.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::InvalidGuess);
        }
        for (index, [lo, hi]) in self.constraints.event_windows.iter().enumerate() {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(ConfigError::InvalidWindow { index });
            }
        }

        let e = &self.evaluation;
        let (min, max) = (e.region_min, e.region_max);
        if min.x > max.x || min.y > max.y || min.z > max.z {
            return Err(ConfigError::InvalidRegion { min, max });
        }
        if !(e.max_range > 0.0) {
            return Err(ConfigError::InvalidRange);
        }
        if e.time_min > e.time_max {
            return Err(ConfigError::InvalidTimeWindow { min: e.time_min, max: e.time_max });
        }
        if !(e.noise_sigma >= 0.0) {
            return Err(ConfigError::InvalidNoise(e.noise_sigma));
        }

        let q = &self.search;
        if q.min_size < 4 || q.min_size > q.max_size {
            return Err(ConfigError::InvalidSizeRange { min: q.min_size, max: q.max_size });
        }
        let target = q.target();
        if target < q.min_size || target > q.max_size {
            return Err(ConfigError::InvalidTargetSize { target, min: q.min_size, max: q.max_size });
        }
        if q.collections == 0 || q.max_draws == 0 || q.trials_per_size == 0 || e.max_placement_attempts == 0 {
            return Err(ConfigError::InvalidSearchBudget);
        }

        self.genetic.validate()
    }

    // ── Builders ─────────────────────────────────────────────────────────────

    pub fn penalties(&self) -> SoftPenalties {
        SoftPenalties {
            altitude_floor: self.constraints.altitude_floor,
            time_ceiling: self.constraints.time_ceiling,
            weight: self.solver.settings.penalty_weight,
        }
    }

    pub fn driver(&self) -> SolverDriver {
        SolverDriver::new(self.propagation)
            .with_settings(self.solver.settings.clone())
            .with_penalties(self.penalties())
    }

    pub fn initial_guess(&self) -> SourceParams {
        let [x, y, z, t] = self.solver.initial_guess;
        SourceParams::single(Vec3::new(x, y, z), t)
    }

    pub fn locator(&self) -> MultiSourceLocator {
        MultiSourceLocator::new(self.driver(), self.initial_guess())
            .with_event_windows(
                self.constraints.event_windows.iter().map(|[lo, hi]| Some((*lo, *hi))).collect(),
            )
    }

    pub fn evaluator(&self) -> SubsetEvaluator {
        SubsetEvaluator::new(self.locator(), self.evaluation.clone())
    }
}

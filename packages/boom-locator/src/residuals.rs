//! residuals.rs — Residual vector, Jacobian and penalised objective
//!
//! For station s and event e:
//!
//!   r_se = t_e + dist(p, s) / c − observed_se + bias
//!
//! Rows are station-major (all events of station 0, then station 1, ...).
//! The bias term absorbs a systematic clock offset shared by every station.

use boom_types::ObservationSet;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{LocatorError, Result};
use crate::params::{ParamLayout, SourceParams};
use crate::propagation::PropagationModel;

/// Observations plus the forward model that explains them.
#[derive(Debug, Clone, Copy)]
pub struct TimingProblem<'a> {
    pub model: PropagationModel,
    pub observations: &'a ObservationSet,
}

impl<'a> TimingProblem<'a> {
    pub fn new(model: PropagationModel, observations: &'a ObservationSet) -> Self {
        Self { model, observations }
    }

    pub fn measurement_count(&self) -> usize {
        self.observations.measurement_count()
    }

    /// Reject layouts the observations cannot pin down.
    pub fn check_layout(&self, layout: ParamLayout) -> Result<()> {
        if layout.events != self.observations.events() {
            return Err(LocatorError::LayoutMismatch {
                expected: self.observations.events(),
                found: layout.events,
            });
        }
        let observations = self.measurement_count();
        let parameters = layout.dimension();
        if observations < parameters {
            return Err(LocatorError::UnderDetermined { observations, parameters });
        }
        Ok(())
    }

    pub fn residuals(&self, p: &SourceParams) -> Vec<f64> {
        let bias = p.clock_bias.unwrap_or(0.0);
        let mut r = Vec::with_capacity(self.measurement_count());
        for obs in self.observations.observations() {
            let travel = self.model.travel_time(&p.position, &obs.position);
            for (t0, observed) in p.emission_times.iter().zip(&obs.arrivals) {
                r.push(t0 + travel - observed + bias);
            }
        }
        r
    }

    /// Residuals and their analytic Jacobian (rows = measurements, cols = parameters)
    pub fn residuals_and_jacobian(&self, p: &SourceParams) -> (DVector<f64>, DMatrix<f64>) {
        let layout = p.layout();
        let m = self.measurement_count();
        let mut jac = DMatrix::zeros(m, layout.dimension());
        let mut row = 0;
        for obs in self.observations.observations() {
            let g = self.model.travel_time_gradient(&p.position, &obs.position);
            for e in 0..layout.events {
                jac[(row, 0)] = g[0];
                jac[(row, 1)] = g[1];
                jac[(row, 2)] = g[2];
                jac[(row, 3 + e)] = 1.0;
                if let Some(b) = layout.bias_index() {
                    jac[(row, b)] = 1.0;
                }
                row += 1;
            }
        }
        (DVector::from_vec(self.residuals(p)), jac)
    }

    pub fn sum_of_squares(&self, p: &SourceParams) -> f64 {
        self.residuals(p).iter().map(|r| r * r).sum()
    }

    pub fn rms(&self, p: &SourceParams) -> f64 {
        let m = self.measurement_count();
        if m == 0 { return 0.0; }
        (self.sum_of_squares(p) / m as f64).sqrt()
    }
}

// ── Soft penalties ────────────────────────────────────────────────────────────

/// Quadratic penalties standing in for hard bounds when the minimizer has no
/// native constraint support. Zero inside the feasible region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftPenalties {
    /// Penalise z below this altitude
    pub altitude_floor: Option<f64>,
    /// Penalise any emission time above this
    pub time_ceiling: Option<f64>,
    pub weight: f64,
}

impl Default for SoftPenalties {
    fn default() -> Self {
        Self { altitude_floor: None, time_ceiling: None, weight: 1.0 }
    }
}

impl SoftPenalties {
    pub fn is_empty(&self) -> bool {
        self.altitude_floor.is_none() && self.time_ceiling.is_none()
    }

    pub fn penalty(&self, p: &SourceParams) -> f64 {
        let mut total = 0.0;
        if let Some(floor) = self.altitude_floor {
            if p.position.z < floor {
                total += (floor - p.position.z).powi(2);
            }
        }
        if let Some(ceiling) = self.time_ceiling {
            for &t in &p.emission_times {
                if t > ceiling {
                    total += (t - ceiling).powi(2);
                }
            }
        }
        self.weight * total
    }
}

/// Sum of squared residuals plus soft penalties
pub fn objective(problem: &TimingProblem<'_>, p: &SourceParams, penalties: &SoftPenalties) -> f64 {
    problem.sum_of_squares(p) + penalties.penalty(p)
}

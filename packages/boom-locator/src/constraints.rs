//! constraints.rs — Inequality constraints `g(params) ≥ 0`
//!
//! Bound-type constraints (altitude floor, per-event emission-time bounds) are
//! enforced natively by the Levenberg-Marquardt driver through box projection.
//! `General` constraints can only be honoured as quadratic penalties, which
//! routes the solve to the Nelder-Mead fallback.

use std::fmt;
use std::sync::Arc;

use crate::params::{ParamLayout, SourceParams};

type ConstraintFn = Arc<dyn Fn(&SourceParams) -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum Constraint {
    /// z - floor ≥ 0
    AltitudeFloor(f64),
    /// t_event - min ≥ 0
    EmissionTimeMin { event: usize, min: f64 },
    /// max - t_event ≥ 0
    EmissionTimeMax { event: usize, max: f64 },
    /// Arbitrary g(params) ≥ 0
    General { label: String, g: ConstraintFn },
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::AltitudeFloor(z) => write!(f, "AltitudeFloor({z})"),
            Constraint::EmissionTimeMin { event, min } => write!(f, "EmissionTimeMin(t{event} >= {min})"),
            Constraint::EmissionTimeMax { event, max } => write!(f, "EmissionTimeMax(t{event} <= {max})"),
            Constraint::General { label, .. } => write!(f, "General({label})"),
        }
    }
}

impl Constraint {
    pub fn general(label: impl Into<String>, g: impl Fn(&SourceParams) -> f64 + Send + Sync + 'static) -> Self {
        Constraint::General { label: label.into(), g: Arc::new(g) }
    }

    /// g(params); negative means violated
    pub fn margin(&self, p: &SourceParams) -> f64 {
        match self {
            Constraint::AltitudeFloor(floor) => p.position.z - floor,
            Constraint::EmissionTimeMin { event, min } => {
                p.emission_times.get(*event).map_or(0.0, |t| t - min)
            }
            Constraint::EmissionTimeMax { event, max } => {
                p.emission_times.get(*event).map_or(0.0, |t| max - t)
            }
            Constraint::General { g, .. } => g(p),
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, Constraint::General { .. })
    }
}

/// Σ weight · min(g, 0)²
pub fn violation_penalty(constraints: &[Constraint], p: &SourceParams, weight: f64) -> f64 {
    constraints.iter()
        .map(|c| c.margin(p).min(0.0))
        .map(|v| weight * v * v)
        .sum()
}

// ── Box bounds ────────────────────────────────────────────────────────────────

/// Per-component [lower, upper] box derived from bound constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl BoxBounds {
    pub fn unbounded(layout: ParamLayout) -> Self {
        let n = layout.dimension();
        Self { lower: vec![f64::NEG_INFINITY; n], upper: vec![f64::INFINITY; n] }
    }

    /// Tightest box implied by the bound-type constraints; `General` ones are skipped.
    pub fn from_constraints(layout: ParamLayout, constraints: &[Constraint]) -> Self {
        let mut b = Self::unbounded(layout);
        for c in constraints {
            match *c {
                Constraint::AltitudeFloor(floor) => b.lower[2] = b.lower[2].max(floor),
                Constraint::EmissionTimeMin { event, min } if event < layout.events => {
                    b.lower[3 + event] = b.lower[3 + event].max(min);
                }
                Constraint::EmissionTimeMax { event, max } if event < layout.events => {
                    b.upper[3 + event] = b.upper[3 + event].min(max);
                }
                _ => {}
            }
        }
        b
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.iter().all(|l| *l == f64::NEG_INFINITY)
            && self.upper.iter().all(|u| *u == f64::INFINITY)
    }

    /// Clip every component into its interval (lower wins if the box is empty)
    pub fn project(&self, x: &mut [f64]) {
        for (i, xi) in x.iter_mut().enumerate() {
            *xi = xi.min(self.upper[i]).max(self.lower[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boom_types::Vec3;

    #[test]
    fn test_margins() {
        let p = SourceParams::shared(Vec3::new(0.0, 0.0, 900.0), vec![30.0, 80.0]);
        assert_eq!(Constraint::AltitudeFloor(1000.0).margin(&p), -100.0);
        assert_eq!(Constraint::EmissionTimeMin { event: 0, min: 20.0 }.margin(&p), 10.0);
        assert_eq!(Constraint::EmissionTimeMax { event: 1, max: 86.0 }.margin(&p), 6.0);
        let g = Constraint::general("t0 before t1", |p| p.emission_times[1] - p.emission_times[0]);
        assert_eq!(g.margin(&p), 50.0);
        assert!(!g.is_bound());
    }

    #[test]
    fn test_violation_penalty_is_zero_when_feasible() {
        let p = SourceParams::single(Vec3::new(0.0, 0.0, 500.0), 10.0);
        let ok = [Constraint::AltitudeFloor(100.0), Constraint::EmissionTimeMax { event: 0, max: 20.0 }];
        assert_eq!(violation_penalty(&ok, &p, 1.0), 0.0);
        let bad = [Constraint::AltitudeFloor(600.0)];
        assert_eq!(violation_penalty(&bad, &p, 2.0), 2.0 * 100.0 * 100.0);
    }

    #[test]
    fn test_box_projection() {
        let layout = ParamLayout { events: 2, clock_bias: false };
        let b = BoxBounds::from_constraints(layout, &[
            Constraint::AltitudeFloor(0.0),
            Constraint::EmissionTimeMin { event: 0, min: 20.0 },
            Constraint::EmissionTimeMax { event: 1, max: 86.0 },
            Constraint::EmissionTimeMax { event: 7, max: 1.0 },
        ]);
        assert!(!b.is_unbounded());
        let mut x = vec![1.0, 2.0, -5.0, 10.0, 99.0];
        b.project(&mut x);
        assert_eq!(x, vec![1.0, 2.0, 0.0, 20.0, 86.0]);
        assert!(BoxBounds::unbounded(layout).is_unbounded());
    }
}

//! solver.rs — Nonlinear solver driver
//!
//! Two minimizers behind one entry point, [`SolverDriver::solve`]:
//!
//!   - Levenberg-Marquardt on the residual vector (preferred). Damping is
//!     λ·D² with D = [1/c, 1/c, 1/c, 1, ...] so a metre of position weighs
//!     like the time sound needs to cross it. Bound constraints are honoured
//!     by projecting every trial point onto the feasible box.
//!   - Nelder-Mead (argmin) on the penalised scalar objective. Used on request
//!     or whenever a general inequality constraint is present. It starts from
//!     the LM optimum within the bound constraints, with a simplex of fixed
//!     physical edges (`nm_step_m`, `nm_step_s`).
//!
//! Running out of iterations is not an error: the result carries
//! `SolveStatus::NotConverged` and `estimate()` yields `None`.

use argmin::core::{CostFunction, Error as ArgminError, Executor, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use boom_types::ObservationSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::constraints::{violation_penalty, BoxBounds, Constraint};
use crate::error::{LocatorError, Result};
use crate::params::{parameter_scale, ParamLayout, ParamName, SourceParams};
use crate::propagation::PropagationModel;
use crate::residuals::{objective, SoftPenalties, TimingProblem};

/// Sum of squares treated as an exact fit (s²)
const COST_FLOOR: f64 = 1e-30;
/// Damping increases tried before declaring a stall
const MAX_DAMPING_RETRIES: usize = 60;
const MIN_DAMPING: f64 = 1e-15;

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    /// Levenberg-Marquardt unless a general constraint forces Nelder-Mead
    #[default]
    Auto,
    LevenbergMarquardt,
    NelderMead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Converged,
    NotConverged,
}

/// A component moved back into its feasible range after convergence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampEvent {
    pub parameter: ParamName,
    pub from: f64,
    pub to: f64,
}

/// Outcome of one solve. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    pub params: SourceParams,
    pub status: SolveStatus,
    /// Minimizer that produced `params` (never `Auto`)
    pub method: SolverMethod,
    pub iterations: u64,
    /// Sum of squared residuals at `params` (s²)
    pub cost: f64,
    /// Root-mean-square residual (s)
    pub rms_residual: f64,
    /// Empty unless post-convergence clamping changed something
    #[serde(default)]
    pub clamped: Vec<ClampEvent>,
}

impl SolveResult {
    pub fn is_converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }

    pub fn was_clamped(&self) -> bool {
        !self.clamped.is_empty()
    }

    /// Parameters of a converged solve, `None` otherwise
    pub fn estimate(&self) -> Option<&SourceParams> {
        self.is_converged().then_some(&self.params)
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub method: SolverMethod,
    /// Levenberg-Marquardt iteration cap
    pub max_iterations: usize,
    /// Relative scaled step below which LM stops
    pub step_tolerance: f64,
    /// Relative cost decrease below which LM stops
    pub cost_tolerance: f64,
    pub initial_damping: f64,
    pub nm_max_iterations: u64,
    /// Standard deviation of simplex costs at which Nelder-Mead stops
    pub nm_sd_tolerance: f64,
    /// Initial simplex edge along x, y, z (m)
    pub nm_step_m: f64,
    /// Initial simplex edge along emission times and clock bias (s)
    pub nm_step_s: f64,
    /// Weight on min(g, 0)² for constraints handled as penalties
    pub penalty_weight: f64,
    /// Extra solves from jittered starting points
    pub restarts: usize,
    pub restart_jitter_m: f64,
    pub restart_jitter_s: f64,
    pub restart_seed: u64,
    /// Clamp negative emission times and clock bias to zero after convergence
    pub clamp_non_negative: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            method: SolverMethod::Auto,
            max_iterations: 500,
            step_tolerance: 1e-12,
            cost_tolerance: 1e-14,
            initial_damping: 1e-3,
            nm_max_iterations: 5000,
            nm_sd_tolerance: 1e-16,
            nm_step_m: 100.0,
            nm_step_s: 1.0,
            penalty_weight: 1.0,
            restarts: 0,
            restart_jitter_m: 250.0,
            restart_jitter_s: 1.0,
            restart_seed: 0,
            clamp_non_negative: false,
        }
    }
}

/// What a minimizer hands back before clamping and scoring.
struct RawSolve {
    params: SourceParams,
    converged: bool,
    iterations: u64,
    method: SolverMethod,
    cost: f64,
}

impl RawSolve {
    fn beats(&self, other: &RawSolve) -> bool {
        match (self.converged, other.converged) {
            (true, false) => true,
            (false, true) => false,
            _ => self.cost < other.cost,
        }
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SolverDriver {
    pub model: PropagationModel,
    pub settings: SolverSettings,
    /// Soft limits: penalties for Nelder-Mead, box bounds for LM
    pub penalties: SoftPenalties,
}

impl SolverDriver {
    pub fn new(model: PropagationModel) -> Self {
        Self { model, ..Default::default() }
    }

    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_penalties(mut self, penalties: SoftPenalties) -> Self {
        self.penalties = penalties;
        self
    }

    /// Estimate source parameters from `observations` starting at `initial`.
    ///
    /// The layout of `initial` decides the variant: 4 parameters for a single
    /// event, 5 with a clock bias, 3 + n for n events sharing one position.
    /// Fails with `UnderDetermined` before any iteration when there are fewer
    /// scalar observations than parameters.
    pub fn solve(
        &self,
        initial: &SourceParams,
        observations: &ObservationSet,
        constraints: &[Constraint],
    ) -> Result<SolveResult> {
        let problem = TimingProblem::new(self.model, observations);
        problem.check_layout(initial.layout())?;
        if !initial.is_finite() {
            return Err(LocatorError::Optimizer("initial guess is not finite".into()));
        }

        let method = self.resolve_method(constraints);
        let mut best = self.solve_once(&problem, initial.clone(), constraints, method)?;

        if self.settings.restarts > 0 {
            let mut rng = StdRng::seed_from_u64(self.settings.restart_seed);
            for k in 0..self.settings.restarts {
                let guess = self.jitter(initial, &mut rng);
                let candidate = self.solve_once(&problem, guess, constraints, method)?;
                if candidate.beats(&best) {
                    debug!(restart = k, cost = candidate.cost, "restart improved solution");
                    best = candidate;
                }
            }
        }

        let result = self.finish(&problem, best, constraints);
        debug!(
            method = ?result.method,
            status = ?result.status,
            iterations = result.iterations,
            rms = result.rms_residual,
            "solve finished"
        );
        Ok(result)
    }

    fn resolve_method(&self, constraints: &[Constraint]) -> SolverMethod {
        let needs_penalties = constraints.iter().any(|c| !c.is_bound());
        match self.settings.method {
            SolverMethod::NelderMead => SolverMethod::NelderMead,
            _ if needs_penalties => {
                debug!("general constraint present, using Nelder-Mead");
                SolverMethod::NelderMead
            }
            _ => SolverMethod::LevenbergMarquardt,
        }
    }

    fn solve_once(
        &self,
        problem: &TimingProblem<'_>,
        initial: SourceParams,
        constraints: &[Constraint],
        method: SolverMethod,
    ) -> Result<RawSolve> {
        match method {
            SolverMethod::NelderMead => self.nelder_mead(problem, initial, constraints),
            _ => {
                let bounds = self.lm_bounds(initial.layout(), constraints);
                Ok(self.levenberg_marquardt(problem, initial, &bounds))
            }
        }
    }

    /// Box from the bound-type constraints plus the soft penalty limits
    fn lm_bounds(&self, layout: ParamLayout, constraints: &[Constraint]) -> BoxBounds {
        let mut all = constraints.to_vec();
        all.extend(penalties_as_bounds(&self.penalties, layout));
        BoxBounds::from_constraints(layout, &all)
    }

    fn jitter(&self, initial: &SourceParams, rng: &mut StdRng) -> SourceParams {
        let mut p = initial.clone();
        let jm = self.settings.restart_jitter_m;
        let js = self.settings.restart_jitter_s;
        if jm > 0.0 {
            p.position.x += rng.gen_range(-jm..=jm);
            p.position.y += rng.gen_range(-jm..=jm);
            p.position.z += rng.gen_range(-jm..=jm);
        }
        if js > 0.0 {
            for t in p.emission_times.iter_mut() {
                *t += rng.gen_range(-js..=js);
            }
        }
        p
    }

    // ── Levenberg-Marquardt ──────────────────────────────────────────────────

    fn levenberg_marquardt(
        &self,
        problem: &TimingProblem<'_>,
        initial: SourceParams,
        bounds: &BoxBounds,
    ) -> RawSolve {
        let s = &self.settings;
        let layout = initial.layout();
        let n = layout.dimension();
        let scale = parameter_scale(layout, self.model.speed);

        let mut x = initial.to_vec();
        bounds.project(&mut x);
        let mut p = SourceParams::unflatten(layout, &x);
        let mut lambda = s.initial_damping;

        for iter in 1..=s.max_iterations {
            let (r, jac) = problem.residuals_and_jacobian(&p);
            let cost = r.norm_squared();
            if cost < COST_FLOOR {
                return lm_outcome(p, true, iter - 1, cost);
            }

            let jtj = jac.transpose() * &jac;
            let neg_grad = -(jac.transpose() * &r);

            let mut accepted = None;
            for _ in 0..MAX_DAMPING_RETRIES {
                let mut a = jtj.clone();
                for i in 0..n {
                    a[(i, i)] += lambda * scale[i] * scale[i];
                }
                if let Some(delta) = a.lu().solve(&neg_grad) {
                    let mut trial: Vec<f64> = x.iter().zip(delta.iter()).map(|(xi, di)| xi + di).collect();
                    bounds.project(&mut trial);
                    let tp = SourceParams::unflatten(layout, &trial);
                    let trial_cost = problem.sum_of_squares(&tp);
                    if trial_cost.is_finite() && trial_cost < cost {
                        accepted = Some((trial, tp, trial_cost));
                        break;
                    }
                }
                lambda *= 10.0;
            }

            // No damping level reduces the cost: we are at a (local) minimum.
            let Some((trial, tp, trial_cost)) = accepted else {
                trace!(iter, cost, "LM stalled");
                return lm_outcome(p, true, iter, cost);
            };

            let step = scaled_norm(x.iter().zip(&trial).map(|(a, b)| b - a), &scale);
            let xnorm = scaled_norm(x.iter().copied(), &scale);
            x = trial;
            p = tp;
            lambda = (lambda / 10.0).max(MIN_DAMPING);
            trace!(iter, cost = trial_cost, lambda, "LM step accepted");

            if step <= s.step_tolerance * (xnorm + s.step_tolerance)
                || trial_cost < COST_FLOOR
                || cost - trial_cost <= s.cost_tolerance * cost
            {
                return lm_outcome(p, true, iter, trial_cost);
            }
        }

        let cost = problem.sum_of_squares(&p);
        lm_outcome(p, false, s.max_iterations, cost)
    }

    // ── Nelder-Mead ──────────────────────────────────────────────────────────

    fn nelder_mead(
        &self,
        problem: &TimingProblem<'_>,
        initial: SourceParams,
        constraints: &[Constraint],
    ) -> Result<RawSolve> {
        let layout = initial.layout();
        let scale = parameter_scale(layout, self.model.speed);

        // A raw guess slides down the far-field valley (source receding, t
        // falling), so the simplex is seeded at the bounded LM optimum.
        let warm = self.levenberg_marquardt(problem, initial, &self.lm_bounds(layout, constraints));
        trace!(cost = warm.cost, converged = warm.converged, "Nelder-Mead warm start");
        let start: Vec<f64> = warm.params.to_vec().iter().zip(&scale).map(|(x, d)| x * d).collect();
        let steps = simplex_steps(layout, &scale, self.settings.nm_step_m, self.settings.nm_step_s);

        let cost_fn = PenalisedObjective {
            model: self.model,
            observations: problem.observations.clone(),
            layout,
            scale: scale.clone(),
            penalties: self.penalties,
            constraints: constraints.to_vec(),
            weight: self.settings.penalty_weight,
        };

        let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(initial_simplex(&start, &steps))
            .with_sd_tolerance(self.settings.nm_sd_tolerance)
            .map_err(|e| LocatorError::Optimizer(e.to_string()))?;

        let max_iters = self.settings.nm_max_iterations;
        let res = Executor::new(cost_fn, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()
            .map_err(|e| LocatorError::Optimizer(e.to_string()))?;

        let converged = matches!(
            res.state.termination_status,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        let best = res.state.best_param
            .ok_or_else(|| LocatorError::Optimizer("Nelder-Mead returned no parameters".into()))?;
        let params = unscale(layout, &best, &scale);
        Ok(RawSolve {
            cost: problem.sum_of_squares(&params),
            params,
            converged,
            iterations: warm.iterations + res.state.iter,
            method: SolverMethod::NelderMead,
        })
    }

    // ── Post-processing ──────────────────────────────────────────────────────

    fn finish(&self, problem: &TimingProblem<'_>, raw: RawSolve, constraints: &[Constraint]) -> SolveResult {
        let mut params = raw.params;
        let mut clamped = Vec::new();

        if raw.converged {
            if self.settings.clamp_non_negative {
                for e in 0..params.emission_times.len() {
                    clamp_at_least(&mut params, ParamName::EmissionTime(e), 0.0, &mut clamped);
                }
                clamp_at_least(&mut params, ParamName::ClockBias, 0.0, &mut clamped);
            }
            if let Some(floor) = self.altitude_floor(constraints) {
                clamp_at_least(&mut params, ParamName::Z, floor, &mut clamped);
            }
            if !clamped.is_empty() {
                debug!(count = clamped.len(), "clamped converged parameters");
            }
        }

        SolveResult {
            cost: problem.sum_of_squares(&params),
            rms_residual: problem.rms(&params),
            params,
            status: if raw.converged { SolveStatus::Converged } else { SolveStatus::NotConverged },
            method: raw.method,
            iterations: raw.iterations,
            clamped,
        }
    }

    fn altitude_floor(&self, constraints: &[Constraint]) -> Option<f64> {
        constraints.iter()
            .filter_map(|c| match c {
                Constraint::AltitudeFloor(z) => Some(*z),
                _ => None,
            })
            .chain(self.penalties.altitude_floor)
            .reduce(f64::max)
    }
}

fn lm_outcome(params: SourceParams, converged: bool, iterations: usize, cost: f64) -> RawSolve {
    RawSolve {
        params,
        converged,
        iterations: iterations as u64,
        method: SolverMethod::LevenbergMarquardt,
        cost,
    }
}

fn scaled_norm(v: impl Iterator<Item = f64>, scale: &[f64]) -> f64 {
    v.zip(scale).map(|(a, d)| (a * d).powi(2)).sum::<f64>().sqrt()
}

fn clamp_at_least(p: &mut SourceParams, name: ParamName, floor: f64, log: &mut Vec<ClampEvent>) {
    if let Some(v) = p.get(name) {
        if v < floor {
            p.set(name, floor);
            log.push(ClampEvent { parameter: name, from: v, to: floor });
        }
    }
}

/// Soft limits expressed as hard bounds for the projecting LM
fn penalties_as_bounds(penalties: &SoftPenalties, layout: ParamLayout) -> Vec<Constraint> {
    let mut out = Vec::new();
    if let Some(floor) = penalties.altitude_floor {
        out.push(Constraint::AltitudeFloor(floor));
    }
    if let Some(max) = penalties.time_ceiling {
        out.extend((0..layout.events).map(|event| Constraint::EmissionTimeMax { event, max }));
    }
    out
}

fn unscale(layout: ParamLayout, u: &[f64], scale: &[f64]) -> SourceParams {
    let x: Vec<f64> = u.iter().zip(scale).map(|(ui, d)| ui / d).collect();
    SourceParams::unflatten(layout, &x)
}

// ── Nelder-Mead objective ─────────────────────────────────────────────────────

/// Penalised sum of squares over scaled parameters (positions in units of c·s).
struct PenalisedObjective {
    model: PropagationModel,
    observations: ObservationSet,
    layout: ParamLayout,
    scale: Vec<f64>,
    penalties: SoftPenalties,
    constraints: Vec<Constraint>,
    weight: f64,
}

impl CostFunction for PenalisedObjective {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        let p = unscale(self.layout, u, &self.scale);
        let problem = TimingProblem::new(self.model, &self.observations);
        Ok(objective(&problem, &p, &self.penalties) + violation_penalty(&self.constraints, &p, self.weight))
    }
}

/// Simplex edges in scaled units: `step_m` metres along position, `step_s`
/// seconds along every time component.
fn simplex_steps(layout: ParamLayout, scale: &[f64], step_m: f64, step_s: f64) -> Vec<f64> {
    (0..layout.dimension())
        .map(|i| {
            let step = if i < 3 { step_m } else { step_s };
            step * scale[i]
        })
        .collect()
}

/// Starting simplex: the point itself plus one vertex per axis, offset by that
/// axis' step.
fn initial_simplex(point: &[f64], steps: &[f64]) -> Vec<Vec<f64>> {
    let mut vertices = vec![point.to_vec()];
    for (i, step) in steps.iter().enumerate() {
        let mut v = point.to_vec();
        v[i] += step;
        vertices.push(v);
    }
    vertices
}

//! orchestrator.rs — Multi-source solving over a station network
//!
//! Each event (boom) is solved independently from the same starting guess;
//! one event failing never aborts the others. Variants:
//!   - `solve_all`:          one 4-parameter solve per event
//!   - `solve_augmented`:    same, before and after extra stations are added
//!   - `solve_joint`:        one shared position, one emission time per event
//!   - `solve_all_averaged`: Monte-Carlo trials under Gaussian timing noise

use boom_types::{Station, StationNetwork, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constraints::Constraint;
use crate::error::{LocatorError, Result};
use crate::params::SourceParams;
use crate::propagation::perturb_arrivals;
use crate::solver::{SolveResult, SolverDriver};

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Solved(SolveResult),
    NotConverged(SolveResult),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventReport {
    pub event: usize,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

impl EventReport {
    pub fn estimate(&self) -> Option<&SourceParams> {
        match &self.outcome {
            EventOutcome::Solved(r) => r.estimate(),
            _ => None,
        }
    }
}

/// Per-event outcomes of one batch, in event order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub events: Vec<EventReport>,
}

impl BatchReport {
    pub fn len(&self) -> usize { self.events.len() }
    pub fn is_empty(&self) -> bool { self.events.is_empty() }

    /// Converged events with their results
    pub fn successes(&self) -> impl Iterator<Item = (usize, &SolveResult)> {
        self.events.iter().filter_map(|r| match &r.outcome {
            EventOutcome::Solved(res) => Some((r.event, res)),
            _ => None,
        })
    }

    /// Events that did not converge or could not be attempted
    pub fn failures(&self) -> impl Iterator<Item = &EventReport> {
        self.events.iter().filter(|r| !matches!(r.outcome, EventOutcome::Solved(_)))
    }

    pub fn converged_count(&self) -> usize { self.successes().count() }

    /// Estimate per event, `None` where the event failed
    pub fn estimates(&self) -> Vec<Option<SourceParams>> {
        self.events.iter().map(|r| r.estimate().cloned()).collect()
    }
}

/// Independent reports for the base and the augmented network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedReport {
    pub baseline: BatchReport,
    pub augmented: BatchReport,
    pub added_stations: Vec<String>,
}

/// Trial-averaged estimate for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedEstimate {
    pub event: usize,
    pub position: Vec3,
    pub emission_time: f64,
    pub clock_bias: f64,
    pub converged_trials: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedReport {
    pub sigma: f64,
    pub trials: usize,
    /// `None` for events where no trial converged
    pub events: Vec<Option<AveragedEstimate>>,
}

// ── Locator ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MultiSourceLocator {
    pub driver: SolverDriver,
    /// Starting point for every per-event solve (single-event layout)
    pub initial_guess: SourceParams,
    pub constraints: Vec<Constraint>,
    /// Optional [min, max] emission-time window per event for the joint solve
    pub event_windows: Vec<Option<(f64, f64)>>,
}

impl MultiSourceLocator {
    pub fn new(driver: SolverDriver, initial_guess: SourceParams) -> Self {
        Self { driver, initial_guess, constraints: Vec::new(), event_windows: Vec::new() }
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_event_windows(mut self, windows: Vec<Option<(f64, f64)>>) -> Self {
        self.event_windows = windows;
        self
    }

    fn single_guess(&self) -> SourceParams {
        SourceParams::single(self.initial_guess.position, self.initial_guess.emission_time())
    }

    /// Solve every event independently.
    ///
    /// Errors only when the network itself is unusable (empty, or stations
    /// disagree on the number of events). Per-event problems, including an
    /// under-determined subset, land in the report as `Failed`.
    pub fn solve_all(&self, network: &StationNetwork) -> Result<BatchReport> {
        let events = network.event_count()?;
        let guess = self.single_guess();
        let mut report = BatchReport::default();

        for event in 0..events {
            let outcome = match network.observation_set(event)
                .map_err(LocatorError::from)
                .and_then(|obs| self.driver.solve(&guess, &obs, &self.constraints))
            {
                Ok(res) if res.is_converged() => EventOutcome::Solved(res),
                Ok(res) => {
                    debug!(event, iterations = res.iterations, "event did not converge");
                    EventOutcome::NotConverged(res)
                }
                Err(e) => {
                    debug!(event, "event failed: {e}");
                    EventOutcome::Failed { reason: e.to_string() }
                }
            };
            report.events.push(EventReport { event, outcome });
        }

        debug!(
            stations = network.len(),
            events,
            converged = report.converged_count(),
            "batch solved"
        );
        Ok(report)
    }

    /// Solve on `network`, then again with `extra` stations appended.
    /// The two reports share nothing; the input network is not modified.
    pub fn solve_augmented(&self, network: &StationNetwork, extra: Vec<Station>) -> Result<AugmentedReport> {
        let added_stations = extra.iter().map(|s| s.id().to_string()).collect();
        let baseline = self.solve_all(network)?;
        let bigger = network.with_stations(extra)?;
        let augmented = self.solve_all(&bigger)?;
        info!(
            before = baseline.converged_count(),
            after = augmented.converged_count(),
            stations = bigger.len(),
            "augmented network re-solved"
        );
        Ok(AugmentedReport { baseline, augmented, added_stations })
    }

    /// One position shared by all events, one emission time per event.
    pub fn solve_joint(&self, network: &StationNetwork) -> Result<SolveResult> {
        let obs = network.joint_observation_set()?;
        let events = obs.events();
        let guess = SourceParams::shared(
            self.initial_guess.position,
            vec![self.initial_guess.emission_time(); events],
        );

        let mut constraints = self.constraints.clone();
        for (event, window) in self.event_windows.iter().enumerate().take(events) {
            if let Some((min, max)) = *window {
                constraints.push(Constraint::EmissionTimeMin { event, min });
                constraints.push(Constraint::EmissionTimeMax { event, max });
            }
        }

        let res = self.driver.solve(&guess, &obs, &constraints)?;
        info!(events, status = ?res.status, rms = res.rms_residual, "joint solve finished");
        Ok(res)
    }

    /// Average converged estimates over `trials` noisy replays of the
    /// recorded arrivals.
    ///
    /// Each trial adds N(0, σ²) to every arrival and solves every event with
    /// the clock-bias layout, negative times and bias clamped to zero. Trials
    /// run in parallel; each draws from its own generator seeded from `rng`, so
    /// a fixed seed gives a fixed report.
    pub fn solve_all_averaged(
        &self,
        network: &StationNetwork,
        sigma: f64,
        trials: usize,
        rng: &mut impl Rng,
    ) -> Result<AveragedReport> {
        let events = network.event_count()?;
        let seeds: Vec<u64> = (0..trials).map(|_| rng.gen()).collect();

        let mut driver = self.driver.clone();
        driver.settings.clamp_non_negative = true;
        let guess = SourceParams::with_clock_bias(
            self.initial_guess.position,
            self.initial_guess.emission_time(),
            0.0,
        );

        let per_trial = seeds.par_iter()
            .map(|&seed| self.noisy_trial(&driver, &guess, network, sigma, seed))
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(events);
        for event in 0..events {
            let hits: Vec<&SourceParams> = per_trial.iter()
                .filter_map(|trial| trial[event].as_ref())
                .collect();
            if hits.is_empty() {
                warn!(event, trials, "no trial converged");
                out.push(None);
                continue;
            }
            let n = hits.len() as f64;
            let sum = hits.iter().fold(Vec3::zero(), |acc, p| acc.add(&p.position));
            out.push(Some(AveragedEstimate {
                event,
                position: sum.scale(1.0 / n),
                emission_time: hits.iter().map(|p| p.emission_time()).sum::<f64>() / n,
                clock_bias: hits.iter().map(|p| p.clock_bias.unwrap_or(0.0)).sum::<f64>() / n,
                converged_trials: hits.len(),
            }));
        }

        info!(sigma, trials, events, "averaged solve finished");
        Ok(AveragedReport { sigma, trials, events: out })
    }

    fn noisy_trial(
        &self,
        driver: &SolverDriver,
        guess: &SourceParams,
        network: &StationNetwork,
        sigma: f64,
        seed: u64,
    ) -> Result<Vec<Option<SourceParams>>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut table: Vec<Vec<f64>> = network.stations().iter()
            .map(|s| s.arrivals().to_vec())
            .collect();
        perturb_arrivals(&mut table, sigma, &mut rng);
        let noisy = StationNetwork::from_stations(
            network.stations().iter().zip(table)
                .map(|(s, arrivals)| s.replace_arrivals(arrivals))
                .collect(),
        )?;

        (0..noisy.event_count()?)
            .map(|event| -> Result<Option<SourceParams>> {
                let obs = noisy.observation_set(event)?;
                let res = driver.solve(guess, &obs, &self.constraints)?;
                Ok(res.estimate().cloned())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::PropagationModel;

    const SEVEN: [[f64; 3]; 7] = [
        [0.0, 0.0, 0.0],
        [1000.0, 0.0, 0.0],
        [0.0, 1000.0, 0.0],
        [500.0, 500.0, 500.0],
        [1000.0, 1000.0, 200.0],
        [800.0, 200.0, 50.0],
        [150.0, 850.0, 300.0],
    ];

    fn sources() -> (Vec<Vec3>, Vec<f64>) {
        (
            vec![
                Vec3::new(200.0, 300.0, 100.0),
                Vec3::new(600.0, 700.0, 250.0),
                Vec3::new(450.0, 150.0, 400.0),
            ],
            vec![5.0, 12.5, 0.75],
        )
    }

    fn network(count: usize) -> StationNetwork {
        let model = PropagationModel::new(340.0);
        let (src, times) = sources();
        let pos: Vec<Vec3> = SEVEN[..count].iter().map(|s| Vec3::from(*s)).collect();
        let table = model.synthesize_arrivals(&src, &times, &pos);
        StationNetwork::from_stations(
            pos.iter().enumerate()
                .map(|(i, p)| Station::new(format!("S{i}"), *p)
                    .with_arrivals(table.iter().map(|row| row[i]).collect()))
                .collect(),
        ).unwrap()
    }

    fn locator() -> MultiSourceLocator {
        MultiSourceLocator::new(
            SolverDriver::new(PropagationModel::new(340.0)),
            SourceParams::single(Vec3::new(500.0, 500.0, 300.0), 0.0),
        )
    }

    #[test]
    fn test_solve_all_recovers_every_event() {
        let report = locator().solve_all(&network(6)).unwrap();
        let (src, times) = sources();
        assert_eq!(report.len(), 3);
        assert_eq!(report.converged_count(), 3);
        assert_eq!(report.failures().count(), 0);
        for (e, est) in report.estimates().iter().enumerate() {
            let est = est.as_ref().unwrap();
            assert!(est.position.dist(&src[e]) < 1e-6);
            assert!((est.emission_time() - times[e]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_under_determined_events_are_isolated() {
        let report = locator().solve_all(&network(3)).unwrap();
        assert_eq!(report.len(), 3);
        assert_eq!(report.converged_count(), 0);
        assert!(report.failures().all(|r| matches!(r.outcome, EventOutcome::Failed { .. })));
    }

    #[test]
    fn test_augmented_network_is_independent() {
        let full = network(7);
        let base = full.subset(&[0, 1, 2, 3, 4]).unwrap();
        let extra = vec![full.stations()[5].clone(), full.stations()[6].clone()];
        let rep = locator().solve_augmented(&base, extra).unwrap();
        assert_eq!(base.len(), 5);
        assert_eq!(rep.added_stations, vec!["S5".to_string(), "S6".to_string()]);
        assert_eq!(rep.augmented.converged_count(), 3);
        assert_eq!(rep.baseline.len(), rep.augmented.len());
    }

    #[test]
    fn test_joint_solve_with_windows() {
        let model = PropagationModel::new(340.0);
        let src = Vec3::new(200.0, 300.0, 100.0);
        let times = [5.0, 20.0, 37.0, 61.0];
        let net = StationNetwork::from_stations(
            SEVEN[..6].iter().enumerate()
                .map(|(i, s)| {
                    let p = Vec3::from(*s);
                    Station::new(format!("S{i}"), p)
                        .with_arrivals(times.iter().map(|t| model.arrival(&src, *t, &p)).collect())
                })
                .collect(),
        ).unwrap();
        let loc = locator().with_event_windows(vec![
            Some((0.0, 30.0)), Some((0.0, 30.0)), Some((30.0, 60.0)), Some((60.0, 90.0)),
        ]);
        let res = loc.solve_joint(&net).unwrap();
        assert!(res.is_converged());
        let est = res.estimate().unwrap();
        assert!(est.position.dist(&src) < 1e-4);
        assert!((est.emission_times[3] - 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_averaged_is_reproducible() {
        let net = network(7);
        let loc = locator();
        let a = loc.solve_all_averaged(&net, 0.001, 8, &mut StdRng::seed_from_u64(5)).unwrap();
        let b = loc.solve_all_averaged(&net, 0.001, 8, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.events.len(), 3);
        let (src, _) = sources();
        let first = a.events[0].as_ref().unwrap();
        assert!(first.converged_trials > 0);
        assert!(first.position.dist(&src[0]) < 50.0);
    }

    #[test]
    fn test_empty_network_is_an_error() {
        assert!(matches!(
            locator().solve_all(&StationNetwork::new()),
            Err(LocatorError::Network(_))
        ));
    }
}

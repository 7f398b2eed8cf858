//! evaluator.rs — Scoring station subsets by estimation volatility
//!
//! A subset is scored by simulating booms it should be able to locate,
//! solving them, and comparing against the truth:
//!
//!   volatility = mean((true_pos − est_pos)²) + mean((true_t − est_t)²)
//!
//! Only converged events count. A subset where nothing converged scores +∞.
//!
//! `SubsetSearch` repeatedly draws random subsets until enough subsets of the
//! target size were collected, then reports the configuration that recurred
//! most often. `sweep_sizes` answers "how many stations" directly.

use std::collections::BTreeMap;

use boom_types::{StationNetwork, Vec3};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LocatorError, Result};
use crate::geometry::DistanceMetric;
use crate::orchestrator::MultiSourceLocator;
use crate::propagation::perturb_arrivals;

// ── Settings ──────────────────────────────────────────────────────────────────

/// How synthetic booms are generated for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    /// Corner of the box synthetic sources are drawn from (local metres)
    pub region_min: Vec3,
    pub region_max: Vec3,
    /// Every subset station must lie within this range of each source
    pub max_range: f64,
    pub range_metric: DistanceMetric,
    /// Redraws per source before giving up
    pub max_placement_attempts: usize,
    /// Booms simulated per evaluation
    pub events: usize,
    /// Emission times are drawn uniformly from [time_min, time_max)
    pub time_min: f64,
    pub time_max: f64,
    /// Gaussian timing noise added to synthetic arrivals (s)
    pub noise_sigma: f64,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            region_min: Vec3::new(0.0, 0.0, 0.0),
            region_max: Vec3::new(1000.0, 1000.0, 1000.0),
            max_range: 1000.0,
            range_metric: DistanceMetric::Horizontal,
            max_placement_attempts: 1000,
            events: 4,
            time_min: 0.0,
            time_max: 100.0,
            noise_sigma: 0.0,
        }
    }
}

/// Bounds of the random-subset search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub min_size: usize,
    pub max_size: usize,
    /// Size whose draws are collected; `max_size` when unset
    pub target_size: Option<usize>,
    /// Collected subsets needed before the search stops
    pub collections: usize,
    /// Hard cap on draws of any size
    pub max_draws: usize,
    /// Random subsets per size in `sweep_sizes`
    pub trials_per_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_size: 4,
            max_size: 7,
            target_size: None,
            collections: 7,
            max_draws: 10_000,
            trials_per_size: 20,
        }
    }
}

impl SearchSettings {
    pub fn target(&self) -> usize {
        self.target_size.unwrap_or(self.max_size)
    }
}

// ── Scores ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetScore {
    pub station_ids: Vec<String>,
    pub volatility: f64,
    pub position_mse: f64,
    pub time_mse: f64,
    pub converged_events: usize,
    /// Events left out of the score
    pub failed_events: Vec<usize>,
}

impl SubsetScore {
    pub fn size(&self) -> usize { self.station_ids.len() }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeStats {
    pub samples: usize,
    /// Mean over samples with finite volatility; +∞ if there are none
    pub mean_volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub draws: usize,
    pub collected: Vec<SubsetScore>,
    /// Most frequent membership among collected subsets that located an event
    pub best_configuration: Vec<String>,
    pub best_occurrences: usize,
    /// How often each station appears in the collected subsets
    pub membership_counts: BTreeMap<String, usize>,
    pub size_volatility: BTreeMap<usize, SizeStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub sizes: BTreeMap<usize, SizeStats>,
    /// Size with the lowest mean volatility
    pub best_size: Option<usize>,
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SubsetEvaluator {
    pub locator: MultiSourceLocator,
    pub settings: EvaluationSettings,
}

impl SubsetEvaluator {
    pub fn new(locator: MultiSourceLocator, settings: EvaluationSettings) -> Self {
        Self { locator, settings }
    }

    /// Draw one source inside the region that every station can hear.
    pub fn place_event(&self, stations: &[Vec3], rng: &mut impl Rng) -> Result<Vec3> {
        let s = &self.settings;
        for _ in 0..s.max_placement_attempts {
            let candidate = Vec3::new(
                draw(rng, s.region_min.x, s.region_max.x),
                draw(rng, s.region_min.y, s.region_max.y),
                draw(rng, s.region_min.z, s.region_max.z),
            );
            if stations.iter().all(|st| s.range_metric.distance(st, &candidate) < s.max_range) {
                return Ok(candidate);
            }
        }
        Err(LocatorError::DegenerateGeometry {
            attempts: s.max_placement_attempts,
            reason: format!("no source within {} m of all {} stations", s.max_range, stations.len()),
        })
    }

    /// Synthetic truth: `events` sources with emission times.
    pub fn draw_truth(&self, stations: &[Vec3], rng: &mut impl Rng) -> Result<(Vec<Vec3>, Vec<f64>)> {
        let mut sources = Vec::with_capacity(self.settings.events);
        let mut times = Vec::with_capacity(self.settings.events);
        for _ in 0..self.settings.events {
            sources.push(self.place_event(stations, rng)?);
            times.push(draw(rng, self.settings.time_min, self.settings.time_max));
        }
        Ok((sources, times))
    }

    /// Score `subset` against known sources.
    ///
    /// `arrivals` is the `[event][station]` table to solve from; when absent
    /// it is synthesized noise-free from the truth.
    pub fn evaluate(
        &self,
        subset: &StationNetwork,
        true_sources: &[Vec3],
        true_times: &[f64],
        arrivals: Option<&[Vec<f64>]>,
    ) -> Result<SubsetScore> {
        if true_sources.len() != true_times.len() {
            return Err(LocatorError::TruthMismatch { sources: true_sources.len(), times: true_times.len() });
        }
        if subset.is_empty() {
            return Err(LocatorError::InvalidSubset("no stations".into()));
        }
        let positions = subset.positions();
        let synthesized;
        let table = match arrivals {
            Some(t) => t,
            None => {
                synthesized = self.locator.driver.model.synthesize_arrivals(true_sources, true_times, &positions);
                synthesized.as_slice()
            }
        };
        if table.len() != true_sources.len() || table.iter().any(|row| row.len() != subset.len()) {
            return Err(LocatorError::InvalidSubset(format!(
                "arrival table must be {} events × {} stations",
                true_sources.len(),
                subset.len()
            )));
        }

        let recorded = StationNetwork::from_stations(
            subset.stations().iter().enumerate()
                .map(|(i, s)| s.replace_arrivals(table.iter().map(|row| row[i]).collect()))
                .collect(),
        )?;
        let report = self.locator.solve_all(&recorded)?;

        let mut pos_sq = 0.0;
        let mut time_sq = 0.0;
        let mut converged = 0usize;
        for (event, res) in report.successes() {
            let est = &res.params;
            pos_sq += est.position.sub(&true_sources[event]).norm_sq();
            time_sq += (est.effective_emission_time(0) - true_times[event]).powi(2);
            converged += 1;
        }
        let failed_events: Vec<usize> = report.failures().map(|r| r.event).collect();

        let (position_mse, time_mse) = if converged == 0 {
            (f64::INFINITY, f64::INFINITY)
        } else {
            (pos_sq / (3 * converged) as f64, time_sq / converged as f64)
        };

        Ok(SubsetScore {
            station_ids: subset.ids(),
            volatility: position_mse + time_mse,
            position_mse,
            time_mse,
            converged_events: converged,
            failed_events,
        })
    }

    /// Draw truth for `subset`, optionally add timing noise, then score it.
    pub fn evaluate_random(&self, subset: &StationNetwork, rng: &mut impl Rng) -> Result<SubsetScore> {
        let positions = subset.positions();
        let (sources, times) = self.draw_truth(&positions, rng)?;
        let mut table = self.locator.driver.model.synthesize_arrivals(&sources, &times, &positions);
        perturb_arrivals(&mut table, self.settings.noise_sigma, rng);
        self.evaluate(subset, &sources, &times, Some(&table))
    }

    /// Evaluate `trials` random subsets of every size in the search range and
    /// pick the size with the lowest mean volatility. Trials run in parallel,
    /// each on its own generator seeded from `rng`.
    pub fn sweep_sizes(
        &self,
        network: &StationNetwork,
        search: &SearchSettings,
        rng: &mut impl Rng,
    ) -> Result<SweepOutcome> {
        check_size_range(network, search)?;
        let jobs: Vec<(usize, u64)> = (search.min_size..=search.max_size)
            .flat_map(|size| (0..search.trials_per_size).map(move |_| size))
            .map(|size| (size, rng.gen()))
            .collect();

        let scored = jobs.par_iter()
            .map(|&(size, seed)| -> Result<(usize, Option<f64>)> {
                let mut trial_rng = StdRng::seed_from_u64(seed);
                let indices = sample(&mut trial_rng, network.len(), size).into_vec();
                let subset = network.subset(&indices)?;
                match self.evaluate_random(&subset, &mut trial_rng) {
                    Ok(score) => Ok((size, Some(score.volatility))),
                    Err(LocatorError::DegenerateGeometry { .. }) => Ok((size, None)),
                    Err(e) => Err(e),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut per_size: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for (size, vol) in scored {
            let entry = per_size.entry(size).or_default();
            if let Some(v) = vol {
                entry.push(v);
            }
        }
        let sizes: BTreeMap<usize, SizeStats> = per_size.into_iter()
            .map(|(size, vols)| (size, size_stats(&vols)))
            .collect();

        let best_size = sizes.iter()
            .filter(|(_, s)| s.mean_volatility.is_finite())
            .min_by(|a, b| a.1.mean_volatility.total_cmp(&b.1.mean_volatility))
            .map(|(size, _)| *size);

        info!(?best_size, trials = jobs.len(), "size sweep finished");
        Ok(SweepOutcome { sizes, best_size })
    }
}

// ── Search ────────────────────────────────────────────────────────────────────

pub struct SubsetSearch<'a> {
    evaluator: &'a SubsetEvaluator,
    settings: SearchSettings,
}

impl<'a> SubsetSearch<'a> {
    pub fn new(evaluator: &'a SubsetEvaluator, settings: SearchSettings) -> Self {
        Self { evaluator, settings }
    }

    /// Draw random subsets until `collections` of the target size were scored.
    ///
    /// Draws whose sources cannot be placed are skipped. Running out of
    /// `max_draws` first is reported as `DegenerateGeometry`.
    pub fn run(&self, network: &StationNetwork, rng: &mut impl Rng) -> Result<SearchOutcome> {
        let s = &self.settings;
        check_size_range(network, s)?;
        let target = s.target();

        let mut collected: Vec<SubsetScore> = Vec::new();
        let mut keys: Vec<Vec<usize>> = Vec::new();
        let mut by_size: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        let mut draws = 0usize;

        while collected.len() < s.collections {
            if draws >= s.max_draws {
                return Err(LocatorError::DegenerateGeometry {
                    attempts: draws,
                    reason: format!(
                        "collected {} of {} subsets of size {target}",
                        collected.len(),
                        s.collections
                    ),
                });
            }
            draws += 1;

            let size = rng.gen_range(s.min_size..=s.max_size);
            let mut indices = sample(rng, network.len(), size).into_vec();
            let subset = network.subset(&indices)?;
            let score = match self.evaluator.evaluate_random(&subset, rng) {
                Ok(score) => score,
                Err(LocatorError::DegenerateGeometry { .. }) => {
                    debug!(draw = draws, size, "placement failed, redrawing");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if score.volatility.is_finite() {
                by_size.entry(size).or_default().push(score.volatility);
            }
            if size == target {
                indices.sort_unstable();
                keys.push(indices);
                collected.push(score);
            }
        }

        let volatility: Vec<f64> = collected.iter().map(|c| c.volatility).collect();
        let (best_configuration, best_occurrences) = match most_frequent(&keys, &volatility) {
            Some((idx, count)) => (
                keys[idx].iter().map(|&i| network.stations()[i].id().to_string()).collect(),
                count,
            ),
            None => (Vec::new(), 0),
        };

        let mut membership_counts: BTreeMap<String, usize> =
            network.ids().into_iter().map(|id| (id, 0)).collect();
        for score in &collected {
            for id in &score.station_ids {
                *membership_counts.entry(id.clone()).or_default() += 1;
            }
        }

        let size_volatility = by_size.into_iter()
            .map(|(size, vols)| (size, size_stats(&vols)))
            .collect();

        if best_configuration.is_empty() {
            warn!(collected = collected.len(), "no collected subset located any event");
        }
        info!(draws, collected = collected.len(), best_occurrences, "subset search finished");

        Ok(SearchOutcome {
            draws,
            collected,
            best_configuration,
            best_occurrences,
            membership_counts,
            size_volatility,
        })
    }
}

fn draw(rng: &mut impl Rng, lo: f64, hi: f64) -> f64 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}

fn size_stats(vols: &[f64]) -> SizeStats {
    let mean_volatility = if vols.is_empty() {
        f64::INFINITY
    } else {
        vols.iter().sum::<f64>() / vols.len() as f64
    };
    SizeStats { samples: vols.len(), mean_volatility }
}

fn check_size_range(network: &StationNetwork, s: &SearchSettings) -> Result<()> {
    if s.min_size == 0 || s.min_size > s.max_size {
        return Err(LocatorError::InvalidSubset(format!("size range {}..={} is empty", s.min_size, s.max_size)));
    }
    if s.max_size > network.len() {
        return Err(LocatorError::InvalidSubset(format!(
            "size {} exceeds the {} available stations",
            s.max_size,
            network.len()
        )));
    }
    let target = s.target();
    if target < s.min_size || target > s.max_size {
        return Err(LocatorError::InvalidSubset(format!("target size {target} outside {}..={}", s.min_size, s.max_size)));
    }
    Ok(())
}

/// Index of the first key with the most occurrences, and that count. Draws
/// with non-finite volatility (nothing converged) do not vote.
fn most_frequent(keys: &[Vec<usize>], volatility: &[f64]) -> Option<(usize, usize)> {
    let voters: Vec<usize> = (0..keys.len())
        .filter(|&i| volatility.get(i).is_some_and(|v| v.is_finite()))
        .collect();
    let mut best: Option<(usize, usize)> = None;
    for &i in &voters {
        let count = voters.iter().filter(|&&j| keys[j] == keys[i]).count();
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((i, count));
        }
    }
    best
}

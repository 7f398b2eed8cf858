//! propagation.rs — Acoustic forward model
//!
//! A boom emitted at `t0` from `source` reaches a station at
//!
//!   t_arrival = t0 + dist(source, station) / c
//!
//! with c the propagation speed (m/s). The speed is a per-scenario setting
//! (340–343 m/s depending on air temperature) and fixed within a single solve.
//!
//! Also generates synthetic arrival tables, optionally with Gaussian timing
//! noise, for subset evaluation and robustness experiments.

use boom_types::Vec3;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::geometry::DistanceMetric;

/// Speed of sound used when nothing else is configured (m/s)
pub const DEFAULT_SPEED_MPS: f64 = 340.0;

/// Predicted arrival time at `station` for a boom at `source`, emitted at `emission_time`.
pub fn predicted_arrival(source: &Vec3, emission_time: f64, station: &Vec3, speed: f64) -> f64 {
    emission_time + source.dist(station) / speed
}

// ── Propagation model ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationModel {
    /// Propagation speed, m/s
    pub speed: f64,
    pub metric: DistanceMetric,
}

impl Default for PropagationModel {
    fn default() -> Self {
        Self { speed: DEFAULT_SPEED_MPS, metric: DistanceMetric::Full3d }
    }
}

impl PropagationModel {
    pub fn new(speed: f64) -> Self {
        Self { speed, ..Default::default() }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn distance(&self, source: &Vec3, station: &Vec3) -> f64 {
        self.metric.distance(source, station)
    }

    pub fn travel_time(&self, source: &Vec3, station: &Vec3) -> f64 {
        self.distance(source, station) / self.speed
    }

    pub fn arrival(&self, source: &Vec3, emission_time: f64, station: &Vec3) -> f64 {
        emission_time + self.travel_time(source, station)
    }

    /// ∂(travel time)/∂(source); zero when the source sits on the station
    pub fn travel_time_gradient(&self, source: &Vec3, station: &Vec3) -> [f64; 3] {
        let d = self.distance(source, station);
        if d < 1e-12 {
            return [0.0; 3];
        }
        let k = 1.0 / (d * self.speed);
        match self.metric {
            DistanceMetric::Full3d => [
                (source.x - station.x) * k,
                (source.y - station.y) * k,
                (source.z - station.z) * k,
            ],
            DistanceMetric::Horizontal => [
                (source.x - station.x) * k,
                (source.y - station.y) * k,
                0.0,
            ],
        }
    }

    /// Arrival table `[event][station]` for known sources.
    pub fn synthesize_arrivals(
        &self,
        sources: &[Vec3],
        emission_times: &[f64],
        stations: &[Vec3],
    ) -> Vec<Vec<f64>> {
        sources.iter().zip(emission_times)
            .map(|(src, &t0)| stations.iter().map(|st| self.arrival(src, t0, st)).collect())
            .collect()
    }
}

// ── Timing noise ──────────────────────────────────────────────────────────────

/// Add zero-mean Gaussian noise (σ seconds) to every arrival in place.
/// σ = 0 leaves the table untouched and draws nothing from `rng`.
pub fn perturb_arrivals(table: &mut [Vec<f64>], sigma: f64, rng: &mut impl Rng) {
    if sigma <= 0.0 { return; }
    let Ok(noise) = Normal::new(0.0, sigma) else { return };
    for row in table.iter_mut() {
        for t in row.iter_mut() {
            *t += noise.sample(rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_predicted_arrival() {
        let src = Vec3::new(0.0, 0.0, 0.0);
        let st = Vec3::new(340.0, 0.0, 0.0);
        assert!((predicted_arrival(&src, 2.0, &st, 340.0) - 3.0).abs() < 1e-12);
        assert_eq!(predicted_arrival(&src, 2.0, &src, 340.0), 2.0);
    }

    #[test]
    fn test_monotonic_in_distance() {
        let model = PropagationModel::new(343.0);
        let src = Vec3::new(100.0, -50.0, 900.0);
        let mut last = f64::NEG_INFINITY;
        for k in 0..50 {
            let st = Vec3::new(100.0 + 37.0 * k as f64, -50.0, 0.0);
            let t = model.arrival(&src, 1.5, &st);
            assert!(t > last, "arrival must grow with distance");
            last = t;
        }
    }

    #[test]
    fn test_horizontal_metric_ignores_altitude() {
        let model = PropagationModel::new(340.0).with_metric(DistanceMetric::Horizontal);
        let st = Vec3::new(340.0, 0.0, 0.0);
        let a = model.arrival(&Vec3::new(0.0, 0.0, 0.0), 0.0, &st);
        let b = model.arrival(&Vec3::new(0.0, 0.0, 5000.0), 0.0, &st);
        assert_eq!(a, b);
        assert_eq!(model.travel_time_gradient(&Vec3::new(0.0, 0.0, 9.0), &st)[2], 0.0);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let model = PropagationModel::new(340.0);
        let src = Vec3::new(120.0, 80.0, 400.0);
        let st = Vec3::new(-300.0, 250.0, 10.0);
        let g = model.travel_time_gradient(&src, &st);
        let h = 1e-4;
        let fd = (model.travel_time(&Vec3::new(src.x + h, src.y, src.z), &st)
            - model.travel_time(&Vec3::new(src.x - h, src.y, src.z), &st)) / (2.0 * h);
        assert!((g[0] - fd).abs() < 1e-10);
        assert_eq!(model.travel_time_gradient(&st, &st), [0.0; 3]);
    }

    #[test]
    fn test_synthesize_and_perturb() {
        let model = PropagationModel::default();
        let stations = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(680.0, 0.0, 0.0)];
        let table = model.synthesize_arrivals(&[Vec3::zero()], &[1.0], &stations);
        assert_eq!(table, vec![vec![1.0, 3.0]]);

        let mut rng = StdRng::seed_from_u64(7);
        let mut quiet = table.clone();
        perturb_arrivals(&mut quiet, 0.0, &mut rng);
        assert_eq!(quiet, table);

        let mut noisy = table.clone();
        perturb_arrivals(&mut noisy, 0.5, &mut rng);
        assert_ne!(noisy, table);
        assert!((noisy[0][0] - 1.0).abs() < 5.0);
    }
}

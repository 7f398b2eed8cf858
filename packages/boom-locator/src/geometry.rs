//! geometry.rs — Station geometry in a flat local frame
//!
//! All solver arithmetic happens in local Cartesian metres. Surveyed stations
//! usually come as longitude/latitude/altitude; those are projected with fixed
//! per-degree constants:
//!
//!   Δnorth = 111 263 m · Δlat
//!   Δeast  =  97 304 m · Δlon · cos(mean latitude)
//!
//! This is a flat-earth approximation. It holds over spans of a few tens of
//! kilometres and is NOT geodetically correct over larger areas.

use boom_types::{GeoPoint, Vec3};
use serde::{Deserialize, Serialize};

/// Metres per degree of latitude
pub const METERS_PER_DEG_LAT: f64 = 111_263.0;
/// Metres per degree of longitude before the cos(latitude) scaling
pub const METERS_PER_DEG_LON: f64 = 97_304.0;

// ── Distance ──────────────────────────────────────────────────────────────────

/// Which coordinates take part in station-to-source distances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// x, y and z
    #[default]
    Full3d,
    /// x and y only (altitude ignored)
    Horizontal,
}

impl DistanceMetric {
    pub fn distance(self, a: &Vec3, b: &Vec3) -> f64 {
        match self {
            DistanceMetric::Full3d => a.dist(b),
            DistanceMetric::Horizontal => a.dist_horizontal(b),
        }
    }
}

/// Euclidean distance over all three coordinates
pub fn distance(p1: &Vec3, p2: &Vec3) -> f64 {
    p1.dist(p2)
}

/// Approximate straight-line distance between two surveyed points (metres).
/// Horizontal separation uses the per-degree constants above, then altitude is
/// combined in quadrature.
pub fn geodetic_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let north = METERS_PER_DEG_LAT * (b.lat - a.lat);
    let mean_lat = 0.5 * (a.lat + b.lat);
    let east = METERS_PER_DEG_LON * (b.lon - a.lon) * mean_lat.to_radians().cos();
    let up = b.alt - a.alt;
    (north * north + east * east + up * up).sqrt()
}

// ── Local projection ──────────────────────────────────────────────────────────

/// Projects geodetic points to local metres around a fixed origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalProjection {
    pub origin: GeoPoint,
}

impl LocalProjection {
    pub fn new(origin: GeoPoint) -> Self { Self { origin } }

    /// Origin at the horizontal centroid of `points`, altitude zero.
    pub fn centered_on(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() { return None; }
        let n = points.len() as f64;
        let lon = points.iter().map(|p| p.lon).sum::<f64>() / n;
        let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
        Some(Self::new(GeoPoint::new(lon, lat, 0.0)))
    }

    pub fn project(&self, p: &GeoPoint) -> Vec3 {
        let mean_lat = 0.5 * (p.lat + self.origin.lat);
        Vec3::new(
            METERS_PER_DEG_LON * (p.lon - self.origin.lon) * mean_lat.to_radians().cos(),
            METERS_PER_DEG_LAT * (p.lat - self.origin.lat),
            p.alt - self.origin.alt,
        )
    }

    /// Exact inverse of [`project`](Self::project): latitude first, which
    /// fixes the mean latitude used for the longitude scale.
    pub fn unproject(&self, v: &Vec3) -> GeoPoint {
        let lat = self.origin.lat + v.y / METERS_PER_DEG_LAT;
        let mean_lat = 0.5 * (lat + self.origin.lat);
        let lon = self.origin.lon + v.x / (METERS_PER_DEG_LON * mean_lat.to_radians().cos());
        GeoPoint::new(lon, lat, v.z + self.origin.alt)
    }
}

// ── Pairwise distances ────────────────────────────────────────────────────────

/// Symmetric n×n distance table, computed once per network.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    d: Vec<f64>,
}

impl DistanceMatrix {
    pub fn new(positions: &[Vec3], metric: DistanceMetric) -> Self {
        let n = positions.len();
        let mut d = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let dij = metric.distance(&positions[i], &positions[j]);
                d[i * n + j] = dij;
                d[j * n + i] = dij;
            }
        }
        Self { n, d }
    }

    pub fn len(&self) -> usize { self.n }
    pub fn is_empty(&self) -> bool { self.n == 0 }

    pub fn get(&self, i: usize, j: usize) -> f64 { self.d[i * self.n + j] }

    /// Sum of distances from `i` to every index in `set`
    pub fn sum_to(&self, i: usize, set: &[usize]) -> f64 {
        set.iter().map(|&j| self.get(i, j)).sum()
    }

    /// Sum over all unordered pairs in `set`
    pub fn pairwise_sum(&self, set: &[usize]) -> f64 {
        let mut total = 0.0;
        for (a, &i) in set.iter().enumerate() {
            for &j in &set[a + 1..] {
                total += self.get(i, j);
            }
        }
        total
    }

    /// Farthest pair (i < j). Ties keep the first pair in row-major order.
    pub fn farthest_pair(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                let dij = self.get(i, j);
                if best.map_or(true, |(_, _, b)| dij > b) {
                    best = Some((i, j, dij));
                }
            }
        }
        best.map(|(i, j, _)| (i, j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_selection() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(30.0, 40.0, 120.0);
        assert_eq!(DistanceMetric::Full3d.distance(&a, &b), 130.0);
        assert_eq!(DistanceMetric::Horizontal.distance(&a, &b), 50.0);
        assert_eq!(distance(&a, &b), 130.0);
    }

    #[test]
    fn test_geodetic_distance_uses_degree_constants() {
        let a = GeoPoint::new(110.0, 0.0, 0.0);
        let north = GeoPoint::new(110.0, 1.0, 0.0);
        assert!((geodetic_distance(&a, &north) - METERS_PER_DEG_LAT).abs() < 1e-6);

        // On the equator the longitude scale is unreduced
        let east = GeoPoint::new(111.0, 0.0, 0.0);
        assert!((geodetic_distance(&a, &east) - METERS_PER_DEG_LON).abs() < 1e-6);

        let up = GeoPoint::new(110.0, 0.0, 500.0);
        assert!((geodetic_distance(&a, &up) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_round_trip() {
        let proj = LocalProjection::new(GeoPoint::new(110.4, 27.5, 0.0));
        let p = GeoPoint::new(110.241, 27.204, 824.0);
        let local = proj.project(&p);
        let back = proj.unproject(&local);
        assert!((back.lon - p.lon).abs() < 1e-12);
        assert!((back.lat - p.lat).abs() < 1e-12);
        assert!((back.alt - p.alt).abs() < 1e-9);
        // Projected horizontal separation matches the direct approximation
        let d = local.dist(&proj.project(&GeoPoint::new(110.4, 27.5, 0.0)));
        let direct = geodetic_distance(&p, &proj.origin);
        assert!((d - direct).abs() < 1e-6);
    }

    #[test]
    fn test_centered_projection() {
        let pts = [GeoPoint::new(110.0, 27.0, 10.0), GeoPoint::new(111.0, 28.0, 20.0)];
        let proj = LocalProjection::centered_on(&pts).unwrap();
        assert!((proj.origin.lon - 110.5).abs() < 1e-12);
        assert!((proj.origin.lat - 27.5).abs() < 1e-12);
        assert!(LocalProjection::centered_on(&[]).is_none());
    }

    #[test]
    fn test_distance_matrix() {
        let pts = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(3.0, 4.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
        ];
        let m = DistanceMatrix::new(&pts, DistanceMetric::Full3d);
        assert_eq!(m.len(), 3);
        assert_eq!(m.get(0, 1), 5.0);
        assert_eq!(m.get(1, 0), 5.0);
        assert_eq!(m.get(2, 2), 0.0);
        assert_eq!(m.farthest_pair(), Some((0, 2)));
        assert_eq!(m.sum_to(0, &[1, 2]), 15.0);
        assert!((m.pairwise_sum(&[0, 1, 2]) - (5.0 + 10.0 + 65f64.sqrt())).abs() < 1e-12);
        assert_eq!(DistanceMatrix::new(&pts[..1], DistanceMetric::Full3d).farthest_pair(), None);
    }
}

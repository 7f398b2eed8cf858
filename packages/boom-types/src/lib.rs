//! # boom-types
//!
//! Shared station and geometry structures for the sonic-boom locator.
//!
//! These types are used by:
//! - `boom-locator` library: solver input (observation sets) and subset planning
//! - `boom-loc` binary: station files are deserialized straight into [`Station`]s
//!
//! ## Coordinate Conventions
//!
//! - **Local frame**: right-handed Cartesian, metres. X = East, Y = North, Z = Up.
//! - **Geodetic input**: longitude / latitude in degrees, altitude in metres.
//!   Projection into the local frame lives in `boom_locator::geometry`.
//!
//! ## Invariants
//! - A station's position never changes after construction.
//! - Station ids are unique within a [`StationNetwork`].
//! - Every station of a network carries the same number of arrival times
//!   (one per event) whenever events are solved jointly.

use serde::{Deserialize, Serialize};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("duplicate station id '{0}'")]
    DuplicateStation(String),
    #[error("unknown station id '{0}'")]
    UnknownStation(String),
    #[error("station '{id}' has {found} arrival times, expected {expected}")]
    ArrivalCountMismatch {
        id: String,
        expected: usize,
        found: usize,
    },
    #[error("event index {event} out of range ({events} events recorded)")]
    EventOutOfRange { event: usize, events: usize },
    #[error("station index {index} out of range ({len} stations)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("station network is empty")]
    Empty,
}

// ── 3D Vector ─────────────────────────────────────────────────────────────────

/// 3D vector in the local frame (metres)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,  // East
    pub y: f64,  // North
    pub z: f64,  // Up
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self { Self { x, y, z } }
    pub fn zero() -> Self { Self { x: 0.0, y: 0.0, z: 0.0 } }

    /// Straight-line distance
    pub fn dist(&self, other: &Vec3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    /// Distance in the horizontal plane (altitude ignored)
    pub fn dist_horizontal(&self, other: &Vec3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
    pub fn scale(&self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }
    pub fn norm_sq(&self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
    pub fn to_array(&self) -> [f64; 3] { [self.x, self.y, self.z] }
}

impl From<[f64; 3]> for Vec3 {
    fn from(a: [f64; 3]) -> Self { Vec3::new(a[0], a[1], a[2]) }
}

/// Geodetic point as surveyed (degrees, metres)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64, alt: f64) -> Self { Self { lon, lat, alt } }
}

// ── Station ───────────────────────────────────────────────────────────────────

/// A fixed ground receiver and the arrival times it recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    id: String,
    position: Vec3,
    /// Observed arrival time per event, seconds (index = event index)
    #[serde(default)]
    arrivals: Vec<f64>,
}

impl Station {
    pub fn new(id: impl Into<String>, position: Vec3) -> Self {
        Self { id: id.into(), position, arrivals: Vec::new() }
    }

    pub fn with_arrivals(mut self, arrivals: Vec<f64>) -> Self {
        self.arrivals = arrivals;
        self
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn position(&self) -> Vec3 { self.position }
    pub fn arrivals(&self) -> &[f64] { &self.arrivals }
    pub fn arrival(&self, event: usize) -> Option<f64> { self.arrivals.get(event).copied() }

    /// Same station, different recordings (synthetic or noisy replays)
    pub fn replace_arrivals(&self, arrivals: Vec<f64>) -> Station {
        Station { id: self.id.clone(), position: self.position, arrivals }
    }
}

// ── Observations (solver input) ───────────────────────────────────────────────

/// One station's contribution to a solve: where it is and what it heard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    pub position: Vec3,
    /// One arrival per jointly solved event (length 1 for a single-event solve)
    pub arrivals: Vec<f64>,
}

/// The unit of input to one solver invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    events: usize,
    observations: Vec<Observation>,
}

impl ObservationSet {
    /// Build from raw observations; every observation must carry `events` arrivals.
    pub fn new(events: usize, observations: Vec<Observation>) -> Result<Self, NetworkError> {
        for o in &observations {
            if o.arrivals.len() != events {
                return Err(NetworkError::ArrivalCountMismatch {
                    id: o.station_id.clone(),
                    expected: events,
                    found: o.arrivals.len(),
                });
            }
        }
        Ok(Self { events, observations })
    }

    pub fn events(&self) -> usize { self.events }
    pub fn observations(&self) -> &[Observation] { &self.observations }
    pub fn station_count(&self) -> usize { self.observations.len() }

    /// Total scalar measurements (stations × events)
    pub fn measurement_count(&self) -> usize { self.observations.len() * self.events }
}

// ── Station network ───────────────────────────────────────────────────────────

/// Ordered set of stations with unique ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationNetwork {
    stations: Vec<Station>,
}

impl StationNetwork {
    pub fn new() -> Self { Self { stations: Vec::new() } }

    pub fn from_stations(stations: Vec<Station>) -> Result<Self, NetworkError> {
        let mut net = Self::new();
        for s in stations { net.insert(s)?; }
        Ok(net)
    }

    pub fn insert(&mut self, station: Station) -> Result<(), NetworkError> {
        if self.get(station.id()).is_some() {
            return Err(NetworkError::DuplicateStation(station.id.clone()));
        }
        self.stations.push(station);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.id == id)
    }
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.stations.iter().position(|s| s.id == id)
    }

    pub fn stations(&self) -> &[Station] { &self.stations }
    pub fn len(&self) -> usize { self.stations.len() }
    pub fn is_empty(&self) -> bool { self.stations.is_empty() }
    pub fn ids(&self) -> Vec<String> { self.stations.iter().map(|s| s.id.clone()).collect() }
    pub fn positions(&self) -> Vec<Vec3> { self.stations.iter().map(|s| s.position).collect() }

    /// Number of events recorded; fails if stations disagree.
    pub fn event_count(&self) -> Result<usize, NetworkError> {
        let first = self.stations.first().ok_or(NetworkError::Empty)?;
        let expected = first.arrivals.len();
        for s in &self.stations {
            if s.arrivals.len() != expected {
                return Err(NetworkError::ArrivalCountMismatch {
                    id: s.id.clone(),
                    expected,
                    found: s.arrivals.len(),
                });
            }
        }
        Ok(expected)
    }

    /// Stations at `indices`, in that order. Duplicate indices are rejected.
    pub fn subset(&self, indices: &[usize]) -> Result<StationNetwork, NetworkError> {
        let mut out = StationNetwork::new();
        for &i in indices {
            let s = self.stations.get(i)
                .ok_or(NetworkError::IndexOutOfRange { index: i, len: self.stations.len() })?;
            out.insert(s.clone())?;
        }
        Ok(out)
    }

    /// Stations with the given ids, in that order
    pub fn subset_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Result<StationNetwork, NetworkError> {
        let indices = ids.iter()
            .map(|id| self.index_of(id.as_ref())
                .ok_or_else(|| NetworkError::UnknownStation(id.as_ref().to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        self.subset(&indices)
    }

    /// A new network with `extra` stations appended; `self` is left untouched.
    pub fn with_stations(&self, extra: Vec<Station>) -> Result<StationNetwork, NetworkError> {
        let mut out = self.clone();
        for s in extra { out.insert(s)?; }
        Ok(out)
    }

    /// Single-event observation set for `event`.
    pub fn observation_set(&self, event: usize) -> Result<ObservationSet, NetworkError> {
        let events = self.event_count()?;
        if event >= events {
            return Err(NetworkError::EventOutOfRange { event, events });
        }
        let observations = self.stations.iter()
            .map(|s| Observation {
                station_id: s.id.clone(),
                position: s.position,
                arrivals: vec![s.arrivals[event]],
            })
            .collect();
        ObservationSet::new(1, observations)
    }

    /// All events at once (shared-position joint solve).
    pub fn joint_observation_set(&self) -> Result<ObservationSet, NetworkError> {
        let events = self.event_count()?;
        let observations = self.stations.iter()
            .map(|s| Observation {
                station_id: s.id.clone(),
                position: s.position,
                arrivals: s.arrivals.clone(),
            })
            .collect();
        ObservationSet::new(events, observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net() -> StationNetwork {
        StationNetwork::from_stations(vec![
            Station::new("A", Vec3::new(0.0, 0.0, 0.0)).with_arrivals(vec![1.0, 2.0]),
            Station::new("B", Vec3::new(3.0, 4.0, 0.0)).with_arrivals(vec![1.5, 2.5]),
            Station::new("C", Vec3::new(0.0, 0.0, 12.0)).with_arrivals(vec![1.2, 2.2]),
        ]).unwrap()
    }

    #[test]
    fn test_distances() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 12.0);
        assert_eq!(a.dist(&b), 13.0);
        assert_eq!(a.dist_horizontal(&b), 5.0);
        assert_eq!(b.dist(&b), 0.0);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut n = net();
        let err = n.insert(Station::new("B", Vec3::zero())).unwrap_err();
        assert_eq!(err, NetworkError::DuplicateStation("B".into()));
        assert_eq!(n.len(), 3);
    }

    #[test]
    fn test_event_count_mismatch() {
        let mut n = net();
        n.insert(Station::new("D", Vec3::zero()).with_arrivals(vec![1.0])).unwrap();
        assert!(matches!(n.event_count(), Err(NetworkError::ArrivalCountMismatch { .. })));
    }

    #[test]
    fn test_observation_sets() {
        let n = net();
        let obs = n.observation_set(1).unwrap();
        assert_eq!(obs.events(), 1);
        assert_eq!(obs.observations()[1].arrivals, vec![2.5]);
        assert!(matches!(n.observation_set(2), Err(NetworkError::EventOutOfRange { .. })));

        let joint = n.joint_observation_set().unwrap();
        assert_eq!(joint.events(), 2);
        assert_eq!(joint.measurement_count(), 6);
    }

    #[test]
    fn test_subset_and_augment() {
        let n = net();
        let sub = n.subset(&[2, 0]).unwrap();
        assert_eq!(sub.ids(), vec!["C".to_string(), "A".to_string()]);
        assert!(n.subset(&[0, 0]).is_err());
        assert!(n.subset(&[5]).is_err());

        let by_id = n.subset_by_ids(&["B"]).unwrap();
        assert_eq!(by_id.len(), 1);
        assert!(matches!(n.subset_by_ids(&["Z"]), Err(NetworkError::UnknownStation(_))));

        let bigger = n.with_stations(vec![Station::new("H", Vec3::zero())]).unwrap();
        assert_eq!(bigger.len(), 4);
        assert_eq!(n.len(), 3);
    }

    #[test]
    fn test_station_deserializes_from_json() {
        let s: Station = serde_json::from_str(
            r#"{"id":"A","position":{"x":1.0,"y":2.0,"z":3.0},"arrivals":[4.0]}"#,
        ).unwrap();
        assert_eq!(s.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(s.arrival(0), Some(4.0));
    }
}

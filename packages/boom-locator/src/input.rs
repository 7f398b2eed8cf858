//! input.rs — Station files
//!
//! TOML or JSON (chosen by extension), one record per station:
//!
//! ```toml
//! frame = "geodetic"            # or "cartesian" (default)
//! # origin = [110.4, 27.6, 0.0] # optional projection origin (lon, lat, alt)
//!
//! [[stations]]
//! id = "A"
//! coords = [110.241, 27.204, 824.0]
//! arrivals = [100.767, 164.229, 214.850, 270.065]
//! ```
//!
//! Geodetic coordinates are projected into the local frame; the projection is
//! returned so estimates can be mapped back.

use std::path::{Path, PathBuf};

use boom_types::{GeoPoint, NetworkError, Station, StationNetwork, Vec3};
use serde::{Deserialize, Serialize};

use crate::geometry::LocalProjection;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid TOML station file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON station file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported station file extension '{0}' (expected .toml or .json)")]
    UnsupportedFormat(String),
    #[error("station file lists no stations")]
    NoStations,
    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// coords = [x, y, z] in local metres
    #[default]
    Cartesian,
    /// coords = [lon, lat, alt] in degrees / metres
    Geodetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self, InputError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Ok(FileFormat::Toml),
            "json" => Ok(FileFormat::Json),
            _ => Err(InputError::UnsupportedFormat(ext)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: String,
    pub coords: [f64; 3],
    #[serde(default)]
    pub arrivals: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationFile {
    #[serde(default)]
    pub frame: Frame,
    #[serde(default)]
    pub origin: Option<[f64; 3]>,
    pub stations: Vec<StationRecord>,
}

/// Stations in the local frame, plus the projection used (geodetic input only)
#[derive(Debug, Clone)]
pub struct LoadedNetwork {
    pub network: StationNetwork,
    pub projection: Option<LocalProjection>,
}

impl StationFile {
    pub fn parse(text: &str, format: FileFormat) -> Result<Self, InputError> {
        Ok(match format {
            FileFormat::Toml => toml::from_str(text)?,
            FileFormat::Json => serde_json::from_str(text)?,
        })
    }

    pub fn load(path: &Path) -> Result<Self, InputError> {
        let format = FileFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)
            .map_err(|source| InputError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&text, format)
    }

    /// Build a network in local metres. A geodetic file without an explicit
    /// origin is projected around the centroid of its stations.
    pub fn into_network(self) -> Result<LoadedNetwork, InputError> {
        if self.stations.is_empty() {
            return Err(InputError::NoStations);
        }
        let projection = match self.frame {
            Frame::Cartesian => None,
            Frame::Geodetic => match self.origin {
                Some([lon, lat, alt]) => Some(LocalProjection::new(GeoPoint::new(lon, lat, alt))),
                None => {
                    let points: Vec<GeoPoint> = self.stations.iter()
                        .map(|r| GeoPoint::new(r.coords[0], r.coords[1], r.coords[2]))
                        .collect();
                    LocalProjection::centered_on(&points)
                }
            },
        };

        let stations = self.stations.into_iter()
            .map(|r| {
                let position = match &projection {
                    Some(p) => p.project(&GeoPoint::new(r.coords[0], r.coords[1], r.coords[2])),
                    None => Vec3::from(r.coords),
                };
                Station::new(r.id, position).with_arrivals(r.arrivals)
            })
            .collect();

        Ok(LoadedNetwork { network: StationNetwork::from_stations(stations)?, projection })
    }
}

/// Load and project a station file in one step
pub fn load_network(path: &Path) -> Result<LoadedNetwork, InputError> {
    StationFile::load(path)?.into_network()
}

//! Station-subset selection by geometry alone (no solves).
//!
//! - [`greedy`]: deterministic farthest-point spread
//! - [`genetic`]: bit-vector genetic search maximising pairwise spread

pub mod genetic;
pub mod greedy;

use boom_types::StationNetwork;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LocatorError, Result};
use crate::geometry::{DistanceMatrix, DistanceMetric};
use genetic::{GeneticConfig, GeneticSearch};
use greedy::greedy_spread;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Greedy,
    Genetic,
}

/// Chosen stations and how spread out they are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub strategy: SelectionStrategy,
    pub indices: Vec<usize>,
    pub station_ids: Vec<String>,
    /// Sum of pairwise distances between the chosen stations (m)
    pub spread: f64,
}

/// Pick `count` stations from `network`.
///
/// The genetic strategy is constrained to exactly `count` members; if no
/// generation ever produced such a chromosome the call fails.
pub fn select_stations(
    network: &StationNetwork,
    count: usize,
    strategy: SelectionStrategy,
    metric: DistanceMetric,
    genetic: &GeneticConfig,
    rng: &mut impl Rng,
) -> Result<Selection> {
    let distances = DistanceMatrix::new(&network.positions(), metric);
    let indices = match strategy {
        SelectionStrategy::Greedy => greedy_spread(&distances, count)?,
        SelectionStrategy::Genetic => {
            let config = GeneticConfig { target_size: Some(count), ..genetic.clone() };
            let outcome = GeneticSearch::new(&distances, config).run(rng)?;
            let picked = outcome.selected();
            if picked.len() != count {
                return Err(LocatorError::InvalidSubset(format!(
                    "genetic search found no subset of {count} stations"
                )));
            }
            picked
        }
    };

    let spread = distances.pairwise_sum(&indices);
    let station_ids = indices.iter().map(|&i| network.stations()[i].id().to_string()).collect();
    info!(?strategy, count, spread, "stations selected");
    Ok(Selection { strategy, indices, station_ids, spread })
}

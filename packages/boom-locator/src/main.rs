//! main.rs — boom-loc command-line entry point
//!
//! Subcommands:
//!   locate  solve every recorded event (optionally joint, augmented or noise-averaged)
//!   select  pick K well-spread stations (greedy or genetic)
//!   plan    random subset search for the most reliable configuration
//!   sweep   mean volatility per station count
//!
//! Results go to stdout as JSON; logs go to stderr (RUST_LOG, default
//! boom_locator=info).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tracing::info;

use boom_locator::config::LocatorConfig;
use boom_locator::evaluator::SubsetSearch;
use boom_locator::geometry::LocalProjection;
use boom_locator::input::{load_network, Frame, LoadedNetwork, StationFile};
use boom_locator::search::{select_stations, SelectionStrategy};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "boom-loc", about = "Sonic-boom TOA locator and station planner")]
struct Args {
    /// Config file path (built-in defaults if missing)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,
    /// Random seed, overrides the config file
    #[arg(long, global = true)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate every event recorded in a station file
    Locate {
        /// Station file (.toml or .json)
        #[arg(long)]
        stations: PathBuf,
        /// Extra stations; solve before and after adding them
        #[arg(long)]
        extra: Option<PathBuf>,
        /// One shared position with a per-event emission time
        #[arg(long)]
        joint: bool,
        /// Average over noisy replays with this timing sigma (s)
        #[arg(long)]
        noise_sigma: Option<f64>,
        /// Monte-Carlo trials for --noise-sigma
        #[arg(long, default_value = "100")]
        trials: usize,
    },
    /// Pick well-spread stations from geometry alone
    Select {
        #[arg(long)]
        stations: PathBuf,
        /// How many stations to keep
        #[arg(long)]
        count: usize,
        #[arg(long, value_enum, default_value_t = SelectionStrategy::Greedy)]
        strategy: SelectionStrategy,
    },
    /// Random subset search for the most frequent reliable configuration
    Plan {
        #[arg(long)]
        stations: PathBuf,
    },
    /// Mean volatility per subset size
    Sweep {
        #[arg(long)]
        stations: PathBuf,
    },
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boom_locator=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let cfg = LocatorConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let mut rng = match args.seed.or(cfg.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!(
        "🔊 boom-loc starting: c = {} m/s, method {:?}",
        cfg.propagation.speed, cfg.solver.settings.method
    );

    let output = match args.command {
        Command::Locate { stations, extra, joint, noise_sigma, trials } => {
            let loaded = load_stations(&stations)?;
            let locator = cfg.locator();
            if joint {
                let res = locator.solve_joint(&loaded.network).context("joint solve")?;
                let geodetic = loaded.projection.map(|p| p.unproject(&res.params.position));
                json!({ "mode": "joint", "result": res, "geodetic": geodetic })
            } else if let Some(sigma) = noise_sigma {
                let report = locator
                    .solve_all_averaged(&loaded.network, sigma, trials, &mut rng)
                    .context("averaged solve")?;
                json!({ "mode": "averaged", "report": report })
            } else if let Some(extra) = extra {
                let added = load_extra(&extra, loaded.projection.as_ref())?;
                let report = locator
                    .solve_augmented(&loaded.network, added.network.stations().to_vec())
                    .context("augmented solve")?;
                json!({ "mode": "augmented", "report": report })
            } else {
                let report = locator.solve_all(&loaded.network).context("batch solve")?;
                let geodetic: Vec<_> = report.estimates().iter()
                    .map(|e| match (e, &loaded.projection) {
                        (Some(p), Some(proj)) => Some(proj.unproject(&p.position)),
                        _ => None,
                    })
                    .collect();
                info!(
                    "📍 {}/{} events located",
                    report.converged_count(), report.len()
                );
                json!({ "mode": "per_event", "report": report, "geodetic": geodetic })
            }
        }
        Command::Select { stations, count, strategy } => {
            let loaded = load_stations(&stations)?;
            let selection = select_stations(
                &loaded.network, count, strategy, cfg.propagation.metric, &cfg.genetic, &mut rng,
            )
            .context("station selection")?;
            json!({ "selection": selection })
        }
        Command::Plan { stations } => {
            let loaded = load_stations(&stations)?;
            let evaluator = cfg.evaluator();
            let outcome = SubsetSearch::new(&evaluator, cfg.search.clone())
                .run(&loaded.network, &mut rng)
                .context("subset search")?;
            info!(
                "🗺  best configuration {:?} ({} of {} collected)",
                outcome.best_configuration, outcome.best_occurrences, outcome.collected.len()
            );
            json!({ "plan": outcome })
        }
        Command::Sweep { stations } => {
            let loaded = load_stations(&stations)?;
            let outcome = cfg.evaluator()
                .sweep_sizes(&loaded.network, &cfg.search, &mut rng)
                .context("size sweep")?;
            json!({ "sweep": outcome })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_stations(path: &Path) -> Result<LoadedNetwork> {
    let loaded = load_network(path)
        .with_context(|| format!("loading stations from {}", path.display()))?;
    info!("📡 {} stations loaded from {}", loaded.network.len(), path.display());
    Ok(loaded)
}

/// Extra stations share the primary file's projection so both land in one frame.
fn load_extra(path: &Path, projection: Option<&LocalProjection>) -> Result<LoadedNetwork> {
    let mut file = StationFile::load(path)
        .with_context(|| format!("loading extra stations from {}", path.display()))?;
    if let (Frame::Geodetic, None, Some(p)) = (file.frame, file.origin, projection) {
        file.origin = Some([p.origin.lon, p.origin.lat, p.origin.alt]);
    }
    file.into_network()
        .with_context(|| format!("building extra stations from {}", path.display()))
}

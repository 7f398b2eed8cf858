//! End-to-end solving scenarios against known sources.

use boom_locator::error::LocatorError;
use boom_locator::orchestrator::MultiSourceLocator;
use boom_locator::params::SourceParams;
use boom_locator::propagation::{perturb_arrivals, PropagationModel};
use boom_locator::solver::SolverDriver;
use boom_types::{Station, StationNetwork, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;

const SPEED: f64 = 340.0;

const STATIONS: [[f64; 3]; 7] = [
    [0.0, 0.0, 0.0],
    [1000.0, 0.0, 0.0],
    [0.0, 1000.0, 0.0],
    [500.0, 500.0, 500.0],
    [1000.0, 1000.0, 200.0],
    [800.0, 200.0, 50.0],
    [150.0, 850.0, 300.0],
];

fn positions(pts: &[[f64; 3]]) -> Vec<Vec3> {
    pts.iter().map(|p| Vec3::from(*p)).collect()
}

/// Network whose arrivals are the `[event][station]` table
fn network_from_table(pos: &[Vec3], table: &[Vec<f64>]) -> StationNetwork {
    StationNetwork::from_stations(
        pos.iter().enumerate()
            .map(|(i, p)| Station::new(format!("S{i}"), *p)
                .with_arrivals(table.iter().map(|row| row[i]).collect()))
            .collect(),
    ).unwrap()
}

fn locator(guess: Vec3) -> MultiSourceLocator {
    MultiSourceLocator::new(
        SolverDriver::new(PropagationModel::new(SPEED)),
        SourceParams::single(guess, 0.0),
    )
}

#[test]
fn four_station_reference_scenario() {
    let pos = positions(&[[0.0, 0.0, 0.0], [1000.0, 0.0, 0.0], [0.0, 1000.0, 0.0], [500.0, 500.0, 500.0]]);
    let src = Vec3::new(200.0, 300.0, 100.0);
    let table = PropagationModel::new(SPEED).synthesize_arrivals(&[src], &[5.0], &pos);
    let net = network_from_table(&pos, &table);

    let report = locator(Vec3::new(500.0, 500.0, 500.0)).solve_all(&net).unwrap();
    let est = report.estimates()[0].clone().expect("reference scenario converges");
    assert!(est.position.dist(&src) < 1e-4, "position {:?}", est.position);
    assert!((est.emission_time() - 5.0).abs() < 1e-4);
}

#[test]
fn noise_free_round_trip_for_four_to_seven_stations() {
    let model = PropagationModel::new(SPEED);
    let sources = [
        Vec3::new(200.0, 300.0, 100.0),
        Vec3::new(600.0, 700.0, 250.0),
        Vec3::new(450.0, 150.0, 400.0),
    ];
    let times = [5.0, 12.5, 0.75];

    for n in 4..=7 {
        let pos = positions(&STATIONS[..n]);
        let table = model.synthesize_arrivals(&sources, &times, &pos);
        let report = locator(Vec3::new(500.0, 500.0, 300.0))
            .solve_all(&network_from_table(&pos, &table))
            .unwrap();
        assert_eq!(report.converged_count(), 3, "{n} stations");
        for (e, est) in report.estimates().into_iter().enumerate() {
            let est = est.unwrap();
            assert!(est.position.dist(&sources[e]) < 1e-6, "{n} stations, event {e}");
            assert!((est.emission_time() - times[e]).abs() < 1e-6, "{n} stations, event {e}");
        }
    }
}

#[test]
fn three_stations_are_under_determined() {
    let pos = positions(&STATIONS[..3]);
    let table = PropagationModel::new(SPEED).synthesize_arrivals(&[Vec3::new(200.0, 300.0, 100.0)], &[5.0], &pos);
    let net = network_from_table(&pos, &table);
    let obs = net.observation_set(0).unwrap();

    let err = SolverDriver::new(PropagationModel::new(SPEED))
        .solve(&SourceParams::single(Vec3::zero(), 0.0), &obs, &[])
        .unwrap_err();
    assert!(matches!(err, LocatorError::UnderDetermined { observations: 3, parameters: 4 }));

    // Five parameters need five stations
    let four = network_from_table(&positions(&STATIONS[..4]), &PropagationModel::new(SPEED)
        .synthesize_arrivals(&[Vec3::new(200.0, 300.0, 100.0)], &[5.0], &positions(&STATIONS[..4])));
    let err = SolverDriver::new(PropagationModel::new(SPEED))
        .solve(&SourceParams::with_clock_bias(Vec3::zero(), 0.0, 0.0), &four.observation_set(0).unwrap(), &[])
        .unwrap_err();
    assert!(matches!(err, LocatorError::UnderDetermined { observations: 4, parameters: 5 }));
}

#[test]
fn position_error_grows_with_timing_noise() {
    let model = PropagationModel::new(SPEED);
    let pos = positions(&[
        [0.0, 0.0, 0.0],
        [1000.0, 0.0, 0.0],
        [0.0, 1000.0, 0.0],
        [1000.0, 1000.0, 200.0],
        [500.0, 500.0, 500.0],
        [800.0, 200.0, 50.0],
    ]);
    let src = Vec3::new(200.0, 300.0, 100.0);
    let clean = model.synthesize_arrivals(&[src], &[5.0], &pos);
    let loc = locator(Vec3::new(500.0, 500.0, 300.0));
    let mut rng = StdRng::seed_from_u64(3);

    let mut medians = Vec::new();
    for sigma in [0.001, 0.01, 0.1] {
        let mut errors: Vec<f64> = (0..25)
            .map(|_| {
                let mut table = clean.clone();
                perturb_arrivals(&mut table, sigma, &mut rng);
                let report = loc.solve_all(&network_from_table(&pos, &table)).unwrap();
                report.events[0].estimate().map_or(f64::INFINITY, |p| p.position.dist(&src))
            })
            .collect();
        errors.sort_by(f64::total_cmp);
        medians.push(errors[errors.len() / 2]);
    }

    assert!(medians[0] < medians[1] && medians[1] < medians[2], "medians {medians:?}");
    let ratio = medians[2] / medians[0];
    assert!((20.0..500.0).contains(&ratio), "σ ×100 gave error ×{ratio}");
}

#[test]
fn augmented_network_report_is_independent() {
    let model = PropagationModel::new(SPEED);
    let pos = positions(&STATIONS);
    let src = Vec3::new(600.0, 700.0, 250.0);
    let table = model.synthesize_arrivals(&[src], &[12.5], &pos);
    let full = network_from_table(&pos, &table);
    let base = full.subset(&[0, 1, 2, 3, 4]).unwrap();
    let extra = full.subset(&[5, 6]).unwrap().stations().to_vec();

    let rep = locator(Vec3::new(500.0, 500.0, 300.0)).solve_augmented(&base, extra).unwrap();
    assert_eq!(base.len(), 5);
    assert_eq!(rep.baseline.converged_count(), 1);
    assert_eq!(rep.augmented.converged_count(), 1);
    let est = rep.augmented.estimates()[0].clone().unwrap();
    assert!(est.position.dist(&src) < 1e-6);
}

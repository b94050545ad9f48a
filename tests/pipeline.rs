use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use edmd_analysis::classify::{source_for, CollisionClass};
use edmd_analysis::core::{DeclaredCounts, DomainKind, ObstacleKind, RunConfig};
use edmd_analysis::error::{Error, Result};
use edmd_analysis::observables::{collision_counts, first_arrivals, ObservableSet};
use edmd_analysis::settings::{AnalysisConfig, MsdConfig, TrackedParticle};
use edmd_analysis::stream::{JobOutput, RecordStreams};

fn run_config(events: usize, snapshots: Option<usize>) -> RunConfig {
    RunConfig {
        particle_count: 3,
        particle_radius: 0.1,
        particle_mass: 1.0,
        initial_speed: 1.0,
        domain: DomainKind::Circular { radius: 1.0 },
        obstacle: ObstacleKind::Fixed { radius: 0.2 },
        counts: DeclaredCounts { events, snapshots },
    }
}

/// O, W, O, W at t = 0.1..0.4 with payloads touching the obstacle / wall exactly.
fn event_lines(ids: [usize; 4]) -> Vec<String> {
    vec![
        format!("0.1 O {} 0.3 0 -1 0 1 0", ids[0]),
        format!("0.2 W {} 0 0.9 0 1 0 -1", ids[1]),
        format!("0.3 O {} -0.3 0 1 0 -1 0", ids[2]),
        format!("0.4 W {} -0.9 0 -1 0 1 0", ids[3]),
    ]
}

const SNAPSHOT: &str = "0\n0.5 0 1 0\n0 0.5 0 1\n-0.5 0 -1 0\n";

fn write_event_run(dir: &Path, config: &RunConfig, lines: &[String]) -> Result<()> {
    fs::write(dir.join("static.txt"), config.to_header())?;
    fs::write(dir.join("events.txt"), lines.join("\n") + "\n")?;
    fs::write(dir.join("snapshots.txt"), SNAPSHOT)?;
    Ok(())
}

#[test]
fn header_round_trip() -> Result<()> {
    let configs = [
        run_config(1234, None),
        run_config(10, Some(3)),
        RunConfig {
            domain: DomainKind::Square { side: 0.09 },
            obstacle: ObstacleKind::Free {
                radius: 0.005,
                mass: 3.0,
            },
            ..run_config(99, Some(7))
        },
    ];
    for cfg in configs {
        assert_eq!(RunConfig::parse_header(&cfg.to_header())?, cfg);
    }
    Ok(())
}

#[test]
fn tagged_fixture_counts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_event_run(dir.path(), &run_config(4, Some(1)), &event_lines([0, 1, 0, 2]))?;
    let output = JobOutput::open(dir.path())?;
    assert!(matches!(output.streams, RecordStreams::Events { .. }));

    for verify in [false, true] {
        let collisions = source_for(&output, verify).collisions();
        assert_eq!(collisions.len(), 4);

        let obstacle = collision_counts(&collisions, CollisionClass::Obstacle)?;
        assert_eq!(obstacle.iter().collect::<Vec<_>>(), vec![(0.1, 1), (0.3, 2)]);
        let wall = collision_counts(&collisions, CollisionClass::Wall)?;
        assert_eq!(wall.iter().collect::<Vec<_>>(), vec![(0.2, 1), (0.4, 2)]);

        // Participant 0 hits the obstacle twice but arrives once.
        let arrivals = first_arrivals(&collisions, CollisionClass::Obstacle)?;
        assert_eq!(arrivals.last(), Some((0.1, 1)));
    }
    Ok(())
}

#[test]
fn first_arrival_counts_distinct_participants() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_event_run(dir.path(), &run_config(4, Some(1)), &event_lines([0, 1, 2, 1]))?;
    let output = JobOutput::open(dir.path())?;
    let collisions = source_for(&output, true).collisions();
    let arrivals = first_arrivals(&collisions, CollisionClass::Obstacle)?;
    assert_eq!(arrivals.iter().collect::<Vec<_>>(), vec![(0.1, 1), (0.3, 2)]);
    Ok(())
}

#[test]
fn observables_from_event_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_event_run(dir.path(), &run_config(4, Some(1)), &event_lines([0, 1, 0, 2]))?;
    let obs = ObservableSet::from_dir(dir.path(), &AnalysisConfig::default())?;

    assert_eq!(obs.temperature, 0.5);
    assert_eq!(obs.pressure.len(), 1);
    let obstacle = 4.0 / (0.5 * 2.0 * PI * 0.2);
    let wall = 4.0 / (0.5 * 2.0 * PI * 1.0);
    assert!((obs.pressure.obstacle[0] - obstacle).abs() < 1e-9);
    assert!((obs.pressure.wall[0] - wall).abs() < 1e-9);
    assert!(obs.displacement.is_none());
    Ok(())
}

#[test]
fn observables_from_trajectory_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = RunConfig {
        particle_count: 1,
        ..run_config(3, None)
    };
    fs::write(dir.path().join("static.txt"), cfg.to_header())?;
    fs::write(
        dir.path().join("dynamic.txt"),
        "0\n0 0.5 0 1\n0.4\n0 0.9 0 -1\n1.2\n0 0.1 0 -1\n",
    )?;
    let analysis = AnalysisConfig {
        msd: Some(MsdConfig {
            participant: TrackedParticle::Id(0),
            grid_step: 0.4,
            grid_end: 1.0,
            ..MsdConfig::default()
        }),
        ..AnalysisConfig::default()
    };
    let obs = ObservableSet::from_dir(dir.path(), &analysis)?;

    // Wall hit at t=0.4; velocity unchanged between t=0.4 and t=1.2.
    assert!(obs.collision_counts.is_empty());
    assert_eq!(obs.pressure.len(), 3);
    assert!(obs.pressure.wall[0] > 0.0);
    assert_eq!(obs.pressure.wall[1], 0.0);
    assert_eq!(obs.temperature, 0.5);

    let track = obs.displacement.expect("displacement track");
    assert_eq!(track.len(), 3);
    assert!((track[1].1 - 0.16).abs() < 1e-12);
    Ok(())
}

#[test]
fn tracking_obstacle_needs_free_obstacle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_event_run(dir.path(), &run_config(4, Some(1)), &event_lines([0, 1, 0, 2]))?;
    let analysis = AnalysisConfig {
        msd: Some(MsdConfig::default()),
        ..AnalysisConfig::default()
    };
    assert!(matches!(
        ObservableSet::from_dir(dir.path(), &analysis),
        Err(Error::InvalidParam(_))
    ));
    Ok(())
}

#[test]
fn event_count_mismatch_both_ways() -> Result<()> {
    let lines = event_lines([0, 1, 0, 2]);
    for (declared, found) in [(5usize, 4usize), (3, 4)] {
        let dir = tempfile::tempdir()?;
        write_event_run(dir.path(), &run_config(declared, Some(1)), &lines)?;
        match JobOutput::open(dir.path()) {
            Err(Error::RecordCountMismatch {
                declared: d,
                found: f,
                ..
            }) => {
                assert_eq!(d, declared);
                assert_eq!(f, found);
            }
            other => panic!("expected RecordCountMismatch, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn snapshot_count_mismatch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_event_run(dir.path(), &run_config(4, Some(2)), &event_lines([0, 1, 0, 2]))?;
    assert!(matches!(
        JobOutput::open(dir.path()),
        Err(Error::RecordCountMismatch {
            declared: 2,
            found: 1,
            ..
        })
    ));
    Ok(())
}

#[test]
fn missing_files_reported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(matches!(
        JobOutput::open(dir.path()),
        Err(Error::MissingOutput(_))
    ));
    fs::write(dir.path().join("static.txt"), run_config(1, None).to_header())?;
    match JobOutput::open(dir.path()) {
        Err(Error::MissingOutput(path)) => assert!(path.ends_with("dynamic.txt")),
        other => panic!("expected MissingOutput, got {other:?}"),
    }
    Ok(())
}

#[test]
fn event_schema_requires_snapshot_count() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_event_run(dir.path(), &run_config(4, None), &event_lines([0, 1, 0, 2]))?;
    assert!(matches!(
        JobOutput::open(dir.path()),
        Err(Error::MalformedHeader { .. })
    ));
    Ok(())
}

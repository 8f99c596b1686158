use designswarm::ops::{FnOracle, OracleError, OracleReport, OracleResult};
use designswarm::telemetry::monitor::{read_gbest_history, read_run_state, RunState};
use designswarm::telemetry::{
    RunPhase, StatusSnapshot, COMPLETION_MARKER, GBEST_LOG, PARTICLE_LOG, PBEST_LOG,
    SETTINGS_LOG, STATUS_SNAPSHOT,
};
use designswarm::{DesignMapping, DesignSpace, Metrics, Swarm, VariableDescriptor};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn building_oracle() -> FnOracle<impl FnMut(&DesignMapping) -> OracleResult<OracleReport>> {
    let mut calls = 0_u32;
    FnOracle::new(move |design: &DesignMapping| -> OracleResult<OracleReport> {
        calls += 1;
        if calls % 7 == 0 {
            return Err(OracleError::Failed("remeshing failed".to_owned()));
        }
        let value = |name: &str| design.get(name).map_or(0.0, |value| value.as_f64());
        let area = value("Lx") * value("Ly");
        let slab = value("tf") + value("tr");
        Ok(OracleReport::success(Metrics::new(
            area * 1_500.0 + slab * 40.0,
            1.2 + slab / 600.0,
            area * 2.0,
            10.0 * value("window_ratio_2f"),
            10.0 - 5.0 * value("roof_morph"),
        )))
    })
}

fn run_into(dir: &Path, seed: u64) {
    let mut swarm = Swarm::builder(building_oracle())
        .design_space(DesignSpace::building())
        .particles(4)
        .iterations(5)
        .seed(seed)
        .telemetry_dir(dir)
        .snapshot_interval(Duration::ZERO)
        .build()
        .unwrap();
    let report = swarm.run().unwrap();
    assert_eq!(report.telemetry_failures, 0);
}

#[test]
fn identical_seeds_write_identical_logs() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    run_into(first.path(), 17);
    run_into(second.path(), 17);
    for log in [PARTICLE_LOG, PBEST_LOG, GBEST_LOG, SETTINGS_LOG] {
        let a = fs::read(first.path().join(log)).unwrap();
        let b = fs::read(second.path().join(log)).unwrap();
        assert_eq!(a, b, "{log} differs between identically seeded runs");
    }
    let other = tempfile::tempdir().unwrap();
    run_into(other.path(), 18);
    assert_ne!(
        fs::read(first.path().join(PARTICLE_LOG)).unwrap(),
        fs::read(other.path().join(PARTICLE_LOG)).unwrap()
    );
}

#[test]
fn logs_hold_one_row_per_particle_and_iteration() {
    let dir = tempfile::tempdir().unwrap();
    run_into(dir.path(), 3);

    let particles = fs::read_to_string(dir.path().join(PARTICLE_LOG)).unwrap();
    assert_eq!(particles.lines().count(), 1 + 4 * 5);
    let header: Vec<&str> = particles.lines().next().unwrap().split(',').collect();
    assert_eq!(header.len(), 3 + 5 + 20);
    assert_eq!(header[8], "Lx");
    let first_row: Vec<&str> = particles.lines().nth(1).unwrap().split(',').collect();
    assert_eq!(&first_row[..2], &["0", "1"]);

    let pbest = fs::read_to_string(dir.path().join(PBEST_LOG)).unwrap();
    assert_eq!(pbest.lines().count(), 1 + 4 * 5);

    let history = read_gbest_history(dir.path().join(GBEST_LOG)).unwrap();
    assert_eq!(history.len(), 5);
    assert!(history
        .windows(2)
        .all(|pair| pair[1].gbest_fitness <= pair[0].gbest_fitness));
    assert_eq!(history[0].design.len(), 20);
    let tf = history[4]
        .design
        .iter()
        .find(|(name, _)| name == "tf")
        .map(|(_, value)| *value)
        .unwrap();
    assert_eq!(tf, tf.round());

    let settings = fs::read_to_string(dir.path().join(SETTINGS_LOG)).unwrap();
    assert!(settings.contains("seed,3"));
    assert!(settings.contains("fitness_policy,economic_with_safety_penalty"));
    assert!(settings.contains("material_roof,binary_threshold,integer,0,1"));
}

fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(Result::unwrap).collect()
}

#[test]
fn pbest_rows_carry_the_metrics_of_the_best_evaluation() {
    // Cost drives the fitness while co2 follows a different variable, so a
    // stale or current metrics row would show up in either column.
    let oracle = FnOracle::new(|design: &DesignMapping| -> OracleResult<OracleReport> {
        let lx = design.get("Lx").map_or(0.0, |value| value.as_f64());
        let ly = design.get("Ly").map_or(0.0, |value| value.as_f64());
        Ok(OracleReport::success(Metrics::new(
            (lx - 10.0).powi(2) * 1_000.0 + 50.0,
            3.0,
            ly * 40.0,
            ly,
            lx,
        )))
    });
    let space = DesignSpace::new(vec![
        VariableDescriptor::continuous("Lx", 8.0, 12.0),
        VariableDescriptor::continuous("Ly", 6.0, 12.0),
    ])
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut swarm = Swarm::builder(oracle)
        .design_space(space)
        .particles(4)
        .iterations(8)
        .seed(41)
        .telemetry_dir(dir.path())
        .build()
        .unwrap();
    swarm.run().unwrap();

    let evaluations = read_rows(&dir.path().join(PARTICLE_LOG));
    let pbests = read_rows(&dir.path().join(PBEST_LOG));
    assert_eq!(evaluations.len(), pbests.len());

    let mut best: Vec<Option<csv::StringRecord>> = vec![None; 4];
    let (mut improved, mut kept) = (0, 0);
    for (evaluation, pbest) in evaluations.iter().zip(&pbests) {
        assert_eq!(&evaluation[0], &pbest[0]);
        assert_eq!(&evaluation[1], &pbest[1]);
        let slot = &mut best[evaluation[1].parse::<usize>().unwrap() - 1];
        let fitness: f64 = evaluation[2].parse().unwrap();
        let improves = slot
            .as_ref()
            .map_or(true, |previous| fitness < previous[2].parse::<f64>().unwrap());
        if improves {
            improved += 1;
            *slot = Some(evaluation.clone());
        } else {
            kept += 1;
        }
        let expected = slot.as_ref().unwrap();
        let columns: Vec<&str> = pbest.iter().skip(2).collect();
        let wanted: Vec<&str> = expected.iter().skip(2).collect();
        assert_eq!(columns, wanted, "pbest row {pbest:?} does not match {expected:?}");
    }
    assert!(improved > 4, "no particle improved after iteration 0");
    assert!(kept > 0, "every evaluation improved its particle");
}

#[test]
fn final_snapshot_and_marker_describe_the_finished_run() {
    let dir = tempfile::tempdir().unwrap();
    run_into(dir.path(), 8);

    let snapshot: StatusSnapshot =
        serde_json::from_slice(&fs::read(dir.path().join(STATUS_SNAPSHOT)).unwrap()).unwrap();
    assert_eq!(snapshot.phase, RunPhase::Finished);
    assert_eq!(snapshot.iteration, 4);
    assert_eq!(snapshot.max_iteration, 5);
    assert_eq!(snapshot.progress_pct, 100.0);
    assert_eq!(snapshot.particles.len(), 4);
    assert!(snapshot.particles.iter().all(|p| p.position.len() == 20));

    match read_run_state(dir.path()).unwrap() {
        RunState::Completed(marker) => {
            assert_eq!(marker.gbest_fitness, snapshot.gbest_fitness);
            assert_eq!(marker.iterations, 5);
        }
        other => panic!("expected completion, found {other:?}"),
    }
    assert!(!dir.path().join("completed.json.tmp").exists());
}

#[test]
fn a_new_run_replaces_the_previous_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    run_into(dir.path(), 1);
    let swarm = Swarm::builder(building_oracle())
        .particles(2)
        .iterations(2)
        .telemetry_dir(dir.path())
        .build()
        .unwrap();
    assert!(!dir.path().join(COMPLETION_MARKER).exists());
    assert_eq!(read_run_state(dir.path()).unwrap(), RunState::NotStarted);
    let particles = fs::read_to_string(dir.path().join(PARTICLE_LOG)).unwrap();
    assert_eq!(particles.lines().count(), 1);
    drop(swarm);
}

#[test]
fn initialization_publishes_a_running_snapshot_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut swarm = Swarm::builder(building_oracle())
        .particles(3)
        .iterations(4)
        .telemetry_dir(dir.path())
        .build()
        .unwrap();
    swarm.initialize().unwrap();
    match read_run_state(dir.path()).unwrap() {
        RunState::Running(snapshot) => {
            assert_eq!(snapshot.phase, RunPhase::Initializing);
            assert_eq!(snapshot.max_iteration, 4);
            assert_eq!(snapshot.particle_count, 3);
        }
        other => panic!("expected a running snapshot, found {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn telemetry_failures_do_not_stop_the_run() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("run");
    let mut swarm = Swarm::builder(building_oracle())
        .particles(3)
        .iterations(3)
        .telemetry_dir(&dir)
        .snapshot_interval(Duration::ZERO)
        .build()
        .unwrap();
    swarm.initialize().unwrap();
    fs::remove_dir_all(&dir).unwrap();
    let report = swarm.run().unwrap();
    assert_eq!(report.iterations, 3);
    assert!(report.telemetry_failures > 0);
}

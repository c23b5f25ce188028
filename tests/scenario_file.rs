use std::io::Write;

use scx_simple::sim::*;
use scx_simple::*;

mod common;

fn write_scenario(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// A workload loaded from JSON runs the same way as one built in code.
#[test]
fn test_scenario_from_file() {
    common::setup_test();
    let file = write_scenario(
        r#"{
            "cpus": 2,
            "duration_ms": 200,
            "tasks": [
                {"name": "hog", "nice": -5, "phases": [{"run": 40000000}], "repeat": true},
                {"name": "peer", "phases": [{"run": 40000000}], "repeat": true},
                {"name": "third", "phases": [{"run": 40000000}], "repeat": true},
                {"name": "io", "pid": 42, "start_ns": 5000000,
                 "phases": [{"run": 500000}, {"sleep": 4000000}], "repeat": true}
            ]
        }"#,
    );

    let scenario = Scenario::from_file(file.path()).unwrap();
    assert_eq!(scenario.nr_cpus, 2);
    assert_eq!(scenario.tasks.len(), 4);
    assert_eq!(scenario.task(Pid(1)).unwrap().weight, nice_to_weight(-5));
    assert_eq!(scenario.task(Pid(42)).unwrap().start_time_ns, 5_000_000);

    let sim = common::simple_sim(scenario.nr_cpus, SchedMode::Vtime);
    let trace = sim.run(&scenario).unwrap();

    for def in &scenario.tasks {
        assert!(trace.schedule_count(def.pid) > 0, "{} never ran", def.name);
    }
    // Each wakeup waits at most one hog slice before running.
    assert!(trace.total_runtime(Pid(42)) >= 2_000_000);
    // Three hogs on two CPUs: the shared DSQ is in use.
    assert!(sim.scheduler().stats().read()[StatIdx::Global as usize] > 0);
}

#[test]
fn test_scenario_file_errors() {
    common::setup_test();

    let err = Scenario::from_file(std::path::Path::new("/nonexistent/scenario.json")).unwrap_err();
    assert!(format!("{err:#}").contains("failed to read scenario"), "{err:#}");

    let file = write_scenario(r#"{"duration_ms": 10, "tasks": [], "bogus": 1}"#);
    let err = Scenario::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse scenario"), "{err:#}");

    let file = write_scenario(r#"{"duration_ms": 10, "tasks": []}"#);
    let err = Scenario::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("at least one task"), "{err:#}");

    let file = write_scenario(
        r#"{"duration_ms": 10, "tasks": [{"name": "x", "nice": 40, "phases": [{"run": 1}]}]}"#,
    );
    let err = Scenario::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("out of range"), "{err:#}");

    let file = write_scenario(
        r#"{"duration_ms": 10, "tasks": [{"name": "x", "phases": [{"sleep": 1}, {"run": 1}]}]}"#,
    );
    let err = Scenario::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("run phase"), "{err:#}");

    // Values that fit the JSON types but not the arithmetic on them.
    let file = write_scenario(
        r#"{"duration_ms": 18446744073709551, "tasks": [{"name": "x", "phases": [{"run": 1}]}]}"#,
    );
    let err = Scenario::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("overflows"), "{err:#}");

    let file = write_scenario(
        r#"{"duration_ms": 10, "tasks": [{"name": "top", "pid": 2147483647, "phases": [{"run": 1}]}]}"#,
    );
    let err = Scenario::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("task top: pid 2147483647"), "{err:#}");
}

/// Huge but representable times run to the end of the scenario.
#[test]
fn test_scenario_file_extreme_times() {
    common::setup_test();
    let file = write_scenario(
        r#"{"duration_ms": 50, "tasks": [
            {"name": "forever", "phases": [{"run": 18446744073709551615}]},
            {"name": "never", "start_ns": 18446744073709551615, "phases": [{"run": 1}]}
        ]}"#,
    );
    let scenario = Scenario::from_file(file.path()).unwrap();
    let sim = common::simple_sim(1, SchedMode::Vtime);
    let trace = sim.run(&scenario).unwrap();
    assert!(trace.schedule_count(Pid(1)) > 0);
    assert!(trace.total_runtime(Pid(1)) >= SLICE_DFL);
    assert_eq!(trace.schedule_count(Pid(2)), 0);
}


use harness::TestHarness;
use predicates::prelude::*;

const SEED_LEDGER: &str = "ALC: 0
BUILD_AMAT: COMPLETE
SOLVE_AMAT: COMPLETE
CLUSTER_EXTRACTION: COMPLETE
CLUENER_CALC: COMPLETE
CLU_SELECTION: COMPLETE
CLEANSETUP_VASP: COMPLETE
INIT_VASPJOB: COMPLETE
ALL_VASPJOBS: COMPLETE
THIS_ALC: COMPLETE
";

const ITERATION_LEDGER: &str = "ALC: 1
BUILD_AMAT: COMPLETE
SOLVE_AMAT: COMPLETE
RUN_MD: COMPLETE
POST_PROC: COMPLETE
CLUSTER_EXTRACTION: COMPLETE
CLUENER_CALC: COMPLETE
CLU_SELECTION: COMPLETE
CLEANSETUP_VASP: COMPLETE
INIT_VASPJOB: COMPLETE
ALL_VASPJOBS: COMPLETE
THIS_ALC: COMPLETE
";

fn first_words(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| l.split_whitespace().next().map(str::to_string))
        .collect()
}

#[test]
fn test_full_run_two_cycles_local() {
    let harness = TestHarness::new();

    harness
        .cmd()
        .arg("run")
        .arg("0")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("ALC-1").and(predicate::str::contains("Done:")));

    assert_eq!(
        harness.read_ledger(),
        format!("{}{}", SEED_LEDGER, ITERATION_LEDGER)
    );

    let trace = harness.trace_lines();
    assert!(trace.contains(&"run-md 1 0".to_string()));
    assert!(trace.contains(&"run-md 1 1".to_string()));
    assert!(trace.contains(&"post-process-md 1 0".to_string()));
    assert!(trace.contains(&"post-process-md 1 1".to_string()));
    assert!(!trace.iter().any(|l| l.starts_with("run-md 0")));

    let cycle0: Vec<String> = first_words(
        &trace
            .iter()
            .filter(|l| l.split_whitespace().nth(1) == Some("0"))
            .cloned()
            .collect::<Vec<_>>(),
    );
    assert_eq!(
        cycle0,
        vec![
            "build-matrix",
            "solve-matrix",
            "solve-matrix-after",
            "extract-clusters",
            "cluster-energies",
            "select-clusters",
            "setup-reference",
            "launch-reference",
            "finalize",
        ]
    );

    assert!(harness.cycle_dir(0).join("jobs/build-matrix.sh").exists());
    assert!(harness.cycle_dir(1).join("jobs/run-md-c1.sh").exists());
    assert!(harness.cycle_dir(1).join("jobs/run-md-c1.out").exists());
}

#[test]
fn test_rerun_is_a_no_op() {
    let harness = TestHarness::new();
    harness.cmd().args(["run", "0", "1"]).assert().success();
    let ledger = harness.read_ledger();
    harness.clear_trace();

    harness
        .cmd()
        .args(["run", "0", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already complete"));

    assert_eq!(harness.read_ledger(), ledger);
    assert!(harness.trace_lines().is_empty(), "no stage may run again");
}

#[test]
fn test_failed_job_stops_the_cycle() {
    let harness = TestHarness::with_stages(&[("solve-matrix", "job = \"exit 3\"")]);

    harness
        .cmd()
        .args(["run", "0", "1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "ALC-0 stage SOLVE_AMAT failed (job failure)",
        ))
        .stderr(predicate::str::contains("exit status 3"));

    assert_eq!(harness.read_ledger(), "ALC: 0\nBUILD_AMAT: COMPLETE\n");
    assert_eq!(first_words(&harness.trace_lines()), vec!["build-matrix"]);
    assert!(!harness.cycle_dir(1).exists());
}

#[test]
fn test_resume_after_crash_skips_completed_stages() {
    let harness = TestHarness::new();
    harness.write_ledger("ALC: 0\nBUILD_AMAT: COMPLETE\n");
    std::fs::create_dir_all(harness.cycle_dir(0)).unwrap();
    std::fs::write(harness.cycle_dir(0).join("amat.bin"), "kept").unwrap();

    harness.cmd().args(["run", "0"]).assert().success();

    assert_eq!(harness.read_ledger(), SEED_LEDGER);
    let words = first_words(&harness.trace_lines());
    assert_eq!(words.first().map(String::as_str), Some("solve-matrix"));
    assert!(!words.contains(&"build-matrix".to_string()));
    assert!(
        harness.cycle_dir(0).join("amat.bin").exists(),
        "a resumed cycle keeps its directory"
    );
}

#[test]
fn test_fresh_cycle_recreates_its_directory() {
    let harness = TestHarness::new();
    std::fs::create_dir_all(harness.cycle_dir(0)).unwrap();
    std::fs::write(harness.cycle_dir(0).join("stale"), "old").unwrap();

    harness.cmd().args(["run", "0"]).assert().success();

    assert!(!harness.cycle_dir(0).join("stale").exists());
}

#[test]
fn test_configuration_error_writes_nothing() {
    let harness = TestHarness::with_stages(&[("finalize", "")]);

    harness
        .cmd()
        .args(["run", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("finalize"));

    assert!(!harness.ledger_path().exists());
    assert!(harness.trace_lines().is_empty());
}

#[test]
fn test_out_of_order_cycles_are_rejected() {
    let harness = TestHarness::new();
    harness
        .cmd()
        .args(["run", "1", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ascending"));
    assert!(!harness.ledger_path().exists());
}

#[test]
fn test_new_cycle_resets_an_unfinished_lineage() {
    let harness = TestHarness::new();
    let unfinished = "ALC: 0\nBUILD_AMAT: COMPLETE\n";
    harness.write_ledger(unfinished);

    harness.cmd().args(["run", "1"]).assert().success();

    assert_eq!(
        harness.read_ledger(),
        format!("{}{}", unfinished, ITERATION_LEDGER)
    );
    let words = first_words(&harness.trace_lines());
    assert_eq!(words.first().map(String::as_str), Some("build-matrix"));
    assert!(words.contains(&"run-md".to_string()));
}

#[test]
fn test_jumping_ahead_of_the_ledger_starts_fresh() {
    let harness = TestHarness::new();
    harness.write_ledger(SEED_LEDGER);

    harness.cmd().args(["run", "2"]).assert().success();

    let ledger = harness.read_ledger();
    assert!(ledger.starts_with(SEED_LEDGER));
    assert!(ledger[SEED_LEDGER.len()..].starts_with("ALC: 2\nBUILD_AMAT: COMPLETE\n"));
    assert!(ledger.ends_with("THIS_ALC: COMPLETE\n"));
    assert!(!harness.cycle_dir(1).exists());
}

#[test]
fn test_status_reports_ledger_without_touching_it() {
    let harness = TestHarness::new();
    let damaged = "ALC: 0\nBUILD_AMAT: COMPLETE\nSOLVE_AM";
    harness.write_ledger(damaged);

    harness
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ALC-0")
                .and(predicate::str::contains("in progress"))
                .and(predicate::str::contains("BUILD_AMAT"))
                .and(predicate::str::contains("truncated on the next run")),
        );

    assert_eq!(harness.read_ledger(), damaged);
}

#[test]
fn test_status_json() {
    let harness = TestHarness::new();
    harness.cmd().args(["run", "0"]).assert().success();

    let output = harness
        .cmd()
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["last_cycle"], 0);
    assert_eq!(json["variant"], "seed");
    assert_eq!(json["finished"], true);
    assert_eq!(json["stages"].as_array().map(Vec::len), Some(9));
}

#[test]
fn test_missing_config_is_reported() {
    let harness = TestHarness::new();
    let mut cmd = assert_cmd::Command::new(env!("CARGO_BIN_EXE_aldrive"));
    cmd.env("XDG_CACHE_HOME", &harness.cache_dir)
        .current_dir(&harness.root)
        .args(["--config", "nope.toml", "run", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration file not found"));
}

#[test]
fn test_session_log_is_named_after_the_cycles() {
    let harness = TestHarness::new();
    harness.cmd().args(["run", "0"]).assert().success();

    let logs = harness.cache_dir.join("aldrive").join("logs");
    let names: Vec<String> = std::fs::read_dir(&logs)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let session = names
        .iter()
        .find(|n| n.ends_with("_run-ALC-0.log"))
        .unwrap_or_else(|| panic!("no session log for ALC-0 in {:?}", names));
    let content = std::fs::read_to_string(logs.join(session)).unwrap();
    assert!(content.contains("session 'run-ALC-0'"));
    assert!(content.contains("ALC-0 complete"));
}

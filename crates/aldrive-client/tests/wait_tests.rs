use aldrive_client::{JobWaitCoordinator, PollPolicy, WaitEvent};
use aldrive_core::model::{JobHandle, JobOutcome, JobState};
use aldrive_test_utils::{ManualClock, PollStep, ScriptedGateway};
use std::sync::Mutex;
use std::time::Duration;

fn policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_secs(60),
        max_interval: Duration::from_secs(300),
        backoff: 2.0,
        max_transient_errors: 3,
    }
}

fn handles(names: &[&str]) -> Vec<JobHandle> {
    names.iter().map(|n| JobHandle::from(*n)).collect()
}

#[test]
fn test_missing_job_among_running_siblings_is_a_failure() {
    let gw = ScriptedGateway::new();
    for name in ["a", "b", "c", "d"] {
        gw.script(
            name,
            vec![
                JobState::Running.into(),
                JobState::Running.into(),
                JobState::Succeeded.into(),
            ],
        );
    }
    gw.script("e", vec![JobState::Running.into(), JobState::Missing.into()]);

    let clock = ManualClock::new();
    let report = JobWaitCoordinator::new(&gw, &clock, policy())
        .wait_all(&handles(&["a", "b", "c", "d", "e"]));

    assert_eq!(report.outcomes.len(), 5);
    assert!(!report.all_succeeded());
    assert_eq!(report.succeeded(), 4);
    assert!(matches!(
        report.outcomes[&JobHandle::from("e")],
        JobOutcome::Missing { .. }
    ));
    // The missing job does not cut the wait short for its siblings.
    assert_eq!(gw.poll_count("a"), 3);
}

#[test]
fn test_returns_immediately_when_everything_is_terminal() {
    let gw = ScriptedGateway::new();
    gw.script("x", vec![JobState::Succeeded.into()]);
    gw.script(
        "y",
        vec![JobState::Failed {
            detail: "exit status 1".to_string(),
        }
        .into()],
    );

    let clock = ManualClock::new();
    let report = JobWaitCoordinator::new(&gw, &clock, policy()).wait_all(&handles(&["x", "y"]));

    assert!(clock.sleeps().is_empty());
    assert_eq!(report.polls, 1);
    assert_eq!(report.failures().count(), 1);
}

#[test]
fn test_never_polls_faster_than_interval_and_backs_off_to_cap() {
    let gw = ScriptedGateway::new();
    let mut steps: Vec<PollStep> = vec![JobState::Queued.into(); 6];
    steps.push(JobState::Succeeded.into());
    gw.script("slow", steps);

    let clock = ManualClock::new();
    let report = JobWaitCoordinator::new(&gw, &clock, policy()).wait_all(&handles(&["slow"]));

    assert!(report.all_succeeded());
    let secs: Vec<u64> = clock.sleeps().iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![60, 120, 240, 300, 300, 300]);
    assert!(clock.sleeps().iter().all(|d| *d >= Duration::from_secs(60)));
    assert_eq!(report.elapsed, clock.total_slept());
}

#[test]
fn test_interval_resets_after_progress() {
    let gw = ScriptedGateway::new();
    gw.script(
        "fast",
        vec![
            JobState::Running.into(),
            JobState::Running.into(),
            JobState::Succeeded.into(),
        ],
    );
    let mut slow: Vec<PollStep> = vec![JobState::Running.into(); 4];
    slow.push(JobState::Succeeded.into());
    gw.script("slow", slow);

    let clock = ManualClock::new();
    JobWaitCoordinator::new(&gw, &clock, policy()).wait_all(&handles(&["fast", "slow"]));

    let secs: Vec<u64> = clock.sleeps().iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![60, 120, 60, 120]);
}

#[test]
fn test_transient_errors_are_tolerated_then_escalate() {
    let gw = ScriptedGateway::new();
    gw.script(
        "flaky",
        vec![
            PollStep::Error("socket timed out".to_string()),
            PollStep::Error("socket timed out".to_string()),
            JobState::Running.into(),
            PollStep::Error("socket timed out".to_string()),
            JobState::Succeeded.into(),
        ],
    );
    gw.script("dead", vec![PollStep::Error("connection refused".to_string())]);

    let clock = ManualClock::new();
    let events = Mutex::new(Vec::new());
    let report = JobWaitCoordinator::new(&gw, &clock, policy())
        .wait_all_with(&handles(&["flaky", "dead"]), |e| {
            events.lock().unwrap().push(e.clone())
        });

    assert_eq!(report.outcomes[&JobHandle::from("flaky")], JobOutcome::Succeeded);
    match &report.outcomes[&JobHandle::from("dead")] {
        JobOutcome::Missing { detail } => assert!(detail.contains("4 consecutive")),
        other => panic!("expected missing, got {other:?}"),
    }
    // Threshold is 3: the fourth consecutive error escalates.
    assert_eq!(gw.poll_count("dead"), 4);

    let events = events.into_inner().unwrap();
    let finished: Vec<&JobHandle> = events
        .iter()
        .filter_map(|e| match e {
            WaitEvent::JobFinished { handle, .. } => Some(handle),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 2);
}

#[test]
fn test_duplicate_handles_are_waited_once() {
    let gw = ScriptedGateway::new();
    gw.script("dup", vec![JobState::Running.into(), JobState::Succeeded.into()]);

    let clock = ManualClock::new();
    let report =
        JobWaitCoordinator::new(&gw, &clock, policy()).wait_all(&handles(&["dup", "dup"]));

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(gw.poll_count("dup"), 2);
}

#[test]
fn test_unknown_handle_is_missing_not_pending() {
    let gw = ScriptedGateway::new();
    let clock = ManualClock::new();
    let report = JobWaitCoordinator::new(&gw, &clock, policy()).wait_all(&handles(&["ghost"]));
    assert!(matches!(
        report.outcomes[&JobHandle::from("ghost")],
        JobOutcome::Missing { .. }
    ));
    assert!(clock.sleeps().is_empty());
}

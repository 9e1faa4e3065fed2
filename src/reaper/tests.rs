//! Unit tests for the idle countdown and the reaper loop.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::time::Duration;

use rstest::{fixture, rstest};

use super::activity::{parse_running, since_argument};
use super::*;
use crate::provider::InstanceId;
use crate::test_support::{
    FakeProvider, ManualClock, ProviderCall, ScriptedActivity, ScriptedIdentity,
};

const IDLE_LINE: &str = "[Server thread/INFO]: Server empty for 60 seconds, pausing";
const RESUME_LINE: &str = "[Server thread/INFO]: Alex joined the game";
const LEAVE_LINE: &str = "[Server thread/INFO]: Alex left the game";

const fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

#[fixture]
fn clock() -> ManualClock {
    ManualClock::new()
}

fn terminations(provider: &FakeProvider) -> Vec<ProviderCall> {
    provider
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ProviderCall::Terminate(_)))
        .collect()
}

fn reaper(
    provider: &FakeProvider,
    activity: ScriptedActivity,
    identity: ScriptedIdentity,
    clock: &ManualClock,
) -> Reaper<FakeProvider, ScriptedActivity, ScriptedIdentity, ManualClock> {
    Reaper::new(provider.clone(), activity, identity, ReaperConfig::default())
        .with_clock(clock.clone())
}

#[rstest]
fn countdown_starts_on_idle_marker(clock: ManualClock) {
    let mut countdown = IdleCountdown::new(ActivityMarkers::default(), secs(300));

    assert_eq!(countdown.observe(IDLE_LINE, clock.at(secs(0))), Verdict::Continue);
    assert_eq!(countdown.idle_since(), Some(clock.at(secs(0))));
    assert_eq!(countdown.observe(IDLE_LINE, clock.at(secs(299))), Verdict::Continue);
    assert_eq!(
        countdown.observe(IDLE_LINE, clock.at(secs(300))),
        Verdict::Terminate {
            idle_for: secs(300)
        }
    );
}

#[rstest]
fn repeated_idle_marker_does_not_restart_countdown(clock: ManualClock) {
    let mut countdown = IdleCountdown::new(ActivityMarkers::default(), secs(300));

    countdown.observe(IDLE_LINE, clock.at(secs(0)));
    countdown.observe(&format!("{IDLE_LINE}\n{IDLE_LINE}"), clock.at(secs(120)));

    assert_eq!(countdown.idle_since(), Some(clock.at(secs(0))));
}

#[rstest]
fn resume_marker_cancels_countdown_without_partial_credit(clock: ManualClock) {
    let mut countdown = IdleCountdown::new(ActivityMarkers::default(), secs(300));
    countdown.observe(IDLE_LINE, clock.at(secs(0)));

    let window = format!("{IDLE_LINE}\n{RESUME_LINE}");
    assert_eq!(countdown.observe(&window, clock.at(secs(100))), Verdict::Continue);
    assert_eq!(countdown.idle_since(), None);
    assert_eq!(countdown.observe(&window, clock.at(secs(400))), Verdict::Continue);
}

#[rstest]
#[case("", None)]
#[case("Done (4.2s)! For help, type \"help\"", None)]
#[case(IDLE_LINE, Some(0))]
fn countdown_only_reacts_to_markers(
    clock: ManualClock,
    #[case] window: &str,
    #[case] expected_since: Option<u64>,
) {
    let mut countdown = IdleCountdown::new(ActivityMarkers::default(), secs(300));

    countdown.observe(window, clock.at(secs(0)));

    assert_eq!(
        countdown.idle_since(),
        expected_since.map(|at| clock.at(secs(at)))
    );
}

#[rstest]
#[tokio::test]
async fn resume_before_threshold_prevents_idle_termination(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone())
        .line_at(secs(0), IDLE_LINE)
        .line_at(secs(100), RESUME_LINE)
        .exits_at(secs(1000));
    let identity = ScriptedIdentity::resolving_after(0, "srv-1");

    let reason = reaper(&provider, activity, identity, &clock)
        .run()
        .await
        .expect("reaper should finish");

    assert_eq!(reason, ShutdownReason::WorkloadExited);
    assert_eq!(clock.elapsed(), secs(1020));
    assert_eq!(terminations(&provider).len(), 1);
}

#[rstest]
#[tokio::test]
async fn idle_after_a_visit_restarts_the_countdown(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone())
        .line_at(secs(0), IDLE_LINE)
        .line_at(secs(100), RESUME_LINE)
        .line_at(secs(160), LEAVE_LINE)
        .line_at(secs(220), IDLE_LINE)
        .exits_at(secs(5000));
    let identity = ScriptedIdentity::resolving_after(0, "srv-1");

    let reason = reaper(&provider, activity, identity, &clock)
        .run()
        .await
        .expect("reaper should finish");

    assert_eq!(
        reason,
        ShutdownReason::IdleTimeout {
            idle_for: secs(300)
        }
    );
    assert_eq!(clock.elapsed(), secs(540));
    assert_eq!(terminations(&provider).len(), 1);
}

#[rstest]
#[tokio::test]
async fn skipped_ticks_do_not_lose_output(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone())
        .line_at(secs(0), IDLE_LINE)
        .exits_at(secs(5000))
        .failing_probes(1);
    let identity = ScriptedIdentity::resolving_after(0, "srv-1");

    let reason = reaper(&provider, activity, identity, &clock)
        .run()
        .await
        .expect("reaper should finish");

    assert_eq!(
        reason,
        ShutdownReason::IdleTimeout {
            idle_for: secs(300)
        }
    );
    assert_eq!(clock.elapsed(), secs(330));
}

#[rstest]
#[case(Duration::ZERO, "1s")]
#[case(secs(30), "30s")]
#[case(Duration::from_millis(30_200), "31s")]
fn docker_since_rounds_up_to_whole_seconds(#[case] since: Duration, #[case] expected: &str) {
    assert_eq!(since_argument(since), expected);
}

#[rstest]
#[tokio::test]
async fn uninterrupted_idle_terminates_exactly_once(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone()).line_at(secs(0), IDLE_LINE);
    let identity = ScriptedIdentity::resolving_after(0, "srv-1");

    let reason = reaper(&provider, activity, identity, &clock)
        .run()
        .await
        .expect("reaper should finish");

    assert_eq!(
        reason,
        ShutdownReason::IdleTimeout {
            idle_for: secs(300)
        }
    );
    assert!(clock.elapsed() >= secs(300));
    assert_eq!(
        terminations(&provider),
        vec![ProviderCall::Terminate(InstanceId::from("srv-1"))]
    );
}

#[rstest]
#[tokio::test]
async fn workload_exit_terminates_immediately(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone()).exits_at(secs(0));
    let identity = ScriptedIdentity::resolving_after(0, "srv-1");

    let reason = reaper(&provider, activity, identity, &clock)
        .run()
        .await
        .expect("reaper should finish");

    assert_eq!(reason, ShutdownReason::WorkloadExited);
    assert_eq!(clock.elapsed(), Duration::ZERO);
    assert_eq!(terminations(&provider).len(), 1);
}

#[rstest]
#[tokio::test]
async fn identity_failure_exits_without_terminating(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone()).exits_at(secs(0));
    let identity = ScriptedIdentity::unreachable();

    let err = reaper(&provider, activity, identity.clone(), &clock)
        .run()
        .await
        .expect_err("identity resolution should fail");

    assert!(matches!(
        err,
        ReaperError::IdentityResolutionFailed { attempts: 5, .. }
    ));
    assert_eq!(identity.attempts(), 5);
    assert_eq!(clock.elapsed(), secs(2 + 4 + 8 + 16));
    assert!(provider.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn identity_is_retried_with_backoff(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone()).exits_at(secs(0));
    let identity = ScriptedIdentity::resolving_after(2, "srv-9");

    let reason = reaper(&provider, activity, identity.clone(), &clock)
        .run()
        .await
        .expect("identity resolves on third attempt");

    assert_eq!(reason, ShutdownReason::WorkloadExited);
    assert_eq!(identity.attempts(), 3);
    assert_eq!(clock.elapsed(), secs(6));
}

#[rstest]
#[tokio::test]
async fn probe_failures_skip_ticks(clock: ManualClock) {
    let provider = FakeProvider::new();
    let activity = ScriptedActivity::new(clock.clone())
        .exits_at(secs(0))
        .failing_probes(2);
    let identity = ScriptedIdentity::resolving_after(0, "srv-1");

    let reason = reaper(&provider, activity, identity, &clock)
        .run()
        .await
        .expect("reaper should finish");

    assert_eq!(reason, ShutdownReason::WorkloadExited);
    assert_eq!(clock.elapsed(), secs(60));
}

#[rstest]
#[tokio::test]
async fn termination_failure_is_logged_not_raised(clock: ManualClock) {
    let provider = FakeProvider::new();
    provider.fail_terminate();
    let activity = ScriptedActivity::new(clock.clone()).exits_at(secs(0));
    let identity = ScriptedIdentity::resolving_after(0, "srv-1");

    let reason = reaper(&provider, activity, identity, &clock)
        .run()
        .await
        .expect("termination failures are best-effort");

    assert_eq!(reason, ShutdownReason::WorkloadExited);
    assert_eq!(terminations(&provider).len(), 1);
}

fn output(code: i32, stdout: &str, stderr: &str) -> Output {
    Output {
        status: ExitStatus::from_raw(code << 8),
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[rstest]
#[case(output(0, "true\n", ""), Some(true))]
#[case(output(0, "false\n", ""), Some(false))]
#[case(output(1, "", "Error: No such object: minecraft"), Some(false))]
#[case(output(1, "", "permission denied"), None)]
fn interprets_docker_inspect(#[case] raw: Output, #[case] expected: Option<bool>) {
    assert_eq!(parse_running(&raw), expected);
}

#[test]
fn parses_metadata_identity() {
    let body = r#"{"id":"11111111-2222","name":"srv","location":{"zone_id":"nl-ams-1"}}"#;

    let identity = parse_metadata(body).expect("metadata should parse");

    assert_eq!(identity.id.as_str(), "11111111-2222");
}

#[rstest]
#[case(r#"{"name":"srv"}"#)]
#[case(r#"{"id":"  "}"#)]
#[case("not json")]
fn metadata_without_id_is_rejected(#[case] body: &str) {
    let err = parse_metadata(body).expect_err("id is required");
    assert!(matches!(err, IdentityError::Parse { .. }));
}

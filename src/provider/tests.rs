//! Unit tests for provider types and the readiness wait.

use std::collections::BTreeMap;
use std::time::Duration;

use rstest::rstest;

use super::*;
use crate::test_support::{FakeProvider, ManualClock, ProviderCall};

fn spec() -> InstanceSpec {
    InstanceSpec {
        name: String::from("srv"),
        instance_type: String::from("DEV1-M"),
        ..InstanceSpec::default()
    }
}

#[rstest]
#[case("starting", InstanceState::Pending)]
#[case("running", InstanceState::Running)]
#[case("stopped in place", InstanceState::Stopped)]
#[case("stopping", InstanceState::Stopped)]
#[case("locked", InstanceState::Unknown(String::from("locked")))]
fn maps_provider_states(#[case] raw: &str, #[case] expected: InstanceState) {
    assert_eq!(InstanceState::from_provider(raw), expected);
}

#[test]
fn provenance_tags_include_labels_and_authorized_key() {
    let spec = InstanceSpec {
        authorized_key: Some(String::from("ssh-ed25519 AAAAC3 me@host")),
        labels: BTreeMap::from([
            (String::from("workload-version"), String::from("LATEST")),
            (String::from("workload-kind"), String::from("PAPER")),
        ]),
        ..spec()
    };

    let tags = spec.provenance_tags("2026-01-01T00:00:00Z");

    assert_eq!(
        tags,
        vec![
            String::from("ephemera"),
            String::from("created-by=ephemera"),
            String::from("created-at=2026-01-01T00:00:00Z"),
            String::from("workload-kind=PAPER"),
            String::from("workload-version=LATEST"),
            String::from("AUTHORIZED_KEY=ssh-ed25519_AAAAC3_me@host"),
        ]
    );
}

#[tokio::test]
async fn wait_returns_details_once_running() {
    let provider = FakeProvider::new();
    provider.running_after(3);
    let clock = ManualClock::new();
    let id = provider
        .create_instance(&spec())
        .await
        .expect("create should succeed");

    let details = wait_until_running(&provider, &clock, &id, PollPolicy::default())
        .await
        .expect("instance should start");

    assert_eq!(details.state, InstanceState::Running);
    assert_eq!(clock.elapsed(), Duration::from_secs(15));
}

#[tokio::test]
async fn wait_times_out_at_ceiling_without_hanging() {
    let provider = FakeProvider::new();
    provider.never_running();
    let clock = ManualClock::new();
    let id = provider
        .create_instance(&spec())
        .await
        .expect("create should succeed");

    let err = wait_until_running(&provider, &clock, &id, PollPolicy::default())
        .await
        .expect_err("wait should time out");

    assert!(
        matches!(err, WaitError::Timeout { waited, .. } if waited == Duration::from_secs(300)),
        "unexpected error: {err}"
    );
    assert_eq!(clock.elapsed(), Duration::from_secs(300));
    let polls = provider.count_calls(|call| matches!(call, ProviderCall::Describe(_)));
    assert_eq!(polls, 61);
}

#[tokio::test]
async fn wait_abandons_a_hanging_poll_at_the_ceiling() {
    let provider = FakeProvider::new();
    provider.hang_describe();
    let clock = ManualClock::new();

    let err = wait_until_running(
        &provider,
        &clock,
        &InstanceId::from("stuck"),
        PollPolicy::default(),
    )
    .await
    .expect_err("a hanging poll must not outlast the ceiling");

    assert!(
        matches!(err, WaitError::Timeout { waited, .. } if waited == Duration::from_secs(300)),
        "unexpected error: {err}"
    );
    assert_eq!(clock.elapsed(), Duration::from_secs(300));
    assert_eq!(
        provider.count_calls(|call| matches!(call, ProviderCall::Describe(_))),
        1
    );
}

#[tokio::test]
async fn wait_treats_invisible_instance_as_pending() {
    let provider = FakeProvider::new();
    let clock = ManualClock::new();
    let policy = PollPolicy {
        interval: Duration::from_secs(5),
        timeout: Duration::from_secs(12),
    };

    let err = wait_until_running(&provider, &clock, &InstanceId::from("ghost"), policy)
        .await
        .expect_err("unknown instance never runs");

    assert!(matches!(err, WaitError::Timeout { .. }));
    assert_eq!(clock.elapsed(), Duration::from_secs(12));
}

#[tokio::test]
async fn wait_propagates_poll_failures() {
    let provider = FakeProvider::new();
    provider.fail_describe();
    let clock = ManualClock::new();

    let err = wait_until_running(
        &provider,
        &clock,
        &InstanceId::from("id"),
        PollPolicy::default(),
    )
    .await
    .expect_err("describe failure should surface");

    assert!(matches!(err, WaitError::Provider(_)));
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

//! End-to-end lifecycle against the in-memory provider: provision servers,
//! then let the reaper retire one of them.

use std::time::Duration;

use ephemera::boot_script::BootScriptSynthesizer;
use ephemera::ingress::{ADMIN_PORT, DEFAULT_RULE_SET_NAME, WORKLOAD_PORT};
use ephemera::pipeline::ProvisioningPipeline;
use ephemera::provider::{InstanceState, PROVENANCE_TAG};
use ephemera::reaper::{Reaper, ReaperConfig, ShutdownReason};
use ephemera::test_support::{
    FakeProvider, ManualClock, ProviderCall, ScriptedActivity, ScriptedIdentity, sample_defaults,
    sample_reaper_settings,
};
use ephemera::workload::{WorkloadKind, WorkloadRequest};
use rstest::{fixture, rstest};

const IDLE_LINE: &str = "[Server thread/INFO]: Server empty for 60 seconds, pausing";

#[fixture]
fn provider() -> FakeProvider {
    FakeProvider::new()
}

fn request(name: &str) -> WorkloadRequest {
    WorkloadRequest {
        server_name: Some(name.to_owned()),
        kind: Some(WorkloadKind::Fabric),
        eula_accepted: true,
        ..WorkloadRequest::default()
    }
}

#[rstest]
#[tokio::test]
async fn sequential_servers_share_one_rule_set(provider: FakeProvider) {
    let pipeline = ProvisioningPipeline::new(
        provider.clone(),
        BootScriptSynthesizer::new(sample_reaper_settings()),
        sample_defaults(),
    )
    .with_clock(ManualClock::new());

    let first = pipeline.provision(request("alpha")).await.expect("alpha");
    let second = pipeline.provision(request("beta")).await.expect("beta");

    assert_ne!(first.instance.id, second.instance.id);
    assert_eq!(first.instance.state, InstanceState::Running);
    assert_eq!(
        provider.count_calls(|call| matches!(call, ProviderCall::CreateSecurityGroup(_))),
        1
    );
    let ports: Vec<u16> = provider.rules().iter().map(|(_, rule)| rule.port).collect();
    assert_eq!(ports, vec![WORKLOAD_PORT, ADMIN_PORT]);
    let group = provider.security_group(DEFAULT_RULE_SET_NAME);
    assert!(
        provider
            .created_specs()
            .iter()
            .all(|spec| spec.security_group == group)
    );
    let tags = provider
        .created_specs()
        .first()
        .expect("a spec was created")
        .provenance_tags("2025-01-01T00:00:00Z");
    assert!(tags.iter().any(|tag| tag == PROVENANCE_TAG));
}

#[rstest]
#[tokio::test]
async fn concurrent_first_provisions_converge_on_one_rule_set(provider: FakeProvider) {
    provider.interleave_group_calls();
    let pipeline = ProvisioningPipeline::new(
        provider.clone(),
        BootScriptSynthesizer::new(sample_reaper_settings()),
        sample_defaults(),
    )
    .with_clock(ManualClock::new());

    let (first, second) = tokio::join!(
        pipeline.provision(request("delta")),
        pipeline.provision(request("epsilon")),
    );
    let delta = first.expect("delta");
    let epsilon = second.expect("epsilon");

    assert_ne!(delta.instance.id, epsilon.instance.id);
    let group = provider.security_group(DEFAULT_RULE_SET_NAME);
    assert!(group.is_some());
    let specs = provider.created_specs();
    assert_eq!(specs.len(), 2);
    assert!(specs.iter().all(|spec| spec.security_group == group));
    assert!(
        provider
            .rules()
            .iter()
            .all(|(owner, _)| Some(owner) == group.as_ref())
    );
}

#[rstest]
#[tokio::test]
async fn idle_server_is_reaped_after_provisioning(provider: FakeProvider) {
    let clock = ManualClock::new();
    let pipeline = ProvisioningPipeline::new(
        provider.clone(),
        BootScriptSynthesizer::new(sample_reaper_settings()),
        sample_defaults(),
    )
    .with_clock(clock.clone());
    let server = pipeline.provision(request("gamma")).await.expect("gamma");
    assert_eq!(provider.live_instances(), vec![server.instance.id.clone()]);

    let activity = ScriptedActivity::new(clock.clone()).line_at(clock.elapsed(), IDLE_LINE);
    let identity = ScriptedIdentity::resolving_after(0, server.instance.id.as_str());
    let reason = Reaper::new(provider.clone(), activity, identity, ReaperConfig::default())
        .with_clock(clock.clone())
        .run()
        .await
        .expect("reaper finishes");

    assert_eq!(
        reason,
        ShutdownReason::IdleTimeout {
            idle_for: Duration::from_secs(300)
        }
    );
    assert!(provider.live_instances().is_empty());
}

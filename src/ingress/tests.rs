//! Unit tests for ingress rule set resolution.

use super::*;
use crate::test_support::{FakeProvider, FakeProviderError, ProviderCall};

fn creations(provider: &FakeProvider) -> usize {
    provider.count_calls(|call| matches!(call, ProviderCall::CreateSecurityGroup(_)))
}

#[tokio::test]
async fn creates_group_with_workload_and_ssh_rules() {
    let provider = FakeProvider::new();
    let rule_set = IngressRuleSet::default();

    let group = ensure_ingress_rule_set(&provider, &rule_set)
        .await
        .expect("group should be created");

    let ports: Vec<u16> = provider
        .rules()
        .into_iter()
        .filter(|(owner, _)| *owner == group)
        .map(|(_, rule)| rule.port)
        .collect();
    assert_eq!(ports, vec![WORKLOAD_PORT, ADMIN_PORT]);
    assert!(
        provider
            .rules()
            .iter()
            .all(|(_, rule)| rule.ip_range == "0.0.0.0/0")
    );
}

#[tokio::test]
async fn second_call_reuses_group_without_creating() {
    let provider = FakeProvider::new();
    let rule_set = IngressRuleSet::default();

    let first = ensure_ingress_rule_set(&provider, &rule_set)
        .await
        .expect("first call");
    let second = ensure_ingress_rule_set(&provider, &rule_set)
        .await
        .expect("second call");

    assert_eq!(first, second);
    assert_eq!(creations(&provider), 1);
}

#[tokio::test]
async fn existing_group_is_returned_unchanged() {
    let provider = FakeProvider::new();
    provider.seed_security_group(DEFAULT_RULE_SET_NAME, "sg-existing");

    let group = ensure_ingress_rule_set(&provider, &IngressRuleSet::default())
        .await
        .expect("lookup should succeed");

    assert_eq!(group.as_str(), "sg-existing");
    assert_eq!(creations(&provider), 0);
    assert!(provider.rules().is_empty(), "rules must not be reconciled");
}

#[tokio::test]
async fn rule_failures_are_not_propagated() {
    let provider = FakeProvider::new();
    provider.fail_rule_add();

    let group = ensure_ingress_rule_set(&provider, &IngressRuleSet::default())
        .await
        .expect("rule failures are warnings");

    assert_eq!(provider.security_group(DEFAULT_RULE_SET_NAME), Some(group));
    let attempts = provider.count_calls(|call| matches!(call, ProviderCall::AddIngressRule(..)));
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn lookup_failure_is_an_error() {
    let provider = FakeProvider::new();
    provider.fail_group_lookup();

    let err = ensure_ingress_rule_set(&provider, &IngressRuleSet::default())
        .await
        .expect_err("lookup failure should surface");

    assert_eq!(err, FakeProviderError::SecurityGroup);
    assert_eq!(creations(&provider), 0);
}

#[tokio::test]
async fn racing_creators_converge_on_one_group() {
    let provider = FakeProvider::new();
    provider.interleave_group_calls();
    let rule_set = IngressRuleSet::default();

    let (first, second) = tokio::join!(
        ensure_ingress_rule_set(&provider, &rule_set),
        ensure_ingress_rule_set(&provider, &rule_set),
    );
    let winner = first.expect("first caller");

    assert_eq!(second.expect("second caller"), winner);
    assert_eq!(creations(&provider), 2);
    assert_eq!(provider.security_groups_named(DEFAULT_RULE_SET_NAME).len(), 2);
    assert_eq!(provider.security_group(DEFAULT_RULE_SET_NAME), Some(winner.clone()));
    let owners: Vec<SecurityGroupId> = provider
        .rules()
        .into_iter()
        .map(|(owner, _)| owner)
        .collect();
    assert_eq!(owners, vec![winner.clone(), winner]);
}

#[tokio::test]
async fn creation_is_confirmed_by_a_second_lookup() {
    let provider = FakeProvider::new();
    provider.seed_security_group("other", "sg-other");
    let rule_set = IngressRuleSet::default();

    let group = ensure_ingress_rule_set(&provider, &rule_set)
        .await
        .expect("group created");

    let lookups = provider.count_calls(|call| matches!(call, ProviderCall::FindSecurityGroup(_)));
    assert_eq!(lookups, 2);
    assert_eq!(provider.security_group(DEFAULT_RULE_SET_NAME), Some(group));
}

//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeProvider`] is an in-memory platform that records every call,
//! [`ManualClock`] advances virtual time whenever something sleeps, and
//! [`ScriptedActivity`]/[`ScriptedIdentity`] replay workload output and
//! metadata lookups for the reaper.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::boot_script::ReaperSettings;
use crate::clock::{Clock, SleepFuture};
use crate::provider::{
    InstanceDetails, InstanceId, InstanceSpec, InstanceState, IngressRule, Provider,
    ProviderFuture, SecurityGroupId,
};
use crate::reaper::{
    ActivityError, ActivityMarkers, ActivitySource, IdentityError, IdentitySource,
    InstanceIdentity, ProbeFuture,
};
use crate::workload::RequestDefaults;

/// Public address handed out by [`FakeProvider`].
pub const FAKE_PUBLIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));
/// Private address handed out by [`FakeProvider`].
pub const FAKE_PRIVATE_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
/// Zone reported by [`FakeProvider`].
pub const FAKE_ZONE: &str = "fr-par-1";

/// Reaper settings with fixed, shell-safe values.
#[must_use]
pub fn sample_reaper_settings() -> ReaperSettings {
    ReaperSettings {
        binary_url: String::from("https://downloads.example.com/ephemera-reaper"),
        secret_key: String::from("scw-reaper-secret"),
        project_id: String::from("11111111-2222-3333-4444-555555555555"),
        zone: String::from(FAKE_ZONE),
        container_name: String::from("minecraft"),
        shutdown_delay: Duration::from_secs(300),
        tick: Duration::from_secs(30),
        markers: ActivityMarkers::default(),
    }
}

/// Request defaults matching the sample configuration.
#[must_use]
pub fn sample_defaults() -> RequestDefaults {
    RequestDefaults {
        instance_type: String::from("DEV1-M"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records a single call made through [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `create_instance` with the requested name.
    CreateInstance(String),
    /// `describe`.
    Describe(InstanceId),
    /// `list_all`.
    ListAll,
    /// `stop`.
    Stop(InstanceId),
    /// `terminate`.
    Terminate(InstanceId),
    /// `find_security_group`.
    FindSecurityGroup(String),
    /// `create_security_group`.
    CreateSecurityGroup(String),
    /// `add_ingress_rule` with the rule's port.
    AddIngressRule(SecurityGroupId, u16),
}

/// Failures injected by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeProviderError {
    /// Injected `create_instance` failure.
    #[error("create rejected")]
    Create,
    /// Injected `describe` failure.
    #[error("describe failed")]
    Describe,
    /// Injected security group failure.
    #[error("security group lookup failed")]
    SecurityGroup,
    /// Injected rule failure.
    #[error("rule already exists")]
    IngressRule,
    /// Injected `terminate` failure.
    #[error("terminate failed")]
    Terminate,
    /// Operation on an unknown instance.
    #[error("instance {0} not found")]
    NotFound(String),
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<ProviderCall>,
    instances: BTreeMap<InstanceId, FakeInstance>,
    groups: Vec<(String, SecurityGroupId)>,
    rules: Vec<(SecurityGroupId, IngressRule)>,
    created_specs: Vec<InstanceSpec>,
    next_id: u32,
    polls_until_running: u32,
    never_running: bool,
    visible_describes: Option<usize>,
    fail_create: bool,
    fail_describe: bool,
    hang_describe: bool,
    fail_group_lookup: bool,
    fail_rule_add: bool,
    fail_terminate: bool,
    interleave_group_calls: bool,
}

#[derive(Clone, Debug)]
struct FakeInstance {
    details: InstanceDetails,
    polls_remaining: u32,
    describes: usize,
}

/// In-memory provider that records calls and supports injected failures.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    /// Creates a provider whose instances run on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances report `pending` for `polls` describe calls before running.
    pub fn running_after(&self, polls: u32) {
        lock(&self.state).polls_until_running = polls;
    }

    /// Instances never leave `pending`.
    pub fn never_running(&self) {
        lock(&self.state).never_running = true;
    }

    /// Each instance is visible to `count` describe calls, then vanishes.
    pub fn visible_for_describes(&self, count: usize) {
        lock(&self.state).visible_describes = Some(count);
    }

    /// Makes `create_instance` fail until [`FakeProvider::accept_creates`].
    pub fn fail_create(&self) {
        lock(&self.state).fail_create = true;
    }

    /// Clears a previous [`FakeProvider::fail_create`].
    pub fn accept_creates(&self) {
        lock(&self.state).fail_create = false;
    }

    /// Makes every `describe` fail.
    pub fn fail_describe(&self) {
        lock(&self.state).fail_describe = true;
    }

    /// Makes every `describe` hang forever.
    pub fn hang_describe(&self) {
        lock(&self.state).hang_describe = true;
    }

    /// Makes security group lookups fail.
    pub fn fail_group_lookup(&self) {
        lock(&self.state).fail_group_lookup = true;
    }

    /// Makes every rule addition fail.
    pub fn fail_rule_add(&self) {
        lock(&self.state).fail_rule_add = true;
    }

    /// Makes `terminate` fail.
    pub fn fail_terminate(&self) {
        lock(&self.state).fail_terminate = true;
    }

    /// Makes security group calls yield to other tasks before acting, so
    /// concurrent callers interleave.
    pub fn interleave_group_calls(&self) {
        lock(&self.state).interleave_group_calls = true;
    }

    /// Seeds an existing security group. Names may repeat; lookups return
    /// the earliest group with the name.
    pub fn seed_security_group(&self, name: &str, id: &str) {
        lock(&self.state)
            .groups
            .push((name.to_owned(), SecurityGroupId::from(id)));
    }

    /// Returns a snapshot of every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.state).calls.clone()
    }

    /// Counts recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&ProviderCall) -> bool) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    /// Returns the specs passed to `create_instance`.
    #[must_use]
    pub fn created_specs(&self) -> Vec<InstanceSpec> {
        lock(&self.state).created_specs.clone()
    }

    /// Returns the earliest security group registered under `name`.
    #[must_use]
    pub fn security_group(&self, name: &str) -> Option<SecurityGroupId> {
        lock(&self.state).group_named(name)
    }

    /// Returns every security group registered under `name`.
    #[must_use]
    pub fn security_groups_named(&self, name: &str) -> Vec<SecurityGroupId> {
        lock(&self.state)
            .groups
            .iter()
            .filter(|(group_name, _)| group_name == name)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Returns every rule added so far.
    #[must_use]
    pub fn rules(&self) -> Vec<(SecurityGroupId, IngressRule)> {
        lock(&self.state).rules.clone()
    }

    /// Returns the ids of instances that still exist.
    #[must_use]
    pub fn live_instances(&self) -> Vec<InstanceId> {
        lock(&self.state).instances.keys().cloned().collect()
    }

    fn record(&self, call: ProviderCall) -> MutexGuard<'_, FakeState> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state
    }

    async fn maybe_yield(&self) {
        let interleave = lock(&self.state).interleave_group_calls;
        if interleave {
            tokio::task::yield_now().await;
        }
    }
}

impl FakeState {
    fn group_named(&self, name: &str) -> Option<SecurityGroupId> {
        self.groups
            .iter()
            .find(|(group_name, _)| group_name == name)
            .map(|(_, id)| id.clone())
    }

    fn describe(&mut self, id: &InstanceId) -> Option<InstanceDetails> {
        let never_running = self.never_running;
        let visible = self.visible_describes;
        let instance = self.instances.get_mut(id)?;
        instance.describes += 1;
        if visible.is_some_and(|limit| instance.describes > limit) {
            return None;
        }
        if !never_running && instance.details.state == InstanceState::Pending {
            if instance.polls_remaining == 0 {
                instance.details.state = InstanceState::Running;
            } else {
                instance.polls_remaining -= 1;
            }
        }
        Some(instance.details.clone())
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceId, Self::Error> {
        Box::pin(async move {
            let mut state = self.record(ProviderCall::CreateInstance(spec.name.clone()));
            if state.fail_create {
                return Err(FakeProviderError::Create);
            }
            state.next_id += 1;
            let id = InstanceId::new(format!("fake-{}", state.next_id));
            let details = InstanceDetails {
                id: id.clone(),
                name: spec.name.clone(),
                public_ip: Some(FAKE_PUBLIC_IP),
                private_ip: Some(FAKE_PRIVATE_IP),
                state: InstanceState::Pending,
                instance_type: spec.instance_type.clone(),
                launched_at: Some(String::from("2026-01-01T00:00:00+00:00")),
                zone: String::from(FAKE_ZONE),
            };
            let polls_remaining = state.polls_until_running;
            state.instances.insert(
                id.clone(),
                FakeInstance {
                    details,
                    polls_remaining,
                    describes: 0,
                },
            );
            state.created_specs.push(spec.clone());
            Ok(id)
        })
    }

    fn describe<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, Option<InstanceDetails>, Self::Error> {
        Box::pin(async move {
            let outcome = {
                let mut state = self.record(ProviderCall::Describe(id.clone()));
                if state.hang_describe {
                    None
                } else if state.fail_describe {
                    Some(Err(FakeProviderError::Describe))
                } else {
                    Some(Ok(state.describe(id)))
                }
            };
            let Some(result) = outcome else {
                return std::future::pending().await;
            };
            result
        })
    }

    fn list_all(&self) -> ProviderFuture<'_, Vec<InstanceDetails>, Self::Error> {
        Box::pin(async move {
            let state = self.record(ProviderCall::ListAll);
            Ok(state
                .instances
                .values()
                .map(|instance| instance.details.clone())
                .collect())
        })
    }

    fn stop<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.record(ProviderCall::Stop(id.clone()));
            let instance = state
                .instances
                .get_mut(id)
                .ok_or_else(|| FakeProviderError::NotFound(id.to_string()))?;
            instance.details.state = InstanceState::Stopped;
            Ok(())
        })
    }

    fn terminate<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.record(ProviderCall::Terminate(id.clone()));
            if state.fail_terminate {
                return Err(FakeProviderError::Terminate);
            }
            state.instances.remove(id);
            Ok(())
        })
    }

    fn find_security_group<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<SecurityGroupId>, Self::Error> {
        Box::pin(async move {
            self.maybe_yield().await;
            let state = self.record(ProviderCall::FindSecurityGroup(name.to_owned()));
            if state.fail_group_lookup {
                return Err(FakeProviderError::SecurityGroup);
            }
            Ok(state.group_named(name))
        })
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        _description: &'a str,
    ) -> ProviderFuture<'a, SecurityGroupId, Self::Error> {
        Box::pin(async move {
            self.maybe_yield().await;
            let mut state = self.record(ProviderCall::CreateSecurityGroup(name.to_owned()));
            let id = SecurityGroupId::new(format!("sg-{}", state.groups.len() + 1));
            state.groups.push((name.to_owned(), id.clone()));
            Ok(id)
        })
    }

    fn add_ingress_rule<'a>(
        &'a self,
        group: &'a SecurityGroupId,
        rule: &'a IngressRule,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.record(ProviderCall::AddIngressRule(group.clone(), rule.port));
            if state.fail_rule_add {
                return Err(FakeProviderError::IngressRule);
            }
            state.rules.push((group.clone(), rule.clone()));
            Ok(())
        })
    }
}

/// Virtual clock: a `sleep` advances time when first polled and completes
/// at once.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Starts a clock at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves virtual time forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = lock(&self.offset);
        *offset = offset.saturating_add(by);
    }

    /// Virtual time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *lock(&self.offset)
    }

    /// Instant corresponding to virtual time `at`.
    #[must_use]
    pub fn at(&self, at: Duration) -> Instant {
        self.origin + at
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(async move { self.advance(duration) })
    }
}

/// Replays a timeline of workload output lines against a [`ManualClock`].
///
/// A line emitted at `t` is visible to reads covering `t`, so consecutive
/// reads spaced by their `since` see each line once.
#[derive(Clone, Debug)]
pub struct ScriptedActivity {
    clock: ManualClock,
    lines: Vec<(Duration, String)>,
    exits_at: Option<Duration>,
    probe_failures: Arc<Mutex<u32>>,
}

impl ScriptedActivity {
    /// Creates a source with no output that runs forever.
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            lines: Vec::new(),
            exits_at: None,
            probe_failures: Arc::new(Mutex::new(0)),
        }
    }

    /// Emits `line` at virtual time `at`.
    #[must_use]
    pub fn line_at(mut self, at: Duration, line: impl Into<String>) -> Self {
        self.lines.push((at, line.into()));
        self.lines.sort_by_key(|(when, _)| *when);
        self
    }

    /// The workload stops running at virtual time `at`.
    #[must_use]
    pub const fn exits_at(mut self, at: Duration) -> Self {
        self.exits_at = Some(at);
        self
    }

    /// The next `count` running probes fail.
    #[must_use]
    pub fn failing_probes(self, count: u32) -> Self {
        *lock(&self.probe_failures) = count;
        self
    }
}

impl ActivitySource for ScriptedActivity {
    fn is_running(&self) -> ProbeFuture<'_, bool> {
        Box::pin(async move {
            {
                let mut failures = lock(&self.probe_failures);
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ActivityError::Spawn {
                        program: String::from("docker"),
                        message: String::from("scripted probe failure"),
                    });
                }
            }
            let now = self.clock.elapsed();
            Ok(self.exits_at.is_none_or(|at| now < at))
        })
    }

    fn recent_output(&self, since: Duration, lines: usize) -> ProbeFuture<'_, String> {
        Box::pin(async move {
            let now = self.clock.elapsed();
            let emitted: Vec<&str> = self
                .lines
                .iter()
                .filter(|(at, _)| *at <= now && now - *at < since)
                .map(|(_, line)| line.as_str())
                .collect();
            let skip = emitted.len().saturating_sub(lines);
            Ok(emitted
                .into_iter()
                .skip(skip)
                .collect::<Vec<_>>()
                .join("\n"))
        })
    }
}

/// Identity source that fails a fixed number of times before succeeding.
#[derive(Clone, Debug)]
pub struct ScriptedIdentity {
    identity: Option<InstanceIdentity>,
    failures_left: Arc<Mutex<u32>>,
    attempts: Arc<Mutex<u32>>,
}

impl ScriptedIdentity {
    /// Resolves to `id` after `failures` failed attempts.
    #[must_use]
    pub fn resolving_after(failures: u32, id: &str) -> Self {
        Self {
            identity: Some(InstanceIdentity {
                id: InstanceId::from(id),
            }),
            failures_left: Arc::new(Mutex::new(failures)),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Never resolves.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            identity: None,
            failures_left: Arc::new(Mutex::new(u32::MAX)),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of resolution attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        *lock(&self.attempts)
    }
}

impl IdentitySource for ScriptedIdentity {
    fn resolve(&self) -> ProbeFuture<'_, InstanceIdentity, IdentityError> {
        Box::pin(async move {
            *lock(&self.attempts) += 1;
            let mut failures = lock(&self.failures_left);
            if *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(IdentityError::Request {
                    message: String::from("metadata service unreachable"),
                });
            }
            self.identity.clone().ok_or_else(|| IdentityError::Request {
                message: String::from("metadata service unreachable"),
            })
        })
    }
}

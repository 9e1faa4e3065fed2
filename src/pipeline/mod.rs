//! Provisioning pipeline: one request in, one running instance out.
//!
//! Stages run in a fixed order and the first failure ends the run:
//!
//! 1. reject requests without licence acceptance, before any provider call;
//! 2. apply request defaults;
//! 3. ensure the shared ingress rule set;
//! 4. render the boot script;
//! 5. create the instance;
//! 6. wait until it runs (bounded);
//! 7. describe it and assemble the result.
//!
//! Nothing is rolled back. An instance that fails to start or to be described
//! stays in the account and its identifier is reported with the error.

mod error;

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::Serialize;
use tracing::{error, info, warn};

pub use error::{FailureKind, PipelineError};

use crate::boot_script::BootScriptSynthesizer;
use crate::clock::{Clock, TokioClock};
use crate::ingress::{IngressRuleSet, WORKLOAD_PORT, ensure_ingress_rule_set};
use crate::provider::{
    InstanceDetails, InstanceSpec, PollPolicy, Provider, wait_until_running,
};
use crate::workload::{RequestDefaults, WorkloadKind, WorkloadRequest, WorkloadSpec};

/// Label carrying the workload kind.
pub const KIND_LABEL: &str = "workload-kind";
/// Label carrying the workload version.
pub const VERSION_LABEL: &str = "workload-version";

const BOOT_NOTICE: &str = "The server is being set up; installing Docker and starting the workload usually takes 2-3 minutes.";

/// Successful provisioning result.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProvisionedServer {
    /// Instance details as last described.
    #[serde(flatten)]
    pub instance: InstanceDetails,
    /// Requested or generated server name.
    pub server_name: String,
    /// Workload distribution.
    pub workload_kind: WorkloadKind,
    /// Workload version.
    pub workload_version: String,
    /// Port the workload listens on.
    pub server_port: u16,
    /// `address:port` for game clients, when a public address exists.
    pub connection_string: Option<String>,
    /// Human-readable note about boot latency.
    pub message: String,
}

impl ProvisionedServer {
    fn assemble(spec: WorkloadSpec, instance: InstanceDetails) -> Self {
        let connection_string = instance
            .public_ip
            .map(|ip| SocketAddr::new(ip, WORKLOAD_PORT).to_string());
        let message = connection_string.as_ref().map_or_else(
            || format!("{BOOT_NOTICE} No public address was assigned."),
            |address| format!("{BOOT_NOTICE} Connect using {address}"),
        );
        Self {
            instance,
            server_name: spec.server_name,
            workload_kind: spec.kind,
            workload_version: spec.version,
            server_port: WORKLOAD_PORT,
            connection_string,
            message,
        }
    }
}

/// Drives provisioning requests against a [`Provider`].
#[derive(Debug)]
pub struct ProvisioningPipeline<P, C = TokioClock> {
    provider: P,
    synthesizer: BootScriptSynthesizer,
    defaults: RequestDefaults,
    rule_set: IngressRuleSet,
    poll: PollPolicy,
    clock: C,
}

impl<P: Provider> ProvisioningPipeline<P, TokioClock> {
    /// Creates a pipeline using the default rule set and poll policy.
    #[must_use]
    pub fn new(provider: P, synthesizer: BootScriptSynthesizer, defaults: RequestDefaults) -> Self {
        Self {
            provider,
            synthesizer,
            defaults,
            rule_set: IngressRuleSet::default(),
            poll: PollPolicy::default(),
            clock: TokioClock,
        }
    }
}

impl<P, C> ProvisioningPipeline<P, C>
where
    P: Provider,
    C: Clock,
{
    /// Replaces the clock used while waiting.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> ProvisioningPipeline<P, C2> {
        ProvisioningPipeline {
            provider: self.provider,
            synthesizer: self.synthesizer,
            defaults: self.defaults,
            rule_set: self.rule_set,
            poll: self.poll,
            clock,
        }
    }

    /// Overrides the readiness poll policy.
    #[must_use]
    pub const fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Overrides the ingress rule set.
    #[must_use]
    pub fn with_rule_set(mut self, rule_set: IngressRuleSet) -> Self {
        self.rule_set = rule_set;
        self
    }

    /// Provider the pipeline drives.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Provisions one instance for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] naming the first stage that failed.
    pub async fn provision(
        &self,
        request: WorkloadRequest,
    ) -> Result<ProvisionedServer, PipelineError<P::Error>> {
        if !request.eula_accepted {
            warn!("rejecting request: workload licence not accepted");
            return Err(PipelineError::LicenseNotAccepted);
        }
        let spec = request.resolve(&self.defaults);
        info!(
            server_name = %spec.server_name,
            kind = %spec.kind,
            version = %spec.version,
            instance_type = %spec.instance_type,
            "provisioning workload"
        );

        let rule_set = ensure_ingress_rule_set(&self.provider, &self.rule_set)
            .await
            .map_err(|source| {
                error!(rule_set = %self.rule_set.name, error = %source, "ingress rule set unavailable");
                PipelineError::DependencyFailed {
                    rule_set: self.rule_set.name.clone(),
                    source,
                }
            })?;

        let script = self.synthesizer.render(&spec, &rule_set).map_err(|err| {
            error!(error = %err, "boot script rendering failed");
            PipelineError::ScriptFailed(err)
        })?;

        let instance_spec = InstanceSpec {
            name: spec.server_name.clone(),
            instance_type: spec.instance_type.clone(),
            boot_script: Some(script.into_string()),
            security_group: Some(rule_set),
            authorized_key: spec.authorized_key.clone(),
            labels: BTreeMap::from([
                (String::from(KIND_LABEL), spec.kind.to_string()),
                (String::from(VERSION_LABEL), spec.version.clone()),
            ]),
        };

        let instance_id = self
            .provider
            .create_instance(&instance_spec)
            .await
            .map_err(|err| {
                error!(server_name = %spec.server_name, error = %err, "instance creation failed");
                PipelineError::CreateFailed(err)
            })?;
        info!(instance_id = %instance_id, "instance created, waiting for it to run");

        wait_until_running(&self.provider, &self.clock, &instance_id, self.poll)
            .await
            .map_err(|source| {
                error!(instance_id = %instance_id, error = %source, "instance did not start; left in place");
                PipelineError::StartTimeout {
                    instance_id: instance_id.clone(),
                    source,
                }
            })?;

        let details = match self.provider.describe(&instance_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                error!(instance_id = %instance_id, "running instance not found; left in place");
                return Err(PipelineError::DescribeFailed {
                    instance_id,
                    source: None,
                });
            }
            Err(err) => {
                error!(instance_id = %instance_id, error = %err, "describe failed; instance left in place");
                return Err(PipelineError::DescribeFailed {
                    instance_id,
                    source: Some(err),
                });
            }
        };

        info!(instance_id = %details.id, public_ip = ?details.public_ip, "instance running");
        Ok(ProvisionedServer::assemble(spec, details))
    }
}

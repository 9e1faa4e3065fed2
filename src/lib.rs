//! Core library for the ephemera game-server orchestrator.
//!
//! The crate provisions one short-lived Scaleway instance per request, boots
//! a containerised Minecraft server on it, and installs an in-instance reaper
//! that terminates the instance once the server has been idle long enough
//! (request → ingress rule set → boot script → create → wait → describe).

pub mod boot_script;
pub mod clock;
pub mod config;
pub mod ingress;
pub mod pipeline;
pub mod provider;
pub mod reaper;
pub mod scaleway;
pub mod telemetry;
pub mod test_support;
pub mod workload;

pub use boot_script::{BootScript, BootScriptSynthesizer, ReaperSettings};
pub use clock::{Clock, TokioClock};
pub use config::{ConfigError, ProvisionConfig, ReaperRuntimeConfig, ScalewayConfig};
pub use ingress::{IngressRuleSet, ensure_ingress_rule_set};
pub use pipeline::{FailureKind, PipelineError, ProvisionedServer, ProvisioningPipeline};
pub use provider::{
    InstanceDetails, InstanceId, InstanceSpec, InstanceState, PollPolicy, Provider,
    SecurityGroupId,
};
pub use reaper::{
    DockerActivitySource, MetadataIdentity, Reaper, ReaperConfig, ReaperError, ShutdownReason,
};
pub use scaleway::{ScalewayProvider, ScalewayProviderError};
pub use workload::{RequestDefaults, WorkloadKind, WorkloadRequest, WorkloadSpec};

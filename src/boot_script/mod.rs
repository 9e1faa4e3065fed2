//! Boot script synthesis.
//!
//! The boot script is attached to the instance as Scaleway `cloud-init`
//! user-data. It installs Docker, starts the workload container with the
//! environment derived from the request, then installs the `ephemera-reaper`
//! binary as a systemd service together with the environment file it reads.
//! Both the script and the nested unit are data templates under
//! `templates/`; rendering is pure and deterministic.

mod env;
mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub use env::{EnvAssignment, environment};
pub use template::{Template, TemplateError};

use crate::ingress::WORKLOAD_PORT;
use crate::provider::SecurityGroupId;
use crate::reaper::ActivityMarkers;
use crate::workload::WorkloadSpec;

/// Container image running the workload.
pub const CONTAINER_IMAGE: &str = "itzg/minecraft-server";
/// Install path of the reaper binary on the instance.
pub const REAPER_BINARY_PATH: &str = "/usr/local/bin/ephemera-reaper";
/// Environment file read by the reaper unit.
pub const REAPER_ENV_FILE: &str = "/etc/ephemera/reaper.env";

const BOOT_TEMPLATE: Template = Template::new("boot.sh", include_str!("templates/boot.sh"));
const UNIT_TEMPLATE: Template =
    Template::new("reaper.service", include_str!("templates/reaper.service"));

/// Values baked into the instance for the shutdown automaton.
#[derive(Clone, Eq, PartialEq)]
pub struct ReaperSettings {
    /// Download URL of the `ephemera-reaper` binary.
    pub binary_url: String,
    /// Secret key scoped to terminating instances in the project.
    pub secret_key: String,
    /// Project the instance belongs to.
    pub project_id: String,
    /// Zone the instance is created in.
    pub zone: String,
    /// Name of the workload container.
    pub container_name: String,
    /// Idle time after which the instance terminates itself.
    pub shutdown_delay: Duration,
    /// Delay between two observations.
    pub tick: Duration,
    /// Idle and resume log markers.
    pub markers: ActivityMarkers,
}

impl fmt::Debug for ReaperSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaperSettings")
            .field("binary_url", &self.binary_url)
            .field("secret_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("zone", &self.zone)
            .field("container_name", &self.container_name)
            .field("shutdown_delay", &self.shutdown_delay)
            .field("tick", &self.tick)
            .field("markers", &self.markers)
            .finish()
    }
}

impl ReaperSettings {
    /// Lines of the reaper's systemd `EnvironmentFile`.
    #[must_use]
    pub fn env_file(&self) -> String {
        let entries = [
            ("SCW_SECRET_KEY", self.secret_key.clone()),
            ("SCW_DEFAULT_PROJECT_ID", self.project_id.clone()),
            ("SCW_DEFAULT_ZONE", self.zone.clone()),
            ("REAPER_CONTAINER", self.container_name.clone()),
            (
                "REAPER_SHUTDOWN_DELAY_SECS",
                self.shutdown_delay.as_secs().to_string(),
            ),
            ("REAPER_TICK_SECS", self.tick.as_secs().to_string()),
            ("REAPER_IDLE_MARKER", self.markers.idle.clone()),
            ("REAPER_RESUME_MARKER", self.markers.resume.clone()),
            ("RUST_LOG", String::from("info")),
        ];
        entries
            .iter()
            .map(|(key, value)| format!("{key}={}", systemd_quote(value)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Quotes `value` for a systemd environment file.
fn systemd_quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Rendered boot script text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootScript(String);

impl BootScript {
    /// Script text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the script, returning its text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for BootScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders boot scripts for workload specs.
#[derive(Clone, Debug)]
pub struct BootScriptSynthesizer {
    reaper: ReaperSettings,
}

impl BootScriptSynthesizer {
    /// Creates a synthesizer embedding `reaper` in every script.
    #[must_use]
    pub const fn new(reaper: ReaperSettings) -> Self {
        Self { reaper }
    }

    /// Settings embedded for the reaper.
    #[must_use]
    pub const fn reaper(&self) -> &ReaperSettings {
        &self.reaper
    }

    /// Renders the boot script for `spec` behind `rule_set`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] when a template references a placeholder
    /// that has no value.
    pub fn render(
        &self,
        spec: &WorkloadSpec,
        rule_set: &SecurityGroupId,
    ) -> Result<BootScript, TemplateError> {
        let container = escape(&self.reaper.container_name);

        let unit = UNIT_TEMPLATE.render(&BTreeMap::from([
            ("CONTAINER_NAME", self.reaper.container_name.clone()),
            ("REAPER_ENV_FILE", String::from(REAPER_ENV_FILE)),
            ("REAPER_BINARY", String::from(REAPER_BINARY_PATH)),
        ]))?;

        let container_env: String = environment(spec)
            .iter()
            .map(EnvAssignment::docker_flag)
            .collect();

        let script = BOOT_TEMPLATE.render(&BTreeMap::from([
            ("SERVER_NAME", escape(&spec.server_name)),
            ("WORKLOAD_KIND", spec.kind.to_string()),
            ("WORKLOAD_VERSION", escape(&spec.version)),
            ("RULE_SET_ID", escape(rule_set.as_str())),
            ("CONTAINER_IMAGE", String::from(CONTAINER_IMAGE)),
            ("CONTAINER_NAME", container),
            ("WORKLOAD_PORT", WORKLOAD_PORT.to_string()),
            ("CONTAINER_ENV", container_env),
            ("REAPER_ENV", self.reaper.env_file()),
            ("REAPER_URL", escape(&self.reaper.binary_url)),
            ("REAPER_UNIT", unit.trim_end().to_owned()),
        ]))?;

        Ok(BootScript(script))
    }
}

fn escape(value: &str) -> String {
    shell_escape::unix::escape(value.into()).into_owned()
}

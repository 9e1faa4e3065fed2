//! Configuration loading via `ortho-config`.
//!
//! Three independent layers are loaded from defaults, `ephemera.toml` and the
//! environment:
//!
//! - [`ScalewayConfig`] (`SCW_*`): credentials and instance defaults, shared
//!   with the official Scaleway tooling;
//! - [`ProvisionConfig`] (`EPHEMERA_*`): what gets baked into each boot
//!   script for the reaper;
//! - [`ReaperRuntimeConfig`] (`REAPER_*`): read by `ephemera-reaper` from the
//!   environment file the boot script writes.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::boot_script::ReaperSettings;
use crate::ingress::{DEFAULT_RULE_SET_NAME, IngressRuleSet};
use crate::reaper::{
    ActivityMarkers, DEFAULT_IDLE_MARKER, DEFAULT_RESUME_MARKER, ReaperConfig,
};
use crate::workload::RequestDefaults;

const CONFIG_FILE: &str = "ephemera.toml";

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; accepted so a shared Scaleway profile loads unchanged.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new instances. Defaults to `DEV1-M`, the smallest
    /// type with enough memory for a 3G heap.
    #[ortho_config(default = "DEV1-M".to_owned())]
    pub default_instance_type: String,
    /// Human-friendly image label (for example `Ubuntu 24.04 Noble Numbat`).
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// Image identifier or label used when image resolution fails.
    pub fallback_image_id: Option<String>,
}

/// Settings embedded into every boot script.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "EPHEMERA")]
pub struct ProvisionConfig {
    /// HTTPS URL the instance downloads `ephemera-reaper` from.
    pub reaper_binary_url: String,
    /// Secret key handed to the reaper; scope it to instance termination.
    pub reaper_secret_key: String,
    /// Idle seconds before the instance terminates itself.
    #[ortho_config(default = 300)]
    pub shutdown_delay_secs: u64,
    /// Seconds between two reaper observations.
    #[ortho_config(default = 30)]
    pub tick_secs: u64,
    /// Log fragment that starts the idle countdown.
    #[ortho_config(default = DEFAULT_IDLE_MARKER.to_owned())]
    pub idle_marker: String,
    /// Log fragment that cancels the idle countdown.
    #[ortho_config(default = DEFAULT_RESUME_MARKER.to_owned())]
    pub resume_marker: String,
    /// Name given to the workload container.
    #[ortho_config(default = "minecraft".to_owned())]
    pub container_name: String,
    /// Name of the shared security group.
    #[ortho_config(default = DEFAULT_RULE_SET_NAME.to_owned())]
    pub rule_set_name: String,
}

/// Runtime settings of the in-instance reaper.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "REAPER")]
pub struct ReaperRuntimeConfig {
    /// Container to monitor.
    #[ortho_config(default = "minecraft".to_owned())]
    pub container: String,
    /// Idle seconds before self-termination.
    #[ortho_config(default = 300)]
    pub shutdown_delay_secs: u64,
    /// Seconds between observations.
    #[ortho_config(default = 30)]
    pub tick_secs: u64,
    /// Upper bound on log lines inspected per tick. Only output printed
    /// since the previous read is considered.
    #[ortho_config(default = 200)]
    pub window_lines: usize,
    /// Log fragment that starts the countdown.
    #[ortho_config(default = DEFAULT_IDLE_MARKER.to_owned())]
    pub idle_marker: String,
    /// Log fragment that cancels the countdown.
    #[ortho_config(default = DEFAULT_RESUME_MARKER.to_owned())]
    pub resume_marker: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in {CONFIG_FILE}",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }

    fn require_positive(&self, value: u64) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero: set {} or {} in [{}] in {CONFIG_FILE}",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ephemera")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the fields every API call needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a credential is empty.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        FieldMetadata::new(
            "Scaleway API secret key",
            "SCW_SECRET_KEY",
            "secret_key",
            "scaleway",
        )
        .require(&self.secret_key)?;
        FieldMetadata::new(
            "Scaleway project ID",
            "SCW_DEFAULT_PROJECT_ID",
            "default_project_id",
            "scaleway",
        )
        .require(&self.default_project_id)?;
        FieldMetadata::new(
            "availability zone",
            "SCW_DEFAULT_ZONE",
            "default_zone",
            "scaleway",
        )
        .require(&self.default_zone)
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_credentials()?;
        FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway")
            .require(&self.default_image)?;
        FieldMetadata::new(
            "instance type",
            "SCW_DEFAULT_INSTANCE_TYPE",
            "default_instance_type",
            "scaleway",
        )
        .require(&self.default_instance_type)?;
        FieldMetadata::new(
            "CPU architecture",
            "SCW_DEFAULT_ARCHITECTURE",
            "default_architecture",
            "scaleway",
        )
        .require(&self.default_architecture)
    }

    /// Defaults applied to provisioning requests.
    #[must_use]
    pub fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            instance_type: self.default_instance_type.clone(),
        }
    }
}

impl ProvisionConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ephemera")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that the reaper can be installed and can authenticate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the field to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new(
            "reaper download URL",
            "EPHEMERA_REAPER_BINARY_URL",
            "reaper_binary_url",
            "ephemera",
        )
        .require(&self.reaper_binary_url)?;
        FieldMetadata::new(
            "reaper secret key",
            "EPHEMERA_REAPER_SECRET_KEY",
            "reaper_secret_key",
            "ephemera",
        )
        .require(&self.reaper_secret_key)?;
        FieldMetadata::new(
            "container name",
            "EPHEMERA_CONTAINER_NAME",
            "container_name",
            "ephemera",
        )
        .require(&self.container_name)?;
        FieldMetadata::new(
            "idle marker",
            "EPHEMERA_IDLE_MARKER",
            "idle_marker",
            "ephemera",
        )
        .require(&self.idle_marker)?;
        FieldMetadata::new(
            "resume marker",
            "EPHEMERA_RESUME_MARKER",
            "resume_marker",
            "ephemera",
        )
        .require(&self.resume_marker)?;
        FieldMetadata::new(
            "shutdown delay",
            "EPHEMERA_SHUTDOWN_DELAY_SECS",
            "shutdown_delay_secs",
            "ephemera",
        )
        .require_positive(self.shutdown_delay_secs)?;
        FieldMetadata::new("reaper tick", "EPHEMERA_TICK_SECS", "tick_secs", "ephemera")
            .require_positive(self.tick_secs)
    }

    /// Reaper settings for boot scripts targeting `scaleway`'s project and zone.
    #[must_use]
    pub fn reaper_settings(&self, scaleway: &ScalewayConfig) -> ReaperSettings {
        ReaperSettings {
            binary_url: self.reaper_binary_url.clone(),
            secret_key: self.reaper_secret_key.clone(),
            project_id: scaleway.default_project_id.clone(),
            zone: scaleway.default_zone.clone(),
            container_name: self.container_name.clone(),
            shutdown_delay: Duration::from_secs(self.shutdown_delay_secs),
            tick: Duration::from_secs(self.tick_secs),
            markers: ActivityMarkers {
                idle: self.idle_marker.clone(),
                resume: self.resume_marker.clone(),
            },
        }
    }

    /// Shared ingress rule set named by this configuration.
    #[must_use]
    pub fn rule_set(&self) -> IngressRuleSet {
        IngressRuleSet::workload(self.rule_set_name.clone())
    }
}

impl ReaperRuntimeConfig {
    /// Loads the reaper environment without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ephemera-reaper")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects empty identifiers and zero durations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the variable to fix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("container name", "REAPER_CONTAINER", "container", "reaper")
            .require(&self.container)?;
        FieldMetadata::new(
            "shutdown delay",
            "REAPER_SHUTDOWN_DELAY_SECS",
            "shutdown_delay_secs",
            "reaper",
        )
        .require_positive(self.shutdown_delay_secs)?;
        FieldMetadata::new("tick", "REAPER_TICK_SECS", "tick_secs", "reaper")
            .require_positive(self.tick_secs)
    }

    /// Loop parameters for [`crate::reaper::Reaper`].
    #[must_use]
    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            tick: Duration::from_secs(self.tick_secs),
            shutdown_delay: Duration::from_secs(self.shutdown_delay_secs),
            window_lines: self.window_lines.max(1),
            markers: ActivityMarkers {
                idle: self.idle_marker.clone(),
                resume: self.resume_marker.clone(),
            },
            ..ReaperConfig::default()
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn scaleway() -> ScalewayConfig {
        ScalewayConfig {
            access_key: None,
            secret_key: String::from("secret"),
            default_organization_id: None,
            default_project_id: String::from("project"),
            default_zone: String::from("nl-ams-1"),
            default_instance_type: String::from("DEV1-M"),
            default_image: String::from("Ubuntu 24.04 Noble Numbat"),
            default_architecture: String::from("x86_64"),
            fallback_image_id: None,
        }
    }

    #[fixture]
    fn provision() -> ProvisionConfig {
        ProvisionConfig {
            reaper_binary_url: String::from("https://downloads.example.com/ephemera-reaper"),
            reaper_secret_key: String::from("reaper-secret"),
            shutdown_delay_secs: 600,
            tick_secs: 15,
            idle_marker: String::from(DEFAULT_IDLE_MARKER),
            resume_marker: String::from(DEFAULT_RESUME_MARKER),
            container_name: String::from("mc"),
            rule_set_name: String::from("custom-sg"),
        }
    }

    #[rstest]
    fn missing_secret_names_env_var_and_key(scaleway: ScalewayConfig) {
        let config = ScalewayConfig {
            secret_key: String::from("  "),
            ..scaleway
        };

        let err = config.validate().expect_err("secret is required");

        let message = err.to_string();
        assert!(message.contains("SCW_SECRET_KEY"), "{message}");
        assert!(message.contains("secret_key"), "{message}");
        assert!(message.contains(CONFIG_FILE), "{message}");
    }

    #[rstest]
    fn reaper_only_needs_credentials(scaleway: ScalewayConfig) {
        let config = ScalewayConfig {
            default_image: String::new(),
            ..scaleway
        };

        assert!(config.validate_credentials().is_ok());
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case("reaper_binary_url", "EPHEMERA_REAPER_BINARY_URL")]
    #[case("reaper_secret_key", "EPHEMERA_REAPER_SECRET_KEY")]
    fn provision_config_requires_reaper_fields(
        provision: ProvisionConfig,
        #[case] field: &str,
        #[case] env_var: &str,
    ) {
        let mut config = provision;
        match field {
            "reaper_binary_url" => config.reaper_binary_url.clear(),
            _ => config.reaper_secret_key.clear(),
        }

        let err = config.validate().expect_err("field is required");
        assert!(err.to_string().contains(env_var));
    }

    #[rstest]
    fn zero_tick_is_invalid(provision: ProvisionConfig) {
        let config = ProvisionConfig {
            tick_secs: 0,
            ..provision
        };

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    fn reaper_settings_follow_project_and_zone(
        provision: ProvisionConfig,
        scaleway: ScalewayConfig,
    ) {
        let settings = provision.reaper_settings(&scaleway);

        assert_eq!(settings.project_id, "project");
        assert_eq!(settings.zone, "nl-ams-1");
        assert_eq!(settings.container_name, "mc");
        assert_eq!(settings.shutdown_delay, Duration::from_secs(600));
        assert_eq!(settings.tick, Duration::from_secs(15));
        assert_eq!(provision.rule_set().name, "custom-sg");
    }

    #[test]
    fn runtime_config_maps_onto_reaper_loop() {
        let runtime = ReaperRuntimeConfig {
            container: String::from("mc"),
            shutdown_delay_secs: 120,
            tick_secs: 10,
            window_lines: 0,
            idle_marker: String::from("idle"),
            resume_marker: String::from("back"),
        };

        let config = runtime.reaper_config();

        assert_eq!(config.tick, Duration::from_secs(10));
        assert_eq!(config.shutdown_delay, Duration::from_secs(120));
        assert_eq!(config.window_lines, 1);
        assert_eq!(config.markers.resume, "back");
        assert_eq!(config.identity_attempts, 5);
    }
}

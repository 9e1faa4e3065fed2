//! Scaleway implementation of the [`Provider`] capability set.
//!
//! Power actions and image listing go through `scaleway-rs`. Server creation,
//! user-data, description and security groups use the Instances API directly
//! with the same credentials.

mod error;
mod http;
mod image;
mod security_groups;
mod servers;

use scaleway_rs::ScalewayApi;
use tracing::{info, warn};

use crate::config::ScalewayConfig;
use crate::provider::{
    IngressRule, InstanceDetails, InstanceId, InstanceSpec, Provider, ProviderFuture,
    SecurityGroupId,
};
use image::ImageQuery;

pub use error::ScalewayProviderError;
pub use image::FALLBACK_IMAGE_LABEL;

/// Provider backed by the Scaleway Instances API in a single zone and project.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
    config: ScalewayConfig,
    boot_image: String,
}

impl std::fmt::Debug for ScalewayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayProvider")
            .field("zone", &self.config.default_zone)
            .field("project", &self.config.default_project_id)
            .field("boot_image", &self.boot_image)
            .finish_non_exhaustive()
    }
}

impl ScalewayProvider {
    /// Builds a provider without resolving the boot image. Instances are
    /// created from the fallback image; suitable for callers that never
    /// create instances, such as the reaper.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when credentials are missing.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayProviderError> {
        config.validate_credentials()?;
        let boot_image = fallback_image(&config);
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            boot_image,
        })
    }

    /// Builds a provider and resolves the configured image label to the
    /// newest matching image. Resolution failures degrade to the fallback
    /// image with a warning instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when configuration fails
    /// validation.
    pub async fn connect(config: ScalewayConfig) -> Result<Self, ScalewayProviderError> {
        config.validate()?;
        let mut provider = Self::new(config)?;
        let query = ImageQuery::from_config(&provider.config);
        match provider.resolve_image_id(&query).await {
            Ok(image_id) => {
                info!(image_id = %image_id, label = %query.label, "boot image resolved");
                provider.boot_image = image_id;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    fallback = %provider.boot_image,
                    "boot image resolution degraded; using fallback image"
                );
            }
        }
        Ok(provider)
    }

    /// Image identifier or label new instances boot from.
    #[must_use]
    pub fn boot_image(&self) -> &str {
        &self.boot_image
    }

    /// Configuration the provider was built from.
    #[must_use]
    pub const fn config(&self) -> &ScalewayConfig {
        &self.config
    }
}

fn fallback_image(config: &ScalewayConfig) -> String {
    config
        .fallback_image_id
        .as_deref()
        .map(str::trim)
        .filter(|image| !image.is_empty())
        .unwrap_or(FALLBACK_IMAGE_LABEL)
        .to_owned()
}

impl Provider for ScalewayProvider {
    type Error = ScalewayProviderError;

    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceId, Self::Error> {
        Box::pin(self.create_server(spec))
    }

    fn describe<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, Option<InstanceDetails>, Self::Error> {
        Box::pin(self.describe_server(id))
    }

    fn list_all(&self) -> ProviderFuture<'_, Vec<InstanceDetails>, Self::Error> {
        Box::pin(self.list_servers())
    }

    fn stop<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.power_off(id))
    }

    fn terminate<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.terminate_server(id))
    }

    fn find_security_group<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<SecurityGroupId>, Self::Error> {
        Box::pin(self.find_group(name))
    }

    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> ProviderFuture<'a, SecurityGroupId, Self::Error> {
        Box::pin(self.create_group(name, description))
    }

    fn add_ingress_rule<'a>(
        &'a self,
        group: &'a SecurityGroupId,
        rule: &'a IngressRule,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.add_rule(group, rule))
    }
}

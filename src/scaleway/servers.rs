//! Server creation, inspection and power actions.
//!
//! Servers are created stopped. The boot script is stored as the `cloud-init`
//! user-data key before the first power-on so that cloud-init picks it up on
//! first boot. A server whose upload or power-on fails is deleted again.

use std::future::Future;
use std::net::IpAddr;

use chrono::{SecondsFormat, Utc};
use reqwest::StatusCode;
use scaleway_rs::{ScalewayApiError, ScalewayError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::http::{HTTP_CLIENT, send, user_data_url, zone_url};
use super::{ScalewayProvider, ScalewayProviderError};
use crate::provider::{InstanceDetails, InstanceId, InstanceSpec, InstanceState, SecurityGroupId};

const PAGE_SIZE: usize = 100;

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    security_group: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: ServerResource,
}

#[derive(Deserialize)]
struct ServerPage {
    #[serde(default)]
    servers: Vec<ServerResource>,
}

/// Subset of the server resource the provider reads.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct ServerResource {
    pub(super) id: String,
    #[serde(default)]
    pub(super) name: String,
    #[serde(default)]
    pub(super) state: String,
    #[serde(default)]
    pub(super) commercial_type: String,
    #[serde(default)]
    pub(super) creation_date: Option<String>,
    #[serde(default)]
    pub(super) zone: Option<String>,
    #[serde(default)]
    pub(super) public_ip: Option<AddressResource>,
    #[serde(default)]
    pub(super) public_ips: Vec<AddressResource>,
    #[serde(default)]
    pub(super) private_ip: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct AddressResource {
    pub(super) address: String,
}

impl ServerResource {
    /// Maps the API resource onto [`InstanceDetails`], preferring IPv4 for
    /// the public address.
    pub(super) fn into_details(self, default_zone: &str) -> InstanceDetails {
        let public_ip = self
            .public_ip
            .iter()
            .chain(&self.public_ips)
            .filter_map(|ip| ip.address.parse::<IpAddr>().ok())
            .min_by_key(IpAddr::is_ipv6);
        let private_ip = self
            .private_ip
            .as_deref()
            .and_then(|ip| ip.parse::<IpAddr>().ok());
        InstanceDetails {
            id: InstanceId::new(self.id),
            name: self.name,
            public_ip,
            private_ip,
            state: InstanceState::from_provider(&self.state),
            instance_type: self.commercial_type,
            launched_at: self.creation_date,
            zone: self.zone.unwrap_or_else(|| default_zone.to_owned()),
        }
    }
}

fn is_instance_type_error(api_err: &ScalewayApiError, instance_type: &str) -> bool {
    rejects_instance_type(
        &api_err.etype,
        &api_err.message,
        api_err.resource.as_deref(),
        api_err.resource_id.as_deref(),
        instance_type,
    )
}

pub(super) fn rejects_instance_type(
    etype: &str,
    message: &str,
    resource: Option<&str>,
    resource_id: Option<&str>,
    instance_type: &str,
) -> bool {
    resource == Some("commercial_type")
        || resource_id == Some(instance_type)
        || (etype == "invalid_arguments"
            && message.to_ascii_lowercase().contains("commercial_type"))
}

fn is_missing_resource(err: &ScalewayError) -> bool {
    matches!(err, ScalewayError::Api(api_err) if api_err.etype == "unknown_resource")
}

/// Runs `boot` for a freshly created server and deletes the server through
/// `discard` when booting fails. The boot error is returned either way.
pub(super) async fn boot_or_discard<Boot, BootFut, Discard, DiscardFut>(
    instance_id: &InstanceId,
    boot: Boot,
    discard: Discard,
) -> Result<(), ScalewayProviderError>
where
    Boot: FnOnce() -> BootFut,
    BootFut: Future<Output = Result<(), ScalewayProviderError>>,
    Discard: FnOnce() -> DiscardFut,
    DiscardFut: Future<Output = Result<(), ScalewayProviderError>>,
{
    let Err(err) = boot().await else {
        return Ok(());
    };
    match discard().await {
        Ok(()) => warn!(
            instance_id = %instance_id,
            error = %err,
            "server failed to boot and was deleted"
        ),
        Err(cleanup) => error!(
            instance_id = %instance_id,
            error = %err,
            cleanup_error = %cleanup,
            "server failed to boot and could not be deleted; remove it manually"
        ),
    }
    Err(err)
}

impl ScalewayProvider {
    fn zone(&self) -> &str {
        &self.config.default_zone
    }

    pub(super) async fn create_server(
        &self,
        spec: &InstanceSpec,
    ) -> Result<InstanceId, ScalewayProviderError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = CreateServerRequest {
            name: &spec.name,
            commercial_type: &spec.instance_type,
            image: &self.boot_image,
            project: &self.config.default_project_id,
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: spec.provenance_tags(&created_at),
            stopped: true,
            security_group: spec.security_group.as_ref().map(SecurityGroupId::as_str),
            organization: self.config.default_organization_id.as_deref(),
        };

        let response = send(
            HTTP_CLIENT.post(zone_url(self.zone(), "servers")).json(&payload),
            &self.config.secret_key,
        )
        .await?;
        if !response.is_success() {
            if response
                .api_error()
                .is_some_and(|api_err| is_instance_type_error(&api_err, &spec.instance_type))
            {
                return Err(ScalewayProviderError::InstanceTypeUnavailable {
                    instance_type: spec.instance_type.clone(),
                    zone: self.zone().to_owned(),
                });
            }
            return Err(response.into_error());
        }
        let ServerEnvelope { server } = response.json()?;
        let instance_id = InstanceId::new(server.id);
        info!(instance_id = %instance_id, name = %spec.name, "server created stopped");

        boot_or_discard(
            &instance_id,
            || self.boot(&instance_id, spec.boot_script.as_deref()),
            || self.delete_server(&instance_id),
        )
        .await?;
        Ok(instance_id)
    }

    async fn boot(
        &self,
        instance_id: &InstanceId,
        script: Option<&str>,
    ) -> Result<(), ScalewayProviderError> {
        if let Some(text) = script {
            self.upload_boot_script(instance_id, text).await?;
        }
        self.api
            .perform_instance_action_async(self.zone(), instance_id.as_str(), "poweron")
            .await
            .map_err(|err| ScalewayProviderError::PowerOnFailed {
                instance_id: instance_id.to_string(),
                message: err.to_string(),
            })?;
        debug!(instance_id = %instance_id, "power-on requested");
        Ok(())
    }

    async fn delete_server(&self, id: &InstanceId) -> Result<(), ScalewayProviderError> {
        match self.api.delete_instance_async(self.zone(), id.as_str()).await {
            Ok(_) => Ok(()),
            Err(err) if is_missing_resource(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn upload_boot_script(
        &self,
        instance_id: &InstanceId,
        script: &str,
    ) -> Result<(), ScalewayProviderError> {
        let upload_failed = |message: String| ScalewayProviderError::UserDataUpload {
            instance_id: instance_id.to_string(),
            message,
        };
        let request = HTTP_CLIENT
            .patch(user_data_url(self.zone(), instance_id.as_str()))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(script.to_owned());
        let response = send(request, &self.config.secret_key)
            .await
            .map_err(|err| upload_failed(err.to_string()))?;
        if response.is_success() {
            debug!(instance_id = %instance_id, bytes = script.len(), "boot script uploaded");
            Ok(())
        } else {
            Err(upload_failed(response.message()))
        }
    }

    pub(super) async fn describe_server(
        &self,
        id: &InstanceId,
    ) -> Result<Option<InstanceDetails>, ScalewayProviderError> {
        let response = send(
            HTTP_CLIENT.get(zone_url(self.zone(), &format!("servers/{id}"))),
            &self.config.secret_key,
        )
        .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(response.into_error());
        }
        let ServerEnvelope { server } = response.json()?;
        Ok(Some(server.into_details(self.zone())))
    }

    pub(super) async fn list_servers(&self) -> Result<Vec<InstanceDetails>, ScalewayProviderError> {
        let mut servers = Vec::new();
        let mut page: u32 = 1;
        loop {
            let page_number = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let request = HTTP_CLIENT.get(zone_url(self.zone(), "servers")).query(&[
                ("project", self.config.default_project_id.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page_number.as_str()),
            ]);
            let response = send(request, &self.config.secret_key).await?;
            if !response.is_success() {
                return Err(response.into_error());
            }
            let batch: ServerPage = response.json()?;
            let fetched = batch.servers.len();
            servers.extend(
                batch
                    .servers
                    .into_iter()
                    .map(|server| server.into_details(self.zone())),
            );
            if fetched < PAGE_SIZE {
                return Ok(servers);
            }
            page = page.saturating_add(1);
        }
    }

    pub(super) async fn power_off(&self, id: &InstanceId) -> Result<(), ScalewayProviderError> {
        self.api
            .perform_instance_action_async(self.zone(), id.as_str(), "poweroff")
            .await?;
        info!(instance_id = %id, "power-off requested");
        Ok(())
    }

    pub(super) async fn terminate_server(
        &self,
        id: &InstanceId,
    ) -> Result<(), ScalewayProviderError> {
        match self
            .api
            .perform_instance_action_async(self.zone(), id.as_str(), "terminate")
            .await
        {
            Ok(_) => {
                info!(instance_id = %id, "termination requested");
                Ok(())
            }
            Err(err) if is_missing_resource(&err) => {
                debug!(instance_id = %id, "server already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

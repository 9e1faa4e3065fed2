//! Security group lookup, creation and rule management.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{HTTP_CLIENT, send, zone_url};
use super::{ScalewayProvider, ScalewayProviderError};
use crate::provider::{IngressRule, SecurityGroupId};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct SecurityGroupResource {
    pub(super) id: String,
    pub(super) name: String,
    #[serde(default)]
    pub(super) creation_date: String,
}

#[derive(Deserialize)]
struct SecurityGroupPage {
    #[serde(default)]
    security_groups: Vec<SecurityGroupResource>,
}

#[derive(Deserialize)]
struct SecurityGroupEnvelope {
    security_group: SecurityGroupResource,
}

#[derive(Serialize)]
struct CreateSecurityGroupRequest<'a> {
    name: &'a str,
    description: &'a str,
    project: &'a str,
    stateful: bool,
    inbound_default_policy: &'a str,
    outbound_default_policy: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateRuleRequest<'a> {
    protocol: &'a str,
    direction: &'a str,
    action: &'a str,
    ip_range: &'a str,
    dest_port_from: u16,
}

/// The name filter is a substring match, so only exact names count. Among
/// duplicates the oldest group wins, ties broken by id, so every caller
/// picks the same one.
pub(super) fn exact_match(
    groups: Vec<SecurityGroupResource>,
    name: &str,
) -> Option<SecurityGroupId> {
    groups
        .into_iter()
        .filter(|group| group.name == name)
        .min_by(|lhs, rhs| {
            (lhs.creation_date.as_str(), lhs.id.as_str())
                .cmp(&(rhs.creation_date.as_str(), rhs.id.as_str()))
        })
        .map(|group| SecurityGroupId::new(group.id))
}

impl ScalewayProvider {
    pub(super) async fn find_group(
        &self,
        name: &str,
    ) -> Result<Option<SecurityGroupId>, ScalewayProviderError> {
        let request = HTTP_CLIENT
            .get(zone_url(&self.config.default_zone, "security_groups"))
            .query(&[
                ("name", name),
                ("project", self.config.default_project_id.as_str()),
            ]);
        let response = send(request, &self.config.secret_key).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        let page: SecurityGroupPage = response.json()?;
        Ok(exact_match(page.security_groups, name))
    }

    pub(super) async fn create_group(
        &self,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupId, ScalewayProviderError> {
        let payload = CreateSecurityGroupRequest {
            name,
            description,
            project: &self.config.default_project_id,
            stateful: true,
            inbound_default_policy: "drop",
            outbound_default_policy: "accept",
            organization: self.config.default_organization_id.as_deref(),
        };
        let response = send(
            HTTP_CLIENT
                .post(zone_url(&self.config.default_zone, "security_groups"))
                .json(&payload),
            &self.config.secret_key,
        )
        .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        let SecurityGroupEnvelope { security_group } = response.json()?;
        debug!(group_id = %security_group.id, name, "security group created");
        Ok(SecurityGroupId::new(security_group.id))
    }

    pub(super) async fn add_rule(
        &self,
        group: &SecurityGroupId,
        rule: &IngressRule,
    ) -> Result<(), ScalewayProviderError> {
        let payload = CreateRuleRequest {
            protocol: rule.protocol.as_str(),
            direction: "inbound",
            action: "accept",
            ip_range: &rule.ip_range,
            dest_port_from: rule.port,
        };
        let response = send(
            HTTP_CLIENT
                .post(zone_url(
                    &self.config.default_zone,
                    &format!("security_groups/{group}/rules"),
                ))
                .json(&payload),
            &self.config.secret_key,
        )
        .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_error())
        }
    }
}

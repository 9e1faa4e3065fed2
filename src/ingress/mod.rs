//! Idempotent resolution of the shared ingress rule set.
//!
//! Every provisioned workload sits behind the same named security group. The
//! group is looked up by name first and created only when absent; an existing
//! group is reused as-is without reconciling its rules. Group names are not
//! unique on the platform, so after creating a group the name is looked up
//! again and the group the lookup prefers wins.

use tracing::{info, warn};

use crate::provider::{IngressRule, Provider, SecurityGroupId};

/// TCP port the workload listens on.
pub const WORKLOAD_PORT: u16 = 25565;

/// TCP port used for administrative SSH access.
pub const ADMIN_PORT: u16 = 22;

/// Default name of the shared security group.
pub const DEFAULT_RULE_SET_NAME: &str = "ephemera-workload";

/// Named set of inbound rules backing a security group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngressRuleSet {
    /// Exact security group name used for lookup.
    pub name: String,
    /// Description stored on creation.
    pub description: String,
    /// Rules added when the group is created.
    pub rules: Vec<IngressRule>,
}

impl IngressRuleSet {
    /// Rule set opening the workload port and SSH to every source.
    #[must_use]
    pub fn workload(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: format!(
                "ephemera workloads - allows port {WORKLOAD_PORT} and SSH ({ADMIN_PORT})"
            ),
            rules: vec![
                IngressRule::tcp_from_anywhere(WORKLOAD_PORT, "Workload port"),
                IngressRule::tcp_from_anywhere(ADMIN_PORT, "SSH access"),
            ],
        }
    }
}

impl Default for IngressRuleSet {
    fn default() -> Self {
        Self::workload(DEFAULT_RULE_SET_NAME)
    }
}

/// Returns the identifier of the security group named by `rule_set`,
/// creating and populating it when it does not exist.
///
/// A caller that loses a creation race returns the winner's group and leaves
/// the rules to the winner. Rule additions that fail are logged and ignored.
///
/// # Errors
///
/// Returns the provider error when the lookup or the group creation fails.
pub async fn ensure_ingress_rule_set<P>(
    provider: &P,
    rule_set: &IngressRuleSet,
) -> Result<SecurityGroupId, P::Error>
where
    P: Provider + ?Sized,
{
    if let Some(existing) = provider.find_security_group(&rule_set.name).await? {
        info!(security_group = %existing, name = %rule_set.name, "reusing security group");
        return Ok(existing);
    }

    let created = provider
        .create_security_group(&rule_set.name, &rule_set.description)
        .await?;

    let group = match provider.find_security_group(&rule_set.name).await {
        Ok(Some(winner)) if winner != created => {
            warn!(
                security_group = %winner,
                duplicate = %created,
                name = %rule_set.name,
                "security group created concurrently, using the earlier one"
            );
            return Ok(winner);
        }
        Ok(_) => created,
        Err(err) => {
            warn!(
                security_group = %created,
                error = %err,
                "security group re-lookup failed, keeping created group"
            );
            created
        }
    };

    for rule in &rule_set.rules {
        if let Err(err) = provider.add_ingress_rule(&group, rule).await {
            warn!(
                security_group = %group,
                port = rule.port,
                error = %err,
                "failed to add ingress rule (may already exist)"
            );
        }
    }

    info!(security_group = %group, name = %rule_set.name, "security group created");
    Ok(group)
}

#[cfg(test)]
mod tests;

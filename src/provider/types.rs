//! Value types exchanged with a [`Provider`](super::Provider).

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a provider-issued identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_id!(
    /// Provider identifier of a compute instance.
    InstanceId
);
string_id!(
    /// Provider identifier of a security group (ingress rule set).
    SecurityGroupId
);

/// Lifecycle state of an instance as observed through the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Booting or otherwise transitioning towards running.
    Pending,
    /// Powered on.
    Running,
    /// Powered off or powering off.
    Stopped,
    /// Deleted.
    Terminated,
    /// Any state the provider reports that has no mapping above.
    Unknown(String),
}

impl InstanceState {
    /// Maps a raw provider state string onto the lifecycle model.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starting" | "pending" => Self::Pending,
            "running" => Self::Running,
            "stopped" | "stopped in place" | "stopping" => Self::Stopped,
            "terminated" | "deleted" => Self::Terminated,
            _ => Self::Unknown(raw.to_owned()),
        }
    }

    /// Returns the canonical lower-case label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
            Self::Unknown(raw) => raw.as_str(),
        }
    }
}

impl Serialize for InstanceState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an instance returned by `describe` and `list_all`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InstanceDetails {
    /// Provider identifier.
    #[serde(rename = "instance_id")]
    pub id: InstanceId,
    /// Instance name.
    pub name: String,
    /// Public address, when one is attached.
    pub public_ip: Option<IpAddr>,
    /// Private address, when one is attached.
    pub private_ip: Option<IpAddr>,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Commercial type (compute class).
    pub instance_type: String,
    /// Creation timestamp as reported by the provider (RFC 3339).
    pub launched_at: Option<String>,
    /// Placement zone.
    pub zone: String,
}

/// Parameters for a single instance creation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Instance name.
    pub name: String,
    /// Commercial type to request.
    pub instance_type: String,
    /// Script executed once at first boot.
    pub boot_script: Option<String>,
    /// Security group to attach.
    pub security_group: Option<SecurityGroupId>,
    /// Public SSH key authorised on the instance.
    pub authorized_key: Option<String>,
    /// Workload labels recorded as `key=value` provenance tags.
    pub labels: BTreeMap<String, String>,
}

/// Tag marking every resource created by this tool.
pub const PROVENANCE_TAG: &str = "ephemera";

impl InstanceSpec {
    /// Builds the tag list attached to the instance.
    ///
    /// Tags are ordered: the bare provenance marker, creator and creation
    /// time, labels in key order, then the authorised key (spaces replaced by
    /// underscores, which is the format the instance image expects).
    #[must_use]
    pub fn provenance_tags(&self, created_at: &str) -> Vec<String> {
        let mut tags = vec![
            PROVENANCE_TAG.to_owned(),
            format!("created-by={PROVENANCE_TAG}"),
            format!("created-at={created_at}"),
        ];
        tags.extend(
            self.labels
                .iter()
                .map(|(key, value)| format!("{key}={value}")),
        );
        if let Some(key) = &self.authorized_key {
            tags.push(format!("AUTHORIZED_KEY={}", key.trim().replace(' ', "_")));
        }
        tags
    }
}

/// Transport protocol of an ingress rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Provider wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// A single inbound allow rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngressRule {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Destination port.
    pub port: u16,
    /// Source range in CIDR notation.
    pub ip_range: String,
    /// Operator-facing description.
    pub description: String,
}

impl IngressRule {
    /// TCP rule open to every IPv4 source.
    #[must_use]
    pub fn tcp_from_anywhere(port: u16, description: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
            ip_range: String::from("0.0.0.0/0"),
            description: description.into(),
        }
    }
}

//! Failure taxonomy of a provisioning run.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::boot_script::TemplateError;
use crate::provider::{InstanceId, WaitError};

/// Terminal failure of a provisioning run.
///
/// Failures after [`PipelineError::CreateFailed`] carry the identifier of the
/// instance that was created and left in place.
#[derive(Debug, Error)]
pub enum PipelineError<E>
where
    E: std::error::Error + 'static,
{
    /// The caller did not accept the workload licence.
    #[error("the workload licence (EULA) must be accepted before provisioning")]
    LicenseNotAccepted,
    /// The ingress rule set could not be found or created.
    #[error("failed to ensure ingress rule set `{rule_set}`: {source}")]
    DependencyFailed {
        /// Rule set name.
        rule_set: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// The boot script template could not be rendered.
    #[error("failed to render boot script: {0}")]
    ScriptFailed(#[source] TemplateError),
    /// The platform rejected the instance.
    #[error("failed to create instance: {0}")]
    CreateFailed(#[source] E),
    /// The instance did not report running in time.
    #[error("instance {instance_id} did not start: {source}")]
    StartTimeout {
        /// Instance left running in the account.
        instance_id: InstanceId,
        /// Wait failure.
        #[source]
        source: WaitError<E>,
    },
    /// The running instance could not be described.
    #[error("failed to describe instance {instance_id}{}", describe_suffix(.source.is_none()))]
    DescribeFailed {
        /// Instance left running in the account.
        instance_id: InstanceId,
        /// Provider error; `None` when the instance was not found.
        #[source]
        source: Option<E>,
    },
}

fn describe_suffix(not_found: bool) -> &'static str {
    if not_found { ": instance not found" } else { "" }
}

/// Stage-specific failure kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum FailureKind {
    /// See [`PipelineError::LicenseNotAccepted`].
    LicenseNotAccepted,
    /// See [`PipelineError::DependencyFailed`].
    DependencyFailed,
    /// See [`PipelineError::ScriptFailed`].
    ScriptFailed,
    /// See [`PipelineError::CreateFailed`].
    CreateFailed,
    /// See [`PipelineError::StartTimeout`].
    StartTimeout,
    /// See [`PipelineError::DescribeFailed`].
    DescribeFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl<E> PipelineError<E>
where
    E: std::error::Error + 'static,
{
    /// Stage that failed.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::LicenseNotAccepted => FailureKind::LicenseNotAccepted,
            Self::DependencyFailed { .. } => FailureKind::DependencyFailed,
            Self::ScriptFailed(_) => FailureKind::ScriptFailed,
            Self::CreateFailed(_) => FailureKind::CreateFailed,
            Self::StartTimeout { .. } => FailureKind::StartTimeout,
            Self::DescribeFailed { .. } => FailureKind::DescribeFailed,
        }
    }

    /// Instance created before the failure, if any.
    #[must_use]
    pub const fn instance_id(&self) -> Option<&InstanceId> {
        match self {
            Self::StartTimeout { instance_id, .. } | Self::DescribeFailed { instance_id, .. } => {
                Some(instance_id)
            }
            _ => None,
        }
    }
}

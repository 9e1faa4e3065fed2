//! Instance self-identification through the local metadata service.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::activity::ProbeFuture;
use crate::provider::InstanceId;

/// Scaleway instance metadata endpoint, reachable only from inside the instance.
pub const METADATA_URL: &str = "http://169.254.42.42/conf?format=json";

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity of the instance the reaper runs on.
///
/// The zone is not part of it: the provider is configured with the zone the
/// instance was created in, written to the reaper's environment at boot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceIdentity {
    /// Platform identifier of this instance.
    pub id: InstanceId,
}

/// Errors raised while resolving the local identity.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum IdentityError {
    /// The metadata service could not be reached.
    #[error("metadata request failed: {message}")]
    Request {
        /// Underlying error message.
        message: String,
    },
    /// The metadata service answered with a non-success status.
    #[error("metadata service returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The response body did not contain an identity.
    #[error("unexpected metadata payload: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
}

/// Resolves the identity of the current instance.
pub trait IdentitySource: Send + Sync {
    /// Performs a single resolution attempt.
    fn resolve(&self) -> ProbeFuture<'_, InstanceIdentity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct MetadataPayload {
    id: String,
}

/// Parses a Scaleway metadata document into an [`InstanceIdentity`].
///
/// # Errors
///
/// Returns [`IdentityError::Parse`] when the body is not JSON or lacks an id.
pub fn parse_metadata(body: &str) -> Result<InstanceIdentity, IdentityError> {
    let payload: MetadataPayload =
        serde_json::from_str(body).map_err(|err| IdentityError::Parse {
            message: err.to_string(),
        })?;
    if payload.id.trim().is_empty() {
        return Err(IdentityError::Parse {
            message: String::from("empty instance id"),
        });
    }
    Ok(InstanceIdentity {
        id: InstanceId::new(payload.id),
    })
}

/// [`IdentitySource`] querying the Scaleway metadata service.
#[derive(Clone, Debug)]
pub struct MetadataIdentity {
    client: reqwest::Client,
    url: String,
}

impl MetadataIdentity {
    /// Targets the link-local metadata endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Request`] when the HTTP client cannot be built.
    pub fn new() -> Result<Self, IdentityError> {
        Self::with_url(METADATA_URL)
    }

    /// Targets an explicit metadata URL.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Request`] when the HTTP client cannot be built.
    pub fn with_url(url: impl Into<String>) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .map_err(|err| IdentityError::Request {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl IdentitySource for MetadataIdentity {
    fn resolve(&self) -> ProbeFuture<'_, InstanceIdentity, IdentityError> {
        Box::pin(async move {
            let response = self.client.get(&self.url).send().await.map_err(|err| {
                IdentityError::Request {
                    message: err.to_string(),
                }
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(IdentityError::Status {
                    status: status.as_u16(),
                });
            }
            let body = response.text().await.map_err(|err| IdentityError::Request {
                message: err.to_string(),
            })?;
            parse_metadata(&body)
        })
    }
}

//! Raw access to Instances API endpoints that `scaleway-rs` does not wrap.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use scaleway_rs::ScalewayApiError;
use serde::de::DeserializeOwned;

use super::ScalewayProviderError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

/// Reserved user-data key that Scaleway hands to cloud-init on first boot.
pub(super) const CLOUD_INIT_USER_DATA_KEY: &str = "cloud-init";

pub(super) static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

pub(super) fn zone_url(zone: &str, path: &str) -> String {
    format!("{INSTANCE_API_BASE}/zones/{zone}/{path}")
}

pub(super) fn user_data_url(zone: &str, server_id: &str) -> String {
    zone_url(
        zone,
        &format!("servers/{server_id}/user_data/{CLOUD_INIT_USER_DATA_KEY}"),
    )
}

/// Buffered response of a raw API call.
pub(super) struct ApiResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl ApiResponse {
    pub(super) const fn status(&self) -> StatusCode {
        self.status
    }

    pub(super) fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub(super) fn json<T: DeserializeOwned>(&self) -> Result<T, ScalewayProviderError> {
        serde_json::from_slice(&self.body).map_err(|err| ScalewayProviderError::Provider {
            message: format!("unexpected API response: {err}"),
        })
    }

    pub(super) fn api_error(&self) -> Option<ScalewayApiError> {
        serde_json::from_slice(&self.body).ok()
    }

    pub(super) fn message(&self) -> String {
        self.api_error().map_or_else(
            || String::from_utf8_lossy(&self.body).into_owned(),
            |api_err| api_err.message,
        )
    }

    pub(super) fn into_error(self) -> ScalewayProviderError {
        ScalewayProviderError::Api {
            status: self.status.as_u16(),
            message: self.message(),
        }
    }
}

/// Authenticates and sends `request`, buffering the body.
pub(super) async fn send(
    request: RequestBuilder,
    secret_key: &str,
) -> Result<ApiResponse, ScalewayProviderError> {
    let response = request
        .header("X-Auth-Token", secret_key)
        .send()
        .await
        .map_err(ScalewayProviderError::provider)?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(ScalewayProviderError::provider)?
        .to_vec();
    Ok(ApiResponse { status, body })
}

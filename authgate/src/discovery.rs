//! OpenID Connect provider discovery.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::errors::{Error, Result};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The subset of the provider metadata document the verifiers need.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Builds the outbound HTTP client shared by discovery and the verifiers.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    // Only the first install wins; later calls see an already-installed provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal {
            operation: format!("build HTTP client: {e}"),
        })
}

/// Fetches `{origin}/.well-known/openid-configuration`.
///
/// Failure to reach the provider is reported as [`Error::KeySetUnavailable`] so that
/// startup fails fast and request-time refreshes map to "service unavailable".
#[instrument(skip(client), err)]
pub async fn discover(client: &reqwest::Client, origin: &str) -> Result<ProviderMetadata> {
    let url = format!("{}{WELL_KNOWN_PATH}", origin.trim_end_matches('/'));
    debug!("Fetching provider metadata from {}", url);

    let response = client.get(&url).send().await.map_err(|e| Error::KeySetUnavailable {
        message: format!("discovery request to {url} failed: {e}"),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::KeySetUnavailable {
            message: format!("discovery at {url} returned {status}"),
        });
    }

    response.json::<ProviderMetadata>().await.map_err(|e| Error::KeySetUnavailable {
        message: format!("invalid discovery document at {url}: {e}"),
    })
}

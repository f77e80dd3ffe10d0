//! Location of the identity provider.

use serde::{Deserialize, Serialize};

/// Where the identity provider lives. Every verifier and handler initializer receives one
/// to resolve the provider's endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Issuer {
    pub domain: String,
    pub port: u16,
    pub tls: bool,
}

impl Default for Issuer {
    fn default() -> Self {
        Self {
            domain: String::new(),
            port: 443,
            tls: true,
        }
    }
}

impl Issuer {
    /// An issuer reachable over TLS on port 443.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// An issuer reachable over plain HTTP on the given port, for local development.
    pub fn insecure(domain: impl Into<String>, port: u16) -> Self {
        Self {
            domain: domain.into(),
            port,
            tls: false,
        }
    }

    /// Scheme, host and (non-default) port, e.g. `https://auth.example.com` or
    /// `http://localhost:8080`.
    pub fn origin(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            format!("{scheme}://{}", self.domain)
        } else {
            format!("{scheme}://{}:{}", self.domain, self.port)
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

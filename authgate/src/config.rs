//! Configuration management.
//!
//! Configuration is loaded from a YAML file, with environment variables prefixed by
//! `AUTHGATE_` overriding individual values. Nested keys are separated by a double
//! underscore:
//!
//! ```bash
//! AUTHGATE_SECRET_KEY="$(openssl rand -base64 32)"
//! AUTHGATE_ISSUER__DOMAIN=auth.example.com
//! AUTHGATE_AUTHORIZATION__CACHE__TTL=5m
//! AUTHGATE_AUTHENTICATION__SESSION__STORAGE=cookie
//! ```
//!
//! A minimal file:
//!
//! ```yaml
//! secret_key: change-me-to-at-least-32-bytes-of-entropy
//! issuer:
//!   domain: auth.example.com
//! authorization:
//!   verifier:
//!     type: introspection
//!     key_file: /etc/authgate/api-key.json
//!   methods:
//!     /tasks.v1.TaskService/DeleteTask: [admin]
//! ```

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::{
    authentication::DEFAULT_COOKIE_NAME, authorization::cache::DEFAULT_CACHE_TTL, authorization::jwt::DEFAULT_JWKS_TTL,
    crypto::MIN_KEY_LEN, errors::Error, issuer::Issuer, telemetry::LogFormat,
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub issuer: Issuer,
    /// Encrypts the OAuth state and session cookies. At least 32 bytes.
    pub secret_key: String,
    pub log_format: LogFormat,
    pub authentication: AuthenticationConfig,
    pub authorization: AuthorizationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthenticationConfig {
    /// Path the login, callback and logout routes are nested under
    pub prefix: String,
    pub session: SessionConfig,
    /// Where the provider sends the user after logout. Derived from the request when unset.
    pub post_logout_redirect_uri: Option<String>,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            prefix: "/auth".to_string(),
            session: SessionConfig::default(),
            post_logout_redirect_uri: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStorage {
    /// Sessions held in process memory, the cookie carries an encrypted session ID
    #[default]
    Memory,
    /// The whole session is encrypted into the cookie
    Cookie,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub storage: SessionStorage,
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
    /// Forces the cookie `Secure` attribute on or off. Follows `issuer.tls` when unset.
    pub cookie_secure: Option<bool>,
    /// How often expired in-memory sessions are purged. Requires `max_age`.
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            storage: SessionStorage::Memory,
            max_age: None,
            cookie_secure: None,
            reaper_interval: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorizationConfig {
    pub verifier: VerifierConfig,
    pub cache: CacheConfig,
    /// Upper bound for a single verification, including any upstream call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Request path (gRPC full method name) to the roles it requires. Paths not listed are public.
    pub methods: HashMap<String, Vec<String>>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            verifier: VerifierConfig::default(),
            cache: CacheConfig::default(),
            timeout: Duration::from_secs(10),
            methods: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// How bearer tokens are verified.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum VerifierConfig {
    /// Ask the provider's introspection endpoint, authenticating with either a JWT-profile
    /// key file or a client ID and secret
    Introspection {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        client_secret: Option<String>,
        #[serde(default)]
        key_file: Option<PathBuf>,
    },
    /// Validate JWT access tokens locally against the provider's key set
    Jwt {
        /// Expected `aud`. Not checked when unset.
        #[serde(default)]
        audience: Option<String>,
        #[serde(default = "default_algorithms")]
        algorithms: Vec<Algorithm>,
        #[serde(default = "default_jwks_ttl", with = "humantime_serde")]
        jwks_ttl: Duration,
        #[serde(default, with = "humantime_serde")]
        leeway: Duration,
    },
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig::Jwt {
            audience: None,
            algorithms: default_algorithms(),
            jwks_ttl: default_jwks_ttl(),
            leeway: Duration::ZERO,
        }
    }
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_jwks_ttl() -> Duration {
    DEFAULT_JWKS_TTL
}

fn invalid(message: impl std::fmt::Display) -> Error {
    Error::Internal {
        operation: format!("Config validation: {message}"),
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(path).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("AUTHGATE_").split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.issuer.domain.trim().is_empty() {
            return Err(invalid("issuer.domain is required"));
        }

        if self.secret_key.len() < MIN_KEY_LEN {
            return Err(invalid(format!(
                "secret_key must be at least {MIN_KEY_LEN} bytes, got {}. \
                 Set AUTHGATE_SECRET_KEY or add secret_key to the config file.",
                self.secret_key.len()
            )));
        }

        let authentication = &self.authentication;
        if !authentication.prefix.starts_with('/') {
            return Err(invalid(format!(
                "authentication.prefix must start with '/', got '{}'",
                authentication.prefix
            )));
        }
        if let Some(uri) = &authentication.post_logout_redirect_uri
            && let Err(e) = Url::parse(uri)
        {
            return Err(invalid(format!("authentication.post_logout_redirect_uri '{uri}' is not an absolute URL: {e}")));
        }
        let session = &authentication.session;
        if session.cookie_name.is_empty() || session.cookie_name.contains([';', '=', ' ', ',']) {
            return Err(invalid(format!("invalid session cookie name '{}'", session.cookie_name)));
        }
        if session.max_age.is_some_and(|age| age.is_zero()) {
            return Err(invalid("authentication.session.max_age must be greater than zero"));
        }
        if session.reaper_interval.is_some() && session.max_age.is_none() {
            return Err(invalid("authentication.session.reaper_interval requires max_age"));
        }
        if session.reaper_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(invalid("authentication.session.reaper_interval must be greater than zero"));
        }

        let authorization = &self.authorization;
        if authorization.cache.enabled && authorization.cache.ttl.is_zero() {
            return Err(invalid("authorization.cache.ttl must be greater than zero when the cache is enabled"));
        }
        if authorization.timeout.is_zero() {
            return Err(invalid("authorization.timeout must be greater than zero"));
        }
        match &authorization.verifier {
            VerifierConfig::Introspection {
                client_id,
                client_secret,
                key_file,
            } => {
                if key_file.is_none() && (client_id.is_none() || client_secret.is_none()) {
                    return Err(invalid(
                        "introspection verifier requires either key_file or both client_id and client_secret",
                    ));
                }
            }
            VerifierConfig::Jwt { algorithms, jwks_ttl, .. } => {
                if algorithms.is_empty() {
                    return Err(invalid("jwt verifier requires at least one algorithm"));
                }
                if jwks_ttl.is_zero() {
                    return Err(invalid("jwt verifier jwks_ttl must be greater than zero"));
                }
            }
        }

        Ok(())
    }
}

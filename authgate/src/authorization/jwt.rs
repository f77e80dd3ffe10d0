//! Local verification of JWT access tokens against the provider's published key set.

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header,
    jwk::{Jwk, JwkSet},
};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::{
    context::{AuthorizationContext, IntrospectionContext},
    verifier::{Verifier, bearer_token},
};
use crate::{
    discovery::{self, ProviderMetadata},
    errors::{Error, Result},
    issuer::Issuer,
};

pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Cached copy of the provider's JWKS.
///
/// The set is refetched when it is older than the TTL, or when a token names a `kid`
/// the cached set does not contain. Unknown-`kid` refetches are rate limited by the
/// minimum refresh interval so forged key IDs cannot hammer the provider.
pub struct JwksCache {
    client: reqwest::Client,
    uri: String,
    ttl: Duration,
    min_refresh_interval: Duration,
    state: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    pub fn new(client: reqwest::Client, uri: impl Into<String>) -> Self {
        Self {
            client,
            uri: uri.into(),
            ttl: DEFAULT_JWKS_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            state: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Returns the key for `kid`, or the only key of the set when the token carries no `kid`.
    pub async fn key(&self, kid: Option<&str>) -> Result<Jwk> {
        {
            let state = self.state.read().await;
            if let Some(cached) = state.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.ttl {
                    if let Some(jwk) = select(&cached.keys, kid)? {
                        debug!("JWKS cache hit");
                        return Ok(jwk);
                    }
                    if age < self.min_refresh_interval {
                        return Err(unknown_kid(kid));
                    }
                }
            }
        }

        let mut state = self.state.write().await;
        // Another task may have refreshed while we waited for the write lock. A set past
        // its TTL is never fresh, even inside the refresh interval.
        let fresh_for = self.ttl.min(self.min_refresh_interval);
        let fresh = state
            .as_ref()
            .is_some_and(|cached| cached.fetched_at.elapsed() < fresh_for);
        if !fresh {
            let keys = self.fetch().await?;
            *state = Some(CachedKeys {
                keys,
                fetched_at: Instant::now(),
            });
        }

        match state.as_ref() {
            Some(cached) => select(&cached.keys, kid)?.ok_or_else(|| unknown_kid(kid)),
            None => Err(unknown_kid(kid)),
        }
    }

    async fn fetch(&self) -> Result<JwkSet> {
        debug!("Fetching JWKS from {}", self.uri);
        let response = self.client.get(&self.uri).send().await.map_err(|e| Error::KeySetUnavailable {
            message: format!("request to {} failed: {e}", self.uri),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::KeySetUnavailable {
                message: format!("{} returned {status}", self.uri),
            });
        }

        response.json::<JwkSet>().await.map_err(|e| Error::KeySetUnavailable {
            message: format!("invalid key set at {}: {e}", self.uri),
        })
    }
}

fn select(keys: &JwkSet, kid: Option<&str>) -> Result<Option<Jwk>> {
    match kid {
        Some(kid) => Ok(keys.find(kid).cloned()),
        None => match keys.keys.as_slice() {
            [only] => Ok(Some(only.clone())),
            _ => Err(Error::InvalidToken {
                reason: "token has no kid and the key set is ambiguous".to_string(),
            }),
        },
    }
}

fn unknown_kid(kid: Option<&str>) -> Error {
    Error::InvalidToken {
        reason: format!("no key found for kid {:?}", kid.unwrap_or_default()),
    }
}

/// Validates signature, expiry and issuer locally, without a round trip per request.
pub struct JwtVerifier {
    issuer: String,
    keys: JwksCache,
    audience: Option<String>,
    algorithms: Vec<Algorithm>,
    leeway: u64,
}

impl JwtVerifier {
    pub fn new(client: reqwest::Client, metadata: &ProviderMetadata, audience: Option<String>) -> Self {
        Self {
            issuer: metadata.issuer.clone(),
            keys: JwksCache::new(client, metadata.jwks_uri.clone()),
            audience,
            algorithms: vec![Algorithm::RS256],
            leeway: 0,
        }
    }

    /// Resolves the key set through discovery against `issuer`. Fails if the provider
    /// cannot be reached.
    pub async fn discover(issuer: &Issuer, audience: Option<String>, timeout: Duration) -> Result<Self> {
        let client = discovery::http_client(timeout)?;
        let metadata = discovery::discover(&client, &issuer.origin()).await?;
        Ok(Self::new(client, &metadata, audience))
    }

    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Clock skew tolerance in seconds.
    pub fn with_leeway(mut self, leeway: u64) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn with_keys(mut self, keys: JwksCache) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.keys = self.keys.with_ttl(ttl);
        self
    }

    async fn verify(&self, token: &str) -> Result<IntrospectionContext> {
        let header = decode_header(token).map_err(|e| Error::InvalidToken {
            reason: format!("invalid header: {e}"),
        })?;

        if !self.algorithms.contains(&header.alg) {
            return Err(Error::InvalidToken {
                reason: format!("algorithm {:?} is not allowed", header.alg),
            });
        }

        let jwk = self.keys.key(header.kid.as_deref()).await?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|e| Error::InvalidToken {
            reason: format!("unusable key: {e}"),
        })?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<IntrospectionContext>(token, &key, &validation).map_err(|e| Error::InvalidToken { reason: e.to_string() })?;
        let mut ctx = data.claims;

        if ctx.aud.as_ref().is_none_or(|aud| aud.is_empty()) {
            return Err(Error::InvalidToken {
                reason: "empty aud".to_string(),
            });
        }

        ctx.active = true;
        ctx.set_token(token.to_string());
        Ok(ctx)
    }
}

#[async_trait]
impl Verifier<IntrospectionContext> for JwtVerifier {
    #[instrument(skip_all, err)]
    async fn check_authorization(&self, authorization: &str) -> Result<IntrospectionContext> {
        let token = bearer_token(authorization)?;
        let ctx = self.verify(token).await.inspect_err(|e| {
            if e.is_upstream_unavailable() {
                warn!("Key set unavailable while verifying token: {}", e);
            }
        })?;
        debug!(user_id = ctx.user_id(), "JWT verified");
        Ok(ctx)
    }
}

use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};

use super::{
    cache::CachingVerifier,
    check::Check,
    context::{AuthorizationContext, IntrospectionContext},
    introspection::{IntrospectionAuth, IntrospectionVerifier, KeyFile},
    jwt::JwtVerifier,
    verifier::{Verifier, bearer_token},
};
use crate::{
    config::{AuthorizationConfig, VerifierConfig},
    errors::{Error, Result},
    issuer::Issuer,
};

/// Verifies bearer tokens and enforces role checks on the resulting context.
pub struct Authorizer<T: AuthorizationContext> {
    verifier: Arc<dyn Verifier<T>>,
    timeout: Option<Duration>,
}

impl<T: AuthorizationContext> Clone for Authorizer<T> {
    fn clone(&self) -> Self {
        Self {
            verifier: self.verifier.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: AuthorizationContext> std::fmt::Debug for Authorizer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl<T: AuthorizationContext> Authorizer<T> {
    /// Builds the verifier with `init`, which typically resolves provider discovery.
    /// Any initializer failure aborts construction.
    pub async fn new<F, Fut, V>(issuer: Issuer, init: F) -> anyhow::Result<Self>
    where
        F: FnOnce(Issuer) -> Fut,
        Fut: Future<Output = Result<V>>,
        V: Verifier<T> + 'static,
    {
        let origin = issuer.origin();
        let verifier = init(issuer)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize verifier for {}: {}", origin, e))?;
        Ok(Self::from_verifier(verifier))
    }

    pub fn from_verifier(verifier: impl Verifier<T> + 'static) -> Self {
        Self {
            verifier: Arc::new(verifier),
            timeout: None,
        }
    }

    /// Bounds each verification; exceeding it is reported as service unavailable.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Verifies `authorization` (the full header value) and runs `checks` in order.
    ///
    /// Fails with [`Error::Unauthorized`] for missing, malformed, rejected or inactive
    /// tokens, [`Error::ServiceUnavailable`] when the identity provider could not answer,
    /// and [`Error::PermissionDenied`] on the first failing check.
    #[instrument(skip_all, fields(checks = checks.len()))]
    pub async fn check_authorization(&self, authorization: &str, checks: &[Check]) -> Result<T> {
        debug!("Checking authorization");
        let token = match bearer_token(authorization) {
            Ok(token) => token,
            Err(e) => {
                warn!("No valid authorization header");
                return Err(Error::unauthorized(Some(e)));
            }
        };

        let mut ctx = match self.verify(authorization).await {
            Ok(ctx) if ctx.is_authorized() => ctx,
            Ok(_) => {
                warn!("Token is not active");
                return Err(Error::unauthorized(None));
            }
            Err(e) if e.is_upstream_unavailable() => {
                warn!(error = %e, "Service unavailable");
                return Err(Error::ServiceUnavailable { source: Box::new(e) });
            }
            Err(e) => {
                warn!(error = %e, "Unauthorized");
                return Err(Error::unauthorized(Some(e)));
            }
        };

        for check in checks {
            if let Err(reason) = check.evaluate(&ctx) {
                warn!(user_id = ctx.user_id(), reason = %reason, "Permission denied");
                return Err(Error::PermissionDenied { reason });
            }
        }

        ctx.set_token(token.to_string());
        Ok(ctx)
    }

    async fn verify(&self, authorization: &str) -> Result<T> {
        match self.timeout {
            Some(after) => tokio::time::timeout(after, self.verifier.check_authorization(authorization))
                .await
                .map_err(|_| Error::UpstreamTimeout { after })?,
            None => self.verifier.check_authorization(authorization).await,
        }
    }
}

impl Authorizer<IntrospectionContext> {
    /// Builds the configured verifier (with the optional token cache) against `issuer`.
    pub async fn from_config(issuer: &Issuer, config: &AuthorizationConfig) -> anyhow::Result<Self> {
        let cache = config.cache.enabled.then_some(config.cache.ttl);
        let http_timeout = config.timeout;

        let authorizer = match &config.verifier {
            VerifierConfig::Introspection {
                client_id,
                client_secret,
                key_file,
            } => {
                let auth = match (key_file, client_id, client_secret) {
                    (Some(path), _, _) => IntrospectionAuth::JwtProfile(KeyFile::from_path(path)?),
                    (None, Some(client_id), Some(client_secret)) => IntrospectionAuth::ClientSecret {
                        client_id: client_id.clone(),
                        client_secret: client_secret.clone(),
                    },
                    _ => anyhow::bail!("introspection verifier requires either key_file or client_id and client_secret"),
                };
                Self::new(issuer.clone(), |issuer| async move {
                    let verifier = IntrospectionVerifier::<IntrospectionContext>::discover(&issuer, auth, http_timeout).await?;
                    Ok(with_cache(verifier, cache))
                })
                .await?
            }
            VerifierConfig::Jwt {
                audience,
                algorithms,
                jwks_ttl,
                leeway,
            } => {
                let audience = audience.clone();
                let algorithms = algorithms.clone();
                let (jwks_ttl, leeway) = (*jwks_ttl, leeway.as_secs());
                Self::new(issuer.clone(), |issuer| async move {
                    let verifier = JwtVerifier::discover(&issuer, audience, http_timeout)
                        .await?
                        .with_algorithms(algorithms)
                        .with_jwks_ttl(jwks_ttl)
                        .with_leeway(leeway);
                    Ok(with_cache(verifier, cache))
                })
                .await?
            }
        };

        Ok(authorizer.with_timeout(config.timeout))
    }
}

fn with_cache<V>(verifier: V, ttl: Option<Duration>) -> Arc<dyn Verifier<IntrospectionContext>>
where
    V: Verifier<IntrospectionContext> + 'static,
{
    match ttl {
        Some(ttl) => Arc::new(CachingVerifier::new(verifier, ttl)),
        None => Arc::new(verifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CacheConfig,
        test_utils::{StubVerifier, context_with_roles, mount_provider, sign_token},
    };
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    fn admin_verifier() -> StubVerifier {
        StubVerifier::new(|token| match token {
            "admin-token" => Ok(context_with_roles("user-1", json!({ "admin": { "org-1": "acme.example.com" } }))),
            "inactive-token" => Ok(IntrospectionContext::default()),
            "bad-gateway" => Err(Error::IntrospectionFailed {
                status: Some(StatusCode::BAD_GATEWAY),
                message: "bad gateway".to_string(),
            }),
            _ => Err(Error::IntrospectionFailed {
                status: Some(StatusCode::BAD_REQUEST),
                message: "invalid_request".to_string(),
            }),
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_authorized_with_roles() {
        let authorizer = Authorizer::from_verifier(admin_verifier());
        let ctx = authorizer
            .check_authorization(
                "Bearer admin-token",
                &[Check::with_role("admin"), Check::with_role_in_organization("admin", "org-1")],
            )
            .await
            .unwrap();

        assert_eq!(ctx.user_id(), "user-1");
        assert_eq!(ctx.token(), "admin-token");
    }

    #[test_log::test(tokio::test)]
    async fn test_malformed_header_is_unauthorized_without_verifying() {
        let stub = admin_verifier();
        let authorizer = Authorizer::from_verifier(stub.clone());

        for header in ["", "Bearer", "Bearer   ", "Basic abc"] {
            match authorizer.check_authorization(header, &[]).await {
                Err(Error::Unauthorized { source }) => {
                    assert!(matches!(source.as_deref(), Some(Error::InvalidAuthorizationHeader)))
                }
                other => panic!("unexpected result for {header:?}: {other:?}"),
            }
        }
        assert_eq!(stub.calls(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_inactive_token_is_unauthorized() {
        let authorizer = Authorizer::from_verifier(admin_verifier());
        let err = authorizer.check_authorization("Bearer inactive-token", &[]).await.unwrap_err();

        assert!(matches!(err, Error::Unauthorized { source: None }));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_client_error_is_unauthorized_and_server_error_is_unavailable() {
        let authorizer = Authorizer::from_verifier(admin_verifier());

        let err = authorizer.check_authorization("Bearer unknown", &[]).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = authorizer.check_authorization("Bearer bad-gateway", &[]).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable { .. }));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test_log::test(tokio::test)]
    async fn test_first_failing_check_is_permission_denied() {
        let authorizer = Authorizer::from_verifier(admin_verifier());
        let err = authorizer
            .check_authorization(
                "Bearer admin-token",
                &[Check::with_role("admin"), Check::with_role("billing"), Check::with_role("auditor")],
            )
            .await
            .unwrap_err();

        match err {
            Error::PermissionDenied { reason } => assert_eq!(reason, "missing required role: `billing`"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct SlowVerifier;

    #[async_trait::async_trait]
    impl Verifier<IntrospectionContext> for SlowVerifier {
        async fn check_authorization(&self, _authorization: &str) -> Result<IntrospectionContext> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(context_with_roles("user-1", json!({})))
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_timeout_is_service_unavailable() {
        let authorizer = Authorizer::from_verifier(SlowVerifier).with_timeout(Duration::from_millis(20));
        let err = authorizer.check_authorization("Bearer token", &[]).await.unwrap_err();

        match err {
            Error::ServiceUnavailable { source } => assert!(matches!(*source, Error::UpstreamTimeout { .. })),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initializer_failure_aborts_construction() {
        let result = Authorizer::<IntrospectionContext>::new(Issuer::new("auth.example.com"), |_| async {
            Err::<StubVerifier, _>(Error::KeySetUnavailable {
                message: "unreachable".to_string(),
            })
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("https://auth.example.com"));
    }

    #[tokio::test]
    async fn test_from_config_with_jwt_verifier() {
        let server = MockServer::start().await;
        mount_provider(&server).await;

        let address = server.address();
        let issuer = Issuer::insecure(address.ip().to_string(), address.port());
        let config = AuthorizationConfig {
            verifier: VerifierConfig::Jwt {
                audience: Some("api-client".to_string()),
                algorithms: vec![jsonwebtoken::Algorithm::RS256],
                jwks_ttl: Duration::from_secs(600),
                leeway: Duration::ZERO,
            },
            cache: CacheConfig {
                enabled: true,
                ttl: Duration::from_secs(30),
            },
            ..Default::default()
        };
        let authorizer = Authorizer::from_config(&issuer, &config).await.unwrap();

        let token = sign_token(
            &json!({
                "iss": server.uri(),
                "sub": "user-1",
                "aud": "api-client",
                "exp": Utc::now().timestamp() + 300,
                "urn:zitadel:iam:org:project:roles": { "admin": { "org-1": "acme.example.com" } }
            }),
            Some("key-1"),
        );
        let ctx = authorizer
            .check_authorization(&format!("Bearer {token}"), &[Check::with_role("admin")])
            .await
            .unwrap();
        assert_eq!(ctx.user_id(), "user-1");
    }

    #[tokio::test]
    async fn test_from_config_with_introspection_verifier() {
        let server = MockServer::start().await;
        mount_provider(&server).await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/introspect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "active": true, "sub": "user-2" })))
            .expect(1)
            .mount(&server)
            .await;

        let address = server.address();
        let issuer = Issuer::insecure(address.ip().to_string(), address.port());
        let config = AuthorizationConfig {
            verifier: VerifierConfig::Introspection {
                client_id: Some("api-client".to_string()),
                client_secret: Some("api-secret".to_string()),
                key_file: None,
            },
            ..Default::default()
        };
        let authorizer = Authorizer::from_config(&issuer, &config).await.unwrap();

        // Second call is answered from the token cache
        for _ in 0..2 {
            let ctx = authorizer.check_authorization("Bearer opaque", &[]).await.unwrap();
            assert_eq!(ctx.user_id(), "user-2");
        }
    }

    #[tokio::test]
    async fn test_from_config_requires_introspection_credentials() {
        let config = AuthorizationConfig {
            verifier: VerifierConfig::Introspection {
                client_id: Some("api-client".to_string()),
                client_secret: None,
                key_file: None,
            },
            ..Default::default()
        };
        let err = Authorizer::from_config(&Issuer::new("auth.example.com"), &config).await.unwrap_err();
        assert!(err.to_string().contains("client_secret"));
    }
}

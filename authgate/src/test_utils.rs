//! Shared fixtures for unit tests: a signing key, a mock identity provider and a stub verifier.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    authorization::{IntrospectionContext, Verifier, bearer_token},
    discovery::ProviderMetadata,
    errors::Result,
};

pub const RSA_PRIVATE_KEY_PEM: &str = include_str!("../testdata/rsa_key.pem");

/// Base64url modulus of [`RSA_PRIVATE_KEY_PEM`]; the exponent is `AQAB`.
pub const RSA_MODULUS: &str = "sbYQ7UYqXrMAYQtR7JQbUQu9b9zNzDIgahunXBlnQepRodZrxWwHKgRfjj2EqHjoPIZ4xWaw4IqBR86WnBMdwUvjY4WWWMK126q0Fg1fgtI8yGzFUmy1tdawjxzWXj3Ylp5LlMTpwDRp0F9NiXqDrP3d5PE1ezwd6TnIyFDYVVNSlCiogLf0Bg4pXVGpJmR7ZCyHWK9TUL5S4i1BDWTbrndQVmrbAhBcMYQSi6MFSoxHfd1ZeqqVZm-upqBwX6RmwChHuZYqXBi1pfbhTQFs1tOI8fZCEKQ_SCe13anoEcNRVekWjeO4ht06THhIEuSoaWez5GvB-6qqWv4wlNHrjQ";

pub fn sign_token(claims: &Value, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(RSA_PRIVATE_KEY_PEM.as_bytes()).expect("test key must parse");
    jsonwebtoken::encode(&header, claims, &key).expect("test token must sign")
}

pub fn jwks_json(kid: &str) -> Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": RSA_MODULUS,
            "e": "AQAB"
        }]
    })
}

pub fn provider_metadata(origin: &str) -> ProviderMetadata {
    ProviderMetadata {
        issuer: origin.to_string(),
        jwks_uri: format!("{origin}/oauth/v2/keys"),
        introspection_endpoint: Some(format!("{origin}/oauth/v2/introspect")),
        end_session_endpoint: Some(format!("{origin}/oidc/v1/end_session")),
        token_endpoint: Some(format!("{origin}/oauth/v2/token")),
        authorization_endpoint: Some(format!("{origin}/oauth/v2/authorize")),
        userinfo_endpoint: Some(format!("{origin}/oidc/v1/userinfo")),
    }
}

/// Mounts the discovery document and a JWKS containing `key-1`.
pub async fn mount_provider(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "jwks_uri": format!("{}/oauth/v2/keys", server.uri()),
            "introspection_endpoint": format!("{}/oauth/v2/introspect", server.uri()),
            "end_session_endpoint": format!("{}/oidc/v1/end_session", server.uri())
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oauth/v2/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json("key-1")))
        .mount(server)
        .await;
}

/// An active context for `sub` carrying the given project role claim.
pub fn context_with_roles(sub: &str, roles: Value) -> IntrospectionContext {
    serde_json::from_value(json!({
        "active": true,
        "sub": sub,
        "urn:zitadel:iam:org:project:roles": roles
    }))
    .expect("test context must deserialize")
}

type Respond = dyn Fn(&str) -> Result<IntrospectionContext> + Send + Sync;

/// Verifier answering from a closure keyed by the bare token, counting upstream calls.
#[derive(Clone)]
pub struct StubVerifier {
    respond: Arc<Respond>,
    calls: Arc<AtomicUsize>,
}

impl StubVerifier {
    pub fn new(respond: impl Fn(&str) -> Result<IntrospectionContext> + Send + Sync + 'static) -> Self {
        Self {
            respond: Arc::new(respond),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Verifier<IntrospectionContext> for StubVerifier {
    async fn check_authorization(&self, authorization: &str) -> Result<IntrospectionContext> {
        let token = bearer_token(authorization)?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(token)
    }
}

pub mod authentication {
    use async_trait::async_trait;
    use axum::{
        http::{HeaderName, StatusCode, header, request::Parts},
        response::{IntoResponse, Response},
    };
    use serde_json::json;
    use url::Url;

    use crate::{
        authentication::{Callback, Handler, UserInfo, UserInfoContext},
        errors::{Error, Result},
    };

    /// Handler standing in for an identity provider.
    ///
    /// The callback `code` becomes the subject: an empty code yields an unauthenticated
    /// context, a missing one fails the exchange and `huge` carries an oversized claim.
    pub struct MockHandler;

    fn query(parts: &Parts, name: &str) -> Option<String> {
        let query = parts.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    #[async_trait]
    impl Handler<UserInfoContext> for MockHandler {
        async fn authenticate(&self, _parts: &Parts, state: String) -> Response {
            let location = Url::parse_with_params("https://idp.example.com/authorize", &[("client_id", "app"), ("state", &state)])
                .expect("static url must parse");
            (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
        }

        async fn callback(&self, parts: &Parts) -> Result<Callback<UserInfoContext>> {
            let code = query(parts, "code").ok_or(Error::NotAuthenticated)?;
            let state = query(parts, "state").unwrap_or_default();

            let mut user_info = UserInfo {
                sub: code.clone(),
                ..Default::default()
            };
            if code == "huge" {
                user_info.claims.insert("padding".to_string(), json!("x".repeat(8192)));
            }
            Ok(Callback {
                context: UserInfoContext::new(user_info, None),
                state,
            })
        }

        async fn logout(&self, _parts: &Parts, context: Option<UserInfoContext>, state: String, post_logout_redirect_uri: String) -> Response {
            let location = Url::parse_with_params(
                "https://idp.example.com/end_session",
                &[("post_logout_redirect_uri", post_logout_redirect_uri.as_str()), ("state", &state)],
            )
            .expect("static url must parse");
            let user = context.map(|c| c.user_info.sub).unwrap_or_else(|| "anonymous".to_string());
            (
                StatusCode::FOUND,
                [(header::LOCATION, location.to_string()), (HeaderName::from_static("x-logout-user"), user)],
            )
                .into_response()
        }
    }

    pub fn query_param(location: &str, name: &str) -> Option<String> {
        Url::parse(location)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// `name=value` of a `Set-Cookie` header.
    pub fn cookie_pair(set_cookie: &str) -> String {
        set_cookie.split(';').next().unwrap_or_default().trim().to_string()
    }
}

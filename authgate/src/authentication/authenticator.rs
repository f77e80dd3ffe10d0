use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};
use uuid::Uuid;

use super::{
    context::AuthenticationContext,
    handler::{Callback, Handler},
    session::{InMemorySessionStore, SessionStore},
    state::StateParam,
};
use crate::{
    config::{AuthenticationConfig, SessionStorage},
    crypto::StateCodec,
    errors::{Error, Result},
    issuer::Issuer,
};

pub const DEFAULT_COOKIE_NAME: &str = "zitadel.session";

/// Browsers silently drop cookies larger than this.
const MAX_COOKIE_SIZE: usize = 4096;

/// Where session contexts live.
pub enum SessionMode<T: AuthenticationContext> {
    /// The cookie holds an encrypted session ID resolved through the store.
    Stateful(Arc<dyn SessionStore<T>>),
    /// The cookie holds the encrypted context itself. Sessions cannot be revoked
    /// individually, only by rotating the encryption key.
    Stateless,
}

impl<T: AuthenticationContext> Clone for SessionMode<T> {
    fn clone(&self) -> Self {
        match self {
            SessionMode::Stateful(store) => SessionMode::Stateful(store.clone()),
            SessionMode::Stateless => SessionMode::Stateless,
        }
    }
}

impl<T: AuthenticationContext> fmt::Debug for SessionMode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Stateful(_) => f.write_str("Stateful"),
            SessionMode::Stateless => f.write_str("Stateless"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticatorOptions<T: AuthenticationContext> {
    pub session: SessionMode<T>,
    pub cookie_name: String,
    /// Overrides the `Secure` attribute, which otherwise follows the issuer's TLS setting.
    pub secure_cookie: Option<bool>,
    pub post_logout_redirect_uri: Option<String>,
    /// Cookie `Max-Age`; also bounds the lifetime of stateless sessions.
    pub max_age: Option<Duration>,
}

impl<T: AuthenticationContext> Default for AuthenticatorOptions<T> {
    fn default() -> Self {
        Self {
            session: SessionMode::Stateful(Arc::new(InMemorySessionStore::<T>::new())),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: None,
            post_logout_redirect_uri: None,
            max_age: None,
        }
    }
}

impl<T: AuthenticationContext> AuthenticatorOptions<T> {
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore<T>>) -> Self {
        self.session = SessionMode::Stateful(store);
        self
    }

    pub fn stateless(mut self) -> Self {
        self.session = SessionMode::Stateless;
        self
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = Some(secure);
        self
    }

    pub fn with_post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Options from configuration. With in-memory storage and a reaper interval, the
    /// reaper is spawned on the current tokio runtime and runs until `shutdown` is
    /// cancelled.
    pub async fn from_config(config: &AuthenticationConfig, shutdown: &CancellationToken) -> Self {
        let session = &config.session;
        let mode = match session.storage {
            SessionStorage::Cookie => SessionMode::Stateless,
            SessionStorage::Memory => {
                let mut store = InMemorySessionStore::<T>::new();
                if let Some(max_age) = session.max_age {
                    store = store.with_max_age(max_age);
                }
                let store = Arc::new(store);
                if let Some(interval) = session.reaper_interval {
                    let _reaper = store.spawn_reaper(interval, shutdown.clone());
                }
                SessionMode::Stateful(store)
            }
        };

        Self {
            session: mode,
            cookie_name: session.cookie_name.clone(),
            secure_cookie: session.cookie_secure,
            post_logout_redirect_uri: config.post_logout_redirect_uri.clone(),
            max_age: session.max_age,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StatelessSession<T> {
    context: T,
    /// Unix time in milliseconds
    issued_at_ms: i64,
}

/// Manages browser sessions: starts logins, completes callbacks and ends sessions,
/// delegating the OIDC protocol itself to a [`Handler`].
pub struct Authenticator<T: AuthenticationContext> {
    handler: Arc<dyn Handler<T>>,
    codec: StateCodec,
    session: SessionMode<T>,
    cookie_name: String,
    secure: bool,
    post_logout_redirect_uri: Option<String>,
    max_age: Option<Duration>,
}

impl<T: AuthenticationContext> fmt::Debug for Authenticator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("session", &self.session)
            .field("cookie_name", &self.cookie_name)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl<T: AuthenticationContext> Authenticator<T> {
    /// Validates the encryption key and builds the OIDC handler with `init`. Either
    /// failing aborts construction.
    pub async fn new<F, Fut, H>(issuer: Issuer, encryption_key: &[u8], init: F, options: AuthenticatorOptions<T>) -> anyhow::Result<Self>
    where
        F: FnOnce(Issuer) -> Fut,
        Fut: Future<Output = anyhow::Result<H>>,
        H: Handler<T> + 'static,
    {
        let codec = StateCodec::new(encryption_key).map_err(|e| anyhow::anyhow!("Invalid session encryption key: {}", e))?;
        let secure = options.secure_cookie.unwrap_or(issuer.is_tls());
        let origin = issuer.origin();
        let handler = init(issuer)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize authentication handler for {}: {:#}", origin, e))?;

        Ok(Self {
            handler: Arc::new(handler),
            codec,
            session: options.session,
            cookie_name: options.cookie_name,
            secure,
            post_logout_redirect_uri: options.post_logout_redirect_uri,
            max_age: options.max_age,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Starts a login, remembering `requested_uri` in the encrypted state.
    #[instrument(skip(self, parts))]
    pub async fn authenticate(&self, parts: &Parts, requested_uri: &str) -> Response {
        match StateParam::new(requested_uri).encrypt(&self.codec) {
            Ok(state) => self.handler.authenticate(parts, state).await,
            Err(e) => {
                error!("Failed to encrypt state: {}", e);
                e.into_response()
            }
        }
    }

    /// Completes a login: creates the session and redirects to the originally requested URI.
    #[instrument(skip_all)]
    pub async fn callback(&self, parts: &Parts) -> Response {
        let Callback { context, state } = match self.handler.callback(parts).await {
            Ok(callback) if callback.context.is_authenticated() => callback,
            Ok(_) => {
                error!("Unauthenticated after callback");
                return Error::NotAuthenticated.into_response();
            }
            Err(e) => {
                error!("Callback failed: {}", e);
                return Error::NotAuthenticated.into_response();
            }
        };

        let target = match StateParam::decrypt(&state, &self.codec) {
            Ok(state) => state.redirect_target().to_string(),
            Err(e) => {
                warn!("Unable to decrypt state, redirecting to /: {}", e);
                "/".to_string()
            }
        };

        let value = match self.create_session(context).await {
            Ok(value) => value,
            Err(e) => return e.into_response(),
        };

        debug!("Session created, redirecting to {}", target);
        redirect(&target, Some(self.session_cookie(&value)))
    }

    /// Ends the current session, if any, and hands over to the provider's logout.
    #[instrument(skip_all)]
    pub async fn logout(&self, parts: &Parts) -> Response {
        let context = match self.is_authenticated(&parts.headers).await {
            Ok(context) => Some(context),
            Err(e) => {
                debug!("Logging out without an active session: {}", e);
                None
            }
        };

        if let SessionMode::Stateful(store) = &self.session {
            if let Some(id) = self.session_id(&parts.headers) {
                if let Err(e) = store.delete(&id).await {
                    warn!("Failed to delete session: {}", e);
                }
            }
        }

        let state = match StateParam::default().encrypt(&self.codec) {
            Ok(state) => state,
            Err(e) => return e.into_response(),
        };
        let post_logout = self
            .post_logout_redirect_uri
            .clone()
            .unwrap_or_else(|| derive_post_logout_uri(parts));

        let mut response = self.handler.logout(parts, context, state, post_logout).await;
        if let Ok(cookie) = HeaderValue::from_str(&self.clear_cookie()) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    }

    /// Resolves the session of the request.
    pub async fn is_authenticated(&self, headers: &HeaderMap) -> Result<T> {
        let value = self.cookie_value(headers).ok_or(Error::NoCookie)?;

        match &self.session {
            SessionMode::Stateless => {
                let session: StatelessSession<T> = self.codec.decrypt_json(value).map_err(|_| {
                    warn!("Unable to decrypt session cookie");
                    Error::InvalidSession
                })?;
                if let Some(max_age) = self.max_age {
                    let age_ms = Utc::now().timestamp_millis().saturating_sub(session.issued_at_ms);
                    if age_ms < 0 || age_ms as u128 >= max_age.as_millis() {
                        trace!("Stateless session expired");
                        return Err(Error::InvalidSession);
                    }
                }
                if !session.context.is_authenticated() {
                    return Err(Error::InvalidSession);
                }
                Ok(session.context)
            }
            SessionMode::Stateful(store) => {
                let id = self.decrypt_session_id(value)?;
                store.get(&id).await.map_err(|e| {
                    warn!("No session found for cookie: {}", e);
                    Error::NoSession
                })
            }
        }
    }

    /// The `/login`, `/callback` and `/logout` routes, to be nested under a prefix such
    /// as `/auth`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/login", get(login::<T>))
            .route("/callback", get(callback::<T>))
            .route("/logout", get(logout::<T>))
            .with_state(self)
    }

    async fn create_session(&self, context: T) -> Result<String> {
        match &self.session {
            SessionMode::Stateless => {
                let value = self.codec.encrypt_json(&StatelessSession {
                    context,
                    issued_at_ms: Utc::now().timestamp_millis(),
                })?;
                if self.cookie_name.len() + 1 + value.len() > MAX_COOKIE_SIZE {
                    error!(size = value.len(), "Session too large for a cookie");
                    return Err(Error::Internal {
                        operation: "store session: encrypted context exceeds cookie size limit".to_string(),
                    });
                }
                Ok(value)
            }
            SessionMode::Stateful(store) => {
                let id = Uuid::new_v4().to_string();
                store.set(&id, context).await.map_err(|e| {
                    error!("Unable to save session: {}", e);
                    Error::Internal {
                        operation: "store session".to_string(),
                    }
                })?;
                self.codec.encrypt(id.as_bytes())
            }
        }
    }

    fn decrypt_session_id(&self, value: &str) -> Result<String> {
        let id = self.codec.decrypt(value).map_err(|_| {
            warn!("Unable to decrypt session cookie");
            Error::NoSession
        })?;
        String::from_utf8(id).map_err(|_| Error::NoSession)
    }

    fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        self.cookie_value(headers)
            .and_then(|value| self.decrypt_session_id(value).ok())
    }

    fn cookie_value<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        for header in headers.get_all(header::COOKIE) {
            let Ok(cookies) = header.to_str() else {
                continue;
            };
            for cookie in cookies.split(';') {
                if let Some((name, value)) = cookie.trim().split_once('=') {
                    if name == self.cookie_name && !value.is_empty() {
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    fn session_cookie(&self, value: &str) -> String {
        let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", self.cookie_name, value);
        if let Some(max_age) = self.max_age {
            // Max-Age counts whole seconds, round up
            let seconds = max_age.as_secs() + u64::from(max_age.subsec_nanos() > 0);
            cookie.push_str(&format!("; Max-Age={}", seconds));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    fn clear_cookie(&self) -> String {
        let mut cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", self.cookie_name);
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// `{scheme}://{host}/` of the incoming request, honouring `x-forwarded-proto`.
fn derive_post_logout_uri(parts: &Parts) -> String {
    let forwarded = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let scheme = parts.uri.scheme_str().or(forwarded).unwrap_or("http");

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()));

    match host {
        Some(host) => format!("{scheme}://{host}/"),
        None => "/".to_string(),
    }
}

fn redirect(location: &str, cookie: Option<String>) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    let headers = response.headers_mut();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(header::LOCATION, value);
        }
        Err(_) => {
            headers.insert(header::LOCATION, HeaderValue::from_static("/"));
        }
    }
    if let Some(cookie) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        headers.append(header::SET_COOKIE, cookie);
    }
    response
}

async fn login<T: AuthenticationContext>(State(auth): State<Arc<Authenticator<T>>>, parts: Parts) -> Response {
    auth.authenticate(&parts, "").await
}

async fn callback<T: AuthenticationContext>(State(auth): State<Arc<Authenticator<T>>>, parts: Parts) -> Response {
    auth.callback(&parts).await
}

async fn logout<T: AuthenticationContext>(State(auth): State<Arc<Authenticator<T>>>, parts: Parts) -> Response {
    auth.logout(&parts).await
}

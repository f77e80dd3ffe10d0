//! # authgate: OIDC authentication and authorization middleware for axum
//!
//! `authgate` sits in front of HTTP and gRPC handlers and turns an incoming request into a
//! typed principal: a browser session cookie becomes an [`AuthenticationContext`], a bearer
//! token becomes an [`AuthorizationContext`]. Role checks are evaluated against the
//! provider's project role claims before the request reaches the handler.
//!
//! ## Architecture
//!
//! The **authentication layer** ([`authentication`]) runs the browser login. The
//! [`Authenticator`] starts the login with an encrypted `state` parameter, completes the
//! callback by creating a session and ends it on logout. The provider protocol itself (the
//! authorization-code exchange) is delegated to a [`Handler`] implementation. Sessions are
//! kept either in a [`SessionStore`], with only an encrypted session ID in the cookie, or
//! entirely inside the encrypted cookie.
//!
//! The **authorization layer** ([`authorization`]) serves API callers. A
//! [`Verifier`](authorization::Verifier) resolves the bearer token, either through the
//! provider's introspection endpoint or by validating a JWT against the provider's key set.
//! Results are cached per token for a short TTL. The [`Authorizer`] maps the outcome onto
//! 401, 403 or 503 (or the equivalent gRPC status) and runs the route's role checks.
//!
//! Both layers resolve the provider's endpoints through OpenID discovery against an
//! [`Issuer`] at startup; an unreachable provider fails construction.
//!
//! ## Usage
//!
//! ```ignore
//! let config = authgate::Config::load("config.yaml")?;
//! authgate::telemetry::init_telemetry(config.log_format)?;
//!
//! let authorizer = Authorizer::from_config(&config.issuer, &config.authorization).await?;
//! let api = Router::new()
//!     .route("/tasks.v1.TaskService/DeleteTask", post(delete_task))
//!     .layer(from_fn_with_state(
//!         MethodAuthorization::from_roles(authorizer, &config.authorization.methods),
//!         method_authorization::<IntrospectionContext>,
//!     ));
//!
//! let shutdown = CancellationToken::new();
//! let authenticator = Arc::new(
//!     Authenticator::new(
//!         config.issuer.clone(),
//!         config.secret_key.as_bytes(),
//!         |issuer| async move { MyOidcHandler::discover(issuer).await },
//!         AuthenticatorOptions::from_config(&config.authentication, &shutdown).await,
//!     )
//!     .await?,
//! );
//! let web = Router::new()
//!     .route("/", get(home))
//!     .layer(from_fn_with_state(authenticator.clone(), require_authentication::<UserInfoContext>))
//!     .nest(&config.authentication.prefix, authenticator.router());
//! ```

pub mod authentication;
pub mod authorization;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod errors;
pub mod issuer;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

pub use authentication::{AuthenticationContext, Authenticator, AuthenticatorOptions, Handler, SessionStore, UserInfoContext};
pub use authorization::{AuthorizationContext, Authorizer, Check, IntrospectionContext};
pub use config::Config;
pub use errors::{Error, Result};
pub use issuer::Issuer;

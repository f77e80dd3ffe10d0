//! axum middleware for browser sessions.

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{Extensions, request::Parts},
    middleware::Next,
    response::Response,
};
use std::{convert::Infallible, sync::Arc};
use tracing::{debug, instrument, trace};

use super::{authenticator::Authenticator, context::AuthenticationContext};
use crate::errors::Error;

#[derive(Clone)]
struct AuthenticatedContext<T>(T);

/// The session context of the current request, as inserted by [`require_authentication`]
/// or [`check_authentication`].
pub fn authentication_context<T: AuthenticationContext>(extensions: &Extensions) -> Option<&T> {
    extensions.get::<AuthenticatedContext<T>>().map(|ctx| &ctx.0)
}

/// Lets signed-in requests through with their context attached; everything else is sent
/// to the login, which brings the user back to the same path and query afterwards.
///
/// ```ignore
/// let app = Router::new()
///     .route("/reports", get(reports))
///     .layer(from_fn_with_state(authenticator.clone(), require_authentication::<UserInfoContext>))
///     .nest("/auth", authenticator.router());
/// ```
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn require_authentication<T: AuthenticationContext>(
    State(authenticator): State<Arc<Authenticator<T>>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticator.is_authenticated(request.headers()).await {
        Ok(ctx) => {
            request.extensions_mut().insert(AuthenticatedContext(ctx));
            next.run(request).await
        }
        Err(e) => {
            debug!("Redirecting unauthenticated request to login: {}", e);
            let requested_uri = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            let (parts, _) = request.into_parts();
            authenticator.authenticate(&parts, &requested_uri).await
        }
    }
}

/// Attaches the session context when there is one, never blocking the request.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn check_authentication<T: AuthenticationContext>(
    State(authenticator): State<Arc<Authenticator<T>>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticator.is_authenticated(request.headers()).await {
        Ok(ctx) => {
            request.extensions_mut().insert(AuthenticatedContext(ctx));
        }
        Err(e) => trace!("Continuing without session: {}", e),
    }
    next.run(request).await
}

/// Extractor for the session context. Rejects with 403 outside the authentication
/// middleware; use `Option<Authenticated<T>>` behind [`check_authentication`].
#[derive(Debug, Clone)]
pub struct Authenticated<T>(pub T);

impl<S, T> FromRequestParts<S> for Authenticated<T>
where
    S: Send + Sync,
    T: AuthenticationContext,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authentication_context::<T>(&parts.extensions)
            .cloned()
            .map(Authenticated)
            .ok_or(Error::NotAuthenticated)
    }
}

impl<S, T> OptionalFromRequestParts<S> for Authenticated<T>
where
    S: Send + Sync,
    T: AuthenticationContext,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Self::Rejection> {
        Ok(authentication_context::<T>(&parts.extensions).cloned().map(Authenticated))
    }
}

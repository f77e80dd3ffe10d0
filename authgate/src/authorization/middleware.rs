//! axum middleware enforcing bearer-token authorization, for plain HTTP and gRPC over HTTP/2.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{Extensions, HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, instrument, trace};

use super::{authorizer::Authorizer, check::Check, context::AuthorizationContext};
use crate::errors::{Error, Result};

/// Request extension slot for the verified context. Private so that nothing else can
/// populate or shadow it.
#[derive(Clone)]
struct AuthorizedContext<T>(T);

/// The authorization context of the current request, as inserted by
/// [`require_authorization`] or [`method_authorization`].
pub fn authorization_context<T: AuthorizationContext>(extensions: &Extensions) -> Option<&T> {
    extensions.get::<AuthorizedContext<T>>().map(|ctx| &ctx.0)
}

fn is_grpc(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/grpc"))
}

fn reject(grpc: bool, error: Error) -> Response {
    if grpc { error.into_grpc_response() } else { error.into_response() }
}

/// Runs the authorizer against the request and inserts the context on success.
async fn authorize<T: AuthorizationContext>(authorizer: &Authorizer<T>, checks: &[Check], mut request: Request, next: Next) -> Response {
    let grpc = is_grpc(request.headers());
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match authorizer.check_authorization(authorization, checks).await {
        Ok(ctx) => {
            trace!(user_id = ctx.user_id(), "Request authorized");
            request.extensions_mut().insert(AuthorizedContext(ctx));
            next.run(request).await
        }
        Err(e) => reject(grpc, e),
    }
}

/// State for [`require_authorization`]: every request must pass all `checks`.
pub struct RequireAuthorization<T: AuthorizationContext> {
    authorizer: Authorizer<T>,
    checks: Arc<[Check]>,
}

impl<T: AuthorizationContext> Clone for RequireAuthorization<T> {
    fn clone(&self) -> Self {
        Self {
            authorizer: self.authorizer.clone(),
            checks: self.checks.clone(),
        }
    }
}

impl<T: AuthorizationContext> RequireAuthorization<T> {
    pub fn new(authorizer: Authorizer<T>, checks: Vec<Check>) -> Self {
        Self {
            authorizer,
            checks: checks.into(),
        }
    }
}

/// Use with [`axum::middleware::from_fn_with_state`]:
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/tasks", get(list_tasks))
///     .layer(from_fn_with_state(
///         RequireAuthorization::new(authorizer, vec![Check::with_role("admin")]),
///         require_authorization::<IntrospectionContext>,
///     ));
/// ```
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn require_authorization<T: AuthorizationContext>(State(state): State<RequireAuthorization<T>>, request: Request, next: Next) -> Response {
    authorize(&state.authorizer, &state.checks, request, next).await
}

/// State for [`method_authorization`]: a table from request path (for gRPC the full
/// method, `/package.Service/Method`) to the checks it requires.
///
/// Paths absent from the table are public. A path mapped to no checks only requires a
/// valid token.
pub struct MethodAuthorization<T: AuthorizationContext> {
    authorizer: Authorizer<T>,
    methods: Arc<HashMap<String, Vec<Check>>>,
}

impl<T: AuthorizationContext> Clone for MethodAuthorization<T> {
    fn clone(&self) -> Self {
        Self {
            authorizer: self.authorizer.clone(),
            methods: self.methods.clone(),
        }
    }
}

impl<T: AuthorizationContext> MethodAuthorization<T> {
    pub fn new(authorizer: Authorizer<T>, methods: HashMap<String, Vec<Check>>) -> Self {
        Self {
            authorizer,
            methods: Arc::new(methods),
        }
    }

    /// Builds the table from a path to required-roles mapping.
    pub fn from_roles(authorizer: Authorizer<T>, methods: &HashMap<String, Vec<String>>) -> Self {
        let methods = methods
            .iter()
            .map(|(method, roles)| (method.clone(), roles.iter().map(Check::with_role).collect()))
            .collect();
        Self::new(authorizer, methods)
    }

    pub fn checks_for(&self, method: &str) -> Option<&[Check]> {
        self.methods.get(method).map(Vec::as_slice)
    }
}

#[instrument(skip_all, fields(method = %request.uri().path()))]
pub async fn method_authorization<T: AuthorizationContext>(State(state): State<MethodAuthorization<T>>, request: Request, next: Next) -> Response {
    let Some(checks) = state.checks_for(request.uri().path()) else {
        debug!("No authorization configured, allowing public access");
        return next.run(request).await;
    };
    authorize(&state.authorizer, checks, request, next).await
}

/// Extractor for the context inserted by the authorization middleware. Rejects with
/// 401 when the route is not behind that middleware or the request was public.
#[derive(Debug, Clone)]
pub struct Authorized<T>(pub T);

impl<S, T> FromRequestParts<S> for Authorized<T>
where
    S: Send + Sync,
    T: AuthorizationContext,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        authorization_context::<T>(&parts.extensions)
            .cloned()
            .map(Authorized)
            .ok_or_else(|| Error::unauthorized(None))
    }
}

use async_trait::async_trait;
use axum::{http::request::Parts, response::Response};

use super::context::AuthenticationContext;
use crate::errors::Result;

/// Outcome of the identity provider redirecting back to the application.
#[derive(Debug, Clone)]
pub struct Callback<T> {
    pub context: T,
    /// The encrypted `state` parameter echoed by the provider.
    pub state: String,
}

/// The OIDC relying-party flow: building the provider redirect, exchanging the code and
/// ending the provider session.
#[async_trait]
pub trait Handler<T: AuthenticationContext>: Send + Sync {
    /// Responds with a redirect to the provider's login, carrying `state`.
    async fn authenticate(&self, parts: &Parts, state: String) -> Response;

    /// Completes the code flow for the callback request.
    async fn callback(&self, parts: &Parts) -> Result<Callback<T>>;

    /// Responds with a redirect that ends the provider session, returning the user to
    /// `post_logout_redirect_uri`. `context` is `None` when there was no active session.
    async fn logout(&self, parts: &Parts, context: Option<T>, state: String, post_logout_redirect_uri: String) -> Response;
}

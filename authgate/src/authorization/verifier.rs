use async_trait::async_trait;
use std::sync::Arc;

use super::context::AuthorizationContext;
use crate::errors::{Error, Result};

const BEARER: &str = "Bearer";

/// Extracts the token from an `authorization` header value of the form `Bearer <token>`.
pub fn bearer_token(header: &str) -> Result<&str> {
    let rest = header
        .trim()
        .strip_prefix(BEARER)
        .ok_or(Error::InvalidAuthorizationHeader)?;

    if !rest.starts_with(char::is_whitespace) {
        return Err(Error::InvalidAuthorizationHeader);
    }

    match rest.trim() {
        "" => Err(Error::InvalidAuthorizationHeader),
        token => Ok(token),
    }
}

/// Turns a bearer credential into an authorization context.
///
/// Dropping the returned future aborts any in-flight request to the identity provider.
#[async_trait]
pub trait Verifier<T: AuthorizationContext>: Send + Sync {
    /// `authorization` is the full header value, including the `Bearer` scheme.
    async fn check_authorization(&self, authorization: &str) -> Result<T>;
}

#[async_trait]
impl<T, V> Verifier<T> for Arc<V>
where
    T: AuthorizationContext,
    V: Verifier<T> + ?Sized,
{
    async fn check_authorization(&self, authorization: &str) -> Result<T> {
        (**self).check_authorization(authorization).await
    }
}

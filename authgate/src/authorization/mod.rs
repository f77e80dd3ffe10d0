//! Bearer-token authorization for API callers.
//!
//! A [`Verifier`] turns the `authorization` header into an [`AuthorizationContext`],
//! either by asking the identity provider ([`IntrospectionVerifier`]) or by validating a
//! JWT locally ([`JwtVerifier`]). [`CachingVerifier`] reuses results for repeated tokens.
//! The [`Authorizer`] maps verifier outcomes onto 401/403/503 and evaluates role
//! [`Check`]s; the middleware applies it to axum routes.

pub mod authorizer;
pub mod cache;
pub mod check;
pub mod context;
pub mod introspection;
pub mod jwt;
pub mod middleware;
pub mod roles;
pub mod verifier;

pub use authorizer::Authorizer;
pub use cache::{CachingVerifier, TtlCache};
pub use check::Check;
pub use context::{Audience, AuthorizationContext, IntrospectionContext};
pub use introspection::{IntrospectionAuth, IntrospectionVerifier, KeyFile};
pub use jwt::{JwksCache, JwtVerifier};
pub use middleware::{Authorized, MethodAuthorization, RequireAuthorization, authorization_context, method_authorization, require_authorization};
pub use roles::RoleClaims;
pub use verifier::{Verifier, bearer_token};

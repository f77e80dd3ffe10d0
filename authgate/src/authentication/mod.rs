//! Browser sessions backed by an OIDC identity provider.
//!
//! The [`Authenticator`] owns the session lifecycle around a pluggable [`Handler`] that
//! speaks the provider protocol. Sessions live either in a [`SessionStore`] keyed by an
//! encrypted session ID, or entirely inside the encrypted cookie.

pub mod authenticator;
pub mod context;
pub mod handler;
pub mod middleware;
pub mod session;
pub mod state;

pub use authenticator::{Authenticator, AuthenticatorOptions, DEFAULT_COOKIE_NAME, SessionMode};
pub use context::{AuthenticationContext, Tokens, UserInfo, UserInfoContext};
pub use handler::{Callback, Handler};
pub use middleware::{Authenticated, authentication_context, check_authentication, require_authentication};
pub use session::{InMemorySessionStore, SessionStore};
pub use state::StateParam;

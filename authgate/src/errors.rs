use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The request carries no session cookie
    #[error("no session cookie")]
    NoCookie,

    /// The session cookie references a session the store does not know (or no longer knows)
    #[error("no session")]
    NoSession,

    /// The stateless session cookie could not be decrypted or decoded
    #[error("invalid session")]
    InvalidSession,

    /// The identity provider callback did not yield an authenticated user
    #[error("not authenticated")]
    NotAuthenticated,

    /// The authorization header is missing, not a `Bearer` credential, or empty
    #[error("invalid authorization header, must be prefixed with `Bearer`")]
    InvalidAuthorizationHeader,

    /// The introspection endpoint could not be reached or answered with a non-2xx status.
    /// `status` is `None` when no HTTP response was received at all.
    #[error("token introspection failed: {message}")]
    IntrospectionFailed { status: Option<StatusCode>, message: String },

    /// Local JWT validation rejected the token
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    /// The provider key set could not be fetched
    #[error("key set unavailable: {message}")]
    KeySetUnavailable { message: String },

    /// The upstream verification did not finish in time
    #[error("token verification timed out after {after:?}")]
    UpstreamTimeout { after: Duration },

    /// The caller could not be authorized (401)
    #[error("unauthorized{}", .source.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Unauthorized { source: Option<Box<Error>> },

    /// The caller is authorized but lacks a required grant (403)
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The identity provider is unavailable; callers may back off and retry (503)
    #[error("service unavailable: {source}")]
    ServiceUnavailable { source: Box<Error> },

    /// A state or session payload failed authenticated decryption
    #[error("decryption failed")]
    Decryption,

    /// The configured symmetric secret is too short
    #[error("encryption key must be at least {min} bytes, got {actual}")]
    InvalidKey { min: usize, actual: usize },

    /// Generic internal error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// gRPC status codes the middleware can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcCode {
    PermissionDenied = 7,
    Internal = 13,
    Unavailable = 14,
    Unauthenticated = 16,
}

impl GrpcCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl Error {
    pub fn unauthorized(source: Option<Error>) -> Self {
        Error::Unauthorized {
            source: source.map(Box::new),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoCookie | Error::NoSession | Error::InvalidSession => StatusCode::UNAUTHORIZED,
            Error::NotAuthenticated => StatusCode::FORBIDDEN,
            Error::InvalidAuthorizationHeader | Error::InvalidToken { .. } | Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::IntrospectionFailed { .. } => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            Error::ServiceUnavailable { .. } | Error::KeySetUnavailable { .. } | Error::UpstreamTimeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Decryption => StatusCode::UNAUTHORIZED,
            Error::InvalidKey { .. } | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The gRPC status equivalent of [`Error::status_code`].
    pub fn grpc_code(&self) -> GrpcCode {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => GrpcCode::Unauthenticated,
            StatusCode::FORBIDDEN => GrpcCode::PermissionDenied,
            StatusCode::SERVICE_UNAVAILABLE => GrpcCode::Unavailable,
            _ => GrpcCode::Internal,
        }
    }

    /// Whether the error means the identity provider could not answer, as opposed to
    /// answering with a rejection.
    pub fn is_upstream_unavailable(&self) -> bool {
        match self {
            Error::IntrospectionFailed { status: None, .. } => true,
            Error::IntrospectionFailed { status: Some(status), .. } => status.is_server_error(),
            Error::KeySetUnavailable { .. } | Error::UpstreamTimeout { .. } | Error::ServiceUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::NoCookie | Error::NoSession | Error::InvalidSession | Error::Decryption => "Authentication required".to_string(),
            Error::NotAuthenticated => "not authenticated".to_string(),
            Error::InvalidAuthorizationHeader => self.to_string(),
            Error::InvalidToken { .. } | Error::IntrospectionFailed { .. } => "unauthorized".to_string(),
            Error::Unauthorized { source } => match source.as_deref() {
                Some(Error::InvalidAuthorizationHeader) => "unauthorized: missing or malformed token".to_string(),
                _ => "unauthorized".to_string(),
            },
            Error::PermissionDenied { reason } => format!("permission denied: {reason}"),
            Error::ServiceUnavailable { .. } | Error::KeySetUnavailable { .. } | Error::UpstreamTimeout { .. } => {
                "authorization service unavailable".to_string()
            }
            Error::InvalidKey { .. } | Error::Internal { .. } => "Internal server error".to_string(),
        }
    }

    fn log(&self) {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => tracing::error!("Internal service error: {:#}", self),
            StatusCode::SERVICE_UNAVAILABLE => tracing::warn!("Upstream identity provider error: {}", self),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => tracing::info!("Authorization error: {}", self),
            _ => tracing::debug!("Client error: {}", self),
        }
    }

    /// Renders the error as a gRPC trailers-only response.
    pub fn into_grpc_response(self) -> Response {
        self.log();
        let code = self.grpc_code().as_i32();
        let message = self.user_message();

        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        headers.insert("grpc-status", HeaderValue::from(code));
        if let Ok(value) = HeaderValue::from_str(&message) {
            headers.insert("grpc-message", value);
        }
        response
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let mut response = (status, self.user_message()).into_response();
        if status == StatusCode::UNAUTHORIZED && matches!(self, Error::Unauthorized { .. } | Error::InvalidAuthorizationHeader) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

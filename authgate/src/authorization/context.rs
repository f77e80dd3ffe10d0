use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::roles::{RESOURCE_OWNER_ID_CLAIM, RoleClaims};

/// Principal produced by a [`Verifier`](super::Verifier) for an API caller.
///
/// Role evaluation is provided on top of [`AuthorizationContext::claims`], so an
/// implementation only has to expose where its claims live.
pub trait AuthorizationContext: Clone + Send + Sync + 'static {
    fn is_authorized(&self) -> bool;

    /// Subject of the token, empty when unknown.
    fn user_id(&self) -> &str;

    fn claims(&self) -> &Map<String, Value>;

    /// Records the raw token the context was verified from.
    fn set_token(&mut self, token: String);

    fn token(&self) -> &str;

    fn expires_at(&self) -> Option<DateTime<Utc>>;

    fn is_granted_role(&self, role: &str) -> bool {
        RoleClaims::from_claims(self.claims()).is_granted_role(role)
    }

    fn is_granted_role_in_organization(&self, role: &str, organization_id: &str) -> bool {
        RoleClaims::from_claims(self.claims()).is_granted_role_in_organization(role, organization_id)
    }

    fn is_granted_role_in_project(&self, project_id: &str, role: &str) -> bool {
        RoleClaims::for_project(self.claims(), project_id).is_granted_role(role)
    }

    /// Organization the user belongs to, present when the `resourceowner` scope was requested.
    fn organization_id(&self) -> Option<&str> {
        self.claims().get(RESOURCE_OWNER_ID_CLAIM).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn is_empty(&self) -> bool {
        match self {
            Audience::Single(aud) => aud.is_empty(),
            Audience::Multiple(auds) => auds.iter().all(String::is_empty),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == value,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

/// An RFC 7662 introspection response, or the claims of a locally validated JWT.
///
/// Claims not modelled as fields are kept in [`IntrospectionContext::claims`], which is
/// where the project role claims live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionContext {
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
    #[serde(skip)]
    token: String,
}

impl IntrospectionContext {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.as_deref().unwrap_or_default().split_whitespace()
    }
}

impl AuthorizationContext for IntrospectionContext {
    fn is_authorized(&self) -> bool {
        self.active
    }

    fn user_id(&self) -> &str {
        self.sub.as_deref().unwrap_or_default()
    }

    fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    fn set_token(&mut self, token: String) {
        self.token = token;
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }
}

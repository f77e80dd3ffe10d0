use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::authorization::AuthorizationContext;

/// Principal of a browser session.
///
/// Contexts are serialized into the session store, or into the cookie itself in
/// stateless mode, so they must round-trip through JSON.
pub trait AuthenticationContext: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    fn is_authenticated(&self) -> bool;
}

/// Standard OIDC userinfo claims. Everything else, including the project role claims,
/// lands in `claims`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Tokens obtained from the code exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfoContext {
    pub user_info: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Tokens>,
}

impl UserInfoContext {
    pub fn new(user_info: UserInfo, tokens: Option<Tokens>) -> Self {
        Self { user_info, tokens }
    }
}

impl AuthenticationContext for UserInfoContext {
    fn is_authenticated(&self) -> bool {
        !self.user_info.sub.is_empty()
    }
}

impl AuthorizationContext for UserInfoContext {
    fn is_authorized(&self) -> bool {
        self.is_authenticated()
    }

    fn user_id(&self) -> &str {
        &self.user_info.sub
    }

    fn claims(&self) -> &Map<String, Value> {
        &self.user_info.claims
    }

    fn set_token(&mut self, token: String) {
        match &mut self.tokens {
            Some(tokens) => tokens.access_token = token,
            None => {
                self.tokens = Some(Tokens {
                    access_token: token,
                    ..Default::default()
                })
            }
        }
    }

    fn token(&self) -> &str {
        self.tokens.as_ref().map(|t| t.access_token.as_str()).unwrap_or_default()
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.tokens
            .as_ref()
            .and_then(|t| t.expires_at)
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_info_context_capabilities() {
        let ctx: UserInfoContext = serde_json::from_value(json!({
            "user_info": {
                "sub": "user-1",
                "email": "alice@example.com",
                "urn:zitadel:iam:org:project:roles": { "admin": { "org-1": "acme.example.com" } },
                "urn:zitadel:iam:user:resourceowner:id": "org-1"
            },
            "tokens": { "access_token": "at", "expires_at": 1_900_000_000 }
        }))
        .unwrap();

        assert!(ctx.is_authenticated());
        assert!(ctx.is_authorized());
        assert_eq!(ctx.user_id(), "user-1");
        assert!(ctx.is_granted_role("admin"));
        assert!(ctx.is_granted_role_in_organization("admin", "org-1"));
        assert_eq!(ctx.organization_id(), Some("org-1"));
        assert_eq!(ctx.token(), "at");
        assert_eq!(ctx.expires_at().unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_empty_subject_is_not_authenticated() {
        let ctx = UserInfoContext::default();
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.token(), "");
    }

    #[test]
    fn test_json_roundtrip_keeps_extra_claims() {
        let mut user_info = UserInfo {
            sub: "user-1".to_string(),
            ..Default::default()
        };
        user_info.claims.insert("custom".to_string(), json!({ "nested": [1, 2] }));
        let ctx = UserInfoContext::new(user_info, None);

        let decoded: UserInfoContext = serde_json::from_str(&serde_json::to_string(&ctx).unwrap()).unwrap();
        assert_eq!(decoded, ctx);
    }
}

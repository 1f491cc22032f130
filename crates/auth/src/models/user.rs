//! Identity records returned by the provider.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl IdentityUser {
    pub fn email_or_empty(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }
}

/// Session issued by a successful sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: IdentityUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Sign-up payload. `metadata` is stored with the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_defaults_token_type() {
        let session: AuthSession = serde_json::from_value(json!({
            "access_token": "abc",
            "user": { "id": "u1", "email": "a@b.com" }
        }))
        .unwrap();
        assert_eq!(session.token_type, "bearer");
        assert_eq!(session.user.email_or_empty(), "a@b.com");
        assert!(session.user.user_metadata.is_empty());
    }
}

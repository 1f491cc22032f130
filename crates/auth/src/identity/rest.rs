//! Client for the hosted identity provider.
//!
//! Talks to two APIs under one base URL: the auth API (`/auth/v1/...`) for
//! identities and sessions, and the REST tables API (`/rest/v1/profiles`)
//! for profile rows.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::{IdentityError, IdentityProvider};
use crate::models::{AuthSession, IdentityUser, NewProfile, ProfileUpdate, SignUp, UserProfile};

const PROFILES_TABLE: &str = "rest/v1/profiles";

/// REST identity provider client.
#[derive(Clone)]
pub struct RestIdentityProvider {
    client: Client,
    base_url: Url,
    /// Privileged key: profile table access and admin operations.
    service_key: String,
    /// Restricted key: end-user auth calls.
    anon_key: String,
}

impl RestIdentityProvider {
    /// Create a new client. `timeout` bounds every outbound call.
    pub fn new(
        base_url: &str,
        service_key: impl Into<String>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).context("IDENTITY_URL must be a valid URL")?;

        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("failed to build identity HTTP client")?;

        Ok(Self {
            client,
            base_url,
            service_key: service_key.into(),
            anon_key: anon_key.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, IdentityError> {
        self.base_url
            .join(path)
            .map_err(|e| IdentityError::Decode(format!("invalid provider path {path}: {e}")))
    }

    fn profile_url(&self, user_id: &str) -> Result<Url, IdentityError> {
        let mut url = self.url(PROFILES_TABLE)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{user_id}"))
            .append_pair("select", "*");
        Ok(url)
    }

    /// Request authenticated as an end user (restricted key + user token).
    fn user_request(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder.header("apikey", &self.anon_key).bearer_auth(token)
    }

    /// Request with the restricted key only.
    fn anon_request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    /// Request with the privileged key.
    fn service_request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }
}

/// Turn a non-success response into [`IdentityError::Status`].
async fn check(response: Response) -> Result<Response, IdentityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(IdentityError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, IdentityError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| IdentityError::Decode(e.to_string()))
}

/// The tables API returns rows as an array even for single-row operations.
async fn first_row(response: Response) -> Result<UserProfile, IdentityError> {
    let rows: Vec<UserProfile> = decode(response).await?;
    rows.into_iter().next().ok_or(IdentityError::NotFound)
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<IdentityUser, IdentityError> {
        let request = self.user_request(self.client.get(self.url("auth/v1/user")?), token);
        let response = request.send().await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(IdentityError::InvalidToken),
            _ => decode(check(response).await?).await,
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        let mut url = self.url("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .anon_request(self.client.post(url))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(IdentityError::InvalidCredentials)
            }
            _ => decode(check(response).await?).await,
        }
    }

    async fn sign_up(&self, request: &SignUp) -> Result<IdentityUser, IdentityError> {
        let response = self
            .anon_request(self.client.post(self.url("auth/v1/signup")?))
            .json(&json!({
                "email": request.email,
                "password": request.password,
                "data": request.metadata,
            }))
            .send()
            .await?;

        let response = match check(response).await {
            Ok(r) => r,
            Err(IdentityError::Status { status, body })
                if (status == 400 || status == 422) && body.contains("already") =>
            {
                debug!(status, "sign-up rejected: identity exists");
                return Err(IdentityError::AlreadyExists);
            }
            Err(e) => return Err(e),
        };

        // With auto-confirm enabled the provider wraps the user in a session.
        let value: Value = decode(response).await?;
        let user = match value.get("user") {
            Some(user) if user.is_object() => user.clone(),
            _ => value,
        };
        serde_json::from_value(user).map_err(|e| IdentityError::Decode(e.to_string()))
    }

    async fn sign_out(&self, token: &str) -> Result<(), IdentityError> {
        let request = self.user_request(self.client.post(self.url("auth/v1/logout")?), token);
        check(request.send().await?).await?;
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), IdentityError> {
        let url = self.url(&format!("auth/v1/admin/users/{user_id}"))?;
        let response = self.service_request(self.client.delete(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IdentityError::NotFound);
        }
        check(response).await?;
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, IdentityError> {
        let request = self.service_request(self.client.get(self.profile_url(user_id)?));
        first_row(check(request.send().await?).await?).await
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<UserProfile, IdentityError> {
        let response = self
            .service_request(self.client.post(self.url(PROFILES_TABLE)?))
            .header("Prefer", "return=representation")
            .json(profile)
            .send()
            .await?;
        first_row(check(response).await?).await
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, IdentityError> {
        let response = self
            .service_request(self.client.patch(self.profile_url(user_id)?))
            .header("Prefer", "return=representation")
            .json(update.fields())
            .send()
            .await?;
        first_row(check(response).await?).await
    }

    async fn healthy(&self) -> bool {
        let Ok(url) = self.url("auth/v1/health") else {
            return false;
        };
        match self.anon_request(self.client.get(url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "identity health probe failed");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}

impl std::fmt::Debug for RestIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestIdentityProvider")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn provider(base: &str) -> RestIdentityProvider {
        RestIdentityProvider::new(base, "service", "anon", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn base_url_without_trailing_slash_keeps_path() {
        let p = provider("https://abc.example.co/project");
        assert_eq!(
            p.url("auth/v1/user").unwrap().as_str(),
            "https://abc.example.co/project/auth/v1/user"
        );
    }

    #[test]
    fn profile_url_filters_by_id() {
        let p = provider("https://abc.example.co");
        let url = p.profile_url("7f9c").unwrap();
        assert_eq!(url.path(), "/rest/v1/profiles");
        assert_eq!(url.query(), Some("id=eq.7f9c&select=*"));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(
            RestIdentityProvider::new("not a url", "s", "a", Duration::from_secs(1)).is_err()
        );
    }

    #[test]
    fn debug_does_not_print_keys() {
        let p = provider("https://abc.example.co");
        let printed = format!("{p:?}");
        assert!(!printed.contains("service"));
        assert!(!printed.contains("anon"));
    }
}

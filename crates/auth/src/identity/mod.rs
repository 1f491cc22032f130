//! Identity and profile store.
//!
//! The hosted provider is authoritative for identities and profile rows;
//! this service never caches either beyond a single request. All access goes
//! through the [`IdentityProvider`] trait so the REST client and the
//! in-memory store are interchangeable.

mod memory;
mod rest;

pub use memory::MemoryIdentityProvider;
pub use rest::RestIdentityProvider;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AuthSession, IdentityUser, NewProfile, ProfileUpdate, SignUp, UserProfile};

/// Identity provider errors.
///
/// Messages may contain provider text; they are for logs only and must not
/// be forwarded to clients.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("record not found")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity already exists")]
    AlreadyExists,

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

/// Capabilities the service needs from the identity/database provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to its identity.
    async fn verify_token(&self, token: &str) -> Result<IdentityUser, IdentityError>;

    /// Password sign-in.
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError>;

    /// Create a new identity.
    async fn sign_up(&self, request: &SignUp) -> Result<IdentityUser, IdentityError>;

    /// Revoke the session behind `token`.
    async fn sign_out(&self, token: &str) -> Result<(), IdentityError>;

    /// Delete an identity. Used to compensate a failed registration.
    async fn delete_user(&self, user_id: &str) -> Result<(), IdentityError>;

    /// Read a profile row. Missing rows are [`IdentityError::NotFound`].
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, IdentityError>;

    /// Insert a profile row and return it as stored.
    async fn insert_profile(&self, profile: &NewProfile) -> Result<UserProfile, IdentityError>;

    /// Apply `update` to the caller's own profile row.
    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, IdentityError>;

    /// Whether the provider is reachable.
    async fn healthy(&self) -> bool;

    /// Backend name, for logs.
    fn name(&self) -> &'static str;
}

//! Process-local identity store.
//!
//! Backs `IDENTITY_BACKEND=memory` for local development and drives the
//! integration tests. Nothing is persisted and passwords are held as given,
//! so it must never front real accounts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{IdentityError, IdentityProvider};
use crate::models::{AuthSession, IdentityUser, NewProfile, ProfileUpdate, SignUp, UserProfile};

/// Session lifetime reported to clients, in seconds.
const SESSION_TTL_SECS: u64 = 3600;

struct Account {
    user: IdentityUser,
    password: String,
}

#[derive(Default)]
struct Store {
    /// Accounts by lowercase email.
    accounts: HashMap<String, Account>,
    /// Access token to user id.
    sessions: HashMap<String, String>,
    profiles: HashMap<String, UserProfile>,
}

/// In-memory identity provider.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    store: RwLock<Store>,
    fail_profile_writes: AtomicBool,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent profile insert/update fail with a provider
    /// error. Used to exercise partial-failure paths.
    pub fn set_fail_profile_writes(&self, fail: bool) {
        self.fail_profile_writes.store(fail, Ordering::SeqCst);
    }

    /// Create a confirmed account directly, bypassing sign-up.
    pub fn seed_user(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> IdentityUser {
        let user = IdentityUser {
            id: Uuid::now_v7().to_string(),
            email: Some(email.to_string()),
            user_metadata: metadata,
            created_at: Some(Utc::now().to_rfc3339()),
        };
        self.store.write().accounts.insert(
            email.to_lowercase(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    /// Issue an access token for an existing user id.
    pub fn issue_token(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.store
            .write()
            .sessions
            .insert(token.clone(), user_id.to_string());
        token
    }

    /// Whether an identity with this email exists.
    pub fn has_user(&self, email: &str) -> bool {
        self.store.read().accounts.contains_key(&email.to_lowercase())
    }

    /// Stored profile row, if any.
    pub fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.store.read().profiles.get(user_id).cloned()
    }

    /// Whether `token` is a live session.
    pub fn has_session(&self, token: &str) -> bool {
        self.store.read().sessions.contains_key(token)
    }

    fn check_writable(&self) -> Result<(), IdentityError> {
        if self.fail_profile_writes.load(Ordering::SeqCst) {
            return Err(IdentityError::Status {
                status: 503,
                body: "profile store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<IdentityUser, IdentityError> {
        let store = self.store.read();
        let user_id = store
            .sessions
            .get(token)
            .ok_or(IdentityError::InvalidToken)?;
        store
            .accounts
            .values()
            .find(|a| &a.user.id == user_id)
            .map(|a| a.user.clone())
            .ok_or(IdentityError::InvalidToken)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, IdentityError> {
        let user = {
            let store = self.store.read();
            match store.accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(IdentityError::InvalidCredentials),
            }
        };

        let access_token = self.issue_token(&user.id);
        Ok(AuthSession {
            access_token,
            refresh_token: Some(Uuid::new_v4().simple().to_string()),
            token_type: "bearer".to_string(),
            expires_in: Some(SESSION_TTL_SECS),
            user,
        })
    }

    async fn sign_up(&self, request: &SignUp) -> Result<IdentityUser, IdentityError> {
        let key = request.email.to_lowercase();
        let mut store = self.store.write();
        if store.accounts.contains_key(&key) {
            return Err(IdentityError::AlreadyExists);
        }

        let user = IdentityUser {
            id: Uuid::now_v7().to_string(),
            email: Some(request.email.clone()),
            user_metadata: request.metadata.clone(),
            created_at: Some(Utc::now().to_rfc3339()),
        };
        store.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password: request.password.clone(),
            },
        );
        Ok(user)
    }

    async fn sign_out(&self, token: &str) -> Result<(), IdentityError> {
        self.store.write().sessions.remove(token);
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), IdentityError> {
        let mut store = self.store.write();
        let before = store.accounts.len();
        store.accounts.retain(|_, a| a.user.id != user_id);
        if store.accounts.len() == before {
            return Err(IdentityError::NotFound);
        }
        store.sessions.retain(|_, id| id != user_id);
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, IdentityError> {
        self.profile(user_id).ok_or(IdentityError::NotFound)
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<UserProfile, IdentityError> {
        self.check_writable()?;
        let mut store = self.store.write();
        if store.profiles.contains_key(&profile.id) {
            return Err(IdentityError::Status {
                status: 409,
                body: format!("duplicate profile {}", profile.id),
            });
        }
        let row = profile.clone().into_profile();
        store.profiles.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, IdentityError> {
        self.check_writable()?;
        let mut store = self.store.write();
        let current = store.profiles.get(user_id).ok_or(IdentityError::NotFound)?;

        // Merge at the JSON level; a value of the wrong type for a known
        // column is rejected like a type error from the tables API.
        let mut row = match serde_json::to_value(current) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(IdentityError::Decode("profile is not an object".to_string())),
            Err(e) => return Err(IdentityError::Decode(e.to_string())),
        };
        for (key, value) in update.fields() {
            row.insert(key.clone(), value.clone());
        }
        let updated: UserProfile = serde_json::from_value(Value::Object(row)).map_err(|e| {
            IdentityError::Status {
                status: 400,
                body: e.to_string(),
            }
        })?;

        store.profiles.insert(user_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn healthy(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

//! Account endpoint: profile fetch, login, registration, logout and
//! profile update behind a single path.
//!
//! Every request except the CORS preflight is rate limited per client.
//! POST bodies are checked for a CSRF token before they are parsed and are
//! sanitized before any field is read.

use std::str::FromStr;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::identity::IdentityError;
use crate::middleware::{api_content_security_policy, login_key};
use crate::models::profile::FREE_TRIAL;
use crate::models::{
    IdentityUser, NewProfile, PlanType, ProfileUpdate, SignUp, TrialWindow, UserType,
};
use crate::routes::{bearer_token, check_general_limit, parse_json_object};
use crate::security::csrf;
use crate::security::{sanitize_object, validate_email, validate_phone};
use crate::state::AppState;

/// Shortest password accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Create the auth router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth", any(handle))
        .route_layer(axum::middleware::from_fn(api_content_security_policy))
}

/// POST actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Login,
    Register,
    Logout,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::Logout => "logout",
        }
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Self::Login),
            "register" => Ok(Self::Register),
            "logout" => Ok(Self::Logout),
            _ => Err(AppError::UnknownAction),
        }
    }
}

async fn handle(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }

    let client = check_general_limit(&state, &headers).await?;

    match method {
        Method::GET => fetch_profile(&state, &headers).await,
        Method::POST => dispatch_action(&state, &headers, &client, &body).await,
        Method::PUT => update_profile(&state, &headers, &body).await,
        _ => Err(AppError::MethodNotAllowed),
    }
}

/// Resolve the bearer token on the request to an identity.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<IdentityUser> {
    let token =
        bearer_token(headers).ok_or(AppError::Unauthorized("Missing authorization token"))?;

    match state.identity().verify_token(token).await {
        Ok(user) => Ok(user),
        Err(IdentityError::InvalidToken | IdentityError::NotFound) => {
            debug!("rejected bearer token");
            Err(AppError::Unauthorized("Invalid or expired token"))
        }
        Err(e) => Err(AppError::upstream("token verification failed", e)),
    }
}

/// GET: the caller's identity and profile. A missing profile row is
/// provisioned with starter defaults.
async fn fetch_profile(state: &AppState, headers: &HeaderMap) -> AppResult<Response> {
    let user = authenticate(state, headers).await?;

    let profile = match state.identity().get_profile(&user.id).await {
        Ok(profile) => {
            state.metrics().record_auth("profile", "fetched");
            profile
        }
        Err(IdentityError::NotFound) => {
            let metadata = sanitize_object(user.user_metadata.clone());
            let new = NewProfile::first_login(&user.id, user.email_or_empty(), &metadata, Utc::now());
            let profile = state
                .identity()
                .insert_profile(&new)
                .await
                .map_err(|e| AppError::upstream("failed to create default profile", e))?;
            info!(user_id = %user.id, "created default profile");
            state.metrics().record_auth("profile", "created");
            profile
        }
        Err(e) => return Err(AppError::upstream("failed to load profile", e)),
    };

    Ok(Json(json!({ "user": user, "profile": profile })).into_response())
}

async fn dispatch_action(
    state: &AppState,
    headers: &HeaderMap,
    client: &str,
    body: &[u8],
) -> AppResult<Response> {
    if !csrf::verify_request(headers) {
        warn!(client = %client, "CSRF validation failed");
        return Err(AppError::CsrfRejected);
    }

    let body = sanitize_object(parse_json_object(body)?);
    let action: Action = body
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .parse()?;

    match action {
        Action::Login => login(state, client, &body).await,
        Action::Register => register(state, &body).await,
        Action::Logout => logout(state, headers).await,
    }
}

async fn login(state: &AppState, client: &str, body: &Map<String, Value>) -> AppResult<Response> {
    let (Some(email), Some(password)) = (text_field(body, "email"), text_field(body, "password"))
    else {
        return Err(AppError::validation("Email and password are required"));
    };

    if !validate_email(&email) {
        return Err(AppError::validation("Invalid email format"));
    }

    let limiter = state.login_limiter();
    if let Err(retry_after) = limiter.check(&login_key(client)).await {
        warn!(client = %client, "login rate limit exceeded");
        state.metrics().record_rate_limit(limiter.name());
        state.metrics().record_auth(Action::Login.as_str(), "rate_limited");
        return Err(AppError::RateLimited { retry_after });
    }

    match state.identity().sign_in(&email, &password).await {
        Ok(session) => {
            info!(user_id = %session.user.id, "login succeeded");
            state.metrics().record_auth(Action::Login.as_str(), "success");
            Ok(Json(json!({
                "success": true,
                "user": &session.user,
                "session": session,
            }))
            .into_response())
        }
        Err(e) => {
            // Unknown email, wrong password and provider failure all look
            // the same to the client.
            warn!(client = %client, error = %e, "login failed");
            state.metrics().record_auth(Action::Login.as_str(), "invalid_credentials");
            Err(AppError::Unauthorized("Invalid credentials"))
        }
    }
}

/// Validated registration form.
#[derive(Debug, Clone, PartialEq)]
struct Registration {
    email: String,
    password: String,
    first_name: String,
    last_name: String,
    plan: PlanType,
    company_name: Option<String>,
    phone: Option<String>,
    country_code: Option<String>,
    user_type: UserType,
    units_managed: Option<String>,
}

impl Registration {
    fn from_body(body: &Map<String, Value>) -> AppResult<Self> {
        let field = |key: &str| text_field(body, key);
        let (
            Some(email),
            Some(password),
            Some(first_name),
            Some(last_name),
            Some(selected_plan),
        ) = (
            field("email"),
            field("password"),
            field("firstName"),
            field("lastName"),
            field("selectedPlan"),
        )
        else {
            return Err(AppError::validation("Missing required fields"));
        };

        if !validate_email(&email) {
            return Err(AppError::validation("Invalid email format"));
        }

        let phone = field("phone");
        if let Some(phone) = &phone
            && !validate_phone(phone)
        {
            return Err(AppError::validation("Invalid phone number"));
        }

        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        Ok(Self {
            email,
            password,
            first_name,
            last_name,
            plan: PlanType::parse(&selected_plan).unwrap_or_default(),
            company_name: field("companyName"),
            phone,
            country_code: field("countryCode"),
            user_type: field("userType")
                .map(|t| UserType::parse(&t))
                .unwrap_or_default(),
            units_managed: field("unitsManaged"),
        })
    }

    fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Metadata stored with the identity.
    fn metadata(&self, trial: &TrialWindow) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("full_name".into(), json!(self.full_name()));
        metadata.insert("first_name".into(), json!(self.first_name));
        metadata.insert("last_name".into(), json!(self.last_name));
        metadata.insert("company_name".into(), json!(self.company_name));
        metadata.insert("phone".into(), json!(self.phone));
        metadata.insert("country_code".into(), json!(self.country_code));
        metadata.insert("plan_type".into(), json!(self.plan));
        metadata.insert("payment_type".into(), json!(FREE_TRIAL));
        metadata.insert("user_type".into(), json!(self.user_type));
        metadata.insert("units_managed".into(), json!(self.units_managed));
        metadata.insert("max_properties".into(), json!(self.plan.max_properties()));
        metadata.insert("trial_start".into(), json!(trial.start));
        metadata.insert("trial_end".into(), json!(trial.end));
        metadata.insert("email_verified".into(), json!(false));
        metadata
    }

    fn profile(&self, user_id: &str, trial: &TrialWindow, now: DateTime<Utc>) -> NewProfile {
        NewProfile {
            id: user_id.to_string(),
            email: self.email.clone(),
            full_name: self.full_name(),
            company_name: self.company_name.clone(),
            phone: self.phone.clone(),
            country_code: self.country_code.clone(),
            plan_type: self.plan,
            payment_type: FREE_TRIAL.to_string(),
            user_type: self.user_type,
            units_managed: self.units_managed.clone(),
            max_properties: self.plan.max_properties(),
            current_properties: 0,
            is_active: true,
            trial_start: Some(trial.start),
            trial_end: Some(trial.end),
            created_at: now,
            updated_at: now,
        }
    }
}

async fn register(state: &AppState, body: &Map<String, Value>) -> AppResult<Response> {
    let registration = Registration::from_body(body)?;
    let now = Utc::now();
    let trial = TrialWindow::starting_at(now);

    let sign_up = SignUp {
        email: registration.email.clone(),
        password: registration.password.clone(),
        metadata: registration.metadata(&trial),
    };
    let user = match state.identity().sign_up(&sign_up).await {
        Ok(user) => user,
        Err(IdentityError::AlreadyExists) => {
            state.metrics().record_auth(Action::Register.as_str(), "rejected");
            return Err(AppError::validation("Unable to register with this email"));
        }
        Err(e) => {
            state.metrics().record_auth(Action::Register.as_str(), "failed");
            return Err(AppError::upstream("sign-up failed", e));
        }
    };

    let profile = registration.profile(&user.id, &trial, now);
    if let Err(e) = state.identity().insert_profile(&profile).await {
        // Undo the sign-up so the email is not left with an identity that
        // has no profile.
        if let Err(delete_err) = state.identity().delete_user(&user.id).await {
            tracing::error!(
                user_id = %user.id,
                error = %delete_err,
                "failed to remove identity after profile creation failed"
            );
        }
        state.metrics().record_auth(Action::Register.as_str(), "failed");
        return Err(AppError::upstream("failed to create profile", e));
    }

    info!(user_id = %user.id, plan = registration.plan.as_str(), "registered account");
    state.metrics().record_auth(Action::Register.as_str(), "created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user, "autoLogin": true })),
    )
        .into_response())
}

async fn logout(state: &AppState, headers: &HeaderMap) -> AppResult<Response> {
    if let Some(token) = bearer_token(headers)
        && let Err(e) = state.identity().sign_out(token).await
    {
        warn!(error = %e, "sign-out failed");
    }
    state.metrics().record_auth(Action::Logout.as_str(), "success");
    Ok(Json(json!({ "success": true })).into_response())
}

/// PUT: update the caller's own profile. `id` and `email` are ignored.
async fn update_profile(state: &AppState, headers: &HeaderMap, body: &[u8]) -> AppResult<Response> {
    if state.config().csrf_protect_all_writes && !csrf::verify_request(headers) {
        warn!("CSRF validation failed on profile update");
        return Err(AppError::CsrfRejected);
    }

    let user = authenticate(state, headers).await?;
    let update = ProfileUpdate::new(sanitize_object(parse_json_object(body)?), Utc::now());

    match update.phone() {
        None => {}
        Some(Some(phone)) if phone.is_empty() || validate_phone(phone) => {}
        Some(_) => return Err(AppError::validation("Invalid phone number")),
    }

    let profile = state
        .identity()
        .update_profile(&user.id, &update)
        .await
        .map_err(|e| AppError::upstream("failed to update profile", e))?;

    info!(user_id = %user.id, "profile updated");
    state.metrics().record_auth("update", "success");
    Ok(Json(json!({ "success": true, "profile": profile })).into_response())
}

/// Non-empty text value of `key`. Numbers are accepted and rendered as text.
fn text_field(body: &Map<String, Value>, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

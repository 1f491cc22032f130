//! User profile records stored by the identity provider.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Length of the free trial granted at registration.
pub const TRIAL_DAYS: i64 = 7;

/// Payment type assigned to every new account.
pub const FREE_TRIAL: &str = "free-trial";

/// Subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Starter,
    Essential,
    Professional,
    Business,
}

impl PlanType {
    /// Parse a plan name. Unknown names yield None.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "starter" => Some(Self::Starter),
            "essential" => Some(Self::Essential),
            "professional" => Some(Self::Professional),
            "business" => Some(Self::Business),
            _ => None,
        }
    }

    /// Maximum number of properties (units) the plan allows.
    pub fn max_properties(self) -> u32 {
        match self {
            Self::Starter => 5,
            Self::Essential => 20,
            Self::Professional => 50,
            Self::Business => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Essential => "essential",
            Self::Professional => "professional",
            Self::Business => "business",
        }
    }
}

/// Kind of account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    #[default]
    Landlord,
    #[serde(other)]
    Other,
}

impl UserType {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "landlord" => Self::Landlord,
            _ => Self::Other,
        }
    }
}

/// Start and end of a trial period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrialWindow {
    /// A trial window of [`TRIAL_DAYS`] starting at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start + Duration::days(TRIAL_DAYS),
        }
    }
}

/// Profile row as stored by the provider.
///
/// The row is read leniently: columns may be absent or null, `plan_type` is
/// kept as stored, and columns this service does not know are carried in
/// `extra` and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub plan_type: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_type: UserType,
    #[serde(default)]
    pub units_managed: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_properties: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_properties: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_active: bool,
    #[serde(default)]
    pub trial_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trial_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Read a null column as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Insert payload for a new profile row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    pub plan_type: PlanType,
    pub payment_type: String,
    pub user_type: UserType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units_managed: Option<String>,
    pub max_properties: u32,
    pub current_properties: u32,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewProfile {
    /// Default profile provisioned on the first authenticated profile fetch
    /// for an identity that has no profile row yet.
    ///
    /// `metadata` is the provider's user metadata and must already be
    /// sanitized.
    pub fn first_login(
        id: &str,
        email: &str,
        metadata: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.is_empty())
        };

        Self {
            id: id.to_string(),
            email: email.to_string(),
            full_name: text("full_name").unwrap_or_else(|| "User".to_string()),
            company_name: text("company_name"),
            phone: text("phone"),
            country_code: text("country_code"),
            plan_type: PlanType::Starter,
            payment_type: FREE_TRIAL.to_string(),
            user_type: UserType::Landlord,
            units_managed: text("units_managed"),
            max_properties: PlanType::Starter.max_properties(),
            current_properties: 0,
            is_active: true,
            trial_start: None,
            trial_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Materialise the row a store would return after inserting this payload.
    pub fn into_profile(self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email,
            full_name: Some(self.full_name),
            company_name: self.company_name,
            phone: self.phone,
            country_code: self.country_code,
            plan_type: Some(self.plan_type.as_str().to_string()),
            payment_type: Some(self.payment_type),
            user_type: self.user_type,
            units_managed: self.units_managed,
            max_properties: self.max_properties,
            current_properties: self.current_properties,
            is_active: self.is_active,
            trial_start: self.trial_start,
            trial_end: self.trial_end,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            extra: Map::new(),
        }
    }
}

/// Fields that a profile update may never change.
pub const IMMUTABLE_PROFILE_FIELDS: &[&str] = &["id", "email"];

/// A sanitized partial profile update.
///
/// Built from an untrusted body: immutable fields are dropped and
/// `updated_at` is always refreshed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    fields: Map<String, Value>,
}

impl ProfileUpdate {
    pub fn new(mut fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        for key in IMMUTABLE_PROFILE_FIELDS {
            fields.remove(*key);
        }
        fields.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Phone value carried by this update. `Some(None)` means the field is
    /// present but is not a string.
    pub fn phone(&self) -> Option<Option<&str>> {
        match self.fields.get("phone")? {
            Value::Null => None,
            value => Some(value.as_str()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_quotas() {
        let quota = |name: &str| PlanType::parse(name).unwrap_or_default().max_properties();
        assert_eq!(quota("starter"), 5);
        assert_eq!(quota("essential"), 20);
        assert_eq!(quota("professional"), 50);
        assert_eq!(quota("business"), 100);
        assert_eq!(quota("Professional"), 50);
        assert_eq!(quota("enterprise"), 5);
        assert_eq!(quota(""), 5);
    }

    #[test]
    fn trial_window_is_seven_days() {
        let start = Utc::now();
        let window = TrialWindow::starting_at(start);
        assert_eq!(window.end - window.start, Duration::days(7));
    }

    #[test]
    fn first_login_profile_defaults() {
        let now = Utc::now();
        let profile = NewProfile::first_login("u1", "a@b.com", &Map::new(), now);
        assert_eq!(profile.full_name, "User");
        assert_eq!(profile.plan_type, PlanType::Starter);
        assert_eq!(profile.payment_type, "free-trial");
        assert_eq!(profile.user_type, UserType::Landlord);
        assert_eq!(profile.max_properties, 5);
    }

    #[test]
    fn first_login_profile_uses_metadata_name() {
        let metadata = json!({ "full_name": "Ada Lovelace", "phone": "" });
        let profile = NewProfile::first_login(
            "u1",
            "a@b.com",
            metadata.as_object().unwrap(),
            Utc::now(),
        );
        assert_eq!(profile.full_name, "Ada Lovelace");
        assert_eq!(profile.phone, None);
    }

    #[test]
    fn profile_update_strips_immutable_fields() {
        let body = json!({ "id": "other", "email": "x@y.com", "full_name": "New" });
        let update = ProfileUpdate::new(body.as_object().unwrap().clone(), Utc::now());
        assert!(!update.fields().contains_key("id"));
        assert!(!update.fields().contains_key("email"));
        assert_eq!(update.fields()["full_name"], "New");
        assert!(update.fields().contains_key("updated_at"));
    }

    #[test]
    fn user_type_accepts_unknown_values() {
        let parsed: UserType = serde_json::from_value(json!("property-manager")).unwrap();
        assert_eq!(parsed, UserType::Other);
        assert_eq!(UserType::parse("Landlord"), UserType::Landlord);
    }

    #[test]
    fn profile_row_deserializes_with_missing_optional_columns() {
        let row = json!({
            "id": "u1",
            "email": "a@b.com",
            "max_properties": 20,
            "plan_type": "essential",
            "extra_column": true
        });
        let profile: UserProfile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.plan_type.as_deref(), Some("essential"));
        assert_eq!(profile.current_properties, 0);
        assert_eq!(profile.extra["extra_column"], true);
    }

    #[test]
    fn profile_row_tolerates_unknown_plan_and_null_columns() {
        let row = json!({
            "id": "u1",
            "email": "a@b.com",
            "plan_type": "premium",
            "user_type": null,
            "max_properties": null,
            "current_properties": null,
            "is_active": null
        });
        let profile: UserProfile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.plan_type.as_deref(), Some("premium"));
        assert_eq!(profile.user_type, UserType::Landlord);
        assert_eq!(profile.max_properties, 0);
        assert!(!profile.is_active);

        let written = serde_json::to_value(&profile).unwrap();
        assert_eq!(written["plan_type"], "premium");
    }

    #[test]
    fn profile_row_keeps_unknown_columns_when_written_back() {
        let row = json!({ "id": "u1", "email": "a@b.com", "avatar_url": "/a.png" });
        let profile: UserProfile = serde_json::from_value(row).unwrap();
        let written = serde_json::to_value(&profile).unwrap();
        assert_eq!(written["avatar_url"], "/a.png");
        assert!(written.get("extra").is_none());
    }

    #[test]
    fn profile_update_phone_distinguishes_absent_and_non_text() {
        let update = |body: Value| ProfileUpdate::new(body.as_object().unwrap().clone(), Utc::now());
        assert_eq!(update(json!({})).phone(), None);
        assert_eq!(update(json!({ "phone": null })).phone(), None);
        assert_eq!(update(json!({ "phone": "+1 555" })).phone(), Some(Some("+1 555")));
        assert_eq!(update(json!({ "phone": 5 })).phone(), Some(None));
    }
}

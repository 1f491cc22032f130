//! Data models for identities and profiles.

pub mod profile;
pub mod user;

pub use profile::{NewProfile, PlanType, ProfileUpdate, TrialWindow, UserProfile, UserType};
pub use user::{AuthSession, IdentityUser, SignUp};

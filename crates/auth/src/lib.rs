//! Tenantdesk auth service.
//!
//! Account endpoint (profile fetch, login, registration, logout, profile
//! update), verification code email, CSRF token issuing, health and
//! metrics, in front of a hosted identity provider.

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

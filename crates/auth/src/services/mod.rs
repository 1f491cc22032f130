//! Outbound services.

pub mod email;

pub use email::{EmailService, EmailTransport, OutgoingEmail, SmtpTransport};

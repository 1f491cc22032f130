//! Transactional email delivery using lettre/SMTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use crate::security::html_escape;

/// How long a verification code stays valid, in minutes.
pub const CODE_VALIDITY_MINUTES: u32 = 15;

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Sent as `X-Entity-Ref-ID` so mail clients do not thread unrelated
    /// codes together.
    pub reference: Option<String>,
}

/// Delivers an [`OutgoingEmail`] and returns its message id.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<String>;
}

/// `X-Entity-Ref-ID` header.
#[derive(Debug, Clone)]
struct EntityRefId(String);

impl Header for EntityRefId {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Entity-Ref-ID")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// SMTP delivery.
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpTransport {
    /// Create a new SMTP transport.
    ///
    /// `encryption` controls the SMTP transport mode:
    /// - `"starttls"` (default): Opportunistic STARTTLS on port 587
    /// - `"tls"`: Implicit TLS (SMTPS) on port 465
    /// - `"none"`: Unencrypted (for local dev only)
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        smtp_username: Option<&str>,
        smtp_password: Option<&str>,
        encryption: &str,
        from: &str,
    ) -> Result<Self> {
        let mut builder = match encryption {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
                .context("failed to create SMTP relay transport")?
                .port(smtp_port),
            "none" => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host).port(smtp_port)
            }
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)
                .context("failed to create SMTP STARTTLS transport")?
                .port(smtp_port),
        };

        if let (Some(user), Some(pass)) = (smtp_username, smtp_password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.parse().context("invalid from email address")?,
        })
    }

    fn message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }
}

#[async_trait]
impl EmailTransport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let message_id = self.message_id();

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse().context("invalid recipient email address")?)
            .subject(&email.subject)
            .message_id(Some(message_id.clone()));
        if let Some(reference) = &email.reference {
            builder = builder.header(EntityRefId(reference.clone()));
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .context("failed to build email message")?;

        self.transport
            .send(message)
            .await
            .context("failed to send email")?;

        Ok(message_id)
    }
}

/// Email delivery service.
#[derive(Clone)]
pub struct EmailService {
    transport: Arc<dyn EmailTransport>,
}

impl EmailService {
    pub fn new(transport: Arc<dyn EmailTransport>) -> Self {
        Self { transport }
    }

    /// Send a verification code email. Returns the provider message id.
    pub async fn send_verification_code(
        &self,
        to: &str,
        code: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<String> {
        let email = verification_email(to, code, first_name, last_name);
        self.transport.send(&email).await
    }
}

/// Render the verification code email.
///
/// Names are expected as sanitized plain text. The HTML body escapes them.
pub fn verification_email(
    to: &str,
    code: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> OutgoingEmail {
    let name = [first_name, last_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let greeting = if name.is_empty() {
        "Hello,".to_string()
    } else {
        format!("Hello {name},")
    };

    let text = format!(
        "{greeting}\n\n\
         Your Tenantdesk verification code is: {code}\n\n\
         This code expires in {CODE_VALIDITY_MINUTES} minutes.\n\n\
         If you did not request this code, you can safely ignore this email."
    );

    let html_greeting = html_escape(&greeting);
    let html = format!(
        r#"<!DOCTYPE html>
<html><body style="font-family: sans-serif; max-width: 480px; margin: 0 auto; padding: 2rem;">
<p>{html_greeting}</p>
<p>Your Tenantdesk verification code is:</p>
<p style="font-size: 2rem; font-weight: bold; letter-spacing: 0.4rem;">{code}</p>
<p>This code expires in {CODE_VALIDITY_MINUTES} minutes.</p>
<p style="color: #666;">If you did not request this code, you can safely ignore this email.</p>
</body></html>"#
    );

    OutgoingEmail {
        to: to.to_string(),
        subject: "Your verification code".to_string(),
        html,
        text,
        reference: Some(Uuid::new_v4().to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn smtp_transport_construction_is_lazy() {
        // Should succeed with an unresolvable host (connection is lazy)
        let result = SmtpTransport::new(
            "nonexistent.invalid",
            587,
            None,
            None,
            "starttls",
            "Tenantdesk <noreply@example.com>",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn smtp_transport_supports_tls_and_none_modes() {
        assert!(
            SmtpTransport::new("nonexistent.invalid", 465, None, None, "tls", "a@example.com")
                .is_ok()
        );
        assert!(SmtpTransport::new("localhost", 25, None, None, "none", "a@example.com").is_ok());
    }

    #[test]
    fn smtp_transport_rejects_bad_from_address() {
        assert!(SmtpTransport::new("localhost", 25, None, None, "none", "not an address").is_err());
    }

    #[test]
    fn message_id_uses_sender_domain() {
        let transport =
            SmtpTransport::new("localhost", 25, None, None, "none", "noreply@example.com").unwrap();
        let id = transport.message_id();
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn verification_email_contains_code_and_validity() {
        let email = verification_email("a@b.com", "123456", Some("Ada"), Some("Lovelace"));
        assert_eq!(email.subject, "Your verification code");
        assert!(email.text.starts_with("Hello Ada Lovelace,"));
        assert!(email.text.contains("123456"));
        assert!(email.text.contains("15 minutes"));
        assert!(email.html.contains("123456"));
        assert!(email.reference.is_some());
    }

    #[test]
    fn verification_email_escapes_names_in_html_only() {
        let email = verification_email("a@b.com", "123456", Some("Smith & Sons"), Some("<Ltd>"));
        assert!(email.text.starts_with("Hello Smith & Sons <Ltd>,"));
        assert!(email.html.contains("Hello Smith &amp; Sons &lt;Ltd&gt;,"));
        assert!(!email.html.contains("<Ltd>"));
    }

    #[test]
    fn verification_email_without_name() {
        let email = verification_email("a@b.com", "654321", None, Some("  "));
        assert!(email.text.starts_with("Hello,"));
    }
}

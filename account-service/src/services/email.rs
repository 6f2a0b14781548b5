use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_link: &str,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    /// STARTTLS with credentials when a username is configured, plain SMTP
    /// otherwise (local relays and mail catchers).
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let builder = if config.username.is_empty() {
            SmtpTransport::builder_dangerous(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
                .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
        };

        let mailer = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(to_email.parse()?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        // SmtpTransport is blocking.
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await?
            .map_err(|e| {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                anyhow::anyhow!("SMTP delivery failed: {}", e)
            })?;

        tracing::info!(subject = %subject, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_link: &str,
    ) -> Result<(), anyhow::Error> {
        let plain_body = format!(
            "Password Reset Request\n\n\
             We received a request to reset your password. Visit the link below to choose a new one:\n\n\
             {}\n\n\
             If you didn't request this, you can ignore this email.",
            reset_link
        );

        let html_body = format!(
            r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>Password Reset Request</h2>
    <p>We received a request to reset your password. Click the link below to choose a new one:</p>
    <p><a href="{link}">Reset password</a></p>
    <p style="color: #666; font-size: 12px;">If you didn't request this, you can ignore this email.</p>
  </body>
</html>"#,
            link = reset_link
        );

        self.send_email(to_email, "Reset Your Password", plain_body, html_body)
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub link: String,
}

/// Records outgoing mail instead of sending it.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_link(&self) -> Option<String> {
        self.sent().last().map(|m| m.link.clone())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_link: &str,
    ) -> Result<(), anyhow::Error> {
        if self.fail {
            return Err(anyhow::anyhow!("SMTP delivery failed: connection refused"));
        }
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mailer mutex poisoned: {}", e))?
            .push(SentEmail {
                to: to_email.to_string(),
                link: reset_link.to_string(),
            });
        Ok(())
    }
}

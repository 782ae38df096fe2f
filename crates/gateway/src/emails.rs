//! Verification-code delivery. `EmailSender` is a capability chosen once at
//! startup: real SMTP dispatch, or a mock which prints the code to stderr for
//! local stacks. Codes travel only through this seam, never in API responses.

use std::sync::Arc;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[async_trait::async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_code(&self, to: &str, code: &str) -> anyhow::Result<()>;
}

/// SMTP transport settings, straight from configuration.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
}

/// Select the startup email capability: mock unless SMTP is configured and
/// mock mode is off.
pub fn select(use_mock: bool, smtp: SmtpSettings) -> anyhow::Result<Arc<dyn EmailSender>> {
    if use_mock || smtp.user.is_empty() {
        tracing::info!("using mock email sender: verification codes print to stderr");
        Ok(Arc::new(MockSender))
    } else {
        Ok(Arc::new(SmtpSender::new(smtp)?))
    }
}

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    pub fn new(settings: SmtpSettings) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            .port(settings.port)
            .credentials(Credentials::new(settings.user, settings.password))
            .build();
        Ok(Self {
            transport,
            from: settings.from_email.parse()?,
        })
    }
}

#[async_trait::async_trait]
impl EmailSender for SmtpSender {
    async fn send_verification_code(&self, to: &str, code: &str) -> anyhow::Result<()> {
        let text_body = format!(
            "LLM API - Verification Code\n\n\
             Your verification code is: {code}\n\n\
             This code will expire in 5 minutes.\n\n\
             If you didn't request this code, please ignore this email.\n"
        );
        let html_body = format!(
            r#"<html><body style="font-family: Arial, sans-serif; color: #333;">
              <h2>LLM API - Verification Code</h2>
              <p>Your verification code is:</p>
              <h1 style="letter-spacing: 8px;">{code}</h1>
              <p>This code will expire in <strong>5 minutes</strong>.</p>
              <p>If you didn't request this code, please ignore this email.</p>
            </body></html>"#
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject("Your LLM API Verification Code")
            .multipart(MultiPart::alternative_plain_html(text_body, html_body))?;

        self.transport.send(message).await?;
        tracing::info!(%to, "verification code email sent");
        Ok(())
    }
}

/// Development sender: the "delivery" is a stderr banner.
pub struct MockSender;

#[async_trait::async_trait]
impl EmailSender for MockSender {
    async fn send_verification_code(&self, to: &str, code: &str) -> anyhow::Result<()> {
        eprintln!("============================================================");
        eprintln!("MOCK EMAIL TO: {to}");
        eprintln!("VERIFICATION CODE: {code}");
        eprintln!("Expires in 5 minutes");
        eprintln!("============================================================");
        Ok(())
    }
}

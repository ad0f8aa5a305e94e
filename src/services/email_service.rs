use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| Error::Config(format!("Invalid SMTP_FROM: {}", e)))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| Error::Config(format!("SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailGateway for SmtpMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| Error::Messaging(format!("Invalid recipient {}: {}", to, e)))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| Error::Messaging(format!("Build email: {}", e)))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| Error::Messaging(format!("SMTP send: {}", e)))?;
        tracing::info!(to, "Email sent");
        Ok(())
    }
}

/// Used when SMTP is not configured: the message is only logged.
pub struct LogMailer;

#[async_trait]
impl EmailGateway for LogMailer {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        tracing::warn!(to, subject, len = body.len(), "SMTP not configured, email not delivered");
        Ok(())
    }
}

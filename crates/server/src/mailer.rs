use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

use crate::config::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEmail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: AlertEmail) -> anyhow::Result<()>;
}

/// Delivers over implicit-TLS SMTP with login credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> anyhow::Result<Self> {
        let from: Mailbox = username
            .parse()
            .with_context(|| format!("smtp username '{username}' is not an address"))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .with_context(|| format!("invalid smtp relay '{host}'"))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: AlertEmail) -> anyhow::Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(email.subject)
            .header(ContentType::TEXT_HTML);
        for recipient in &email.recipients {
            let to: Mailbox = recipient
                .parse()
                .with_context(|| format!("invalid recipient '{recipient}'"))?;
            builder = builder.to(to);
        }
        let message = builder
            .body(email.html)
            .context("failed to build alert email")?;
        self.transport
            .send(message)
            .await
            .context("smtp delivery failed")?;
        Ok(())
    }
}

/// Stands in when no SMTP credentials are configured.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: AlertEmail) -> anyhow::Result<()> {
        bail!("smtp credentials are not configured")
    }
}

/// Keeps sent alerts in memory, or refuses them when `fail` is set.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryMailer {
    pub sent: std::sync::Mutex<Vec<AlertEmail>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: AlertEmail) -> anyhow::Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            bail!("relay refused connection");
        }
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("memory mailer poisoned"))?
            .push(email);
        Ok(())
    }
}

pub fn mailer_from_settings(settings: &Settings) -> Arc<dyn Mailer> {
    let (Some(username), Some(password)) = (&settings.smtp_username, &settings.smtp_password)
    else {
        info!("smtp credentials not set, alert emails are disabled");
        return Arc::new(DisabledMailer);
    };
    match SmtpMailer::new(&settings.smtp_host, settings.smtp_port, username, password) {
        Ok(mailer) => {
            info!(host = %settings.smtp_host, port = settings.smtp_port, "smtp mailer ready");
            Arc::new(mailer)
        }
        Err(err) => {
            warn!(
                error = %format!("{err:#}"),
                "smtp mailer unavailable, alert emails are disabled"
            );
            Arc::new(DisabledMailer)
        }
    }
}

#[cfg(test)]
#[path = "tests/mailer_tests.rs"]
mod tests;

use reqwest::Client as HttpClient;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// An outgoing account email
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Action link embedded in the body
    pub link: String,
}

/// Delivers account emails (activation, password reset)
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> AppResult<()>;

    /// Mailer name for logging
    fn name(&self) -> &'static str;
}

/// Writes mail to the log instead of sending it. Used when no relay is configured.
///
/// The action link is the only way to finish activation or a password reset
/// in this mode, so it is logged at debug level along with the body.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> AppResult<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "No mail relay configured, writing mail to the log"
        );
        tracing::debug!(
            to = %email.to,
            link = %email.link,
            body = %email.body,
            "Logged mail"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Posts mail as JSON to an HTTP relay
#[derive(Clone)]
pub struct RelayMailer {
    http_client: HttpClient,
    relay_url: String,
}

impl RelayMailer {
    pub fn new(relay_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            relay_url,
        }
    }
}

#[async_trait::async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, email: Email) -> AppResult<()> {
        let response = self
            .http_client
            .post(&self.relay_url)
            .json(&email)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Mail relay returned status {}: {}",
                status, body
            )));
        }

        tracing::info!(to = %email.to, subject = %email.subject, "Mail handed to relay");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "relay"
    }
}

pub fn activation_email(to: &str, link: String) -> Email {
    Email {
        to: to.to_string(),
        subject: "Activate your account".to_string(),
        body: format!(
            "Welcome! Confirm your email address by opening this link:\n\n{}\n",
            link
        ),
        link,
    }
}

pub fn password_reset_email(to: &str, link: String) -> Email {
    Email {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "A password reset was requested for your account. Open this link to choose a new password:\n\n{}\n\nIgnore this email if you did not ask for it.\n",
            link
        ),
        link,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_activation_email_embeds_link() {
        let email = activation_email("a@example.com", "http://x/active?token=t".to_string());
        assert_eq!(email.to, "a@example.com");
        assert!(email.body.contains("http://x/active?token=t"));
    }

    #[tokio::test]
    async fn test_log_mailer_writes_link_to_log() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let email = activation_email(
            "a@example.com",
            "http://books.test/api/v1/auth/active?token=abc123".to_string(),
        );
        LogMailer.send(email).await.unwrap();

        let output = buffer.contents();
        assert!(output.contains("a@example.com"));
        assert!(output.contains("http://books.test/api/v1/auth/active?token=abc123"));
    }

    #[tokio::test]
    async fn test_log_mailer_never_fails() {
        let mailer = LogMailer;
        let email = password_reset_email("a@example.com", "http://x".to_string());
        tokio_test::assert_ok!(mailer.send(email).await);
    }
}

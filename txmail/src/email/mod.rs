//! Email dispatch abstraction.
//!
//! Everything that sends mail goes through [`EmailSender`]:
//! - `ses`: Amazon SES v2 (production)
//! - `log`: writes the message to the log and reports success (local runs)
//!
//! Sending is not idempotent. No retry happens at this layer; queued sends
//! are retried by the broker, direct sends are not retried at all.

pub mod log;
pub mod ses;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, EmailBackend};

pub use self::log::LogEmailSender;
pub use ses::SesEmailSender;
pub use template::{render_transaction_email, RenderedBody, TRANSACTION_SUBJECT};

/// A single-recipient multipart (HTML + text) message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to build email message: {0}")]
    Build(String),

    #[error("email provider rejected the send: {0}")]
    Provider(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Submit one message to the provider.
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError>;
}

/// Build the sender selected by `EMAIL_BACKEND`.
pub async fn build_sender(config: &Config) -> Arc<dyn EmailSender> {
    match config.email_backend {
        EmailBackend::Ses => {
            let client = ses::build_client(&config.aws).await;
            tracing::info!(
                region = %config.aws.region,
                static_credentials = config.aws.has_static_credentials(),
                endpoint_override = config.aws.endpoint_url.is_some(),
                "ses_client_created"
            );
            Arc::new(SesEmailSender::new(client))
        }
        EmailBackend::Log => {
            tracing::warn!("email_backend_log_only");
            Arc::new(LogEmailSender)
        }
    }
}

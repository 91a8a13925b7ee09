//! Log-only sender. Nothing leaves the process.

use async_trait::async_trait;
use tracing::info;

use super::{EmailSender, OutboundEmail, SendError};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
        info!(
            sender = %email.sender,
            recipient = %email.recipient,
            subject = %email.subject,
            text_body = %email.text_body,
            "email_send_skipped_log_backend"
        );
        Ok(())
    }
}

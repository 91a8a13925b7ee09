//! Task handling for the worker.
//!
//! ```text
//! claimed → processing → done | failed-retryable | failed-permanent
//! ```
//!
//! The handler never talks to the broker; it only reports an outcome. The
//! consumer turns that outcome into an ack, a delayed retry or a dead-letter.

use thiserror::Error;
use tracing::{error, info};

use super::types::{EmailTask, TYPE_EMAIL_NOTIFICATION};
use crate::email::{render_transaction_email, EmailSender, OutboundEmail, SendError};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no handler for task type {0:?}")]
    UnknownType(Option<String>),

    #[error("malformed task payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("email send failed: {0}")]
    Send(#[from] SendError),
}

impl TaskError {
    /// Whether the broker should redeliver the task.
    ///
    /// A payload that failed to decode, a type nobody handles, or a message
    /// that could not be built will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Send(SendError::Provider(_)))
    }
}

/// Route a claimed task to its handler by task type.
pub async fn process_task(
    kind: Option<&str>,
    payload: &[u8],
    sender: &dyn EmailSender,
) -> Result<(), TaskError> {
    match kind {
        Some(TYPE_EMAIL_NOTIFICATION) => handle_email_notification(payload, sender).await,
        other => Err(TaskError::UnknownType(other.map(str::to_string))),
    }
}

async fn handle_email_notification(payload: &[u8], sender: &dyn EmailSender) -> Result<(), TaskError> {
    let task = EmailTask::decode(payload)?;

    info!(
        recipient = %task.recipient,
        amount = task.amount,
        "email_task_processing"
    );

    let body = render_transaction_email(task.amount, &task.description)?;
    let email = OutboundEmail {
        sender: task.sender,
        recipient: task.recipient,
        subject: task.subject,
        html_body: body.html,
        text_body: body.text,
    };

    if let Err(e) = sender.send(&email).await {
        error!(recipient = %email.recipient, error = %e, "email_send_failed");
        return Err(e.into());
    }

    info!(recipient = %email.recipient, "email_sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<OutboundEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(email.clone());
            if self.fail {
                Err(SendError::Provider("throttled".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn payload() -> Vec<u8> {
        EmailTask::new("noreply@example.com", "a@b.com", "Transaction Notification", 10.0, "Coffee")
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_email_task_is_rendered_and_sent() {
        let sender = RecordingSender::default();

        process_task(Some(TYPE_EMAIL_NOTIFICATION), &payload(), &sender)
            .await
            .unwrap();

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender, "noreply@example.com");
        assert_eq!(sent[0].recipient, "a@b.com");
        assert_eq!(sent[0].subject, "Transaction Notification");
        assert!(sent[0].html_body.contains("$10.00"));
        assert_eq!(sent[0].text_body, "Transaction Successful! Amount: $10.00, Description: Coffee");
    }

    #[tokio::test]
    async fn test_decode_failure_is_permanent() {
        let sender = RecordingSender::default();

        let err = process_task(Some(TYPE_EMAIL_NOTIFICATION), b"{oops", &sender)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Decode(_)));
        assert!(!err.is_retryable());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_is_retryable() {
        let sender = RecordingSender {
            fail: true,
            ..Default::default()
        };

        let err = process_task(Some(TYPE_EMAIL_NOTIFICATION), &payload(), &sender)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Send(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_build_failure_is_permanent() {
        let err = TaskError::from(SendError::Build("bad charset".to_string()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_type_is_permanent() {
        let sender = RecordingSender::default();

        let err = process_task(Some("sms:notification"), &payload(), &sender)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownType(Some(ref t)) if t == "sms:notification"));
        assert!(!err.is_retryable());

        let err = process_task(None, &payload(), &sender).await.unwrap_err();
        assert!(matches!(err, TaskError::UnknownType(None)));
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}

//! Notification strategies.
//!
//! A deployment runs exactly one of these, chosen by `NOTIFICATION_MODE`:
//! - [`DirectDispatch`]: send the email from the request handler
//! - [`QueuedDispatch`]: enqueue an `email:notification` task for the worker
//!
//! Either way the transaction itself is already accepted when notification
//! is attempted; a failure here does not undo it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::email::{render_transaction_email, EmailSender, OutboundEmail, SendError, TRANSACTION_SUBJECT};
use crate::queue::{enqueue_email, EnqueueError, TaskInfo, TaskQueue};
use crate::transaction::TransactionRequest;

/// What happened to a transaction's notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Queued(TaskInfo),
}

impl NotifyOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            NotifyOutcome::Sent => "Transaction processed successfully and email notification sent",
            NotifyOutcome::Queued(_) => {
                "Transaction processed successfully and email notification queued"
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

impl NotifyError {
    /// Caller-facing message. Details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            NotifyError::Send(_) => "Transaction processed but email notification failed to send",
            NotifyError::Enqueue(_) => {
                "Transaction processed but email notification failed to queue"
            }
        }
    }
}

#[async_trait]
pub trait NotificationStrategy: Send + Sync {
    /// Notify the transaction's recipient. The request is already validated.
    async fn notify(&self, txn: &TransactionRequest) -> Result<NotifyOutcome, NotifyError>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}

pub struct DirectDispatch {
    sender_email: String,
    mailer: Arc<dyn EmailSender>,
}

impl DirectDispatch {
    pub fn new(sender_email: impl Into<String>, mailer: Arc<dyn EmailSender>) -> Self {
        Self {
            sender_email: sender_email.into(),
            mailer,
        }
    }
}

#[async_trait]
impl NotificationStrategy for DirectDispatch {
    async fn notify(&self, txn: &TransactionRequest) -> Result<NotifyOutcome, NotifyError> {
        let body = render_transaction_email(txn.amount, &txn.description)?;
        let email = OutboundEmail {
            sender: self.sender_email.clone(),
            recipient: txn.email.clone(),
            subject: TRANSACTION_SUBJECT.to_string(),
            html_body: body.html,
            text_body: body.text,
        };

        self.mailer.send(&email).await?;
        Ok(NotifyOutcome::Sent)
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

pub struct QueuedDispatch {
    sender_email: String,
    queue: Arc<dyn TaskQueue>,
}

impl QueuedDispatch {
    pub fn new(sender_email: impl Into<String>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            sender_email: sender_email.into(),
            queue,
        }
    }
}

#[async_trait]
impl NotificationStrategy for QueuedDispatch {
    async fn notify(&self, txn: &TransactionRequest) -> Result<NotifyOutcome, NotifyError> {
        let info = enqueue_email(
            self.queue.as_ref(),
            &self.sender_email,
            &txn.email,
            TRANSACTION_SUBJECT,
            txn.amount,
            &txn.description,
        )
        .await?;

        Ok(NotifyOutcome::Queued(info))
    }

    fn name(&self) -> &'static str {
        "queued"
    }
}

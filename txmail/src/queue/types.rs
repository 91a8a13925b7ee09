//! Task payloads and queue identifiers.
//!
//! A task on the wire is an AMQP message whose `type` property carries the
//! task-type identifier and whose body is the JSON payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Task type for transaction email notifications.
pub const TYPE_EMAIL_NOTIFICATION: &str = "email:notification";

/// Exchange and queue receiving rejected and exhausted tasks.
pub const DEAD_LETTER_EXCHANGE: &str = "txmail.dead-letter";
pub const DEAD_LETTER_QUEUE: &str = "txmail.dead-letter";

/// Exchange and queue holding failed tasks until their retry delay expires.
pub const RETRY_EXCHANGE: &str = "txmail.retry";
pub const RETRY_QUEUE: &str = "txmail.retry";

/// Payload of an `email:notification` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTask {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub amount: f64,
    pub description: String,
}

/// Broker-assigned identity of an enqueued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: String,
    pub queue: String,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("failed to encode task payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker unavailable: {0}")]
    Broker(String),

    #[error("broker refused task {0}")]
    Rejected(String),
}

impl EmailTask {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        amount: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            amount,
            description: description.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnqueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_task_round_trip() {
        let task = EmailTask::new(
            "noreply@example.com",
            "a@b.com",
            "Transaction Notification",
            10.5,
            "Coffee",
        );

        let decoded = EmailTask::decode(&task.encode().unwrap()).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_wire_field_names() {
        let task = EmailTask::new("s@x.io", "r@x.io", "subj", 1.0, "d");
        let json: serde_json::Value = serde_json::from_slice(&task.encode().unwrap()).unwrap();

        assert_eq!(json["sender"], "s@x.io");
        assert_eq!(json["recipient"], "r@x.io");
        assert_eq!(json["subject"], "subj");
        assert_eq!(json["amount"], 1.0);
        assert_eq!(json["description"], "d");
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        assert!(EmailTask::decode(b"not json").is_err());
        assert!(EmailTask::decode(br#"{"sender":"s@x.io"}"#).is_err());
        assert!(EmailTask::decode(br#"{"sender":1,"recipient":"r","subject":"s","amount":1,"description":"d"}"#).is_err());
    }
}

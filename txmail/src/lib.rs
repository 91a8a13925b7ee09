//! txmail - Transaction email notification relay.
//!
//! This library provides shared modules for the txmail binaries:
//! - `txmail-api`: HTTP API accepting transactions
//! - `txmail-worker`: Queue consumer that sends the notification emails
//! - `txmail-send-test`: Operator tool that sends one sample email
//!
//! ## Architecture
//!
//! ```text
//! POST /transactions → validate → QueuedDispatch → RabbitMQ → Worker → SES
//!                               ↘ DirectDispatch ──────────────────→ SES
//! ```

pub mod config;
pub mod email;
pub mod notify;
pub mod queue;
pub mod shutdown;
pub mod telemetry;
pub mod transaction;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, NotificationMode};
pub use email::{EmailSender, OutboundEmail, SendError};
pub use notify::{DirectDispatch, NotificationStrategy, QueuedDispatch};
pub use queue::{EmailTask, Publisher, TaskQueue, DEAD_LETTER_QUEUE, TYPE_EMAIL_NOTIFICATION};
pub use transaction::{TransactionRequest, TransactionResponse, ValidationError};
pub use web::AppState;

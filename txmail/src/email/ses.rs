//! Amazon SES v2 sender.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sesv2::{
    config::Credentials,
    error::DisplayErrorContext,
    types::{Body, Content, Destination, EmailContent, Message},
    Client,
};
use tracing::info;

use super::{EmailSender, OutboundEmail, SendError};
use crate::config::AwsSettings;

const CHARSET: &str = "UTF-8";

/// Create an SES client.
///
/// Explicit key/secret (plus optional session token) take precedence when
/// both are set; otherwise the SDK's default chain resolves credentials
/// (shared profile, container/instance role, ...).
pub async fn build_client(aws: &AwsSettings) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(aws.region.clone()));

    if let (Some(key), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            key.clone(),
            secret.clone(),
            aws.session_token.clone(),
            None,
            "txmail-environment",
        ));
    }

    if let Some(endpoint) = &aws.endpoint_url {
        loader = loader.endpoint_url(endpoint.clone());
    }

    let shared = loader.load().await;
    Client::new(&shared)
}

fn content(data: &str, part: &str) -> Result<Content, SendError> {
    Content::builder()
        .data(data)
        .charset(CHARSET)
        .build()
        .map_err(|e| SendError::Build(format!("{part}: {e}")))
}

/// Wraps an `aws_sdk_sesv2::Client`. The `From` address must be verified in SES.
#[derive(Clone)]
pub struct SesEmailSender {
    client: Client,
}

impl SesEmailSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EmailSender for SesEmailSender {
    async fn send(&self, email: &OutboundEmail) -> Result<(), SendError> {
        let destination = Destination::builder()
            .to_addresses(&email.recipient)
            .build();

        let message = Message::builder()
            .subject(content(&email.subject, "subject")?)
            .body(
                Body::builder()
                    .html(content(&email.html_body, "html body")?)
                    .text(content(&email.text_body, "text body")?)
                    .build(),
            )
            .build();

        let output = self
            .client
            .send_email()
            .from_email_address(&email.sender)
            .destination(destination)
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| SendError::Provider(DisplayErrorContext(&e).to_string()))?;

        info!(
            recipient = %email.recipient,
            ses_message_id = output.message_id().unwrap_or("unknown"),
            "ses_email_sent"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SesEmailSender>();
    }

    #[test]
    fn test_content_sets_charset() {
        let c = content("Hello", "subject").unwrap();
        assert_eq!(c.data(), "Hello");
        assert_eq!(c.charset(), Some("UTF-8"));
    }
}

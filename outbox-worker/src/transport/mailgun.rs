//! Delivery through the Mailgun HTTP API.
//!
//! Messages are posted unchanged to the `messages.mime` endpoint, so the
//! bytes Mailgun sends are the bytes that were queued.
//! Reference: https://documentation.mailgun.com/docs/mailgun/api-reference/openapi-final/tag/Messages/

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{info, warn};

use super::{Envelope, Transport};
use crate::config::Config;
use crate::error::TransportError;

/// Longest response body excerpt kept in an error message.
const MAX_BODY_CHARS: usize = 500;

/// Posts raw MIME messages to Mailgun.
#[derive(Debug, Clone)]
pub struct MailgunTransport {
    client: Client,
    api_base: String,
    domain: String,
    api_key: String,
}

impl MailgunTransport {
    pub fn new(client: Client, api_base: String, domain: String, api_key: String) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            domain,
            api_key,
        }
    }

    /// Build from `MAILGUN_*` settings.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let api_key = config
            .mailgun_api_key
            .clone()
            .ok_or_else(|| TransportError::NotConfigured("MAILGUN_API_KEY is not set".to_string()))?;
        let domain = config
            .mailgun_domain
            .clone()
            .ok_or_else(|| TransportError::NotConfigured("MAILGUN_DOMAIN is not set".to_string()))?;

        let client = Client::builder().pool_max_idle_per_host(8).build()?;

        Ok(Self::new(client, config.mailgun_api_base.clone(), domain, api_key))
    }

    fn endpoint(&self) -> String {
        format!("{}/v3/{}/messages.mime", self.api_base, self.domain)
    }
}

#[async_trait]
impl Transport for MailgunTransport {
    fn name(&self) -> &'static str {
        "mailgun"
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if envelope.recipients.is_empty() {
            return Err(TransportError::NoRecipients);
        }

        let message = Part::bytes(envelope.content.clone())
            .file_name("message.mime")
            .mime_str("message/rfc822")?;

        let mut form = Form::new();
        for recipient in &envelope.recipients {
            form = form.text("to", recipient.clone());
        }
        let form = form.part("message", message);

        info!(
            id = %envelope.id,
            domain = %self.domain,
            recipient_count = envelope.recipients.len(),
            "mailgun_send_starting"
        );

        let resp = self
            .client
            .post(self.endpoint())
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            info!(id = %envelope.id, status_code = status.as_u16(), "mailgun_send_complete");
            return Ok(());
        }

        let body: String = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_BODY_CHARS)
            .collect();

        warn!(
            id = %envelope.id,
            status_code = status.as_u16(),
            body = %body,
            "mailgun_send_rejected"
        );

        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

//! Delivery transports.
//!
//! A transport receives an [`Envelope`], an immutable snapshot of a queued
//! record, and either delivers it or returns a [`TransportError`]. The
//! dispatcher runs every call in its own task, so a transport may block on
//! network or child-process I/O for as long as the configured timeout allows.

pub mod mailgun;
pub mod sendmail;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use mailparse::{addrparse, parse_headers, MailAddr, MailHeaderMap};
use tracing::{info, warn};

use crate::config::{Config, TransportKind};
use crate::error::TransportError;
use crate::store::MessageRecord;

pub use mailgun::MailgunTransport;
pub use sendmail::SendmailTransport;

/// Headers whose addresses receive a copy of the message.
const RECIPIENT_HEADERS: &[&str] = &["To", "Cc", "Bcc"];

/// Snapshot of a queued message handed to a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Record id (content fingerprint)
    pub id: String,
    /// Exact bytes captured at submission
    pub content: Vec<u8>,
    /// Addresses from the To, Cc and Bcc headers
    pub recipients: Vec<String>,
}

impl Envelope {
    /// Envelope for content that was never queued.
    pub fn new(id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            recipients: extract_recipients(&content),
            content,
        }
    }

    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            id: record.id.clone(),
            content: record.content.clone(),
            recipients: extract_recipients(&record.content),
        }
    }
}

/// Something that can deliver a message.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Attempt delivery once.
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;
}

/// Build the transport selected by `OUTBOX_TRANSPORT`.
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>, TransportError> {
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Sendmail => Arc::new(SendmailTransport::new(config.sendmail_path.clone())),
        TransportKind::Mailgun => Arc::new(MailgunTransport::from_config(config)?),
    };

    info!(transport = transport.name(), "transport_built");
    Ok(transport)
}

/// Collect recipient addresses from the message headers.
///
/// Unparseable headers are skipped; an unparseable message yields no recipients.
pub fn extract_recipients(content: &[u8]) -> Vec<String> {
    let headers = match parse_headers(content) {
        Ok((headers, _)) => headers,
        Err(e) => {
            warn!(error = %e, "envelope_headers_unparseable");
            return Vec::new();
        }
    };

    let mut recipients = Vec::new();

    for name in RECIPIENT_HEADERS {
        for value in headers.get_all_values(name) {
            match addrparse(&value) {
                Ok(list) => {
                    for addr in list.iter() {
                        match addr {
                            MailAddr::Single(info) => recipients.push(info.addr.clone()),
                            MailAddr::Group(group) => {
                                recipients.extend(group.addrs.iter().map(|a| a.addr.clone()))
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(header = *name, error = %e, "envelope_address_unparseable");
                }
            }
        }
    }

    let mut seen = HashSet::new();
    recipients.retain(|addr| seen.insert(addr.to_ascii_lowercase()));
    recipients
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_extract_recipients_all_headers() {
        let raw = "From: me@example.com\r\n\
                   To: Alice <alice@example.com>, bob@example.com\r\n\
                   Cc: carol@example.com\r\n\
                   Bcc: dave@example.com\r\n\
                   Subject: hi\r\n\r\nbody";

        assert_eq!(
            extract_recipients(raw.as_bytes()),
            vec![
                "alice@example.com",
                "bob@example.com",
                "carol@example.com",
                "dave@example.com"
            ]
        );
    }

    #[test]
    fn test_extract_recipients_group() {
        let raw = "To: Team: erin@example.com, frank@example.com;\r\n\r\nbody";
        assert_eq!(
            extract_recipients(raw.as_bytes()),
            vec!["erin@example.com", "frank@example.com"]
        );
    }

    #[test]
    fn test_extract_recipients_none() {
        let raw = "From: me@example.com\r\nSubject: draft\r\n\r\nbody";
        assert!(extract_recipients(raw.as_bytes()).is_empty());
    }

    #[test]
    fn test_envelope_from_record() {
        let record = MessageRecord {
            id: "abc".to_string(),
            content: b"To: alice@example.com\r\n\r\nhello".to_vec(),
            created_at: Utc::now(),
            last_error: None,
        };

        let envelope = Envelope::from_record(&record);

        assert_eq!(envelope.id, "abc");
        assert_eq!(envelope.content, record.content);
        assert_eq!(envelope.recipients, vec!["alice@example.com"]);
    }

    #[test]
    fn test_envelope_from_8bit_message() {
        let raw: &[u8] = b"To: Ren\xe9 <rene@example.com>\r\nContent-Transfer-Encoding: 8bit\r\n\r\nd\xe9j\xe0 vu";

        let envelope = Envelope::new("latin1", raw);

        assert_eq!(envelope.content, raw);
        assert_eq!(envelope.recipients, vec!["rene@example.com"]);
    }

    #[test]
    fn test_build_transport_mailgun_requires_credentials() {
        let config = Config {
            transport: TransportKind::Mailgun,
            ..Config::default()
        };
        assert!(matches!(
            build_transport(&config),
            Err(TransportError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_build_transport_sendmail() {
        let transport = build_transport(&Config::default()).unwrap();
        assert_eq!(transport.name(), "sendmail");
    }
}

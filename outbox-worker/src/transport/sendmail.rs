//! Delivery through a sendmail-compatible program.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use super::{Envelope, Transport};
use crate::error::TransportError;

/// Longest stderr excerpt kept in an error message.
const MAX_STDERR_CHARS: usize = 500;

/// Pipes each message into `sendmail -i -t` in a child process.
///
/// The program reads recipients from the To, Cc and Bcc headers itself.
/// The child is killed if the attempt is dropped, e.g. on timeout.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: PathBuf,
}

impl SendmailTransport {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl Transport for SendmailTransport {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        info!(
            id = %envelope.id,
            program = %self.program.display(),
            content_length = envelope.content.len(),
            "sendmail_spawn"
        );

        let mut child = Command::new(&self.program)
            .args(["-i", "-t"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(&envelope.content).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };

            // A program that exits without reading everything is judged by its exit status.
            match written {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    warn!(id = %envelope.id, "sendmail_stdin_closed_early");
                }
                Err(e) => return Err(e.into()),
                Ok(()) => {}
            }
        }

        let output = child.wait_with_output().await?;

        if output.status.success() {
            info!(id = %envelope.id, "sendmail_complete");
            return Ok(());
        }

        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .trim()
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect();

        warn!(
            id = %envelope.id,
            status = %output.status,
            stderr = %stderr,
            "sendmail_failed"
        );

        Err(TransportError::Process {
            status: output.status.to_string(),
            stderr,
        })
    }
}

//! Configuration module for environment variable parsing.
//!
//! Every setting has a default so the binaries start with an empty environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::query::DEFAULT_EXCERPT_CHARS;

/// Which delivery transport to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Pipe messages into a sendmail-compatible program
    Sendmail,
    /// Post raw MIME to the Mailgun HTTP API
    Mailgun,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sendmail" => Ok(TransportKind::Sendmail),
            "mailgun" => Ok(TransportKind::Mailgun),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite file holding queued messages
    pub db_path: PathBuf,

    /// When false, messages bypass the outbox and are sent synchronously
    pub outbox_enabled: bool,

    /// Queue everything and only send on forced attempts (flush)
    pub queue_only: bool,

    /// Run a recovery flush when a long-running service starts
    pub flush_on_startup: bool,

    /// Maximum number of pooled store connections
    pub pool_size: u32,

    /// Timeout applied around every transport call in milliseconds
    pub send_timeout_ms: u64,

    /// Number of body characters kept in query views
    pub body_excerpt_chars: usize,

    // =========================================================================
    // Transport Configuration
    // =========================================================================

    /// Transport used for delivery attempts
    pub transport: TransportKind,

    /// Sendmail-compatible program
    pub sendmail_path: PathBuf,

    /// Mailgun API key
    pub mailgun_api_key: Option<String>,

    /// Mailgun sending domain
    pub mailgun_domain: Option<String>,

    /// Mailgun API base URL
    pub mailgun_api_base: String,

    // =========================================================================
    // Web Server Configuration
    // =========================================================================

    /// Port for the web server to listen on
    pub port: u16,

    /// Shared token required in the X-Outbox-Auth header, if set
    pub api_auth_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("outbox.sqlite3"),
            outbox_enabled: true,
            queue_only: false,
            flush_on_startup: true,
            pool_size: 8,
            send_timeout_ms: 60_000,
            body_excerpt_chars: DEFAULT_EXCERPT_CHARS,
            transport: TransportKind::Sendmail,
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            mailgun_api_key: None,
            mailgun_domain: None,
            mailgun_api_base: "https://api.mailgun.net".to_string(),
            port: 8080,
            api_auth_token: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            db_path: env::var("OUTBOX_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            outbox_enabled: parse_var("OUTBOX_ENABLED", defaults.outbox_enabled),

            queue_only: parse_var("OUTBOX_QUEUE_ONLY", defaults.queue_only),

            flush_on_startup: parse_var("OUTBOX_FLUSH_ON_STARTUP", defaults.flush_on_startup),

            pool_size: parse_var("OUTBOX_POOL_SIZE", defaults.pool_size).max(1),

            send_timeout_ms: parse_var("SEND_TIMEOUT_MS", defaults.send_timeout_ms),

            body_excerpt_chars: parse_var("BODY_EXCERPT_CHARS", defaults.body_excerpt_chars),

            transport: parse_var("OUTBOX_TRANSPORT", defaults.transport),

            sendmail_path: env::var("SENDMAIL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sendmail_path),

            mailgun_api_key: non_empty("MAILGUN_API_KEY"),

            mailgun_domain: non_empty("MAILGUN_DOMAIN"),

            mailgun_api_base: env::var("MAILGUN_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.mailgun_api_base),

            port: parse_var("PORT", defaults.port),

            api_auth_token: non_empty("API_AUTH_TOKEN"),
        }
    }

    /// Timeout for a single delivery attempt.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Read an environment variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

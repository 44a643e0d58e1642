//! Probe configuration

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration, loaded from a TOML file at startup
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address to bind the metrics server
    ///
    /// Common values:
    /// - `[::]:8080` (IPv6 any address, port 8080)
    /// - `0.0.0.0:8080` (IPv4 any address, port 8080)
    /// - `127.0.0.1:8080` (localhost only, port 8080)
    #[serde(default = "default_listen")]
    pub listen: String,

    /// How often the cached status is forcibly cleared, in seconds
    ///
    /// This bounds how stale a served value can get; the cache entry itself
    /// never expires on its own.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// How often a new probe message is sent, in seconds
    #[serde(default = "default_send_interval_secs")]
    pub send_interval_secs: u64,

    /// Outbound mail provider settings
    pub mailgun: MailgunConfig,

    /// Inbox settings
    pub imap: ImapConfig,
}

/// Mailgun HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct MailgunConfig {
    /// API key, sent as the basic-auth password with user `api`
    pub api_key: String,

    /// Sending domain; the probe originates from `mailgun@{domain}`
    pub domain: String,

    /// Recipient address the probe is sent to
    pub to: String,

    /// API base URL, without a trailing path
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// IMAP inbox settings
#[derive(Debug, Clone, Deserialize)]
pub struct ImapConfig {
    /// Server address as `host:port`; the host part doubles as the TLS
    /// server name
    pub addr: String,

    /// Login username
    pub username: String,

    /// Login password
    pub password: String,

    /// Mailbox to reconcile
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. Both are fatal
    /// at startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    #[must_use]
    pub const fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }
}

impl ImapConfig {
    /// Hostname part of [`Self::addr`], used for TLS server-name verification
    ///
    /// An IPv6 literal loses its surrounding brackets; `[::1]:993` yields
    /// `::1`.
    #[must_use]
    pub fn host(&self) -> &str {
        let host = self
            .addr
            .rsplit_once(':')
            .map_or(self.addr.as_str(), |(host, _)| host);
        host.strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host)
    }
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

const fn default_flush_interval_secs() -> u64 {
    300
}

const fn default_send_interval_secs() -> u64 {
    3600
}

fn default_api_base() -> String {
    "https://api.eu.mailgun.net".to_string()
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

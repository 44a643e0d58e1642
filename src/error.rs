//! Error types for the probe pipeline

use thiserror::Error;

/// Errors that prevent startup entirely
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::Config`]
    #[error("failed to parse configuration from {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Errors from one outbound probe send attempt
///
/// These are never fatal: the send loop logs them, bumps the mailgun error
/// counter, and tries again on its next tick.
#[derive(Debug, Error)]
pub enum SendError {
    /// The HTTP request itself failed
    #[error("mail API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with something other than 200
    #[error("mail API responded with status {0}")]
    Status(reqwest::StatusCode),
}

/// Errors from one inbox reconciliation attempt
///
/// All of these surface to the status cache, which logs them, bumps the imap
/// error counter, and serves a zero value for that lookup.
#[derive(Debug, Error)]
pub enum InboxError {
    /// TLS connector construction failed
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    /// Could not reach or handshake with the IMAP server
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: imap::Error },

    /// The server rejected the configured credentials
    #[error("IMAP login failed for {username}: {source}")]
    Auth {
        username: String,
        source: imap::Error,
    },

    /// Any other IMAP command failure (select, search, store, expunge)
    #[error("IMAP command failed: {0}")]
    Imap(#[from] imap::Error),

    /// The mailbox is empty, so there is no probe to observe
    #[error("no messages found")]
    NoMessages,

    /// The newest message could not be fetched
    #[error("failed to fetch message {uid}")]
    Fetch { uid: u32 },

    /// The newest message's subject is not a valid probe token
    #[error("malformed probe subject {subject:?}")]
    MalformedSubject { subject: String },

    /// The blocking IMAP task panicked or was cancelled
    #[error("inbox task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors from the metrics HTTP server
#[derive(Debug, Error)]
pub enum ServeError {
    /// Failed to bind to the configured listen address
    #[error("failed to bind metrics server to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    /// The server encountered a runtime error
    #[error("metrics server error: {0}")]
    Server(String),
}

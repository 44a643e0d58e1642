//! mailalive — an end-to-end mail delivery probe
//!
//! Periodically sends a uniquely timestamped probe email through Mailgun,
//! reconciles an IMAP inbox to detect its arrival, and exposes the measured
//! delivery delay as Prometheus metrics.
//!
//! # Data flow
//!
//! ```text
//! MailSender (periodic) → inbox → ImapInbox::probe (on demand, cache gated)
//!     → StatusCache → gauges (on scrape) → external monitoring scraper
//! ```
//!
//! Two background loops run alongside the metrics server: one re-sends the
//! probe at a fixed interval, one clears the status cache at a fixed interval
//! so a scrape can never be served a value older than that bound.

pub mod cache;
pub mod config;
pub mod error;
pub mod inbox;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod sender;
pub mod server;
pub mod status;

pub use cache::{StatusCache, StatusSource};
pub use config::{Config, ImapConfig, MailgunConfig};
pub use error::{ConfigError, InboxError, SendError, ServeError};
pub use inbox::{ImapInbox, InboxSession, ProbeMessage, Reconciliation, Uid, reconcile};
pub use metrics::Metrics;
pub use scheduler::{Periodic, Shutdown};
pub use sender::MailSender;
pub use server::{AppState, MetricsServer};
pub use status::{SUBJECT_PREFIX, Status, StatusField, parse_probe_subject, probe_subject};

//! Prometheus instruments for the probe
//!
//! All instruments live in an explicit [`prometheus::Registry`] owned by
//! [`Metrics`]; nothing is registered globally. The two gauges are refreshed
//! by the scrape handler on every `/metrics` request, the counters are bumped
//! by the components that observe the corresponding events and are never
//! reset.

use prometheus::{Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Metric context object, passed to each component at construction
pub struct Metrics {
    registry: Registry,

    /// Seconds between probe origination and inbox arrival
    pub message_delay: Gauge,

    /// Origination time of the most recently observed probe, unix seconds
    pub message_timestamp: Gauge,

    /// Stale probe messages deleted from the inbox
    pub deletions: IntCounter,

    errors: IntCounterVec,
}

impl Metrics {
    /// Create and register all instruments
    ///
    /// # Errors
    ///
    /// Returns an error if an instrument cannot be constructed or registered,
    /// which would indicate a naming collision.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let message_delay = Gauge::new(
            "mailalive_message_delay",
            "Seconds between probe origination and inbox arrival",
        )?;
        let message_timestamp = Gauge::new(
            "mailalive_message_timestamp",
            "Origination time of the most recently observed probe, in unix seconds",
        )?;
        let errors = IntCounterVec::new(
            Opts::new("mailalive_errors_total", "Probe errors by source"),
            &["error"],
        )?;
        let deletions = IntCounter::new(
            "mailalive_deletions_total",
            "Stale probe messages deleted from the inbox",
        )?;

        registry.register(Box::new(message_delay.clone()))?;
        registry.register(Box::new(message_timestamp.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(deletions.clone()))?;

        // Materialize both error series so they scrape as 0 from the start
        errors.with_label_values(&["mailgun"]);
        errors.with_label_values(&["imap"]);

        Ok(Self {
            registry,
            message_delay,
            message_timestamp,
            deletions,
            errors,
        })
    }

    /// Counter handle for failed probe sends
    #[must_use]
    pub fn mailgun_errors(&self) -> IntCounter {
        self.errors.with_label_values(&["mailgun"])
    }

    /// Counter handle for failed inbox reconciliations
    #[must_use]
    pub fn imap_errors(&self) -> IntCounter {
        self.errors.with_label_values(&["imap"])
    }

    /// Render the registry in the Prometheus text exposition format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

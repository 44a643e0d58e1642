//! The observed probe outcome and its subject token encoding

use crate::error::InboxError;

/// Prefix of every probe message subject; the remainder is the origination
/// time in decimal unix seconds.
pub const SUBJECT_PREFIX: &str = "Alive check ";

/// One observed probe outcome
///
/// Immutable once constructed: `timestamp` is the origination time embedded
/// in the probe's subject and `delay` is the seconds between origination and
/// the server-recorded arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub timestamp: f64,
    pub delay: f64,
}

/// The two fields a metric gauge can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusField {
    Timestamp,
    Delay,
}

impl Status {
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "Unix timestamps and delays fit comfortably in an f64 mantissa"
    )]
    pub fn new(sent_at: i64, delay_secs: i64) -> Self {
        Self {
            timestamp: sent_at as f64,
            delay: delay_secs as f64,
        }
    }

    /// Look up a field by kind, for generic gauge reporting
    #[must_use]
    pub const fn field(self, field: StatusField) -> f64 {
        match field {
            StatusField::Timestamp => self.timestamp,
            StatusField::Delay => self.delay,
        }
    }
}

/// Build the subject token for a probe originating at `sent_at` unix seconds
#[must_use]
pub fn probe_subject(sent_at: i64) -> String {
    format!("{SUBJECT_PREFIX}{sent_at}")
}

/// Recover the origination time from a probe subject token
///
/// # Errors
///
/// Returns [`InboxError::MalformedSubject`] if the prefix is missing or the
/// remainder is not a decimal integer; the message was not produced by this
/// system, or was corrupted in transit.
pub fn parse_probe_subject(subject: &str) -> Result<i64, InboxError> {
    subject
        .strip_prefix(SUBJECT_PREFIX)
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| InboxError::MalformedSubject {
            subject: subject.to_owned(),
        })
}

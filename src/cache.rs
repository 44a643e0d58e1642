//! Single-entry status cache with single-flight reconciliation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus::IntCounter;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::InboxError;
use crate::status::{Status, StatusField};

/// Source of fresh probe status values
///
/// Implemented by [`crate::ImapInbox`] in production and by scripted doubles
/// in tests.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Perform one full reconciliation and return the observed status
    async fn probe(&self) -> Result<Status, InboxError>;
}

struct Entry {
    status: Status,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at
            .map_or(true, |deadline| Instant::now() < deadline)
    }
}

/// A cache of the last known [`Status`], with at most one entry
///
/// One lock guards the entry and gates reconciliation: it is held across the
/// probe, so any number of simultaneous lookups result in exactly one
/// in-flight reconciliation, with the rest reading the freshly cached value
/// once it completes.
///
/// The production entry never expires on its own ([`StatusCache::new`]); the
/// periodic flush loop calls [`StatusCache::clear`] to force the next lookup
/// to reconcile. This keeps "how often do we refresh" (the flush interval)
/// separate from "what do we serve meanwhile" (the last good value).
pub struct StatusCache {
    source: Arc<dyn StatusSource>,
    entry_ttl: Option<Duration>,
    imap_errors: IntCounter,
    slot: Mutex<Option<Entry>>,
}

impl StatusCache {
    /// A cache whose entry lives until the next [`StatusCache::clear`]
    #[must_use]
    pub fn new(source: Arc<dyn StatusSource>, imap_errors: IntCounter) -> Self {
        Self::with_ttl(source, imap_errors, None)
    }

    /// A cache whose entry additionally expires after `entry_ttl`
    #[must_use]
    pub fn with_ttl(
        source: Arc<dyn StatusSource>,
        imap_errors: IntCounter,
        entry_ttl: Option<Duration>,
    ) -> Self {
        Self {
            source,
            entry_ttl,
            imap_errors,
            slot: Mutex::new(None),
        }
    }

    /// Return the requested field, reconciling first on a cache miss
    ///
    /// On reconciliation failure the error is logged, the imap error counter
    /// is incremented, and `0.0` is returned without caching anything, so the
    /// next lookup retries immediately.
    pub async fn get(&self, field: StatusField) -> f64 {
        let mut slot = self.slot.lock().await;

        match slot.as_ref() {
            Some(entry) if entry.live() => return entry.status.field(field),
            Some(_) => *slot = None,
            None => {}
        }

        match self.source.probe().await {
            Ok(status) => {
                *slot = Some(Entry {
                    status,
                    expires_at: self.entry_ttl.map(|ttl| Instant::now() + ttl),
                });
                status.field(field)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to reconcile inbox status");
                self.imap_errors.inc();
                0.0
            }
        }
    }

    /// Evict the cached entry; the next lookup reconciles afresh
    pub async fn clear(&self) {
        tracing::debug!("clearing status cache");
        *self.slot.lock().await = None;
    }
}

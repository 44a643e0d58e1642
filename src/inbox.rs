//! Inbox reconciliation: resolve the newest probe message and prune the rest

use async_trait::async_trait;
use prometheus::IntCounter;

use crate::cache::StatusSource;
use crate::config::ImapConfig;
use crate::error::InboxError;
use crate::status::{Status, parse_probe_subject};

/// IMAP unique identifier
pub type Uid = u32;

/// Subject and server-recorded arrival time of one inbox message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMessage {
    pub subject: String,
    /// `INTERNALDATE` as unix seconds
    pub arrival_unix: i64,
}

/// One authenticated, mailbox-selected session
///
/// The seam between the reconciliation algorithm and the wire protocol;
/// tests substitute an in-memory mailbox here.
pub trait InboxSession {
    /// All message UIDs ordered by arrival time, newest first
    fn uids_newest_first(&mut self) -> Result<Vec<Uid>, InboxError>;

    /// Flag the given messages `\Deleted` and expunge them
    fn delete(&mut self, uids: &[Uid]) -> Result<(), InboxError>;

    /// Subject and arrival time of one message
    fn fetch(&mut self, uid: Uid) -> Result<ProbeMessage, InboxError>;
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    pub status: Status,
    /// How many stale messages were pruned
    pub deleted: u64,
}

/// Resolve the current probe status from the mailbox
///
/// Picks the newest message by arrival, deletes every other message (probe
/// artifacts left by earlier cycles, or by a crash before a previous
/// deletion), parses the origination time out of the subject, and computes
/// the delivery delay against the server-recorded arrival time.
///
/// # Errors
///
/// [`InboxError::NoMessages`] on an empty mailbox,
/// [`InboxError::MalformedSubject`] if the newest message was not produced by
/// this system, or any session error. All are non-fatal to the process.
pub fn reconcile(
    session: &mut impl InboxSession,
    deletions: &IntCounter,
) -> Result<Reconciliation, InboxError> {
    let uids = session.uids_newest_first()?;
    let Some((&newest, stale)) = uids.split_first() else {
        return Err(InboxError::NoMessages);
    };

    let mut deleted = 0;
    if !stale.is_empty() {
        tracing::info!(count = stale.len(), "deleting stale probe messages");
        session.delete(stale)?;
        deleted = stale.len() as u64;
        // Counted at the deletion site: the mailbox has already been
        // mutated even if the fetch or parse below fails
        deletions.inc_by(deleted);
    }

    let message = session.fetch(newest)?;
    let sent_at = parse_probe_subject(&message.subject)?;
    // Unclamped: a negative delay means the clocks disagree, which is
    // exactly the kind of problem this probe exists to surface.
    let delay = message.arrival_unix - sent_at;

    Ok(Reconciliation {
        status: Status::new(sent_at, delay),
        deleted,
    })
}

/// The production inbox: a TLS IMAP mailbox reconciled on demand
///
/// Every probe establishes a fresh connection and tears it down afterwards;
/// there is no connection reuse across calls.
pub struct ImapInbox {
    config: ImapConfig,
    deletions: IntCounter,
}

impl ImapInbox {
    #[must_use]
    pub const fn new(config: ImapConfig, deletions: IntCounter) -> Self {
        Self { config, deletions }
    }
}

#[async_trait]
impl StatusSource for ImapInbox {
    async fn probe(&self) -> Result<Status, InboxError> {
        let config = self.config.clone();
        let deletions = self.deletions.clone();

        // The imap crate is synchronous; keep its socket I/O off the runtime
        tokio::task::spawn_blocking(move || -> Result<Status, InboxError> {
            let mut session = ImapSession::connect(&config)?;
            let outcome = reconcile(&mut session, &deletions);
            session.logout();

            Ok(outcome?.status)
        })
        .await?
    }
}

type TlsSession = imap::Session<native_tls::TlsStream<std::net::TcpStream>>;

struct ImapSession {
    session: TlsSession,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, InboxError> {
        let tls = native_tls::TlsConnector::builder().build()?;
        let client = imap::connect(config.addr.as_str(), config.host(), &tls).map_err(
            |source| InboxError::Connect {
                addr: config.addr.clone(),
                source,
            },
        )?;

        let mut session = client
            .login(&config.username, &config.password)
            .map_err(|(source, _)| InboxError::Auth {
                username: config.username.clone(),
                source,
            })?;
        session.select(&config.mailbox)?;

        Ok(Self { session })
    }

    fn logout(mut self) {
        if let Err(err) = self.session.logout() {
            tracing::debug!(error = %err, "IMAP logout failed");
        }
    }
}

fn uid_set(uids: &[Uid]) -> String {
    uids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Order `(sequence, uid, arrival)` fetch results newest first
///
/// A response missing its UID or INTERNALDATE is logged and skipped rather
/// than silently shrinking the candidate set.
fn order_newest_first(candidates: Vec<(u32, Option<Uid>, Option<i64>)>) -> Vec<Uid> {
    let mut dated = Vec::with_capacity(candidates.len());
    for (seq, uid, arrival) in candidates {
        match (uid, arrival) {
            (Some(uid), Some(arrival)) => dated.push((arrival, uid)),
            _ => tracing::warn!(
                seq,
                "fetch response missing UID or INTERNALDATE, skipping message"
            ),
        }
    }
    // Arrival ties fall to the higher UID
    dated.sort_unstable_by(|a, b| b.cmp(a));
    dated.into_iter().map(|(_, uid)| uid).collect()
}

impl InboxSession for ImapSession {
    fn uids_newest_first(&mut self) -> Result<Vec<Uid>, InboxError> {
        let uids = self.session.uid_search("ALL")?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        // SORT is an optional IMAP extension; ordering on INTERNALDATE
        // client side behaves identically for the handful of messages a
        // probe inbox ever holds.
        let all: Vec<Uid> = uids.into_iter().collect();
        let fetches = self.session.uid_fetch(uid_set(&all), "INTERNALDATE")?;

        Ok(order_newest_first(
            fetches
                .iter()
                .map(|fetch| {
                    (
                        fetch.message,
                        fetch.uid,
                        fetch.internal_date().map(|date| date.timestamp()),
                    )
                })
                .collect(),
        ))
    }

    fn delete(&mut self, uids: &[Uid]) -> Result<(), InboxError> {
        self.session
            .uid_store(uid_set(uids), "+FLAGS.SILENT (\\Deleted)")?;
        self.session.expunge()?;
        Ok(())
    }

    fn fetch(&mut self, uid: Uid) -> Result<ProbeMessage, InboxError> {
        let fetches = self.session.uid_fetch(uid.to_string(), "(ENVELOPE INTERNALDATE)")?;
        let fetch = fetches.iter().next().ok_or(InboxError::Fetch { uid })?;

        let subject = fetch
            .envelope()
            .and_then(|envelope| envelope.subject.as_ref())
            .map(|subject| String::from_utf8_lossy(subject).into_owned())
            .unwrap_or_default();
        let arrival = fetch.internal_date().ok_or(InboxError::Fetch { uid })?;

        Ok(ProbeMessage {
            subject,
            arrival_unix: arrival.timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::status::probe_subject;

    /// In-memory mailbox, held newest first like the session contract
    struct FakeMailbox {
        messages: Vec<(Uid, ProbeMessage)>,
        deleted: Vec<Uid>,
    }

    impl FakeMailbox {
        fn new(mut messages: Vec<(Uid, ProbeMessage)>) -> Self {
            messages.sort_by_key(|(_, message)| std::cmp::Reverse(message.arrival_unix));
            Self {
                messages,
                deleted: Vec::new(),
            }
        }

        fn probe_at(uid: Uid, sent_at: i64, arrival_unix: i64) -> (Uid, ProbeMessage) {
            (
                uid,
                ProbeMessage {
                    subject: probe_subject(sent_at),
                    arrival_unix,
                },
            )
        }
    }

    impl InboxSession for FakeMailbox {
        fn uids_newest_first(&mut self) -> Result<Vec<Uid>, InboxError> {
            Ok(self.messages.iter().map(|(uid, _)| *uid).collect())
        }

        fn delete(&mut self, uids: &[Uid]) -> Result<(), InboxError> {
            self.deleted.extend_from_slice(uids);
            self.messages.retain(|(uid, _)| !uids.contains(uid));
            Ok(())
        }

        fn fetch(&mut self, uid: Uid) -> Result<ProbeMessage, InboxError> {
            self.messages
                .iter()
                .find(|(candidate, _)| *candidate == uid)
                .map(|(_, message)| message.clone())
                .ok_or(InboxError::Fetch { uid })
        }
    }

    fn deletions_counter() -> IntCounter {
        IntCounter::new("test_deletions", "stale messages deleted in tests")
            .expect("counter should construct")
    }

    #[test]
    fn test_single_message_yields_delay_without_deletions() {
        let mut mailbox = FakeMailbox::new(vec![FakeMailbox::probe_at(
            7,
            1_700_000_000,
            1_700_000_042,
        )]);
        let deletions = deletions_counter();

        let outcome = reconcile(&mut mailbox, &deletions).expect("reconciliation should succeed");

        assert_eq!(outcome.status, Status::new(1_700_000_000, 42));
        assert_eq!(outcome.deleted, 0, "a lone message must not be deleted");
        assert!(mailbox.deleted.is_empty());
        assert_eq!(deletions.get(), 0);
    }

    #[test]
    fn test_older_messages_are_pruned_keeping_the_newest() {
        // Arrival-ordered UIDs [5, 9, 12], 12 newest
        let mut mailbox = FakeMailbox::new(vec![
            FakeMailbox::probe_at(5, 1_699_990_000, 1_699_990_030),
            FakeMailbox::probe_at(9, 1_699_995_000, 1_699_995_020),
            FakeMailbox::probe_at(12, 1_700_000_000, 1_700_000_042),
        ]);
        let deletions = deletions_counter();

        let outcome = reconcile(&mut mailbox, &deletions).expect("reconciliation should succeed");

        assert_eq!(outcome.status.timestamp, 1_700_000_000.0);
        assert_eq!(outcome.deleted, 2, "all but the newest should be pruned");
        assert_eq!(mailbox.deleted, vec![9, 5]);
        assert_eq!(deletions.get(), 2, "the pruned messages should be counted");
        assert_eq!(
            mailbox.messages.len(),
            1,
            "exactly one live probe artifact should remain"
        );
    }

    #[test]
    fn test_empty_mailbox_is_no_messages() {
        let mut mailbox = FakeMailbox::new(Vec::new());

        let err = reconcile(&mut mailbox, &deletions_counter())
            .expect_err("empty mailbox should fail");
        assert!(
            matches!(err, InboxError::NoMessages),
            "expected NoMessages, got {err:?}"
        );
    }

    #[test]
    fn test_foreign_subject_is_malformed() {
        let mut mailbox = FakeMailbox::new(vec![(
            3,
            ProbeMessage {
                subject: "Your invoice is ready".to_string(),
                arrival_unix: 1_700_000_042,
            },
        )]);

        let err = reconcile(&mut mailbox, &deletions_counter())
            .expect_err("foreign message should fail");
        assert!(
            matches!(err, InboxError::MalformedSubject { .. }),
            "expected MalformedSubject, got {err:?}"
        );
    }

    #[test]
    fn test_deletions_are_counted_even_when_the_newest_is_malformed() {
        // The stale messages are expunged before the newest is parsed, so a
        // parse failure must not lose the deletion count
        let mut mailbox = FakeMailbox::new(vec![
            FakeMailbox::probe_at(5, 1_699_990_000, 1_699_990_030),
            FakeMailbox::probe_at(9, 1_699_995_000, 1_699_995_020),
            (
                12,
                ProbeMessage {
                    subject: "Your invoice is ready".to_string(),
                    arrival_unix: 1_700_000_042,
                },
            ),
        ]);
        let deletions = deletions_counter();

        let err = reconcile(&mut mailbox, &deletions)
            .expect_err("a malformed newest subject should fail");
        assert!(
            matches!(err, InboxError::MalformedSubject { .. }),
            "expected MalformedSubject, got {err:?}"
        );
        assert_eq!(
            mailbox.deleted,
            vec![9, 5],
            "the stale messages were expunged before the failure"
        );
        assert_eq!(
            deletions.get(),
            2,
            "deletions that actually happened must be counted on the error path"
        );
    }

    #[test]
    fn test_negative_delay_passes_through_unclamped() {
        // Arrival recorded before origination: clock skew
        let mut mailbox = FakeMailbox::new(vec![FakeMailbox::probe_at(
            2,
            1_700_000_100,
            1_700_000_040,
        )]);

        let outcome = reconcile(&mut mailbox, &deletions_counter())
            .expect("reconciliation should succeed");
        assert_eq!(outcome.status.delay, -60.0, "skew must not be clamped");
    }

    #[test]
    fn test_session_failure_during_deletion_propagates() {
        struct FailingDelete(FakeMailbox);

        impl InboxSession for FailingDelete {
            fn uids_newest_first(&mut self) -> Result<Vec<Uid>, InboxError> {
                self.0.uids_newest_first()
            }

            fn delete(&mut self, _uids: &[Uid]) -> Result<(), InboxError> {
                Err(InboxError::Fetch { uid: 0 })
            }

            fn fetch(&mut self, uid: Uid) -> Result<ProbeMessage, InboxError> {
                self.0.fetch(uid)
            }
        }

        let mut mailbox = FailingDelete(FakeMailbox::new(vec![
            FakeMailbox::probe_at(1, 1_700_000_000, 1_700_000_010),
            FakeMailbox::probe_at(2, 1_700_001_000, 1_700_001_010),
        ]));
        let deletions = deletions_counter();

        assert!(
            reconcile(&mut mailbox, &deletions).is_err(),
            "a deletion failure should surface to the caller"
        );
        assert_eq!(
            deletions.get(),
            0,
            "a failed expunge must not be counted as a deletion"
        );
    }

    #[test]
    fn test_uid_set_formats_comma_separated() {
        assert_eq!(uid_set(&[9, 5]), "9,5");
        assert_eq!(uid_set(&[12]), "12");
    }

    #[test]
    fn test_ordering_skips_responses_missing_uid_or_arrival() {
        let ordered = order_newest_first(vec![
            (1, Some(5), Some(1_699_990_030)),
            (2, None, Some(1_699_995_020)),
            (3, Some(12), Some(1_700_000_042)),
            (4, Some(9), None),
        ]);

        assert_eq!(
            ordered,
            vec![12, 5],
            "incomplete fetch responses must be skipped, not ordered"
        );
    }

    #[test]
    fn test_ordering_breaks_arrival_ties_by_higher_uid() {
        let ordered = order_newest_first(vec![
            (1, Some(5), Some(1_700_000_000)),
            (2, Some(9), Some(1_700_000_000)),
        ]);

        assert_eq!(ordered, vec![9, 5]);
    }
}

//! Fixed-interval background tasks

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

/// Shutdown signal fanned out to the background tasks and the metrics server
#[derive(Debug, Clone, Copy)]
pub struct Shutdown;

/// A named task that runs an action, sleeps, and repeats until shutdown
///
/// The action runs once immediately on startup. The interval separates
/// completions: a slow action delays the next tick rather than overlapping
/// it. No jitter.
#[derive(Debug, Clone)]
pub struct Periodic {
    name: &'static str,
    interval: Duration,
}

impl Periodic {
    #[must_use]
    pub const fn new(name: &'static str, interval: Duration) -> Self {
        Self { name, interval }
    }

    /// Drive the loop until the shutdown signal arrives
    pub async fn run<A, Fut>(self, mut shutdown: broadcast::Receiver<Shutdown>, mut action: A)
    where
        A: FnMut() -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        tracing::debug!(task = self.name, interval = ?self.interval, "periodic task starting");

        loop {
            action().await;

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    tracing::info!(task = self.name, "periodic task stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_action(calls: Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_runs_immediately_then_per_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (shutdown, _) = broadcast::channel(1);

        let task = tokio::spawn(
            Periodic::new("test", Duration::from_secs(60))
                .run(shutdown.subscribe(), counting_action(Arc::clone(&calls))),
        );

        settle().await;
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "the first run should happen before any sleep"
        );

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(
            calls.load(Ordering::SeqCst),
            2,
            "one interval should produce exactly one more run"
        );

        shutdown.send(Shutdown).expect("task should be subscribed");
        settle().await;
        assert!(task.is_finished(), "shutdown should stop the loop");
        task.await.expect("task should exit cleanly");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_sleep_stops_without_another_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (shutdown, _) = broadcast::channel(1);

        let task = tokio::spawn(
            Periodic::new("test", Duration::from_secs(300))
                .run(shutdown.subscribe(), counting_action(Arc::clone(&calls))),
        );

        settle().await;
        shutdown.send(Shutdown).expect("task should be subscribed");
        settle().await;

        task.await.expect("task should exit cleanly");
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "no further run should happen after shutdown"
        );
    }
}

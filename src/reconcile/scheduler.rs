use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{ReconcileError, Reconciler};
use crate::notify::format::render;

/// Fixed-interval driver for recent-score polls.
///
/// Rendered events are pushed one message per event to `announce`; whoever holds the receiver
/// delivers them to the announcement channel.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    announce: mpsc::Sender<String>,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        interval: Duration,
        announce: mpsc::Sender<String>,
    ) -> Self {
        Self {
            reconciler,
            interval,
            announce,
        }
    }

    /// Ticks until `cancel` fires. The first poll runs immediately.
    #[instrument(skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // a slow poll pushes the next one back rather than bunching ticks up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("score scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reconciler.poll(false, &cancel).await {
                Ok(events) => {
                    tracing::debug!(count = events.len(), "scheduled poll complete");
                    for event in &events {
                        if let Err(e) = self.announce.send(render(event)).await {
                            tracing::error!(error = ?e, "announcement receiver dropped");
                            break;
                        }
                    }
                }
                Err(ReconcileError::Cancelled) => break,
                Err(e) => tracing::error!(error = ?e, "scheduled poll failed"),
            }
        }

        tracing::info!("score scheduler stopped");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::leaderboard::mock::entry;
    use crate::reconcile::test::{reconciler, setup};

    #[tokio::test]
    async fn test_scheduler_announces_and_stops() {
        let (store, source) = setup(&[("p1", "s1")]).await;
        source.set_page("s1", 1, vec![entry("A", "Song A", 9, 100)]);

        let reconciler = Arc::new(reconciler(&store, &source).await);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            Scheduler::new(reconciler, Duration::from_millis(50), tx).run(cancel.clone()),
        );

        let wait = Duration::from_secs(5);
        let first = tokio::time::timeout(wait, rx.recv()).await.unwrap().unwrap();
        assert!(first.starts_with("p1 set a new high score of 100 on Song A"), "{first}");

        source.set_page("s1", 1, vec![entry("A", "Song A", 9, 150)]);
        let second = tokio::time::timeout(wait, rx.recv()).await.unwrap().unwrap();
        assert!(second.contains("of 150"), "{second}");

        cancel.cancel();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}

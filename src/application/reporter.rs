use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::events::StatusEvent;

const DEFAULT_CAPACITY: usize = 64;

/// Publishes typed status events to any number of subscribers.
///
/// Cloning shares the channel. Emitting with no subscriber is not an error:
/// the event is simply dropped.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatusPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: StatusEvent) {
        debug!(?event, subscribers = self.tx.receiver_count(), "emitting status event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

/// Subscriber that turns status events into `tracing` records, the
/// process's standard error-reporting channel.
pub struct LogReporter;

impl LogReporter {
    /// Subscribe now and log until every publisher is dropped.
    pub fn spawn(publisher: &StatusPublisher) -> JoinHandle<()> {
        let mut rx = publisher.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Self::log(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "log reporter lagged behind status events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn log(event: &StatusEvent) {
        match event {
            StatusEvent::RowCopyCompleted => info!("row copy completed and verified"),
            StatusEvent::Verified { tables, failing } if failing.is_empty() => {
                info!(tables = tables.len(), "cutover verification passed");
            }
            StatusEvent::Verified { tables, failing } => {
                warn!(tables = tables.len(), failing = ?failing, "cutover verification found mismatches");
            }
            StatusEvent::Fatal(fatal) => {
                error!(mismatches = ?fatal.mismatches, "{}", fatal.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::FatalError;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let publisher = StatusPublisher::default();
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();

        publisher.emit(StatusEvent::RowCopyCompleted);
        publisher.emit(StatusEvent::Fatal(FatalError::message("stop")));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), StatusEvent::RowCopyCompleted);
            assert!(matches!(rx.recv().await.unwrap(), StatusEvent::Fatal(_)));
        }
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        StatusPublisher::new(1).emit(StatusEvent::RowCopyCompleted);
    }

    #[tokio::test]
    async fn log_reporter_stops_when_publisher_drops() {
        let publisher = StatusPublisher::default();
        let handle = LogReporter::spawn(&publisher);
        publisher.emit(StatusEvent::Verified {
            tables: vec!["db.t".into()],
            failing: vec![],
        });
        drop(publisher);
        handle.await.unwrap();
    }
}

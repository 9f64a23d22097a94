use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use feed_core::{ConnectionState, DomainEvent, FeedError, StreamId};

use crate::consumers::ConsumerRegistry;

/// One committed state transition waiting for dispatch.
#[derive(Debug)]
struct StateChangeNotice {
    stream: StreamId,
    state: ConnectionState,
    message: String,
    error: Option<FeedError>,
}

/// Fire-and-forget submission handle held by every stream worker.
///
/// `publish` never blocks the signal handler that calls it; the notice is
/// queued for the single dispatcher task, which delivers notices across all
/// streams in the order they were received.
#[derive(Debug, Clone)]
pub(crate) struct StateChangePublisher {
    tx: mpsc::UnboundedSender<StateChangeNotice>,
}

impl StateChangePublisher {
    pub(crate) fn publish(
        &self,
        stream: StreamId,
        state: ConnectionState,
        message: String,
        error: Option<FeedError>,
    ) {
        let _ = self.tx.send(StateChangeNotice {
            stream,
            state,
            message,
            error,
        });
    }
}

/// The process-wide state-change dispatch task.
///
/// Runs until every publisher clone is dropped, then drains the queue, so a
/// shutdown never loses the trailing `Closed` notices.
pub(crate) struct StateChangeDispatcher {
    publisher: StateChangePublisher,
    task: JoinHandle<()>,
}

impl StateChangeDispatcher {
    pub(crate) fn spawn(registry: Arc<ConsumerRegistry>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StateChangeNotice>();

        let task = tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                debug!(
                    stream = %notice.stream,
                    state = ?notice.state,
                    message = %notice.message,
                    "connection state changed"
                );
                registry.dispatch(&DomainEvent::ConnectionStateChanged {
                    stream: notice.stream,
                    state: notice.state,
                    message: notice.message,
                    error: notice.error,
                });
            }
        });

        Self {
            publisher: StateChangePublisher { tx },
            task,
        }
    }

    pub(crate) fn publisher(&self) -> StateChangePublisher {
        self.publisher.clone()
    }

    /// Drop the last in-process publisher and wait for the queue to drain.
    pub(crate) async fn stop(self) {
        let Self { publisher, task } = self;
        drop(publisher);
        let _ = task.await;
    }
}

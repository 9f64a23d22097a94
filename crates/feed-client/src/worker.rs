use std::{future, sync::Arc, time::Instant};

use tokio::{
    sync::mpsc,
    time::{Instant as TokioInstant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use feed_core::{
    BackoffPolicy, ConnectionState, ErrorCategory, FeedError, StatsRecorder, StreamEndpoint,
    StreamStateMachine, decode_frame, now_wall_ms,
};
use feed_transport::{SignalSink, StreamHandle, StreamSignal, StreamTransport, TaggedSignal};

use crate::{consumers::ConsumerRegistry, dispatcher::StateChangePublisher};

/// Administrative commands delivered to one stream worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamCommand {
    Pause,
    Resume,
}

/// Owner of one logical stream's connection lifecycle.
///
/// All mutable per-stream state (generation and attempt counters, the state
/// machine, the active handle) is confined to this worker's task. Every
/// transport signal carries the generation of the connection that produced
/// it; signals from a superseded generation are dropped before they can
/// touch any state.
pub(crate) struct StreamWorker<T> {
    endpoint: StreamEndpoint,
    transport: Arc<T>,
    backoff: BackoffPolicy,
    registry: Arc<ConsumerRegistry>,
    publisher: StateChangePublisher,
    stats: Arc<StatsRecorder>,
    cancel: CancellationToken,

    machine: StreamStateMachine,
    generation: u64,
    attempts: u32,
    handle: Option<StreamHandle>,
    signal_tx: mpsc::UnboundedSender<TaggedSignal>,
    retry_at: Option<TokioInstant>,
}

impl<T: StreamTransport> StreamWorker<T> {
    pub(crate) fn new(
        endpoint: StreamEndpoint,
        transport: Arc<T>,
        backoff: BackoffPolicy,
        registry: Arc<ConsumerRegistry>,
        publisher: StateChangePublisher,
        stats: Arc<StatsRecorder>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        (
            Self {
                endpoint,
                transport,
                backoff,
                registry,
                publisher,
                stats,
                cancel,
                machine: StreamStateMachine::default(),
                generation: 0,
                attempts: 0,
                handle: None,
                signal_tx,
                retry_at: None,
            },
            signal_rx,
        )
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<StreamCommand>,
        mut signals: mpsc::UnboundedReceiver<TaggedSignal>,
    ) {
        let cancel = self.cancel.clone();
        self.start_connection("initial connection");

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.close("client shutdown");
                    break;
                }
                command = commands.recv() => match command {
                    Some(StreamCommand::Pause) => self.pause(),
                    Some(StreamCommand::Resume) => self.resume(),
                    None => {
                        self.close("client dropped");
                        break;
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal),
                _ = wait_until(retry_at), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.start_connection("retry attempt");
                }
            }
        }
    }

    fn handle_signal(&mut self, signal: TaggedSignal) {
        if signal.generation != self.generation {
            debug!(
                stream = %self.endpoint.id,
                signal_generation = signal.generation,
                current_generation = self.generation,
                "dropping stale signal from superseded connection"
            );
            return;
        }

        match signal.signal {
            StreamSignal::Opened => self.on_opened(),
            StreamSignal::Frame { name, payload } => self.on_frame(&name, &payload),
            StreamSignal::Closed => self.on_failure(FeedError::new(
                ErrorCategory::Network,
                "stream_ended",
                "server ended the stream",
            )),
            StreamSignal::Failed { error } => self.on_failure(error),
        }
    }

    fn on_opened(&mut self) {
        self.attempts = 0;
        self.apply(
            ConnectionState::Connected,
            "connection established".to_owned(),
            None,
        );
    }

    fn on_frame(&mut self, name: &str, payload: &[u8]) {
        // Frames are decoded and fanned out strictly in receipt order; a
        // frame that cannot be decoded is dropped without touching the
        // connection.
        match decode_frame(name, payload) {
            Ok(event) => self.registry.dispatch(&event),
            Err(err) => warn!(stream = %self.endpoint.id, %err, "dropping undecodable frame"),
        }
    }

    fn on_failure(&mut self, error: FeedError) {
        self.drop_handle();

        if self.machine.state() == ConnectionState::Connected {
            self.apply(
                ConnectionState::Disconnected,
                "connection lost".to_owned(),
                Some(error.clone()),
            );
        }

        if !self.backoff.is_retryable(error.category) {
            warn!(stream = %self.endpoint.id, %error, "non-retryable failure; parking stream");
            self.retry_at = None;
            self.apply(
                ConnectionState::Failed,
                "non-retryable failure; resume required".to_owned(),
                Some(error),
            );
            return;
        }

        self.attempts = self.attempts.saturating_add(1);
        self.apply(
            ConnectionState::Retrying,
            format!(
                "failure {} of {} tolerated",
                self.attempts,
                self.backoff.max_attempts()
            ),
            Some(error.clone()),
        );

        if self.attempts >= self.backoff.max_attempts() {
            warn!(
                stream = %self.endpoint.id,
                attempts = self.attempts,
                "retry attempts exhausted; parking stream"
            );
            self.retry_at = None;
            self.apply(
                ConnectionState::Failed,
                "retry attempts exhausted; resume required".to_owned(),
                Some(error),
            );
        } else {
            let delay = self.backoff.delay_for_attempt(self.attempts - 1);
            debug!(stream = %self.endpoint.id, delay_ms = delay.as_millis() as u64, "retry scheduled");
            self.retry_at = Some(TokioInstant::now() + delay);
        }
    }

    /// Replace the active connection: retire the superseded handle, then
    /// open anew under the advanced generation.
    fn start_connection(&mut self, context: &str) {
        self.drop_handle();
        self.apply(ConnectionState::Connecting, context.to_owned(), None);

        let sink = SignalSink::new(self.generation, self.signal_tx.clone());
        self.handle = Some(self.transport.open(&self.endpoint, sink));
    }

    fn pause(&mut self) {
        if matches!(
            self.machine.state(),
            ConnectionState::Suspended | ConnectionState::Closed
        ) {
            debug!(stream = %self.endpoint.id, "ignoring pause; stream is not active");
            return;
        }
        self.drop_handle();
        self.retry_at = None;
        self.apply(
            ConnectionState::Suspended,
            "paused by operator".to_owned(),
            None,
        );
    }

    fn resume(&mut self) {
        match self.machine.state() {
            ConnectionState::Suspended | ConnectionState::Failed => {
                self.attempts = 0;
                self.start_connection("resumed by operator");
            }
            state => {
                debug!(stream = %self.endpoint.id, ?state, "ignoring resume; stream is not parked");
            }
        }
    }

    fn close(&mut self, context: &str) {
        self.drop_handle();
        self.retry_at = None;
        if self.machine.state() != ConnectionState::Closed {
            self.apply(ConnectionState::Closed, context.to_owned(), None);
        }
        info!(stream = %self.endpoint.id, "stream worker stopped");
    }

    /// Cancel the active handle and advance the generation, so any signal
    /// the retired connection already queued is discarded instead of
    /// re-arming a parked stream.
    fn drop_handle(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }

    /// Commit one transition: validate the edge, update the statistics
    /// store, and queue the notice for the process-wide dispatcher.
    fn apply(&mut self, next: ConnectionState, message: String, error: Option<FeedError>) {
        match self.machine.transition(next) {
            Ok(state) => {
                self.stats.update(state, Instant::now(), now_wall_ms());
                self.publisher
                    .publish(self.endpoint.id.clone(), state, message, error);
            }
            Err(err) => {
                warn!(stream = %self.endpoint.id, %err, "rejected state transition");
            }
        }
    }
}

async fn wait_until(at: Option<TokioInstant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

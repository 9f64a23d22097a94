use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use feed_core::{
    ConnectionStats, DomainEvent, ErrorCategory, EventKind, FeedError, HealthRecorder,
    HealthStatus, StatsRecorder, StreamId,
};
use feed_transport::{HealthProbe, StreamTransport};

use crate::{
    config::{ConfigError, FeedConfig},
    consumers::{ConsumerId, ConsumerRegistry},
    dispatcher::StateChangeDispatcher,
    prober::HealthProber,
    worker::{StreamCommand, StreamWorker},
};

struct StreamEntry {
    commands: mpsc::UnboundedSender<StreamCommand>,
    stats: Arc<StatsRecorder>,
    cancel: CancellationToken,
}

struct RunningTasks {
    workers: Vec<JoinHandle<()>>,
    prober_cancel: CancellationToken,
    prober: JoinHandle<()>,
    dispatcher: StateChangeDispatcher,
}

/// Facade over the stream workers, the state-change dispatcher, and the
/// active health prober.
///
/// Built by [`FeedClient::start`], which spawns every task; the spawned
/// tasks own the transport and probe capabilities, so the client itself
/// stays non-generic. Dropping the client without calling
/// [`FeedClient::shutdown`] cancels the workers through their tokens but
/// does not wait for them.
pub struct FeedClient {
    registry: Arc<ConsumerRegistry>,
    health: Arc<HealthRecorder>,
    streams: HashMap<StreamId, StreamEntry>,
    running: Mutex<Option<RunningTasks>>,
}

impl FeedClient {
    /// Validate `config`, then spawn one worker per stream, the dispatcher,
    /// and the prober. Initial connection attempts begin immediately and
    /// initial-open failures retry exactly like steady-state failures.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<T, P>(config: FeedConfig, transport: T, probe: P) -> Result<Self, ConfigError>
    where
        T: StreamTransport,
        P: HealthProbe,
    {
        config.validate()?;

        let registry = Arc::new(ConsumerRegistry::new());
        let dispatcher = StateChangeDispatcher::spawn(registry.clone());
        let transport = Arc::new(transport);

        let mut streams = HashMap::new();
        let mut workers = Vec::new();
        for endpoint in &config.streams {
            let stats = Arc::new(StatsRecorder::new(Instant::now()));
            let cancel = CancellationToken::new();
            let (command_tx, command_rx) = mpsc::unbounded_channel();

            let (worker, signal_rx) = StreamWorker::new(
                endpoint.clone(),
                transport.clone(),
                config.stream_backoff,
                registry.clone(),
                dispatcher.publisher(),
                stats.clone(),
                cancel.clone(),
            );
            workers.push(tokio::spawn(worker.run(command_rx, signal_rx)));

            streams.insert(
                endpoint.id.clone(),
                StreamEntry {
                    commands: command_tx,
                    stats,
                    cancel,
                },
            );
        }

        let health = Arc::new(HealthRecorder::new());
        let prober_cancel = CancellationToken::new();
        let prober = HealthProber::new(
            Arc::new(probe),
            config.probe.target.clone(),
            config.probe.backoff,
            health.clone(),
            prober_cancel.clone(),
        );
        let prober_task = tokio::spawn(prober.run(config.probe.period));

        info!(streams = streams.len(), "feed client started");

        Ok(Self {
            registry,
            health,
            streams,
            running: Mutex::new(Some(RunningTasks {
                workers,
                prober_cancel,
                prober: prober_task,
                dispatcher,
            })),
        })
    }

    /// Register a consumer for one event kind; delivery is synchronous and
    /// in registration order.
    pub fn register_consumer<F>(&self, kind: EventKind, consumer: F) -> ConsumerId
    where
        F: Fn(&DomainEvent) -> Result<(), FeedError> + Send + Sync + 'static,
    {
        self.registry.register(kind, consumer)
    }

    /// Remove a consumer registration. Returns whether one was removed.
    pub fn unregister_consumer(&self, kind: EventKind, id: ConsumerId) -> bool {
        self.registry.unregister(kind, id)
    }

    /// Telemetry snapshot for one stream.
    pub fn connection_stats(&self, stream: &StreamId) -> Option<ConnectionStats> {
        self.streams.get(stream).map(|entry| entry.stats.snapshot())
    }

    /// Telemetry snapshots for every configured stream.
    pub fn all_connection_stats(&self) -> HashMap<StreamId, ConnectionStats> {
        self.streams
            .iter()
            .map(|(id, entry)| (id.clone(), entry.stats.snapshot()))
            .collect()
    }

    /// Snapshot of the active health prober's status.
    pub fn health_status(&self) -> HealthStatus {
        self.health.snapshot()
    }

    /// Suspend one stream: its connection is cancelled and no retries run
    /// until [`FeedClient::resume`].
    pub fn pause(&self, stream: &StreamId) -> Result<(), FeedError> {
        self.send_command(stream, StreamCommand::Pause)
    }

    /// Re-arm a suspended or failed stream with a fresh connection attempt
    /// and a zeroed retry counter. Streams never leave `Failed` without
    /// this call.
    pub fn resume(&self, stream: &StreamId) -> Result<(), FeedError> {
        self.send_command(stream, StreamCommand::Resume)
    }

    /// Cancel every connection, stop the workers, the prober, and the
    /// dispatcher. Idempotent: a second call is a no-op. The dispatcher
    /// drains queued notices before stopping, so subscribers observe the
    /// final `Closed` transitions.
    pub async fn shutdown(&self) {
        let running = { self.running.lock().await.take() };
        let Some(running) = running else {
            return;
        };

        for entry in self.streams.values() {
            entry.cancel.cancel();
        }
        for worker in running.workers {
            let _ = worker.await;
        }

        running.prober_cancel.cancel();
        let _ = running.prober.await;

        running.dispatcher.stop().await;
        info!("feed client stopped");
    }

    fn send_command(&self, stream: &StreamId, command: StreamCommand) -> Result<(), FeedError> {
        let entry = self.streams.get(stream).ok_or_else(|| {
            FeedError::new(
                ErrorCategory::Config,
                "unknown_stream",
                format!("no stream is configured with id '{stream}'"),
            )
        })?;
        entry.commands.send(command).map_err(|_| {
            FeedError::new(
                ErrorCategory::Internal,
                "stream_stopped",
                format!("stream '{stream}' is no longer running"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Mutex as StdMutex, PoisonError},
        time::Duration,
    };

    use tokio::time::{sleep, timeout};

    use feed_core::{BackoffPolicy, ConnectionState, StreamEndpoint};
    use feed_transport::{
        ProbeTarget, SignalSink, StreamHandle,
        scripted::{ConnectionScript, ScriptedProbe, ScriptedTransport},
    };

    use crate::config::ProbeConfig;

    use super::*;

    fn config_for(streams: Vec<StreamEndpoint>, backoff: BackoffPolicy) -> FeedConfig {
        FeedConfig::new(
            streams,
            ProbeConfig::new(ProbeTarget::new("sync-server", "/health"))
                .with_period(Duration::from_secs(60)),
        )
        .with_stream_backoff(backoff)
    }

    fn permissions_endpoint() -> StreamEndpoint {
        StreamEndpoint::new("permissions", "/events/permissions")
    }

    /// Collects the state sequence observed for one stream.
    fn track_states(client: &FeedClient, stream: &str) -> Arc<StdMutex<Vec<ConnectionState>>> {
        let states = Arc::new(StdMutex::new(Vec::new()));
        let sink = states.clone();
        let stream = StreamId::from(stream);
        client.register_consumer(EventKind::ConnectionStateChanged, move |event| {
            if let DomainEvent::ConnectionStateChanged {
                stream: event_stream,
                state,
                ..
            } = event
                && *event_stream == stream
            {
                sink.lock().unwrap_or_else(PoisonError::into_inner).push(*state);
            }
            Ok(())
        });
        states
    }

    fn observed(states: &Arc<StdMutex<Vec<ConnectionState>>>) -> Vec<ConnectionState> {
        states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(10), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_observes_connecting_then_connected() {
        let transport = ScriptedTransport::new();
        transport.push_script("permissions", ConnectionScript::new().open());

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], BackoffPolicy::default()),
            transport,
            ScriptedProbe::new(),
        )
        .expect("client start");
        let states = track_states(&client, "permissions");

        wait_for(|| observed(&states).contains(&ConnectionState::Connected)).await;
        assert_eq!(
            observed(&states),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );

        let stats = client
            .connection_stats(&StreamId::from("permissions"))
            .expect("configured stream");
        assert_eq!(stats.state, ConnectionState::Connected);
        assert_eq!(stats.retry_count, 0);
        assert!(stats.last_success_ms.is_some());

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_under_fixed_policy_end_in_failed() {
        // No scripts queued: every open fails immediately with a retryable
        // network error.
        let transport = ScriptedTransport::new();
        let policy = BackoffPolicy::fixed(Duration::from_millis(100), 3);

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], policy),
            transport.clone(),
            ScriptedProbe::new(),
        )
        .expect("client start");
        let states = track_states(&client, "permissions");

        wait_for(|| observed(&states).contains(&ConnectionState::Failed)).await;
        assert_eq!(
            observed(&states),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Retrying,
                ConnectionState::Connecting,
                ConnectionState::Retrying,
                ConnectionState::Connecting,
                ConnectionState::Retrying,
                ConnectionState::Failed,
            ]
        );

        // Parked: no further attempt without an explicit resume.
        sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.open_count(&StreamId::from("permissions")), 3);
        let stats = client
            .connection_stats(&StreamId::from("permissions"))
            .expect("configured stream");
        assert_eq!(stats.state, ConnectionState::Failed);
        assert_eq!(stats.retry_count, 3);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_rearms_a_failed_stream() {
        let transport = ScriptedTransport::new();
        let policy = BackoffPolicy::fixed(Duration::from_millis(10), 2);
        let id = StreamId::from("permissions");

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], policy),
            transport.clone(),
            ScriptedProbe::new(),
        )
        .expect("client start");

        wait_for(|| {
            client.connection_stats(&id).expect("stream").state == ConnectionState::Failed
        })
        .await;

        transport.push_script("permissions", ConnectionScript::new().open());
        client.resume(&id).expect("resume");

        wait_for(|| {
            client.connection_stats(&id).expect("stream").state == ConnectionState::Connected
        })
        .await;
        let stats = client.connection_stats(&id).expect("stream");
        assert_eq!(stats.retry_count, 0);
        assert_eq!(transport.open_count(&id), 3);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suspends_and_resume_reconnects() {
        let transport = ScriptedTransport::new();
        transport.push_script("permissions", ConnectionScript::new().open());
        let id = StreamId::from("permissions");

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], BackoffPolicy::default()),
            transport.clone(),
            ScriptedProbe::new(),
        )
        .expect("client start");

        wait_for(|| {
            client.connection_stats(&id).expect("stream").state == ConnectionState::Connected
        })
        .await;

        client.pause(&id).expect("pause");
        wait_for(|| {
            client.connection_stats(&id).expect("stream").state == ConnectionState::Suspended
        })
        .await;
        assert_eq!(transport.open_count(&id), 1);

        transport.push_script("permissions", ConnectionScript::new().open());
        client.resume(&id).expect("resume");
        wait_for(|| {
            client.connection_stats(&id).expect("stream").state == ConnectionState::Connected
        })
        .await;
        assert_eq!(transport.open_count(&id), 2);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_frame_is_dropped_without_state_change() {
        let transport = ScriptedTransport::new();
        transport.push_script(
            "permissions",
            ConnectionScript::new()
                .open()
                .frame("mystery_event", br#"{"anything":true}"#.to_vec())
                .frame("log_broadcast", br#"{"message":"still alive"}"#.to_vec()),
        );

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], BackoffPolicy::default()),
            transport,
            ScriptedProbe::new(),
        )
        .expect("client start");
        let states = track_states(&client, "permissions");

        let broadcasts = Arc::new(StdMutex::new(Vec::new()));
        let sink = broadcasts.clone();
        client.register_consumer(EventKind::LogBroadcast, move |event| {
            if let DomainEvent::LogBroadcast { message } = event {
                sink.lock().expect("lock").push(message.clone());
            }
            Ok(())
        });

        wait_for(|| !broadcasts.lock().expect("lock").is_empty()).await;
        assert_eq!(
            *broadcasts.lock().expect("lock"),
            vec!["still alive".to_owned()]
        );
        // The unknown frame produced no event and no transition.
        assert_eq!(
            observed(&states),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn erroring_consumer_never_starves_a_later_consumer() {
        let transport = ScriptedTransport::new();
        transport.push_script(
            "permissions",
            ConnectionScript::new()
                .open()
                .frame("log_broadcast", br#"{"message":"one"}"#.to_vec())
                .frame("log_broadcast", br#"{"message":"two"}"#.to_vec()),
        );

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], BackoffPolicy::default()),
            transport,
            ScriptedProbe::new(),
        )
        .expect("client start");

        client.register_consumer(EventKind::LogBroadcast, |_| {
            Err(FeedError::new(
                ErrorCategory::Consumer,
                "boom",
                "always fails",
            ))
        });
        let received = Arc::new(StdMutex::new(Vec::new()));
        let sink = received.clone();
        client.register_consumer(EventKind::LogBroadcast, move |event| {
            if let DomainEvent::LogBroadcast { message } = event {
                sink.lock().expect("lock").push(message.clone());
            }
            Ok(())
        });

        wait_for(|| received.lock().expect("lock").len() == 2).await;
        assert_eq!(
            *received.lock().expect("lock"),
            vec!["one".to_owned(), "two".to_owned()]
        );

        client.shutdown().await;
    }

    /// Transport that keeps every sink it was handed, so tests can replay
    /// signals from superseded generations.
    #[derive(Clone, Default)]
    struct CaptureTransport {
        sinks: Arc<StdMutex<Vec<SignalSink>>>,
    }

    impl CaptureTransport {
        fn sink(&self, index: usize) -> SignalSink {
            self.sinks.lock().expect("lock")[index].clone()
        }

        fn open_count(&self) -> usize {
            self.sinks.lock().expect("lock").len()
        }
    }

    impl StreamTransport for CaptureTransport {
        fn open(&self, _endpoint: &StreamEndpoint, sink: SignalSink) -> StreamHandle {
            sink.opened();
            self.sinks.lock().expect("lock").push(sink);
            StreamHandle::new(CancellationToken::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_signals_are_ignored() {
        let transport = CaptureTransport::default();
        let id = StreamId::from("permissions");

        let client = FeedClient::start(
            config_for(
                vec![permissions_endpoint()],
                BackoffPolicy::fixed(Duration::from_millis(10), 5),
            ),
            transport.clone(),
            ScriptedProbe::new(),
        )
        .expect("client start");
        let states = track_states(&client, "permissions");

        wait_for(|| {
            client.connection_stats(&id).expect("stream").state == ConnectionState::Connected
        })
        .await;

        // A current-generation failure drives one real reconnect.
        let first_generation = transport.sink(0);
        first_generation.failed(FeedError::new(
            ErrorCategory::Network,
            "socket_reset",
            "connection reset",
        ));
        wait_for(|| transport.open_count() == 2).await;
        wait_for(|| {
            client.connection_stats(&id).expect("stream").state == ConnectionState::Connected
        })
        .await;
        let settled = observed(&states);

        // Replaying signals from the superseded connection changes nothing.
        first_generation.failed(FeedError::new(
            ErrorCategory::Network,
            "socket_reset",
            "stale reset",
        ));
        first_generation.opened();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(observed(&states), settled);
        let stats = client.connection_stats(&id).expect("stream");
        assert_eq!(stats.state, ConnectionState::Connected);
        assert_eq!(stats.retry_count, 0);
        assert_eq!(transport.open_count(), 2);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent_and_publishes_closed() {
        let transport = ScriptedTransport::new();
        transport.push_script("permissions", ConnectionScript::new().open());

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], BackoffPolicy::default()),
            transport,
            ScriptedProbe::new(),
        )
        .expect("client start");
        let states = track_states(&client, "permissions");

        wait_for(|| observed(&states).contains(&ConnectionState::Connected)).await;

        client.shutdown().await;
        client.shutdown().await;

        assert_eq!(observed(&states).last(), Some(&ConnectionState::Closed));
        let stats = client
            .connection_stats(&StreamId::from("permissions"))
            .expect("stats remain readable after shutdown");
        assert_eq!(stats.state, ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn admin_calls_reject_unknown_streams() {
        let transport = ScriptedTransport::new();
        transport.push_script("permissions", ConnectionScript::new().open());

        let client = FeedClient::start(
            config_for(vec![permissions_endpoint()], BackoffPolicy::default()),
            transport,
            ScriptedProbe::new(),
        )
        .expect("client start");

        let err = client
            .pause(&StreamId::from("nonexistent"))
            .expect_err("unknown stream must be rejected");
        assert_eq!(err.code, "unknown_stream");

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn streams_fail_independently() {
        let transport = ScriptedTransport::new();
        transport.push_script("groups", ConnectionScript::new().open());
        // "users" has no script and exhausts its retries.
        let policy = BackoffPolicy::fixed(Duration::from_millis(10), 2);

        let client = FeedClient::start(
            config_for(
                vec![
                    StreamEndpoint::new("groups", "/events/groups"),
                    StreamEndpoint::new("users", "/events/users"),
                ],
                policy,
            ),
            transport,
            ScriptedProbe::new(),
        )
        .expect("client start");

        wait_for(|| {
            client
                .connection_stats(&StreamId::from("users"))
                .expect("stream")
                .state
                == ConnectionState::Failed
        })
        .await;

        let all = client.all_connection_stats();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all[&StreamId::from("groups")].state,
            ConnectionState::Connected
        );
        assert_eq!(all[&StreamId::from("users")].state, ConnectionState::Failed);

        client.shutdown().await;
    }
}

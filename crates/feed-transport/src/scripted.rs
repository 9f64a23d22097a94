use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use feed_core::{ErrorCategory, FeedError, StreamEndpoint, StreamId};

use crate::{HealthProbe, ProbeReport, ProbeTarget, SignalSink, StreamHandle, StreamTransport};

/// One scripted action replayed by a scripted connection.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Report a successful open.
    Open,
    /// Deliver one named frame with a JSON payload.
    Frame { name: String, payload: Vec<u8> },
    /// Wait before the next step.
    Delay(Duration),
    /// Fail the connection and stop the script.
    Fail { error: FeedError },
    /// End the stream cleanly and stop the script.
    Close,
}

/// Deterministic replay script for one connection attempt.
///
/// A script that ends without `Fail`/`Close` leaves the connection open and
/// idle until it is cancelled.
#[derive(Debug, Clone, Default)]
pub struct ConnectionScript {
    steps: Vec<ScriptStep>,
}

impl ConnectionScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(mut self) -> Self {
        self.steps.push(ScriptStep::Open);
        self
    }

    pub fn frame(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.steps.push(ScriptStep::Frame {
            name: name.into(),
            payload: payload.into(),
        });
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.steps.push(ScriptStep::Delay(delay));
        self
    }

    pub fn fail(mut self, category: ErrorCategory, code: &str, message: &str) -> Self {
        self.steps.push(ScriptStep::Fail {
            error: FeedError::new(category, code, message),
        });
        self
    }

    pub fn close(mut self) -> Self {
        self.steps.push(ScriptStep::Close);
        self
    }
}

/// In-memory streaming transport replaying per-endpoint scripts.
///
/// Each `open` for a stream consumes the next queued script for that stream;
/// when the queue is empty the connection fails immediately, which keeps
/// reconnect tests deterministic.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<HashMap<StreamId, VecDeque<ConnectionScript>>>>,
    open_count: Arc<Mutex<HashMap<StreamId, u64>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script consumed by the next `open` for `id`.
    pub fn push_script(&self, id: impl Into<StreamId>, script: ConnectionScript) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.into())
            .or_default()
            .push_back(script);
    }

    /// How many times `open` has been called for `id`.
    pub fn open_count(&self, id: &StreamId) -> u64 {
        self.open_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }
}

impl StreamTransport for ScriptedTransport {
    fn open(&self, endpoint: &StreamEndpoint, sink: SignalSink) -> StreamHandle {
        *self
            .open_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint.id.clone())
            .or_insert(0) += 1;

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&endpoint.id)
            .and_then(VecDeque::pop_front);

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            replay(script, sink, cancel).await;
        });

        StreamHandle::new(token)
    }
}

async fn replay(script: Option<ConnectionScript>, sink: SignalSink, cancel: CancellationToken) {
    let Some(script) = script else {
        sink.failed(FeedError::new(
            ErrorCategory::Network,
            "script_exhausted",
            "no scripted connection is queued for this stream",
        ));
        return;
    };

    for step in script.steps {
        if cancel.is_cancelled() {
            return;
        }
        match step {
            ScriptStep::Open => sink.opened(),
            ScriptStep::Frame { name, payload } => sink.frame(name, payload),
            ScriptStep::Delay(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(delay) => {}
                }
            }
            ScriptStep::Fail { error } => {
                sink.failed(error);
                return;
            }
            ScriptStep::Close => {
                sink.closed();
                return;
            }
        }
    }

    // Script exhausted with the connection still up: stay open until the
    // worker releases the handle.
    cancel.cancelled().await;
}

/// In-memory health probe replaying queued reports.
///
/// When the queue is empty the probe reports healthy, so tests only script
/// the cycles they care about.
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    reports: Arc<Mutex<VecDeque<ProbeReport>>>,
    calls: Arc<AtomicU64>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the report returned by the next probe call.
    pub fn push_report(&self, report: ProbeReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(report);
    }

    /// Total probe calls made so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthProbe for ScriptedProbe {
    fn probe(&self, _target: &ProbeTarget) -> impl Future<Output = ProbeReport> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let report = self
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| ProbeReport::healthy(1));
        async move { report }
    }
}

//! Streaming test sessions.
//!
//! A session runs two tasks: a producer that paces and sends requests one at a
//! time, and a coordinator that batches the outcomes into progress events.
//! They talk over a bounded channel, so a slow consumer eventually stalls the
//! producer. Every session ends with exactly one terminal event: `complete`,
//! `cancelled` or `error`.

use chrono::{DateTime, Utc};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::executor::execute;
use crate::models::{EventKind, ProgressUpdate, RequestOutcome, TestConfig, TestResult};
use crate::pacing::{Pacer, interval_ms};
use crate::payloads::PayloadPools;
use crate::stats::{build_final_result, running_stats};
use crate::telemetry::SessionMetrics;
use crate::transport::{Transport, TransportError};

/// Outcomes buffered between the producer and the coordinator
pub const RESULT_CHANNEL_CAPACITY: usize = 100;

/// Progress events buffered for the consumer
pub const EVENT_CHANNEL_CAPACITY: usize = 10;

/// Minimum spacing of progress events while a test runs
pub const BATCH_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("test not found or already completed: {0}")]
    NotFound(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("test cancelled after {completed} of {total} requests")]
    Cancelled { completed: usize, total: usize },
    #[error("test failed: {0}")]
    Failed(String),
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Completed,
    Cancelled,
    Errored,
    /// The consumer dropped the event stream
    Abandoned,
}

/// A registered, running session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub test_id: String,
    pub config: Arc<TestConfig>,
    pub started_at: DateTime<Utc>,
}

struct SessionEntry {
    info: SessionInfo,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    next_seq: AtomicU64,
}

/// Process-wide registry of running sessions, keyed by test id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("test_{}_{}", Utc::now().timestamp(), seq)
    }

    async fn unregister(&self, test_id: &str) {
        self.inner.sessions.write().await.remove(test_id);
    }

    pub async fn get(&self, test_id: &str) -> Option<SessionInfo> {
        self.inner
            .sessions
            .read()
            .await
            .get(test_id)
            .map(|entry| entry.info.clone())
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        self.inner.sessions.read().await.keys().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.read().await.is_empty()
    }

    /// Ask a running session to stop.
    ///
    /// Takes effect at the session's next check point; a request already in
    /// flight is allowed to finish.
    pub async fn cancel_session(&self, test_id: &str) -> Result<(), SessionError> {
        let sessions = self.inner.sessions.read().await;
        let entry = sessions
            .get(test_id)
            .ok_or_else(|| SessionError::NotFound(test_id.to_string()))?;
        entry.cancel.cancel();
        info!(event = "session_cancel_requested", test_id, "Cancellation requested");
        Ok(())
    }

    /// Validate `config`, register a session and start it.
    ///
    /// The returned stream yields an initial zero-progress event, batched
    /// progress events, and finally one terminal event.
    pub async fn start_streaming_session<T: Transport>(
        &self,
        config: TestConfig,
        transport: Arc<T>,
        pools: Arc<PayloadPools>,
    ) -> Result<ProgressStream, SessionError> {
        let config = Arc::new(config.validate()?);
        let test_id = self.next_id();
        let started_at = Utc::now();
        let cancel = CancellationToken::new();
        let total = config.total_requests as usize;

        self.inner.sessions.write().await.insert(
            test_id.clone(),
            SessionEntry {
                info: SessionInfo {
                    test_id: test_id.clone(),
                    config: config.clone(),
                    started_at,
                },
                cancel: cancel.clone(),
            },
        );

        info!(
            event = "session_started",
            test_id = test_id.as_str(),
            target = config.target_url.as_str(),
            total_requests = total,
            duration_secs = config.duration,
            traffic_type = %config.traffic_type,
            test_mode = %config.test_mode,
            interval_ms = interval_ms(&config),
            "Starting test session"
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        // Fresh channel with spare capacity, cannot fail.
        let _ = events_tx.try_send(ProgressUpdate::new(EventKind::Progress, &test_id, 0, total));

        let coordinator = Coordinator {
            test_id: test_id.clone(),
            config,
            transport,
            pools,
            cancel,
            events: events_tx,
            registry: self.clone(),
            started_at,
        };
        tokio::spawn(coordinator.run());

        Ok(ProgressStream {
            test_id,
            events: events_rx,
        })
    }
}

/// Ordered progress events of one session.
///
/// Dropping the stream cancels the session.
#[derive(Debug)]
pub struct ProgressStream {
    test_id: String,
    events: mpsc::Receiver<ProgressUpdate>,
}

impl ProgressStream {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Next event, `None` once the terminal event has been consumed
    pub async fn next_event(&mut self) -> Option<ProgressUpdate> {
        self.events.recv().await
    }
}

impl Stream for ProgressStream {
    type Item = ProgressUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

struct Coordinator<T> {
    test_id: String,
    config: Arc<TestConfig>,
    transport: Arc<T>,
    pools: Arc<PayloadPools>,
    cancel: CancellationToken,
    events: mpsc::Sender<ProgressUpdate>,
    registry: SessionRegistry,
    started_at: DateTime<Utc>,
}

impl<T: Transport> Coordinator<T> {
    async fn run(self) {
        let state = self.drive().await;
        self.registry.unregister(&self.test_id).await;
        debug!(test_id = self.test_id.as_str(), ?state, "Session closed");
    }

    async fn drive(&self) -> SessionState {
        let total = self.config.total_requests as usize;
        let clock = Instant::now();
        let (results_tx, mut results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let mut producer: JoinHandle<()> = tokio::spawn(produce(
            self.config.clone(),
            self.transport.clone(),
            self.pools.clone(),
            results_tx,
            self.cancel.clone(),
        ));

        let metrics = SessionMetrics::new(&self.test_id);
        let mut outcomes: Vec<RequestOutcome> = Vec::with_capacity(total);
        let mut batch: Vec<RequestOutcome> = Vec::new();
        let mut last_emit = Instant::now();

        while outcomes.len() < total {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(outcomes.len()).await,
                _ = self.events.closed() => return self.abandon(),
                received = results_rx.recv() => received,
            };

            let Some(outcome) = received else {
                if self.cancel.is_cancelled() {
                    return self.cancelled(outcomes.len()).await;
                }
                let reason = match producer.await {
                    Err(e) if e.is_panic() => "request pipeline panicked".to_string(),
                    _ => format!(
                        "request pipeline stopped after {} of {} requests",
                        outcomes.len(),
                        total
                    ),
                };
                return self.failed(outcomes.len(), reason).await;
            };

            metrics.record(&outcome);
            outcomes.push(outcome.clone());
            batch.push(outcome);

            let complete = outcomes.len() >= total;
            if complete || last_emit.elapsed() >= BATCH_WINDOW {
                let mut update =
                    ProgressUpdate::new(EventKind::Progress, &self.test_id, outcomes.len(), total);
                update.new_requests = Some(std::mem::take(&mut batch));
                update.current_stats = Some(running_stats(&outcomes));
                if !self.emit(update).await {
                    return self.abandon();
                }
                last_emit = Instant::now();
            }
        }

        // Burst mode idles here until the configured duration has passed.
        let joined = tokio::select! {
            joined = &mut producer => joined,
            _ = self.events.closed() => return self.abandon(),
        };
        if let Err(e) = joined {
            if e.is_panic() {
                return self.failed(outcomes.len(), "request pipeline panicked".to_string()).await;
            }
        }

        let result = build_final_result(&self.test_id, outcomes, self.started_at, clock.elapsed());
        info!(
            event = "session_completed",
            test_id = self.test_id.as_str(),
            total_requests = result.total_requests,
            success_requests = result.success_count,
            error_requests = result.error_count,
            blocked_requests = result.blocked_count,
            rate_limit_at = result.rate_limit_at,
            duration_secs = result.duration,
            "Test session completed"
        );

        let mut update = ProgressUpdate::new(EventKind::Complete, &self.test_id, total, total);
        update.final_result = Some(Box::new(result));
        self.emit(update).await;
        SessionState::Completed
    }

    /// Send an event; `false` means the consumer is gone
    async fn emit(&self, update: ProgressUpdate) -> bool {
        self.events.send(update).await.is_ok()
    }

    fn abandon(&self) -> SessionState {
        warn!(
            event = "session_abandoned",
            test_id = self.test_id.as_str(),
            "Progress stream dropped, stopping test"
        );
        self.cancel.cancel();
        SessionState::Abandoned
    }

    async fn cancelled(&self, completed: usize) -> SessionState {
        let total = self.config.total_requests as usize;
        info!(
            event = "session_cancelled",
            test_id = self.test_id.as_str(),
            completed,
            total,
            "Test session cancelled"
        );
        let update = ProgressUpdate::new(EventKind::Cancelled, &self.test_id, completed, total);
        self.emit(update).await;
        SessionState::Cancelled
    }

    async fn failed(&self, completed: usize, reason: String) -> SessionState {
        let total = self.config.total_requests as usize;
        error!(
            event = "session_failed",
            test_id = self.test_id.as_str(),
            completed,
            error = reason.as_str(),
            "Test session failed"
        );
        self.cancel.cancel();
        let mut update = ProgressUpdate::new(EventKind::Error, &self.test_id, completed, total);
        update.error = Some(reason);
        self.emit(update).await;
        SessionState::Errored
    }
}

/// Send every configured request in order, pacing between them.
///
/// Stops at the first cancellation check point that trips.
async fn produce<T: Transport>(
    config: Arc<TestConfig>,
    transport: Arc<T>,
    pools: Arc<PayloadPools>,
    results: mpsc::Sender<RequestOutcome>,
    cancel: CancellationToken,
) {
    let pacer = Pacer::new(&config);
    let total = config.total_requests;

    for id in 1..=total {
        if cancel.is_cancelled() {
            return;
        }

        let outcome = execute(id, &config, transport.as_ref(), &pools).await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = results.send(outcome) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        if id < total && !pacer.wait(&cancel).await {
            return;
        }
    }

    pacer.finish(&cancel).await;
}

/// Run a test to completion and return its final result.
///
/// Uses the same pipeline as a streaming session; progress events are
/// discarded.
pub async fn run_test<T: Transport>(
    config: TestConfig,
    transport: Arc<T>,
    pools: Arc<PayloadPools>,
) -> Result<TestResult, SessionError> {
    let registry = SessionRegistry::new();
    let mut stream = registry
        .start_streaming_session(config, transport, pools)
        .await?;

    while let Some(update) = stream.next_event().await {
        match update.kind {
            EventKind::Progress => continue,
            EventKind::Complete => {
                return update.final_result.map(|result| *result).ok_or_else(|| {
                    SessionError::Failed("complete event without a result".to_string())
                });
            }
            EventKind::Cancelled => {
                return Err(SessionError::Cancelled {
                    completed: update.completed,
                    total: update.total,
                });
            }
            EventKind::Error => {
                return Err(SessionError::Failed(update.error.unwrap_or_default()));
            }
        }
    }

    Err(SessionError::Failed(
        "event stream closed without a terminal event".to_string(),
    ))
}

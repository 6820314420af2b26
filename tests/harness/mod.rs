//! Scripted transport shared by the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use waftester::transport::{OutboundRequest, Transport, TransportError, TransportResponse};
use waftester::{EventKind, ProgressStream, ProgressUpdate};

/// Answers requests from a list of statuses and records when each was sent.
///
/// Status `0` simulates a connection failure. Once the list runs out the last
/// status repeats.
pub struct ScriptedTransport {
    statuses: Vec<u16>,
    latency: Duration,
    sent: Mutex<Vec<(Instant, OutboundRequest)>>,
}

impl ScriptedTransport {
    pub fn ok() -> Self {
        Self::with_statuses(vec![200])
    }

    pub fn with_statuses(statuses: Vec<u16>) -> Self {
        Self {
            statuses,
            latency: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn dispatch_times(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let status = {
            let mut sent = self.sent.lock().unwrap();
            sent.push((Instant::now(), request));
            let index = (sent.len() - 1).min(self.statuses.len().saturating_sub(1));
            self.statuses.get(index).copied().unwrap_or(200)
        };

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        if status == 0 {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        Ok(TransportResponse {
            status,
            headers,
            received_at: Instant::now(),
            body: Ok(Bytes::from(format!("status {}", status))),
        })
    }
}

/// Drain a stream up to and including its terminal event
pub async fn collect(stream: &mut ProgressStream) -> Vec<ProgressUpdate> {
    let mut events = Vec::new();
    while let Some(update) = stream.next_event().await {
        let terminal = update.kind.is_terminal();
        events.push(update);
        if terminal {
            break;
        }
    }
    events
}

pub fn terminal_count(events: &[ProgressUpdate]) -> usize {
    events.iter().filter(|e| e.kind != EventKind::Progress).count()
}

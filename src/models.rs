use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{empty_as_default, empty_as_none};

/// What kind of traffic a test sends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficType {
    /// Plain requests against the target
    #[default]
    Normal,
    /// Requests carrying injection payloads
    Attack,
}

/// How requests are spread over the configured duration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Evenly spaced over the whole duration
    #[default]
    Baseline,
    /// Packed into the first half of the duration
    Burst,
}

/// Which user-agent pool to draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAgentType {
    /// Real browser signatures
    Legitimate,
    /// Security scanner signatures that WAFs commonly block
    Scanner,
}

impl fmt::Display for TrafficType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Attack => write!(f, "attack"),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Burst => write!(f, "burst"),
        }
    }
}

impl fmt::Display for UserAgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legitimate => write!(f, "legitimate"),
            Self::Scanner => write!(f, "scanner"),
        }
    }
}

/// Configuration of a single test run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// The URL under test
    pub target_url: String,
    /// How many requests to send
    pub total_requests: u32,
    /// Seconds to spread the requests over
    pub duration: u32,
    /// Normal or attack traffic
    #[serde(default, deserialize_with = "empty_as_default")]
    pub traffic_type: TrafficType,
    /// Append a path that cannot exist to every URL (normal traffic only)
    #[serde(default)]
    pub error_mode: bool,
    /// Explicit user-agent pool selection
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub user_agent_type: Option<UserAgentType>,
    /// A fixed user agent that overrides the pool selection
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub custom_user_agent: Option<String>,
    /// Baseline or burst pacing
    #[serde(default, deserialize_with = "empty_as_default")]
    pub test_mode: TestMode,
    /// HTTP method, GET when empty
    #[serde(default)]
    pub http_method: String,
    /// Extra headers sent with every request
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    /// Request body, empty for none
    #[serde(default)]
    pub request_body: String,
}

/// Outcome of one request, created once and never modified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Sequence number within the session, starting at 1
    pub id: u32,
    /// HTTP status, 0 when the request could not be sent
    pub status: u16,
    /// Canonical reason phrase for the status
    #[serde(default)]
    pub status_text: String,
    /// The URL actually requested
    pub url: String,
    /// The method actually used
    pub method: String,
    /// Headers actually sent
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    /// Headers received, multiple values joined with ", "
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    /// Body actually sent
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_body: String,
    /// Received body, capped in length
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_body: String,
    /// Round-trip latency in milliseconds
    pub response_time: u64,
    /// When the request was issued
    pub timestamp: DateTime<Utc>,
    /// Transport or body read failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the status looks like a WAF or rate-limit rejection
    pub was_blocked: bool,
    /// Attack category and injection site, attack traffic only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_info: Option<String>,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400 || self.error.is_some()
    }
}

/// Statistics recomputed over every outcome seen so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStats {
    pub success_count: usize,
    pub error_count: usize,
    pub blocked_count: usize,
    pub avg_response: u64,
}

/// Summary of a completed test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Session identifier
    pub test_id: String,
    /// Number of requests actually sent
    pub total_requests: usize,
    /// Requests answered with 2xx
    pub success_count: usize,
    /// Requests answered with 4xx/5xx or that failed to send
    pub error_count: usize,
    /// Requests answered with 403, 406 or 429
    pub blocked_count: usize,
    /// Mean latency in milliseconds
    pub avg_response: u64,
    /// Fastest non-zero latency
    pub min_response: u64,
    /// Slowest latency
    pub max_response: u64,
    /// Median latency
    pub p50_response: u64,
    /// 95th percentile latency
    pub p95_response: u64,
    /// 99th percentile latency
    pub p99_response: u64,
    /// Every outcome, ordered by sequence number
    pub requests: Vec<RequestOutcome>,
    /// Whether any request was blocked
    pub rate_limit_hit: bool,
    /// Sequence number of the first blocked request, 0 if none
    pub rate_limit_at: u32,
    /// When the test began
    pub start_time: DateTime<Utc>,
    /// When the test ended
    pub end_time: DateTime<Utc>,
    /// Wall-clock duration in seconds
    pub duration: f64,
    /// Achieved request rate
    pub requests_per_sec: f64,
}

/// Kind of a streamed progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Complete,
    Cancelled,
    Error,
}

impl EventKind {
    /// Whether this event closes the stream
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Progress)
    }
}

/// One event on a session's progress stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub test_id: String,
    pub completed: usize,
    pub total: usize,
    pub percentage: usize,
    /// Outcomes received since the previous progress event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_requests: Option<Vec<RequestOutcome>>,
    /// Statistics over all outcomes so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stats: Option<TestStats>,
    /// Present on the complete event only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Box<TestResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub(crate) fn new(kind: EventKind, test_id: &str, completed: usize, total: usize) -> Self {
        let percentage = if total > 0 { completed * 100 / total } else { 0 };
        Self {
            kind,
            test_id: test_id.to_string(),
            completed,
            total,
            percentage,
            new_requests: None,
            current_stats: None,
            final_result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Frame the event for a server-sent-events stream.
    ///
    /// Returns `None` if the event cannot be encoded; callers skip it.
    pub fn to_sse_frame(&self) -> Option<String> {
        serde_json::to_string(self)
            .ok()
            .map(|json| format!("data: {}\n\n", json))
    }
}

/// A finished test as written by the JSON exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub config: TestConfig,
    pub results: TestResult,
    pub exported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percentage_uses_integer_division() {
        let update = ProgressUpdate::new(EventKind::Progress, "test_1", 1, 3);
        assert_eq!(update.percentage, 33);
    }

    #[test]
    fn sse_frame_carries_type_tag() {
        let update = ProgressUpdate::new(EventKind::Cancelled, "test_1", 2, 10);
        let frame = update.to_sse_frame().unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains(r#""type":"cancelled""#));
        assert!(!frame.contains("final_result"));
    }

    #[test]
    fn config_accepts_empty_enum_strings() {
        let json = r#"{
            "target_url": "http://localhost/",
            "total_requests": 5,
            "duration": 1,
            "traffic_type": "",
            "test_mode": "",
            "user_agent_type": ""
        }"#;
        let config: TestConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.traffic_type, TrafficType::Normal);
        assert_eq!(config.test_mode, TestMode::Baseline);
        assert_eq!(config.user_agent_type, None);
    }

    #[test]
    fn config_rejects_unknown_traffic_type() {
        let json = r#"{"target_url": "http://x/", "total_requests": 1, "duration": 1, "traffic_type": "ddos"}"#;
        let err = serde_json::from_str::<TestConfig>(json).unwrap_err();
        assert!(err.to_string().contains("traffic_type"));
    }
}

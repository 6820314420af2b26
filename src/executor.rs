use chrono::Utc;
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::models::{RequestOutcome, TestConfig, TrafficType};
use crate::payloads::PayloadPools;
use crate::selector::{build_attack_request, generate_404_url, select_user_agent};
use crate::transport::{OutboundRequest, REQUEST_TIMEOUT, Transport, has_header, set_header};

/// Response bodies are cut to this many characters
pub const MAX_RESPONSE_BODY_CHARS: usize = 500;

/// Appended to a response body that was cut
pub const TRUNCATION_MARKER: &str = "... (truncated)";

/// Statuses treated as a WAF or rate-limit rejection
pub const BLOCKED_STATUSES: [u16; 3] = [403, 406, 429];

pub fn is_blocked(status: u16) -> bool {
    BLOCKED_STATUSES.contains(&status)
}

/// Cap a body at [`MAX_RESPONSE_BODY_CHARS`] characters
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_RESPONSE_BODY_CHARS) {
        Some((cut, _)) => format!("{}{}", &body[..cut], TRUNCATION_MARKER),
        None => body.to_string(),
    }
}

/// Send request number `id` and record what happened.
///
/// Never fails: transport errors end up in the outcome with status 0.
pub async fn execute<T: Transport>(
    id: u32,
    config: &TestConfig,
    transport: &T,
    pools: &PayloadPools,
) -> RequestOutcome {
    let timestamp = Utc::now();
    let method = if config.http_method.is_empty() {
        "GET".to_string()
    } else {
        config.http_method.clone()
    };

    let mut url = config.target_url.clone();
    let mut body = config.request_body.clone();
    let mut headers = config.custom_headers.clone();
    let mut attack_info = None;

    match config.traffic_type {
        TrafficType::Normal if config.error_mode => {
            url = generate_404_url(&url);
        }
        TrafficType::Normal => {}
        TrafficType::Attack => {
            let attack = build_attack_request(config, pools);
            url = attack.url;
            body = attack.body;
            headers = attack.headers;
            attack_info = Some(attack.attack_info);
        }
    }

    if !body.is_empty() {
        set_header(&mut headers, "Content-Type", "application/json".to_string());
    }

    // An injected attack already carries its scanner user agent.
    if config.traffic_type == TrafficType::Normal || !has_header(&headers, "User-Agent") {
        set_header(&mut headers, "User-Agent", select_user_agent(config, pools));
    }

    let mut outcome = RequestOutcome {
        id,
        status: 0,
        status_text: String::new(),
        url: url.clone(),
        method: method.clone(),
        request_headers: headers.clone(),
        response_headers: Default::default(),
        request_body: body.clone(),
        response_body: String::new(),
        response_time: 0,
        timestamp,
        error: None,
        was_blocked: false,
        attack_info,
    };

    let request = OutboundRequest {
        method,
        url,
        headers,
        body: (!body.is_empty()).then_some(body),
        timeout: REQUEST_TIMEOUT,
    };

    debug!(
        event = "request_start",
        id,
        method = request.method.as_str(),
        url = request.url.as_str(),
        "Starting request"
    );

    let start_time = Instant::now();
    let result = transport.send(request).await;
    let latency = match &result {
        Ok(response) => response.received_at.saturating_duration_since(start_time),
        Err(_) => start_time.elapsed(),
    };
    outcome.response_time = latency.as_millis() as u64;

    match result {
        Ok(response) => {
            outcome.status = response.status;
            outcome.status_text = StatusCode::from_u16(response.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default()
                .to_string();
            outcome.was_blocked = is_blocked(response.status);
            outcome.response_headers = response.headers;
            match response.body {
                Ok(bytes) => {
                    outcome.response_body = truncate_body(&String::from_utf8_lossy(&bytes));
                }
                Err(e) => outcome.error = Some(e.to_string()),
            }

            if outcome.was_blocked {
                warn!(
                    event = "request_blocked",
                    id,
                    url = outcome.url.as_str(),
                    status_code = outcome.status,
                    latency_ms = outcome.response_time,
                    "Request blocked"
                );
            } else {
                debug!(
                    event = "request_success",
                    id,
                    url = outcome.url.as_str(),
                    status_code = outcome.status,
                    latency_ms = outcome.response_time,
                    "Request completed"
                );
            }
        }
        Err(e) => {
            outcome.error = Some(format!("Request failed: {}", e));
            error!(
                event = "request_error",
                id,
                url = outcome.url.as_str(),
                latency_ms = outcome.response_time,
                error = %e,
                "Request failed with error"
            );
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserAgentType;
    use crate::payloads::AttackCategory;
    use crate::transport::{TransportError, TransportResponse};
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    /// Answers every request with a fixed response and remembers what it saw
    struct FixedTransport {
        status: u16,
        body: &'static str,
        fail: bool,
        headers_after: Duration,
        body_after: Duration,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    impl FixedTransport {
        fn status(status: u16) -> Self {
            Self {
                status,
                body: "ok",
                fail: false,
                headers_after: Duration::ZERO,
                body_after: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::status(0) }
        }

        fn last(&self) -> OutboundRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Transport for FixedTransport {
        async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            if self.fail {
                return Err(TransportError::Connect("refused".to_string()));
            }
            sleep(self.headers_after).await;
            let received_at = Instant::now();
            sleep(self.body_after).await;

            let mut headers = BTreeMap::new();
            headers.insert("set-cookie".to_string(), "a=1, b=2".to_string());
            Ok(TransportResponse {
                status: self.status,
                headers,
                received_at,
                body: Ok(Bytes::from_static(self.body.as_bytes())),
            })
        }
    }

    #[test]
    fn blocked_statuses_are_exact() {
        for status in [403, 406, 429] {
            assert!(is_blocked(status));
        }
        for status in [0, 200, 401, 404, 500, 503] {
            assert!(!is_blocked(status));
        }
    }

    #[test]
    fn truncation_keeps_short_bodies() {
        assert_eq!(truncate_body("hello"), "hello");
        let exact = "a".repeat(MAX_RESPONSE_BODY_CHARS);
        assert_eq!(truncate_body(&exact), exact);
    }

    #[test]
    fn truncation_cuts_long_bodies_on_char_boundary() {
        let long = "é".repeat(MAX_RESPONSE_BODY_CHARS + 10);
        let cut = truncate_body(&long);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            cut.chars().count(),
            MAX_RESPONSE_BODY_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[tokio::test]
    async fn records_blocked_response() {
        let transport = FixedTransport::status(429);
        let config = TestConfig::new("http://x/y", 1, 1);
        let outcome = execute(7, &config, &transport, &PayloadPools::default()).await;

        assert_eq!(outcome.id, 7);
        assert_eq!(outcome.status, 429);
        assert_eq!(outcome.status_text, "Too Many Requests");
        assert!(outcome.was_blocked);
        assert!(outcome.is_error());
        assert_eq!(outcome.response_headers["set-cookie"], "a=1, b=2");
        assert_eq!(outcome.response_body, "ok");
        assert_eq!(outcome.attack_info, None);
    }

    #[tokio::test]
    async fn transport_failure_becomes_status_zero() {
        let transport = FixedTransport::failing();
        let config = TestConfig::new("http://x/y", 1, 1);
        let outcome = execute(1, &config, &transport, &PayloadPools::default()).await;

        assert_eq!(outcome.status, 0);
        assert!(!outcome.was_blocked);
        assert!(outcome.is_error());
        assert_eq!(
            outcome.error.as_deref(),
            Some("Request failed: connection failed: refused")
        );
    }

    #[tokio::test]
    async fn content_type_only_with_body() {
        let transport = FixedTransport::status(200);
        let mut config = TestConfig::new("http://x/y", 1, 1);
        execute(1, &config, &transport, &PayloadPools::default()).await;
        assert!(!transport.last().headers.contains_key("Content-Type"));
        assert_eq!(transport.last().body, None);

        config.http_method = "POST".to_string();
        config.request_body = r#"{"a": 1}"#.to_string();
        let outcome = execute(2, &config, &transport, &PayloadPools::default()).await;
        assert_eq!(transport.last().headers["Content-Type"], "application/json");
        assert_eq!(outcome.request_body, r#"{"a": 1}"#);
    }

    #[tokio::test]
    async fn error_mode_rewrites_url() {
        let transport = FixedTransport::status(404);
        let mut config = TestConfig::new("http://x/y/", 1, 1);
        config.error_mode = true;
        let outcome = execute(1, &config, &transport, &PayloadPools::default()).await;
        assert!(outcome.url.starts_with("http://x/y/nonexistent-path-"));
        assert_eq!(transport.last().url, outcome.url);
    }

    #[tokio::test]
    async fn attack_mode_injects_and_uses_scanner_agent() {
        let mut pools = PayloadPools::default();
        for category in AttackCategory::ALL {
            pools.set_payloads(category, vec!["P".to_string()]);
        }
        pools.set_user_agents(UserAgentType::Scanner, vec!["EvilScanner/1.0".to_string()]);

        let transport = FixedTransport::status(403);
        let mut config = TestConfig::new("http://x/y", 1, 1);
        config.traffic_type = TrafficType::Attack;
        config.error_mode = true;
        config.user_agent_type = Some(UserAgentType::Legitimate);

        let outcome = execute(1, &config, &transport, &pools).await;
        assert_eq!(outcome.url, "http://x/y?id=P&search=P");
        assert_eq!(outcome.request_headers["User-Agent"], "EvilScanner/1.0");
        assert!(outcome.attack_info.unwrap().ends_with("(query parameter)"));
        assert!(outcome.was_blocked);
    }

    #[tokio::test]
    async fn custom_user_agent_applies_to_normal_traffic() {
        let transport = FixedTransport::status(200);
        let mut config = TestConfig::new("http://x/y", 1, 1);
        config.custom_user_agent = Some("Monitor/2.0".to_string());
        let outcome = execute(1, &config, &transport, &PayloadPools::default()).await;
        assert_eq!(outcome.request_headers["User-Agent"], "Monitor/2.0");
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn configured_headers_are_replaced_regardless_of_case() {
        let transport = FixedTransport::status(200);
        let mut config = TestConfig::new("http://x/y", 1, 1);
        config.http_method = "POST".to_string();
        config.request_body = r#"{"a": 1}"#.to_string();
        config
            .custom_headers
            .insert("content-type".to_string(), "text/plain".to_string());
        config
            .custom_headers
            .insert("user-agent".to_string(), "Mine/1.0".to_string());
        config.custom_user_agent = Some("Monitor/2.0".to_string());

        execute(1, &config, &transport, &PayloadPools::default()).await;
        let sent = transport.last().headers;
        assert_eq!(sent.len(), 2, "{:?}", sent);
        assert_eq!(sent["Content-Type"], "application/json");
        assert_eq!(sent["User-Agent"], "Monitor/2.0");
    }

    #[tokio::test(start_paused = true)]
    async fn latency_stops_when_headers_arrive() {
        let transport = FixedTransport {
            headers_after: Duration::from_millis(120),
            body_after: Duration::from_millis(800),
            ..FixedTransport::status(200)
        };
        let config = TestConfig::new("http://x/y", 1, 1);
        let outcome = execute(1, &config, &transport, &PayloadPools::default()).await;
        assert!((120..=121).contains(&outcome.response_time), "{}", outcome.response_time);
        assert_eq!(outcome.response_body, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_records_time_until_failure() {
        let transport = FixedTransport::failing();
        let config = TestConfig::new("http://x/y", 1, 1);
        let outcome = execute(1, &config, &transport, &PayloadPools::default()).await;
        assert_eq!(outcome.response_time, 0);
        assert!(outcome.error.is_some());
    }
}

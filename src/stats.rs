use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::models::{RequestOutcome, TestResult, TestStats};

/// Nearest-rank percentile of an ascending slice.
///
/// `index = round(p/100 * (n-1))`, clamped to the slice; 0 when empty.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let last = sorted.len() - 1;
    let index = (p / 100.0 * last as f64).round().max(0.0) as usize;
    sorted[index.min(last)]
}

/// p50, p95 and p99 of unsorted latencies
pub fn latency_percentiles(latencies: &[u64]) -> (u64, u64, u64) {
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    (
        percentile(&sorted, 50.0),
        percentile(&sorted, 95.0),
        percentile(&sorted, 99.0),
    )
}

/// Counts and mean latency over `outcomes`
pub fn running_stats(outcomes: &[RequestOutcome]) -> TestStats {
    let mut stats = TestStats::default();
    let mut total_latency = 0u64;

    for outcome in outcomes {
        if outcome.is_success() {
            stats.success_count += 1;
        }
        if outcome.is_error() {
            stats.error_count += 1;
        }
        if outcome.was_blocked {
            stats.blocked_count += 1;
        }
        total_latency += outcome.response_time;
    }

    if !outcomes.is_empty() {
        stats.avg_response = total_latency / outcomes.len() as u64;
    }
    stats
}

/// Sequence number of the first blocked outcome, in sequence order
pub fn first_blocked(outcomes: &[RequestOutcome]) -> Option<u32> {
    outcomes
        .iter()
        .filter(|outcome| outcome.was_blocked)
        .map(|outcome| outcome.id)
        .min()
}

/// Summarize a finished session.
///
/// `outcomes` must be in sequence order. `elapsed` is the measured wall-clock
/// time from `start_time` to the end of the session.
pub fn build_final_result(
    test_id: &str,
    outcomes: Vec<RequestOutcome>,
    start_time: DateTime<Utc>,
    elapsed: Duration,
) -> TestResult {
    let stats = running_stats(&outcomes);
    let latencies: Vec<u64> = outcomes.iter().map(|o| o.response_time).collect();
    let (p50, p95, p99) = latency_percentiles(&latencies);

    // Failed sends report 0 ms and must not pose as the fastest response.
    let min_response = latencies.iter().copied().filter(|&l| l > 0).min().unwrap_or(0);
    let max_response = latencies.iter().copied().max().unwrap_or(0);

    let rate_limit_at = first_blocked(&outcomes);
    let end_time = start_time + chrono::Duration::from_std(elapsed).unwrap_or_default();
    let duration = elapsed.as_secs_f64();
    let requests_per_sec = if duration > 0.0 {
        outcomes.len() as f64 / duration
    } else {
        0.0
    };

    TestResult {
        test_id: test_id.to_string(),
        total_requests: outcomes.len(),
        success_count: stats.success_count,
        error_count: stats.error_count,
        blocked_count: stats.blocked_count,
        avg_response: stats.avg_response,
        min_response,
        max_response,
        p50_response: p50,
        p95_response: p95,
        p99_response: p99,
        requests: outcomes,
        rate_limit_hit: rate_limit_at.is_some(),
        rate_limit_at: rate_limit_at.unwrap_or(0),
        start_time,
        end_time,
        duration,
        requests_per_sec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: u32, status: u16, latency: u64) -> RequestOutcome {
        RequestOutcome {
            id,
            status,
            status_text: String::new(),
            url: "http://x/".to_string(),
            method: "GET".to_string(),
            request_headers: Default::default(),
            response_headers: Default::default(),
            request_body: String::new(),
            response_body: String::new(),
            response_time: latency,
            timestamp: Utc::now(),
            error: (status == 0).then(|| "Request failed: refused".to_string()),
            was_blocked: matches!(status, 403 | 406 | 429),
            attack_info: None,
        }
    }

    #[test]
    fn percentile_of_one_to_hundred() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&sorted, 95.0), 95);
        assert_eq!(percentile(&sorted, 50.0), 51);
        assert_eq!(percentile(&sorted, 99.0), 99);
        assert_eq!(percentile(&sorted, 100.0), 100);
        assert_eq!(percentile(&sorted, 0.0), 1);
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 50.0), 0);
        assert_eq!(latency_percentiles(&[]), (0, 0, 0));
    }

    #[test]
    fn percentile_clamps_out_of_range() {
        assert_eq!(percentile(&[3, 7], 250.0), 7);
        assert_eq!(percentile(&[3, 7], -20.0), 3);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let samples = [
            vec![5],
            vec![9, 1, 4],
            vec![100, 3, 3, 3, 250, 17, 42, 8, 8, 1000],
            (0..997).map(|i| (i * 7919) % 503).collect(),
        ];
        for latencies in samples {
            let (p50, p95, p99) = latency_percentiles(&latencies);
            assert!(p50 <= p95 && p95 <= p99, "{p50} {p95} {p99}");
            let max = *latencies.iter().max().unwrap();
            let mut sorted = latencies.clone();
            sorted.sort_unstable();
            assert_eq!(percentile(&sorted, 100.0), max);
        }
    }

    #[test]
    fn running_stats_counts_classes() {
        let outcomes = vec![
            outcome(1, 200, 10),
            outcome(2, 204, 20),
            outcome(3, 429, 30),
            outcome(4, 500, 40),
            outcome(5, 0, 0),
            outcome(6, 302, 1),
        ];
        let stats = running_stats(&outcomes);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 3);
        assert_eq!(stats.blocked_count, 1);
        assert_eq!(stats.avg_response, 101 / 6);
    }

    #[test]
    fn final_result_min_ignores_failed_sends() {
        let outcomes = vec![outcome(1, 0, 0), outcome(2, 200, 15), outcome(3, 200, 9)];
        let result = build_final_result("t", outcomes, Utc::now(), Duration::from_secs(2));
        assert_eq!(result.min_response, 9);
        assert_eq!(result.max_response, 15);
        assert_eq!(result.avg_response, 8);
        assert_eq!(result.total_requests, 3);
        assert_eq!(result.requests_per_sec, 1.5);
    }

    #[test]
    fn final_result_min_is_zero_when_all_failed() {
        let outcomes = vec![outcome(1, 0, 0), outcome(2, 0, 0)];
        let result = build_final_result("t", outcomes, Utc::now(), Duration::ZERO);
        assert_eq!(result.min_response, 0);
        assert_eq!(result.requests_per_sec, 0.0);
    }

    #[test]
    fn first_blocked_outcome_sets_rate_limit() {
        let outcomes = vec![
            outcome(1, 200, 5),
            outcome(2, 200, 5),
            outcome(3, 406, 5),
            outcome(4, 200, 5),
            outcome(5, 429, 5),
            outcome(6, 403, 5),
        ];
        let result = build_final_result("t", outcomes, Utc::now(), Duration::from_secs(1));
        assert!(result.rate_limit_hit);
        assert_eq!(result.rate_limit_at, 3);
        assert_eq!(result.blocked_count, 3);
    }

    #[test]
    fn no_blocked_outcome_means_no_rate_limit() {
        let outcomes = vec![outcome(1, 200, 5), outcome(2, 404, 5)];
        let result = build_final_result("t", outcomes, Utc::now(), Duration::from_secs(1));
        assert!(!result.rate_limit_hit);
        assert_eq!(result.rate_limit_at, 0);
    }

    #[test]
    fn end_time_follows_elapsed() {
        let start = Utc::now();
        let result = build_final_result("t", vec![], start, Duration::from_millis(2500));
        assert_eq!((result.end_time - start).num_milliseconds(), 2500);
        assert_eq!(result.duration, 2.5);
    }
}

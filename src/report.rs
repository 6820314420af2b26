use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::export::read_export;
use crate::models::{TestConfig, TestResult};
use crate::utils::{format_millis, get_writer};

/// Report on an exported JSON test
pub fn run(path: &Path, output: &str, report_type: &str) -> Result<()> {
    let document = read_export(path)?;
    let mut writer = get_writer(output)?;

    match report_type {
        "text" => {
            write_config_header(&mut writer, &document.config)?;
            write_text_report(&mut writer, &document.results)?;
        }
        "json" => write_json_report(&mut writer, &document.results)?,
        _ => anyhow::bail!("Unsupported report type: {}", report_type),
    }

    Ok(())
}

/// Summary of a test without the per-request detail
#[derive(Debug, Serialize)]
struct Summary<'a> {
    test_id: &'a str,
    requests: usize,
    success: usize,
    errors: usize,
    blocked: usize,
    success_rate: f64,
    rate_limit_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_limit_at: Option<u32>,
    duration: f64,
    rate: f64,
    min: u64,
    mean: u64,
    p50: u64,
    p95: u64,
    p99: u64,
    max: u64,
    status_codes: BTreeMap<u16, usize>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl<'a> From<&'a TestResult> for Summary<'a> {
    fn from(result: &'a TestResult) -> Self {
        Self {
            test_id: &result.test_id,
            requests: result.total_requests,
            success: result.success_count,
            errors: result.error_count,
            blocked: result.blocked_count,
            success_rate: success_rate(result),
            rate_limit_hit: result.rate_limit_hit,
            rate_limit_at: result.rate_limit_hit.then_some(result.rate_limit_at),
            duration: result.duration,
            rate: result.requests_per_sec,
            min: result.min_response,
            mean: result.avg_response,
            p50: result.p50_response,
            p95: result.p95_response,
            p99: result.p99_response,
            max: result.max_response,
            status_codes: status_codes(result),
            start_time: result.start_time,
            end_time: result.end_time,
        }
    }
}

fn success_rate(result: &TestResult) -> f64 {
    if result.total_requests == 0 {
        return 0.0;
    }
    result.success_count as f64 / result.total_requests as f64
}

/// Count of outcomes per status, 0 for requests that never got a response
fn status_codes(result: &TestResult) -> BTreeMap<u16, usize> {
    let mut codes = BTreeMap::new();
    for request in &result.requests {
        *codes.entry(request.status).or_insert(0) += 1;
    }
    codes
}

fn write_config_header<W: Write>(writer: &mut W, config: &TestConfig) -> Result<()> {
    writeln!(writer, "Target:\t\t{} {}", config.http_method, config.target_url)?;
    writeln!(
        writer,
        "Traffic:\t{} ({}, {} requests over {}s)",
        config.traffic_type, config.test_mode, config.total_requests, config.duration
    )?;
    Ok(())
}

/// Human-readable summary in the same layout as the CLI prints after a run
pub fn write_text_report<W: Write>(writer: &mut W, result: &TestResult) -> Result<()> {
    writeln!(writer, "Test:\t\t{}", result.test_id)?;
    writeln!(writer, "Requests:\t{}", result.total_requests)?;
    writeln!(writer, "Duration:\t{:.2}s", result.duration)?;
    writeln!(writer, "Rate:\t\t{:.2} req/s", result.requests_per_sec)?;
    writeln!(
        writer,
        "Success:\t{} ({:.2}%)",
        result.success_count,
        success_rate(result) * 100.0
    )?;
    writeln!(writer, "Errors:\t\t{}", result.error_count)?;
    writeln!(writer, "Blocked:\t{}", result.blocked_count)?;
    if result.rate_limit_hit {
        writeln!(writer, "Rate limit:\thit at request {}", result.rate_limit_at)?;
    } else {
        writeln!(writer, "Rate limit:\tnot hit")?;
    }
    writeln!(writer, "Min:\t\t{}", format_millis(result.min_response))?;
    writeln!(writer, "Mean:\t\t{}", format_millis(result.avg_response))?;
    writeln!(writer, "50th percentile:\t{}", format_millis(result.p50_response))?;
    writeln!(writer, "95th percentile:\t{}", format_millis(result.p95_response))?;
    writeln!(writer, "99th percentile:\t{}", format_millis(result.p99_response))?;
    writeln!(writer, "Max:\t\t{}", format_millis(result.max_response))?;

    let codes = status_codes(result)
        .into_iter()
        .map(|(status, count)| format!("{}:{}", status, count))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(writer, "Status Codes:\t{}", codes)?;

    Ok(())
}

pub fn write_json_report<W: Write>(writer: &mut W, result: &TestResult) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, &Summary::from(result))?;
    writeln!(writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestOutcome;
    use crate::stats::build_final_result;
    use std::time::Duration;

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
            error: None,
            was_blocked: status == 429,
            attack_info: None,
        }
    }

    fn sample() -> TestResult {
        build_final_result(
            "test_1_1",
            vec![outcome(1, 200, 20), outcome(2, 200, 40), outcome(3, 429, 1_200), outcome(4, 429, 5)],
            Utc::now(),
            Duration::from_secs(4),
        )
    }

    #[test]
    fn text_report_lists_summary() {
        let mut out = Vec::new();
        write_text_report(&mut out, &sample()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Requests:\t4\n"));
        assert!(text.contains("Rate:\t\t1.00 req/s\n"));
        assert!(text.contains("Success:\t2 (50.00%)\n"));
        assert!(text.contains("Rate limit:\thit at request 3\n"));
        assert!(text.contains("Max:\t\t1.20s\n"));
        assert!(text.contains("Status Codes:\t200:2  429:2\n"));
    }

    #[test]
    fn json_report_skips_request_detail() {
        let mut out = Vec::new();
        write_json_report(&mut out, &sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["requests"], 4);
        assert_eq!(value["rate_limit_at"], 3);
        assert_eq!(value["status_codes"]["429"], 2);
        assert!(value["requests"].is_u64());
    }

    #[test]
    fn rate_limit_is_omitted_when_not_hit() {
        let result = build_final_result("t", vec![outcome(1, 200, 5)], Utc::now(), Duration::from_secs(1));
        let mut out = Vec::new();
        write_json_report(&mut out, &result).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert!(value.get("rate_limit_at").is_none());
        assert_eq!(value["rate_limit_hit"], false);
    }
}

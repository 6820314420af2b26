//! Saving finished tests to disk.
//!
//! JSON keeps everything; CSV is meant for spreadsheets and flattens the
//! result into a few labelled sections followed by one row per request.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::models::{ExportDocument, TestConfig, TestResult, TrafficType};

/// Directory exports land in unless told otherwise
pub const DEFAULT_EXPORTS_DIR: &str = "exports";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unsupported format: {} (use 'json' or 'csv')", other)),
        }
    }
}

/// Write `result` into `dir` as `test_<YYYYMMDD_HHMMSS>.<ext>`.
///
/// Creates `dir` if needed and returns the path of the new file.
pub fn export_result(
    dir: &Path,
    config: &TestConfig,
    result: &TestResult,
    format: ExportFormat,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create exports directory: {}", dir.display()))?;

    let file_name = format!(
        "test_{}.{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );
    let path = dir.join(file_name);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        ExportFormat::Json => write_json(&mut writer, config, result)?,
        ExportFormat::Csv => write_csv(&mut writer, config, result)?,
    }
    writer.flush()?;

    info!(
        event = "result_exported",
        test_id = result.test_id.as_str(),
        format = %format,
        path = %path.display(),
        "Exported test result"
    );
    Ok(path)
}

/// Pretty JSON [`ExportDocument`]
pub fn write_json<W: Write>(writer: W, config: &TestConfig, result: &TestResult) -> Result<()> {
    let document = ExportDocument {
        config: config.clone(),
        results: result.clone(),
        exported_at: Utc::now(),
    };
    serde_json::to_writer_pretty(writer, &document).context("Failed to encode JSON export")?;
    Ok(())
}

pub fn write_csv<W: Write>(writer: W, config: &TestConfig, result: &TestResult) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    let blank: [&str; 1] = [""];

    csv_writer.write_record(["TEST SUMMARY"])?;
    field(&mut csv_writer, "Test ID", &result.test_id)?;
    field(&mut csv_writer, "Target URL", &config.target_url)?;
    field(&mut csv_writer, "Total Requests", result.total_requests)?;
    field(&mut csv_writer, "Duration (seconds)", format!("{:.2}", result.duration))?;
    field(&mut csv_writer, "Traffic Type", config.traffic_type)?;
    field(&mut csv_writer, "Test Mode", config.test_mode)?;
    field(&mut csv_writer, "HTTP Method", &config.http_method)?;
    field(&mut csv_writer, "Error Mode", config.error_mode)?;
    field(
        &mut csv_writer,
        "User Agent Type",
        config
            .user_agent_type
            .map(|kind| kind.to_string())
            .unwrap_or_default(),
    )?;
    if let Some(agent) = &config.custom_user_agent {
        field(&mut csv_writer, "Custom User Agent", agent)?;
    }
    csv_writer.write_record(blank)?;

    let success_rate = if result.total_requests > 0 {
        result.success_count as f64 / result.total_requests as f64 * 100.0
    } else {
        0.0
    };
    csv_writer.write_record(["STATISTICS"])?;
    field(&mut csv_writer, "Success Count", result.success_count)?;
    field(&mut csv_writer, "Error Count", result.error_count)?;
    field(&mut csv_writer, "Blocked Count", result.blocked_count)?;
    field(&mut csv_writer, "Success Rate", format!("{:.1}%", success_rate))?;
    field(&mut csv_writer, "Rate Limit Hit", result.rate_limit_hit)?;
    if result.rate_limit_hit {
        field(&mut csv_writer, "Rate Limit At Request", result.rate_limit_at)?;
    }
    field(&mut csv_writer, "Requests Per Second", format!("{:.2}", result.requests_per_sec))?;
    csv_writer.write_record(blank)?;

    csv_writer.write_record(["RESPONSE TIMES (milliseconds)"])?;
    field(&mut csv_writer, "Average", result.avg_response)?;
    field(&mut csv_writer, "Minimum", result.min_response)?;
    field(&mut csv_writer, "Maximum", result.max_response)?;
    field(&mut csv_writer, "p50 (Median)", result.p50_response)?;
    field(&mut csv_writer, "p95", result.p95_response)?;
    field(&mut csv_writer, "p99", result.p99_response)?;
    csv_writer.write_record(blank)?;

    let attack = config.traffic_type == TrafficType::Attack;
    csv_writer.write_record(["INDIVIDUAL REQUESTS"])?;
    let mut header = vec![
        "Request ID",
        "Timestamp",
        "Status Code",
        "Status Text",
        "Response Time (ms)",
        "Was Blocked",
        "URL",
        "Method",
        "User-Agent",
        "Error",
    ];
    if attack {
        header.push("Attack Info");
    }
    csv_writer.write_record(&header)?;

    for request in &result.requests {
        let mut row = vec![
            request.id.to_string(),
            request.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            request.status.to_string(),
            request.status_text.clone(),
            request.response_time.to_string(),
            request.was_blocked.to_string(),
            request.url.clone(),
            request.method.clone(),
            request
                .request_headers
                .get("User-Agent")
                .cloned()
                .unwrap_or_default(),
            request.error.clone().unwrap_or_default(),
        ];
        if attack {
            row.push(request.attack_info.clone().unwrap_or_default());
        }
        csv_writer.write_record(&row)?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// One `label,value` row
fn field<W: Write>(
    csv_writer: &mut csv::Writer<W>,
    label: &str,
    value: impl fmt::Display,
) -> csv::Result<()> {
    csv_writer.write_record([label.to_string(), value.to_string()])
}

/// File names in `dir`, sorted; empty if `dir` does not exist
pub fn list_exports(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut exports = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read exports directory: {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            exports.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    exports.sort();
    Ok(exports)
}

/// Load a JSON export written by [`export_result`]
pub fn read_export(path: &Path) -> Result<ExportDocument> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let document = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse export: {}", path.display()))?;
    Ok(document)
}

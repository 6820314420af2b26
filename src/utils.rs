use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::time::Duration;

/// Parse a test duration given either as plain seconds ("30") or in
/// humantime form ("30s", "2m")
pub fn parse_duration_secs(value: &str) -> Result<u32> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u32>() {
        return Ok(secs);
    }

    let duration = humantime::parse_duration(value).context("Failed to parse duration")?;
    if duration.subsec_nanos() != 0 {
        anyhow::bail!("Duration must be a whole number of seconds: {}", value);
    }
    u32::try_from(duration.as_secs()).context("Duration is too long")
}

/// Parse HTTP headers from strings like "Name: Value"
pub fn parse_headers(headers: &[String]) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();

    for header_str in headers {
        let Some((name, value)) = header_str.split_once(':') else {
            anyhow::bail!("Invalid header format: {}", header_str);
        };

        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Invalid header format: {}", header_str);
        }
        result.insert(name.to_string(), value.trim().to_string());
    }

    Ok(result)
}

/// Get a writer for a file or stdout
pub fn get_writer(path: &str) -> Result<Box<dyn Write>> {
    if path == "stdout" {
        Ok(Box::new(io::stdout()))
    } else {
        let file = File::create(path).context(format!("Failed to create file: {}", path))?;
        Ok(Box::new(file))
    }
}

/// Format a duration in a human-readable format
pub fn format_duration(duration: Duration) -> String {
    let total_millis = duration.as_millis();
    if total_millis < 1_000 {
        return format!("{}ms", total_millis);
    }

    let total_secs = duration.as_secs_f64();
    if total_secs < 60.0 {
        return format!("{:.2}s", total_secs);
    }

    let minutes = (total_secs / 60.0).floor();
    let seconds = total_secs - (minutes * 60.0);
    format!("{}m{:.2}s", minutes as u64, seconds)
}

/// Format a latency in whole milliseconds
pub fn format_millis(millis: u64) -> String {
    format_duration(Duration::from_millis(millis))
}

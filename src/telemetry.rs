//! Logging and OpenTelemetry wiring.
//!
//! Structured logs always go through `tracing`. When OpenTelemetry is enabled
//! the same events are bridged to an OpenTelemetry log exporter and per-request
//! instruments are recorded on the global meter provider.

use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry_appender_tracing::layer;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::LoggerProvider;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader};
use opentelemetry_sdk::runtime;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::models::RequestOutcome;

const SERVICE_NAME: &str = "waftester";

/// Keeps the log pipeline alive; dropping it flushes pending logs
pub struct TelemetryGuard {
    _logger_provider: Option<LoggerProvider>,
}

/// Human-readable logs on stderr; `RUST_LOG` overrides the default `info` filter
fn fmt_layer<S>() -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let filter_fmt = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter_fmt)
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already installed. With `opentelemetry`,
/// logs and metrics are also exported to stdout in OpenTelemetry format.
pub fn init(opentelemetry: bool) -> Result<TelemetryGuard> {
    if !opentelemetry {
        tracing_subscriber::registry().with(fmt_layer()).try_init()?;
        return Ok(TelemetryGuard {
            _logger_provider: None,
        });
    }

    let reader = PeriodicReader::builder(
        opentelemetry_stdout::MetricsExporter::default(),
        runtime::Tokio,
    )
    .build();
    let meter_provider = MeterProviderBuilder::default()
        .with_reader(reader)
        .with_resource(Resource::new(vec![KeyValue::new("service.name", SERVICE_NAME)]))
        .build();
    global::set_meter_provider(meter_provider);

    let logger_provider = LoggerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::LogExporter::default())
        .build();

    // Keep the HTTP stack out of the bridge to avoid telemetry about telemetry.
    let filter_otel = EnvFilter::new("info")
        .add_directive("hyper=off".parse()?)
        .add_directive("h2=off".parse()?)
        .add_directive("reqwest=off".parse()?);
    let otel_layer = layer::OpenTelemetryTracingBridge::new(&logger_provider).with_filter(filter_otel);

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer())
        .try_init()?;

    Ok(TelemetryGuard {
        _logger_provider: Some(logger_provider),
    })
}

/// Per-request instruments for one session
pub struct SessionMetrics {
    requests: Counter<u64>,
    blocked: Counter<u64>,
    errors: Counter<u64>,
    duration: Histogram<f64>,
    attributes: [KeyValue; 1],
}

impl SessionMetrics {
    pub fn new(test_id: &str) -> Self {
        let meter = global::meter(SERVICE_NAME);
        Self {
            requests: meter
                .u64_counter("requests")
                .with_description("Total number of requests")
                .init(),
            blocked: meter
                .u64_counter("blocked_requests")
                .with_description("Requests rejected with 403, 406 or 429")
                .init(),
            errors: meter
                .u64_counter("error_requests")
                .with_description("Requests that failed or returned 4xx/5xx")
                .init(),
            duration: meter
                .f64_histogram("request_duration")
                .with_description("Request duration in seconds")
                .init(),
            attributes: [KeyValue::new("test_id", test_id.to_string())],
        }
    }

    pub fn record(&self, outcome: &RequestOutcome) {
        self.requests.add(1, &self.attributes);
        if outcome.was_blocked {
            self.blocked.add(1, &self.attributes);
        }
        if outcome.is_error() {
            self.errors.add(1, &self.attributes);
        }
        self.duration
            .record(outcome.response_time as f64 / 1000.0, &self.attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info;

    #[tokio::test]
    async fn init_installs_subscriber_once() {
        let _guard = init(true).unwrap();
        info!(event = "telemetry_ready", "Telemetry installed");
        SessionMetrics::new("test_1_1").record(&crate::models::RequestOutcome {
            id: 1,
            status: 429,
            status_text: "Too Many Requests".to_string(),
            url: "http://x/".to_string(),
            method: "GET".to_string(),
            request_headers: Default::default(),
            response_headers: Default::default(),
            request_body: String::new(),
            response_body: String::new(),
            response_time: 12,
            timestamp: chrono::Utc::now(),
            error: None,
            was_blocked: true,
            attack_info: None,
        });

        assert!(init(false).is_err());
    }
}

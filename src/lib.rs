//! Waftester - A WAF and rate-limit testing library
//!
//! Waftester sends a fixed number of paced HTTP requests at a target, normal
//! or carrying injection payloads, and records which ones a web application
//! firewall or rate limiter rejected. It can be used as a command-line tool or
//! embedded in other Rust applications, where a session streams batched
//! progress events while it runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use waftester::{TestBuilder, TestMode, TrafficType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let result = TestBuilder::new("https://example.com/login")
//!         .requests(100)
//!         .duration(20)
//!         .traffic_type(TrafficType::Attack)
//!         .test_mode(TestMode::Burst)
//!         .run()
//!         .await?;
//!
//!     if result.rate_limit_hit {
//!         println!("Blocked from request {}", result.rate_limit_at);
//!     }
//!     println!("p95 latency: {}ms", result.p95_response);
//!
//!     Ok(())
//! }
//! ```
//!
//! Streaming sessions go through a [`SessionRegistry`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use waftester::{PayloadPools, ReqwestTransport, SessionRegistry, TestConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = SessionRegistry::new();
//!     let transport = Arc::new(ReqwestTransport::new(false)?);
//!     let pools = Arc::new(PayloadPools::builtin());
//!
//!     let config = TestConfig::new("https://example.com/", 10, 10);
//!     let mut stream = registry.start_streaming_session(config, transport, pools).await?;
//!     while let Some(update) = stream.next().await {
//!         println!("{}% done", update.percentage);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod executor;
pub mod export;
pub mod models;
pub mod pacing;
pub mod payloads;
pub mod report;
pub mod selector;
pub mod session;
pub mod stats;
pub mod telemetry;
pub mod transport;
pub mod utils;

// Re-export the main types for library users
pub use config::ConfigError;
pub use models::{
    EventKind, ExportDocument, ProgressUpdate, RequestOutcome, TestConfig, TestMode, TestResult,
    TestStats, TrafficType, UserAgentType,
};
pub use payloads::{AttackCategory, PayloadError, PayloadPools};
pub use session::{ProgressStream, SessionError, SessionRegistry, run_test};
pub use transport::{ReqwestTransport, Transport, TransportError};

use std::collections::BTreeMap;
use std::sync::Arc;

/// Builder for configuring and running a test
pub struct TestBuilder {
    config: TestConfig,
    pools: Option<Arc<PayloadPools>>,
    insecure: bool,
}

impl TestBuilder {
    /// Create a new TestBuilder for `target_url`: 10 requests over 10 seconds,
    /// normal baseline traffic
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            config: TestConfig::new(target_url, 10, 10),
            pools: None,
            insecure: false,
        }
    }

    /// Set the number of requests
    pub fn requests(mut self, total_requests: u32) -> Self {
        self.config.total_requests = total_requests;
        self
    }

    /// Set the test duration in seconds
    pub fn duration(mut self, duration: u32) -> Self {
        self.config.duration = duration;
        self
    }

    /// Set normal or attack traffic
    pub fn traffic_type(mut self, traffic_type: TrafficType) -> Self {
        self.config.traffic_type = traffic_type;
        self
    }

    /// Set baseline or burst pacing
    pub fn test_mode(mut self, test_mode: TestMode) -> Self {
        self.config.test_mode = test_mode;
        self
    }

    /// Request paths that cannot exist
    pub fn error_mode(mut self, error_mode: bool) -> Self {
        self.config.error_mode = error_mode;
        self
    }

    /// Set the HTTP method
    pub fn method(mut self, method: &str) -> Self {
        self.config.http_method = method.to_string();
        self
    }

    /// Set the request body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.config.request_body = body.into();
        self
    }

    /// Set the headers sent with every request
    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.config.custom_headers = headers;
        self
    }

    /// Add a single header
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.config
            .custom_headers
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Draw user agents from the given pool
    pub fn user_agent_type(mut self, kind: UserAgentType) -> Self {
        self.config.user_agent_type = Some(kind);
        self
    }

    /// Send a fixed user agent
    pub fn user_agent(mut self, agent: &str) -> Self {
        self.config.custom_user_agent = Some(agent.to_string());
        self
    }

    /// Use these payload pools instead of the built-in ones
    pub fn payloads(mut self, pools: PayloadPools) -> Self {
        self.pools = Some(Arc::new(pools));
        self
    }

    /// Set whether to ignore invalid server TLS certificates
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<TestConfig, ConfigError> {
        self.config.validate()
    }

    /// Run the test to completion
    pub async fn run(self) -> Result<TestResult, SessionError> {
        let transport = Arc::new(ReqwestTransport::new(self.insecure)?);
        let pools = self
            .pools
            .unwrap_or_else(|| Arc::new(PayloadPools::builtin()));
        run_test(self.config, transport, pools).await
    }
}

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use waftester::export::{self, DEFAULT_EXPORTS_DIR, ExportFormat};
use waftester::utils::{get_writer, parse_duration_secs, parse_headers};
use waftester::{
    EventKind, PayloadPools, ReqwestTransport, SessionError, SessionRegistry, TestConfig,
    UserAgentType, report, telemetry,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Also export logs and metrics through OpenTelemetry
    #[arg(long, global = true)]
    opentelemetry: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test against a target
    Run(RunArgs),

    /// Generate a report from an exported JSON test
    Report {
        /// Exported test file
        file: PathBuf,

        /// Output file
        #[arg(long, default_value = "stdout")]
        output: String,

        /// Report type to generate [text, json]
        #[arg(long = "type", default_value = "text")]
        report_type: String,
    },

    /// List exported tests
    Exports {
        /// Directory exports are written to
        #[arg(long, default_value = DEFAULT_EXPORTS_DIR)]
        exports_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Target URL
    #[arg(long, required_unless_present = "config")]
    url: Option<String>,

    /// Read the whole test configuration from a JSON file instead of flags
    #[arg(long, value_name = "file")]
    config: Option<PathBuf>,

    /// Number of requests to send [1-10000]
    #[arg(long, default_value = "10")]
    requests: u32,

    /// Duration of the test, in seconds or as "30s", "2m" [max 1h]
    #[arg(long, default_value = "10")]
    duration: String,

    /// Traffic type [normal, attack]
    #[arg(long, default_value = "normal")]
    traffic: String,

    /// Test mode [baseline, burst]
    #[arg(long, default_value = "baseline")]
    mode: String,

    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: String,

    /// Request header
    #[arg(short = 'H', long = "header", value_name = "value")]
    headers: Vec<String>,

    /// Request body
    #[arg(long)]
    body: Option<String>,

    /// User agent pool [legitimate, scanner]
    #[arg(long)]
    user_agent_type: Option<String>,

    /// Fixed user agent, overrides the pool
    #[arg(long)]
    user_agent: Option<String>,

    /// Request a random path that does not exist
    #[arg(long)]
    error_mode: bool,

    /// Directory with payload and user agent lists
    #[arg(long, value_name = "dir")]
    payloads: Option<PathBuf>,

    /// Ignore invalid server TLS certificates
    #[arg(long)]
    insecure: bool,

    /// Print progress events as server-sent-event frames instead of a progress bar
    #[arg(long)]
    events: bool,

    /// Save the result [json, csv]
    #[arg(long)]
    export: Option<ExportFormat>,

    /// Directory exports are written to
    #[arg(long, default_value = DEFAULT_EXPORTS_DIR)]
    exports_dir: PathBuf,

    /// Report output file
    #[arg(long, default_value = "stdout")]
    output: String,
}

impl RunArgs {
    fn test_config(&self) -> Result<TestConfig> {
        if let Some(path) = &self.config {
            let file = File::open(path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            let config: TestConfig = serde_json::from_reader(BufReader::new(file))
                .context("Failed to parse test configuration")?;
            return Ok(config);
        }

        let mut config = TestConfig::new(
            self.url.clone().unwrap_or_default(),
            self.requests,
            parse_duration_secs(&self.duration)?,
        );
        config.traffic_type = self.traffic.parse()?;
        config.test_mode = self.mode.parse()?;
        config.http_method = self.method.clone();
        config.custom_headers = parse_headers(&self.headers)?;
        config.request_body = self.body.clone().unwrap_or_default();
        config.user_agent_type = self
            .user_agent_type
            .as_deref()
            .filter(|kind| !kind.is_empty())
            .map(|kind| kind.parse::<UserAgentType>())
            .transpose()?;
        config.custom_user_agent = self.user_agent.clone();
        config.error_mode = self.error_mode;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.opentelemetry)?;

    match cli.command {
        Some(Commands::Run(args)) => run(args).await?,
        Some(Commands::Report {
            file,
            output,
            report_type,
        }) => {
            report::run(&file, &output, &report_type)?;
        }
        Some(Commands::Exports { exports_dir }) => {
            for name in export::list_exports(&exports_dir)? {
                println!("{}", name);
            }
        }
        None => {
            println!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.test_config()?.validate()?;

    let pools = match &args.payloads {
        Some(dir) => PayloadPools::load_dir(dir)?,
        None => PayloadPools::builtin(),
    };
    info!(
        event = "test_configured",
        target = config.target_url.as_str(),
        payloads = pools.total(),
        "Test configured"
    );

    let transport = Arc::new(ReqwestTransport::new(args.insecure)?);
    let registry = SessionRegistry::new();
    let mut stream = registry
        .start_streaming_session(config.clone(), transport, Arc::new(pools))
        .await?;

    let test_id = stream.test_id().to_string();
    {
        let registry = registry.clone();
        let test_id = test_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(event = "interrupt", test_id = test_id.as_str(), "Interrupted, cancelling test");
                let _ = registry.cancel_session(&test_id).await;
            }
        });
    }

    let progress_bar = if args.events {
        ProgressBar::hidden()
    } else {
        let progress_style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")?
            .progress_chars("##-");
        let pb = ProgressBar::new(u64::from(config.total_requests));
        pb.set_style(progress_style);
        pb
    };

    let mut final_result = None;
    while let Some(update) = stream.next().await {
        if args.events {
            if let Some(frame) = update.to_sse_frame() {
                print!("{}", frame);
            }
        }

        match update.kind {
            EventKind::Progress => {
                progress_bar.set_position(update.completed as u64);
                if let Some(stats) = &update.current_stats {
                    progress_bar.set_message(format!(
                        "blocked {} errors {} avg {}ms",
                        stats.blocked_count, stats.error_count, stats.avg_response
                    ));
                }
            }
            EventKind::Complete => {
                progress_bar.finish_with_message("Test completed");
                final_result = update.final_result.map(|result| *result);
            }
            EventKind::Cancelled => {
                progress_bar.abandon_with_message("Test cancelled");
                return Err(SessionError::Cancelled {
                    completed: update.completed,
                    total: update.total,
                }
                .into());
            }
            EventKind::Error => {
                progress_bar.abandon_with_message("Test failed");
                return Err(SessionError::Failed(update.error.unwrap_or_default()).into());
            }
        }
    }

    let result = final_result.context("Test ended without a result")?;
    let mut writer = get_writer(&args.output)?;
    report::write_text_report(&mut writer, &result)?;

    if let Some(format) = args.export {
        let path = export::export_result(&args.exports_dir, &config, &result, format)?;
        eprintln!("Results exported to {}", path.display());
    }

    Ok(())
}

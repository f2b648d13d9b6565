//! bulksub CLI - bulk subscription operations against Google Play.

use anyhow::{Context, Result};
use bulksub::client::TokenSource;
use bulksub::{
    BatchDriver, BulkError, ConfigError, ConfigLayer, OperationMode, PlayClient, RunConfig,
    RunReport, ServiceAccountAuth, SubscriptionApi, summarize_log,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "bulksub")]
#[command(version)]
#[command(about = "Bulk cancel, validate or revoke Google Play subscriptions from a CSV")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON or TOML config file; flags given on the command line win
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the configured operation to every row of the input CSV
    Run(RunArgs),

    /// Summarize an audit log and optionally export CSVs
    Report {
        /// Path to a JSONL audit log
        #[arg(long)]
        log: PathBuf,

        /// Write failures only to this CSV
        #[arg(long)]
        failures_csv: Option<PathBuf>,

        /// Write every record to this CSV
        #[arg(long)]
        all_csv: Option<PathBuf>,
    },

    /// Show example configuration
    Example,
}

#[derive(Args)]
struct RunArgs {
    /// Input CSV with a header row
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Operation to apply
    #[arg(long, value_enum)]
    mode: Option<OperationMode>,

    /// Token column name, tried before purchaseToken/purchase_token/token
    #[arg(long)]
    token_column: Option<String>,

    #[arg(long)]
    subscription_id_column: Option<String>,

    #[arg(long)]
    package_column: Option<String>,

    #[arg(long)]
    product_column: Option<String>,

    #[arg(long)]
    order_id_column: Option<String>,

    /// Service-account JSON key
    #[arg(long)]
    service_account: Option<PathBuf>,

    /// Package for rows without one; rows naming another package are skipped
    #[arg(long)]
    package_name: Option<String>,

    /// Audit log path (default: logs/<stamp>/<mode>_log_<stamp>.jsonl)
    #[arg(long)]
    log: Option<PathBuf>,

    #[arg(long, overrides_with = "no_timestamp_logs")]
    timestamp_logs: bool,

    /// Write the default log to logs/<mode>_log.jsonl
    #[arg(long)]
    no_timestamp_logs: bool,

    /// Seconds to pause after each processed row
    #[arg(long)]
    delay: Option<f64>,

    /// Retries after the first attempt for 429/500/503
    #[arg(long)]
    retries: Option<u32>,

    /// Base backoff in seconds, doubled per retry
    #[arg(long)]
    backoff: Option<f64>,

    /// Maximum random jitter in seconds added to each backoff
    #[arg(long)]
    jitter: Option<f64>,

    /// Consider at most this many rows (0 = no limit)
    #[arg(long)]
    max_rows: Option<usize>,

    /// Process a uniform random sample of this many rows
    #[arg(long)]
    sample_size: Option<usize>,

    /// Log what would be done without calling the API or writing checkpoints
    #[arg(long)]
    dry_run: bool,

    #[arg(long, overrides_with = "no_progress")]
    progress: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Validate mode: eligible CSV (stamped)
    #[arg(long)]
    eligible_output: Option<PathBuf>,

    /// Validate mode: ineligible CSV (stamped)
    #[arg(long)]
    ineligible_output: Option<PathBuf>,

    /// Validate mode: embed the raw API response in each audit record
    #[arg(long)]
    log_response: bool,

    /// File of tokens that succeeded; they are skipped on later runs
    #[arg(long, visible_alias = "checkpoint")]
    checkpoint_success: Option<PathBuf>,

    /// File receiving tokens that did not succeed
    #[arg(long)]
    checkpoint_failed: Option<PathBuf>,

    #[arg(long)]
    api_base_url: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

/// `--x` / `--no-x` pair to an optional setting.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

impl RunArgs {
    fn into_layer(self) -> ConfigLayer {
        ConfigLayer {
            input: self.input,
            mode: self.mode,
            token_column: self.token_column,
            subscription_id_column: self.subscription_id_column,
            package_column: self.package_column,
            product_column: self.product_column,
            order_id_column: self.order_id_column,
            service_account: self.service_account,
            package_name: self.package_name,
            log: self.log,
            timestamp_logs: switch(self.timestamp_logs, self.no_timestamp_logs),
            delay: self.delay,
            retries: self.retries,
            backoff: self.backoff,
            jitter: self.jitter,
            max_rows: self.max_rows,
            sample_size: self.sample_size,
            dry_run: self.dry_run.then_some(true),
            progress: switch(self.progress, self.no_progress),
            eligible_output: self.eligible_output,
            ineligible_output: self.ineligible_output,
            log_response: self.log_response.then_some(true),
            checkpoint_success: self.checkpoint_success,
            checkpoint_failed: self.checkpoint_failed,
            api_base_url: self.api_base_url,
            timeout_secs: self.timeout_secs,
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }
}

fn print_example_config() {
    let example = r#"{
  "input": "data/subscriptions.csv",
  "mode": "cancel",
  "service_account": "${HOME}/keys/play-service-account.json",
  "package_name": "com.example.app",
  "token_column": "purchaseToken",
  "delay": 0.15,
  "retries": 3,
  "backoff": 0.25,
  "jitter": 0.25,
  "checkpoint_success": "checkpoints/cancel_success.txt",
  "checkpoint_failed": "checkpoints/cancel_failed.txt",
  "timestamp_logs": true,
  "progress": true
}"#;
    println!("{example}");
    println!();
    println!("# Or as TOML (use a .toml extension):");
    println!(
        r#"input = "data/subscriptions.csv"
mode = "validate"
package_name = "com.example.app"
service_account = "keys/play-service-account.json"
eligible_output = "outputs/eligible.csv"
sample_size = 500
log_response = true"#
    );
}

/// Build the authenticated API client, failing fast on bad credentials.
async fn connect(config: &RunConfig) -> Result<Arc<dyn SubscriptionApi>> {
    let key_path = config.service_account.as_deref().ok_or_else(|| {
        BulkError::Config(ConfigError::MissingRequired(vec![
            "service_account".to_string(),
        ]))
    })?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.api.timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let auth = ServiceAccountAuth::from_file(key_path, http.clone()).map_err(BulkError::from)?;
    auth.access_token().await.map_err(BulkError::from)?;
    info!(client_email = auth.client_email(), "Authenticated");

    Ok(Arc::new(PlayClient::with_http(
        http,
        config.api.base_url.clone(),
        Arc::new(auth),
    )))
}

fn print_run_summary(report: &RunReport) {
    println!("\n=== {} summary ===", report.mode);
    for (label, count) in report.totals.entries() {
        println!("{:<25}{count}", format!("{label}:"));
    }
    println!("{:<25}{}", "log:", report.log_path.display());
    if let Some(exports) = &report.exports {
        println!(
            "{:<25}{} ({} rows)",
            "eligible_output:",
            exports.eligible_path.display(),
            exports.eligible
        );
        println!(
            "{:<25}{} ({} rows)",
            "ineligible_output:",
            exports.ineligible_path.display(),
            exports.ineligible
        );
    }
    println!("{:<25}{:.1}s", "runtime:", report.elapsed.as_secs_f64());
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Report {
            log,
            failures_csv,
            all_csv,
        } => {
            let summary = summarize_log(&log, failures_csv.as_deref(), all_csv.as_deref())
                .with_context(|| format!("Failed to summarize {}", log.display()))?;
            print!("{summary}");
            if let Some(path) = failures_csv {
                println!("Wrote failures CSV: {}", path.display());
            }
            if let Some(path) = all_csv {
                println!("Wrote full CSV: {}", path.display());
            }
        }

        Commands::Run(args) => {
            let file_layer = cli
                .config
                .as_deref()
                .map(ConfigLayer::from_file)
                .transpose()
                .map_err(BulkError::from)?;

            let config =
                RunConfig::resolve(file_layer, args.into_layer()).map_err(BulkError::from)?;
            let driver = BatchDriver::prepare(config)?;

            let api = if driver.config().dry_run {
                info!("Dry run: no API calls, no checkpoint writes");
                None
            } else {
                Some(connect(driver.config()).await?)
            };

            let report = driver.run(api).await?;
            print_run_summary(&report);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            let code = err
                .downcast_ref::<BulkError>()
                .map_or(1, BulkError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

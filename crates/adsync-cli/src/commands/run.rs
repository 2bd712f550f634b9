//! `adsync run`: execute the orchestrator (all platforms or one).

use std::path::PathBuf;
use std::sync::Arc;

use adsync_engine::config::parse_orchestrator;
use adsync_engine::pipeline::RunContext;
use adsync_engine::token::{CachedTokenProvider, EnvTokenProvider};
use adsync_engine::{Orchestrator, ReportFormat, StepRegistry};
use adsync_platforms::{FixtureAdapter, PlatformRegistry};
use adsync_sink::{DataSink, MemorySink, PostgresSink, PostgresSinkConfig};
use adsync_types::{DateRange, ErrorCategory, EtlError};
use chrono::NaiveDate;
use clap::Args;
use tracing::{error, info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Path to the orchestrator config YAML
    pub config: PathBuf,

    /// Run a single platform, ignoring its dependencies
    #[arg(long)]
    pub platform: Option<String>,

    /// Restrict to these tables (comma-separated) within a platform
    #[arg(long, value_delimiter = ',')]
    pub tables: Option<Vec<String>>,

    /// Extract and transform, but skip all warehouse writes
    #[arg(long)]
    pub dry_run: bool,

    /// Write only to test-suffixed tables
    #[arg(long)]
    pub test_mode: bool,

    /// Override the extraction window start (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Override the extraction window end (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Directory of JSON extraction fixtures (stand-in for live adapters)
    #[arg(long, default_value = "fixtures")]
    pub fixtures: PathBuf,

    /// Use the in-memory sink instead of the warehouse
    #[arg(long)]
    pub memory_sink: bool,

    /// Fetch platform tokens from the environment before extraction
    #[arg(long)]
    pub require_tokens: bool,

    /// Execution report format
    #[arg(long, default_value = "json")]
    pub report_format: String,

    /// Execution report path (default execution_report.<format>)
    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Skip the execution report
    #[arg(long)]
    pub no_report: bool,
}

/// Default extraction window when no dates are given.
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Returns the process exit code: 0 success, 1 config error, 2 partial
/// failure, 3 total failure, 4 internal error, 130 interrupted.
pub async fn execute(args: RunArgs) -> i32 {
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "run failed");
            match e.category {
                ErrorCategory::Config => 1,
                _ => 4,
            }
        }
    }
}

async fn run(args: RunArgs) -> Result<i32, EtlError> {
    let config = parse_orchestrator(&args.config)
        .map_err(|e| EtlError::config("BAD_CONFIG", e.to_string()))?;

    let dry_run = args.dry_run
        || std::env::var("DRY_RUN")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
    let test_mode = args.test_mode
        || std::env::var("TEST_MODE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

    let sink: Arc<dyn DataSink> = if args.memory_sink {
        info!("using in-memory sink");
        Arc::new(MemorySink::with_auto_create())
    } else {
        let mut sink_config = PostgresSinkConfig::from_env()?;
        sink_config.test_mode = test_mode;
        // One session per concurrently running platform, plus margin for
        // driver-key queries.
        sink_config.pool_size = config.orchestrator.max_parallel + 2;
        Arc::new(PostgresSink::new(sink_config))
    };

    let adapter: Arc<dyn adsync_engine::pipeline::PlatformAdapter> =
        Arc::new(FixtureAdapter::new(&args.fixtures));
    let mut registry = PlatformRegistry::new().with_shared_adapter(&adapter);
    if args.require_tokens {
        registry =
            registry.with_token_provider(Arc::new(CachedTokenProvider::new(EnvTokenProvider)));
    }

    let steps = StepRegistry::with_default_steps();
    let pipelines = registry.build_all(&sink, &steps)?;
    let orchestrator = Orchestrator::new(config, pipelines)?;

    let date_range = match (args.start_date, args.end_date) {
        (Some(start), Some(end)) => DateRange::new(start, end)?,
        (Some(start), None) => DateRange::new(start, chrono::Utc::now().date_naive())?,
        _ => DateRange::lookback(DEFAULT_LOOKBACK_DAYS),
    };

    let ctx = RunContext {
        date_range,
        tables: args.tables.clone(),
        dry_run,
        test_mode,
        ..RunContext::new(date_range)
    };

    // SIGINT delivers cooperative cancellation; in-flight sink loads finish
    // before the platforms observe it.
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let exit_code = match &args.platform {
        Some(platform) => match orchestrator.run_platform(platform, &ctx).await {
            Ok(result) => {
                info!(
                    platform = %platform,
                    rows = result.rows_processed(),
                    tables = result.tables_processed(),
                    "platform completed"
                );
                0
            }
            Err(e) if e.category == ErrorCategory::Config => return Err(e),
            Err(e) => {
                error!(platform = %platform, error = %e, "platform failed");
                if ctx.cancel.is_cancelled() {
                    130
                } else {
                    3
                }
            }
        },
        None => {
            let result = orchestrator.run_all(&ctx).await?;
            result.exit_code()
        }
    };

    if !args.no_report {
        let format: ReportFormat = args.report_format.parse()?;
        let path = args.report_path.clone().unwrap_or_else(|| {
            PathBuf::from(format!("execution_report.{}", args.report_format.to_lowercase()))
        });
        orchestrator.export_report(format, &path)?;
    }

    sink.close().await.map_err(EtlError::from)?;
    Ok(exit_code)
}

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "adsync", version, about = "Multi-platform social-advertising ETL orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured platform set (or a single platform)
    Run(commands::run::RunArgs),
    /// Validate configuration and print the execution plan
    Check {
        /// Path to the orchestrator config YAML
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { &cli.log_level };
    logging::init(level);

    let code = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Check { config } => commands::check::execute(&config),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

//! Tessera CLI - validate, compile, plan and apply IAM topologies.
//!
//! Plans and applies run against a JSON live-state file through the
//! in-memory control plane. Exit codes: 0 success, 1 internal, 2 invalid
//! input or configuration, 3 validation failure, 4 apply or control-plane
//! failure.

mod commands;
mod output;
mod workspace;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tessera_core::config::TesseraConfig;
use tessera_core::telemetry::{self, LogFormat};
use tessera_core::{ErrorReport, TesseraError};

use commands::{apply, compile, config, plan, validate};
use output::OutputFormat;

/// Tessera - IAM topology synthesizer and reconciler
#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Tessera - IAM topology synthesizer and reconciler",
    long_about = "Synthesizes MFA-gated cross-account IAM roles, groups and memberships from a \
                  declarative topology, and reconciles live state towards it.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Settings file (reconcile, policy and logging sections)
    #[arg(short, long, global = true, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directives, overriding the settings file
    #[arg(long, global = true, env = "TESSERA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format, overriding the settings file
    #[arg(long, global = true)]
    log_format: Option<LogFormatArg>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Pretty,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check a topology against the safety invariants
    Validate(validate::ValidateArgs),

    /// Render scope permission policies
    Compile(compile::CompileArgs),

    /// Show the operations needed to reach the topology
    Plan(plan::PlanArgs),

    /// Apply the operations needed to reach the topology
    Apply(apply::ApplyArgs),

    /// CLI defaults management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    if let Err(e) = run(cli).await {
        report_error(&e, format);
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        output: format,
        config: settings_path,
        log_level,
        log_format,
        command,
        ..
    } = cli;

    let prepare = || -> Result<TesseraConfig> {
        let mut settings = workspace::load_settings(settings_path.as_deref())?;
        if let Some(level) = log_level.clone() {
            settings.logging.level = level;
        }
        if let Some(log_format) = log_format {
            settings.logging.format = log_format.into();
        }
        telemetry::init_logging(&settings.logging)?;
        telemetry::describe_metrics();
        Ok(settings)
    };

    match command {
        Commands::Validate(args) => validate::execute(args, &prepare()?, format).await,
        Commands::Compile(args) => compile::execute(args, &prepare()?, format).await,
        Commands::Plan(args) => plan::execute(args, &prepare()?, format).await,
        Commands::Apply(args) => apply::execute(args, &prepare()?, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<TesseraError>()
        .map(TesseraError::exit_code)
        .unwrap_or(1)
}

fn report_error(error: &anyhow::Error, format: OutputFormat) {
    let Some(tessera) = error.downcast_ref::<TesseraError>() else {
        output::print_error(&format!("{:#}", error));
        return;
    };

    tessera.log();
    match format {
        OutputFormat::Table => {
            output::print_error(&format!("{:#}", error));
            if let Some(suggestion) = &tessera.details().suggested_action {
                output::print_info(suggestion);
            }
        }
        _ => {
            let report = ErrorReport::from(tessera);
            match serde_json::to_string_pretty(&report) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => output::print_error(&format!("{:#}", error)),
            }
        }
    }
}

//! `tessera apply`: reconcile the state file towards the topology.
//!
//! The state file is written back after every run that reached the control
//! plane, including halted ones, so a re-plan sees exactly what landed.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use tessera_core::apply::ApplyReport;
use tessera_core::config::TesseraConfig;
use tessera_core::orchestrator::{ApplyStatus, ReconcileOptions};
use tessera_core::TesseraError;

use super::{print_plan, print_validation_warnings, OperationRow, TopologyArg};
use crate::output::{self, OutputFormat};
use crate::workspace::{self, StateFile};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub topology: TopologyArg,

    /// Live-state file (defaults to the `state-file` setting, then tessera-state.json)
    #[arg(short, long, env = "TESSERA_STATE_FILE")]
    pub state: Option<PathBuf>,

    /// Apply without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Serialize)]
struct ApplySummary<'a> {
    state_file: String,
    #[serde(flatten)]
    report: &'a ApplyReport,
}

pub async fn execute(args: ApplyArgs, config: &TesseraConfig, format: OutputFormat) -> Result<()> {
    let topology = workspace::load_topology(&args.topology.path)?;
    let state = StateFile::resolve(args.state);
    let iam = state.open()?;
    let orchestrator = workspace::orchestrator(config, &iam)?;

    if !args.yes {
        let (plan, report) = orchestrator.plan(&topology).await?;
        print_validation_warnings(report.warnings());
        print_plan(&plan, format)?;
        if !plan.is_empty() {
            output::print_info(&format!(
                "Re-run with --yes to apply {} operation(s) to {}",
                plan.len(),
                state.path().display()
            ));
        }
        return Ok(());
    }

    let outcome = orchestrator
        .reconcile(&topology, ReconcileOptions::default())
        .await?;
    print_validation_warnings(&outcome.warnings);
    state.persist(&iam)?;

    match outcome.apply {
        ApplyStatus::Applied(report) => {
            match format {
                OutputFormat::Table if report.completed.is_empty() => {
                    output::print_success("No changes. Live state matches the topology.");
                }
                OutputFormat::Table => {
                    output::print_list(&OperationRow::rows(&report.completed), format)?;
                    output::print_success(&format!(
                        "Applied {} operation(s) in run {} ({} ms)",
                        report.completed.len(),
                        report.run_id,
                        (report.finished_at - report.started_at).num_milliseconds()
                    ));
                }
                _ => output::print_item(
                    &ApplySummary {
                        state_file: state.path().display().to_string(),
                        report: &report,
                    },
                    format,
                )?,
            }
            Ok(())
        }
        ApplyStatus::Halted(error) => {
            output::print_error(&format!("Failed: {}", error.failed));
            output::print_info(&format!(
                "{} operation(s) completed, {} pending; state saved to {}",
                error.completed.len(),
                error.pending.len(),
                state.path().display()
            ));
            Err(TesseraError::from(error).into())
        }
        ApplyStatus::DryRun => Ok(()),
    }
}

//! Subcommands of the `tessera` CLI.

pub mod apply;
pub mod compile;
pub mod config;
pub mod plan;
pub mod validate;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use tessera_core::reconcile::{Operation, Plan};
use tessera_core::validation::Violation;

use crate::output::{self, OutputFormat};

/// Positional topology document argument.
#[derive(Args, Debug, Clone)]
pub struct TopologyArg {
    /// Topology document (.yaml, .yml, .json or .toml)
    #[arg(value_name = "TOPOLOGY", env = "TESSERA_TOPOLOGY")]
    pub path: PathBuf,
}

// ── Plan rendering ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Tabled)]
pub(crate) struct OperationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Operation")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
}

impl OperationRow {
    pub(crate) fn rows(operations: &[Operation]) -> Vec<Self> {
        operations
            .iter()
            .enumerate()
            .map(|(i, op)| Self {
                index: i + 1,
                kind: op.kind().to_string(),
                target: op.target(),
            })
            .collect()
    }
}

/// Print a plan: a table with a per-kind summary, or the serialized plan.
pub(crate) fn print_plan(plan: &Plan, format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Table {
        return output::print_item(plan, format);
    }

    for warning in &plan.warnings {
        output::print_warning(&warning.to_string());
    }

    if plan.is_empty() {
        output::print_success("No changes. Live state matches the topology.");
        return Ok(());
    }

    output::print_list(&OperationRow::rows(&plan.operations), format)?;

    let summary = plan
        .summary()
        .iter()
        .map(|(kind, count)| format!("{} {}", count, kind))
        .collect::<Vec<_>>()
        .join(", ");
    output::print_info(&format!("Plan: {} operation(s): {}", plan.len(), summary));
    if plan.has_destructive() {
        output::print_warning("Plan removes access or deletes managed entities");
    }
    Ok(())
}

/// Report non-fatal validation findings on stderr.
pub(crate) fn print_validation_warnings<'a>(warnings: impl IntoIterator<Item = &'a Violation>) {
    for warning in warnings {
        output::print_warning(&warning.to_string());
    }
}

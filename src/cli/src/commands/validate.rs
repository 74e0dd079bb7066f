//! `tessera validate`: check a topology against the safety invariants without
//! touching any live state.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use tessera_core::config::TesseraConfig;
use tessera_core::policy::PolicyCompiler;
use tessera_core::reconcile::DesiredState;
use tessera_core::topology::NamingConvention;
use tessera_core::validation::{ConstraintValidator, Severity, ValidationReport, Violation};

use super::TopologyArg;
use crate::output::{self, OutputFormat};
use crate::workspace;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub topology: TopologyArg,
}

#[derive(Debug, Serialize, Tabled)]
struct ViolationRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&Violation> for ViolationRow {
    fn from(violation: &Violation) -> Self {
        Self {
            severity: match violation.severity {
                Severity::Fatal => "fatal".to_string(),
                Severity::Warning => "warning".to_string(),
            },
            code: violation.kind.to_string(),
            subject: violation.subject.clone(),
            message: violation.message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidationSummary<'a> {
    accounts: usize,
    scopes: usize,
    users: usize,
    roles: usize,
    groups: usize,
    report: &'a ValidationReport,
}

pub async fn execute(args: ValidateArgs, config: &TesseraConfig, format: OutputFormat) -> Result<()> {
    let topology = workspace::load_topology(&args.topology.path)?;
    let compiler = PolicyCompiler::new(
        NamingConvention::from_config(&config.reconcile)?,
        config.policy.clone(),
    );
    let desired = DesiredState::synthesize(&topology, &compiler)?;
    let report = ConstraintValidator::from_config(&config.reconcile)?.validate(&topology, &desired);

    let summary = ValidationSummary {
        accounts: topology.accounts().len(),
        scopes: topology.scopes().len(),
        users: topology.assigned_users().len(),
        roles: desired.roles.len(),
        groups: desired.groups.len(),
        report: &report,
    };

    match format {
        OutputFormat::Table => {
            output::print_header("Topology");
            output::print_detail("Accounts", &summary.accounts.to_string());
            output::print_detail("Scopes", &summary.scopes.to_string());
            output::print_detail("Assigned users", &summary.users.to_string());
            output::print_detail("Roles", &summary.roles.to_string());
            output::print_detail("Groups", &summary.groups.to_string());
            println!();

            let rows: Vec<ViolationRow> = report.violations.iter().map(ViolationRow::from).collect();
            if let Some(table) = output::render_table(&rows) {
                println!("{}", table);
            }
        }
        _ => output::print_item(&summary, format)?,
    }

    let report = report.into_result()?;
    if format == OutputFormat::Table {
        output::print_success(&format!(
            "Topology is valid ({} warning(s))",
            report.warnings().count()
        ));
    }
    Ok(())
}

//! `tessera compile`: render scope permission policies.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tabled::Tabled;

use tessera_core::config::TesseraConfig;
use tessera_core::policy::{PolicyCompiler, PolicyDocument};
use tessera_core::topology::{NamingConvention, ScopeName};
use tessera_core::TesseraError;

use super::TopologyArg;
use crate::output::{self, OutputFormat};
use crate::workspace;

#[derive(Args, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub topology: TopologyArg,

    /// Only compile this scope
    #[arg(short, long)]
    pub scope: Option<String>,

    /// Write each policy to `<DIR>/<scope>.json` instead of printing
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Tabled)]
struct PolicyRow {
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Allow")]
    allow: usize,
    #[tabled(rename = "Deny")]
    deny: usize,
    #[tabled(rename = "Fingerprint")]
    fingerprint: String,
}

impl PolicyRow {
    fn new(scope: &ScopeName, document: &PolicyDocument) -> Result<Self> {
        let mut fingerprint = document.fingerprint()?;
        fingerprint.truncate(12);
        Ok(Self {
            scope: scope.to_string(),
            allow: document.allows().count(),
            deny: document.denies().count(),
            fingerprint,
        })
    }
}

pub async fn execute(args: CompileArgs, config: &TesseraConfig, format: OutputFormat) -> Result<()> {
    let topology = workspace::load_topology(&args.topology.path)?;
    let compiler = PolicyCompiler::new(
        NamingConvention::from_config(&config.reconcile)?,
        config.policy.clone(),
    );

    let mut policies = compiler.compile_all(&topology)?;
    if let Some(name) = &args.scope {
        let scope = ScopeName::new(name.as_str());
        let document = policies.remove(&scope).ok_or_else(|| {
            TesseraError::unknown_reference("scope", name.as_str(), "--scope")
        })?;
        policies = BTreeMap::from([(scope, document)]);
    }

    if let Some(dir) = &args.out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        for (scope, document) in &policies {
            let path = dir.join(format!("{}.json", scope));
            std::fs::write(&path, document.pretty()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        output::print_success(&format!(
            "Wrote {} polic{} to {}",
            policies.len(),
            if policies.len() == 1 { "y" } else { "ies" },
            dir.display()
        ));
        return Ok(());
    }

    match format {
        OutputFormat::Table if args.scope.is_some() => {
            for document in policies.values() {
                println!("{}", document.pretty()?);
            }
        }
        OutputFormat::Table => {
            let rows = policies
                .iter()
                .map(|(scope, document)| PolicyRow::new(scope, document))
                .collect::<Result<Vec<_>>>()?;
            output::print_list(&rows, format)?;
        }
        _ => output::print_item(&policies, format)?,
    }
    Ok(())
}

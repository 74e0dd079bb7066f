//! `tessera plan`: diff the topology against the state file.

use anyhow::{anyhow, Result};
use clap::Args;
use std::path::PathBuf;

use tessera_core::config::TesseraConfig;
use tessera_core::reconcile::{render_script, ScriptOptions};

use super::{config as defaults, print_plan, print_validation_warnings, TopologyArg};
use crate::output::OutputFormat;
use crate::workspace::{self, StateFile};

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub topology: TopologyArg,

    /// Live-state file (defaults to the `state-file` setting, then tessera-state.json)
    #[arg(short, long, env = "TESSERA_STATE_FILE")]
    pub state: Option<PathBuf>,

    /// Print the plan as an `aws iam` shell script
    #[arg(long)]
    pub script: bool,

    /// AWS CLI profile for an account in the script, as ACCOUNT=PROFILE
    #[arg(long = "profile", value_name = "ACCOUNT=PROFILE", value_parser = parse_profile)]
    pub profiles: Vec<(String, String)>,
}

fn parse_profile(value: &str) -> Result<(String, String)> {
    let (account, profile) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected ACCOUNT=PROFILE, got '{}'", value))?;
    if account.is_empty() || profile.is_empty() {
        return Err(anyhow!("expected ACCOUNT=PROFILE, got '{}'", value));
    }
    Ok((account.to_string(), profile.to_string()))
}

pub async fn execute(args: PlanArgs, config: &TesseraConfig, format: OutputFormat) -> Result<()> {
    let topology = workspace::load_topology(&args.topology.path)?;
    let state = StateFile::resolve(args.state);
    let iam = state.open()?;

    let (plan, report) = workspace::orchestrator(config, &iam)?.plan(&topology).await?;
    print_validation_warnings(report.warnings());

    if args.script {
        let mut options = ScriptOptions::default();
        let saved = defaults::load_config()?.profiles();
        for (account, profile) in saved.into_iter().chain(args.profiles) {
            options = options.with_profile(account, profile);
        }
        print!("{}", render_script(&plan, &options)?);
        return Ok(());
    }

    print_plan(&plan, format)
}

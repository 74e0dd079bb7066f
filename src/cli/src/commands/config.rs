//! CLI defaults management.
//!
//! Stores CLI defaults in `~/.tessera/config.toml`. These are operator
//! conveniences (which state file and settings file to use, AWS CLI profiles
//! for rendered scripts); reconciliation settings themselves live in the
//! Tessera configuration file.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

/// Path of the Tessera settings file (`TesseraConfig`).
pub const CONFIG_FILE_KEY: &str = "config-file";
/// Path of the JSON live-state file used by `plan` and `apply`.
pub const STATE_FILE_KEY: &str = "state-file";
/// Prefix for per-account AWS CLI profiles, e.g. `profile.222222222222`.
pub const PROFILE_PREFIX: &str = "profile.";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a default value
    Set {
        /// Key (config-file, state-file, or profile.<account-id>)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a default value
    Get {
        /// Key
        key: String,
    },

    /// Show all defaults
    Show,

    /// Reset defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Persistent CLI defaults stored on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl CliConfig {
    /// AWS CLI profile per account id, from `profile.<account-id>` keys.
    pub fn profiles(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(PROFILE_PREFIX)
                    .map(|account| (account.to_string(), value.clone()))
            })
            .collect()
    }
}

fn check_key(key: &str) -> Result<()> {
    if key == CONFIG_FILE_KEY || key == STATE_FILE_KEY {
        return Ok(());
    }
    if let Some(account) = key.strip_prefix(PROFILE_PREFIX) {
        if account.len() == 12 && account.chars().all(|c| c.is_ascii_digit()) {
            return Ok(());
        }
        bail!("'{}' must name a twelve-digit account id", key);
    }
    bail!(
        "Unknown key '{}'; expected {}, {} or {}<account-id>",
        key,
        CONFIG_FILE_KEY,
        STATE_FILE_KEY,
        PROFILE_PREFIX
    )
}

/// Return the path to the defaults file (`~/.tessera/config.toml`).
fn config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".tessera").join("config.toml"))
}

/// Load the CLI defaults from disk, returning empty defaults if the file does
/// not exist.
pub fn load_config() -> Result<CliConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(CliConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg: CliConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(cfg)
}

/// Save the CLI defaults to disk, creating the directory if needed.
fn save_config(cfg: &CliConfig) -> Result<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Look up a single default, ignoring an unreadable defaults file.
pub fn load_value(key: &str) -> Option<String> {
    load_config().ok().and_then(|cfg| cfg.values.get(key).cloned())
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => {
            check_key(&key)?;
            let mut cfg = load_config()?;
            cfg.values.insert(key.clone(), value.clone());
            save_config(&cfg)?;

            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key, value)),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Get { key } => {
            let cfg = load_config()?;
            let Some(value) = cfg.values.get(&key) else {
                bail!("Key '{}' not found", key);
            };
            match format {
                OutputFormat::Table => println!("{}", value),
                _ => output::print_item(&serde_json::json!({ "key": key, "value": value }), format)?,
            }
        }

        ConfigCommands::Show => {
            let cfg = load_config()?;

            if cfg.values.is_empty() {
                output::print_info("No defaults set.");
                return Ok(());
            }

            match format {
                OutputFormat::Table => {
                    output::print_header("CLI defaults");
                    for (k, v) in &cfg.values {
                        output::print_detail(k, v);
                    }
                }
                _ => output::print_item(&cfg.values, format)?,
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will remove all CLI defaults. Use --force to confirm.");
                return Ok(());
            }

            let path = config_path()?;
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }

            output::print_success("CLI defaults reset");
        }
    }

    Ok(())
}

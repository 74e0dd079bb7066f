//! Settings, topology and state-file loading shared by the commands.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_core::apply::InMemoryIam;
use tessera_core::config::TesseraConfig;
use tessera_core::orchestrator::ReconcileOrchestrator;
use tessera_core::reconcile::LiveState;
use tessera_core::topology::{Topology, TopologyDocument};

use crate::commands::config::{self as defaults, CONFIG_FILE_KEY, STATE_FILE_KEY};

/// State file used when neither `--state` nor a default is given.
pub const DEFAULT_STATE_FILE: &str = "tessera-state.json";

/// Load settings from `explicit`, else the `config-file` default, else the
/// environment alone.
pub fn load_settings(explicit: Option<&Path>) -> Result<TesseraConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| defaults::load_value(CONFIG_FILE_KEY).map(PathBuf::from));

    let Some(path) = path else {
        return Ok(TesseraConfig::load()?);
    };
    let name = path
        .to_str()
        .with_context(|| format!("Settings path is not valid UTF-8: {}", path.display()))?;
    TesseraConfig::from_file(name).with_context(|| format!("Failed to load settings from {}", name))
}

/// Read and snapshot a topology document.
pub fn load_topology(path: &Path) -> Result<Topology> {
    let document = TopologyDocument::from_path(path)?;
    let topology = document
        .into_topology()
        .with_context(|| format!("Invalid topology in {}", path.display()))?;
    Ok(topology)
}

/// JSON file holding the live IAM state that `plan` and `apply` work against.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `explicit`, else the `state-file` default, else [`DEFAULT_STATE_FILE`].
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let path = explicit
            .or_else(|| defaults::load_value(STATE_FILE_KEY).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the state as an in-memory IAM. A missing file is an empty state.
    pub fn open(&self) -> Result<Arc<InMemoryIam>> {
        let state = LiveState::load(&self.path)
            .with_context(|| format!("Failed to load state file {}", self.path.display()))?;
        Ok(Arc::new(InMemoryIam::new(state)))
    }

    /// Write back whatever the IAM currently holds.
    pub fn persist(&self, iam: &InMemoryIam) -> Result<()> {
        iam.state()
            .save(&self.path)
            .with_context(|| format!("Failed to write state file {}", self.path.display()))?;
        Ok(())
    }
}

/// Orchestrator reading from and writing to `iam`.
pub fn orchestrator(config: &TesseraConfig, iam: &Arc<InMemoryIam>) -> Result<ReconcileOrchestrator> {
    Ok(ReconcileOrchestrator::new(config, iam.clone(), iam.clone())?)
}

//! Topology configuration document.
//!
//! The on-disk form of a topology. YAML, JSON and TOML are accepted, chosen
//! by file extension:
//!
//! ```yaml
//! accounts:
//!   - { id: "111111111111", name: M, kind: management }
//!   - { id: "222222222222", name: A, kind: target }
//! scopes:
//!   - name: ec2
//!     allow: ["ec2:*"]
//!     deny: ["ec2:*Vpc*"]
//! assignments:
//!   - { user: alice, scope: ec2, account: A }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{Result, TesseraError};

use super::model::{Account, Assignment, Scope, UserHome};
use super::{Topology, TopologyBuilder};

/// Serialization format of a topology document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    /// Pick a format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(TesseraError::invalid_input(format!(
                "Unsupported topology file extension {:?} for {}; expected .yaml, .yml, .json or .toml",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }
}

/// Declarative topology as written by operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDocument {
    #[serde(default)]
    pub accounts: Vec<Account>,

    #[serde(default)]
    pub scopes: Vec<Scope>,

    /// Explicit user homes; users not listed live in the first management account.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserHome>,

    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

impl TopologyDocument {
    /// Parse a document from text.
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        let document = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(text)?,
            DocumentFormat::Json => serde_json::from_str(text)?,
            DocumentFormat::Toml => toml::from_str(text)?,
        };
        Ok(document)
    }

    /// Read a document from disk, choosing the format by extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = DocumentFormat::from_path(path)?;
        let text = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::from(e).with_context("path", path.display().to_string())
        })?;

        debug!(path = %path.display(), ?format, "Loading topology document");
        Self::parse(&text, format)
    }

    /// Render the document in the given format.
    pub fn render(&self, format: DocumentFormat) -> Result<String> {
        let text = match format {
            DocumentFormat::Yaml => serde_yaml::to_string(self)?,
            DocumentFormat::Json => serde_json::to_string_pretty(self)?,
            DocumentFormat::Toml => toml::to_string_pretty(self)?,
        };
        Ok(text)
    }

    /// Feed every entry through the builder, in declaration order.
    pub fn to_builder(&self) -> Result<TopologyBuilder> {
        let mut builder = TopologyBuilder::new();
        for account in &self.accounts {
            builder.add_account(account.id.clone(), account.name.clone(), account.kind)?;
        }
        for scope in &self.scopes {
            builder.add_scope(scope.clone())?;
        }
        for user in &self.users {
            builder.add_user(user.name.clone(), user.account.clone())?;
        }
        for assignment in &self.assignments {
            builder.add_assignment(
                assignment.user.clone(),
                assignment.scope.clone(),
                assignment.account.clone(),
            )?;
        }
        Ok(builder)
    }

    /// Build and freeze the topology.
    pub fn into_topology(self) -> Result<Topology> {
        self.to_builder()?.snapshot()
    }

    pub(crate) fn from_topology(topology: &Topology) -> Self {
        Self {
            accounts: topology.accounts().to_vec(),
            scopes: topology.scopes().to_vec(),
            users: topology.user_homes().to_vec(),
            assignments: topology.assignments().to_vec(),
        }
    }
}

//! Configuration management.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TesseraError};
use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TesseraConfig {
    /// Reconciliation configuration
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Policy rendering configuration
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Maximum group memberships per user, baseline group included.
    /// IAM's documented quota is 10.
    #[serde(default = "default_group_ceiling")]
    pub group_ceiling: usize,

    /// Treat a scope assigned in only some target accounts as fatal
    #[serde(default)]
    pub strict_symmetry: bool,

    /// IAM path that marks roles and groups owned by Tessera
    #[serde(default = "default_managed_path")]
    pub managed_path: String,

    /// Name of the group every assigned user joins
    #[serde(default = "default_baseline_group")]
    pub baseline_group: String,

    /// ARN partition (`aws`, `aws-cn`, `aws-us-gov`)
    #[serde(default = "default_partition")]
    pub partition: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            group_ceiling: default_group_ceiling(),
            strict_symmetry: false,
            managed_path: default_managed_path(),
            baseline_group: default_baseline_group(),
            partition: default_partition(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    /// Upper bound on MFA session age accepted by role trust policies
    #[serde(default, with = "humantime_serde")]
    pub mfa_max_age: Option<Duration>,

    /// Inline policy name carrying a role's scope permissions
    #[serde(default = "default_role_policy_name")]
    pub role_policy_name: String,

    /// Inline policy name carrying a group's assume-role grant
    #[serde(default = "default_delegation_policy_name")]
    pub delegation_policy_name: String,

    /// Inline policy name carrying the baseline self-service grant
    #[serde(default = "default_self_service_policy_name")]
    pub self_service_policy_name: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mfa_max_age: None,
            role_policy_name: default_role_policy_name(),
            delegation_policy_name: default_delegation_policy_name(),
            self_service_policy_name: default_self_service_policy_name(),
        }
    }
}

// Default value functions
fn default_group_ceiling() -> usize { 10 }
fn default_managed_path() -> String { "/tessera/".to_string() }
fn default_baseline_group() -> String { "users".to_string() }
fn default_partition() -> String { "aws".to_string() }
fn default_role_policy_name() -> String { "scope-permissions".to_string() }
fn default_delegation_policy_name() -> String { "assume-role".to_string() }
fn default_self_service_policy_name() -> String { "self-service".to_string() }

impl TesseraConfig {
    /// Load configuration from the environment (`TESSERA__SECTION__KEY`).
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("TESSERA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: TesseraConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("TESSERA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: TesseraConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the rest of the crate cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.reconcile.group_ceiling == 0 {
            return Err(TesseraError::configuration(
                "reconcile.group_ceiling must be at least 1",
            ));
        }
        let path = &self.reconcile.managed_path;
        if !path.starts_with('/') || !path.ends_with('/') {
            return Err(TesseraError::configuration(format!(
                "reconcile.managed_path must begin and end with '/': {}",
                path
            )));
        }
        if path == "/" {
            return Err(TesseraError::configuration(
                "reconcile.managed_path must not be '/', it would claim every IAM entity",
            ));
        }
        if self.reconcile.baseline_group.trim().is_empty() {
            return Err(TesseraError::configuration(
                "reconcile.baseline_group must not be empty",
            ));
        }
        if let Some(age) = self.policy.mfa_max_age {
            if age.as_secs() == 0 {
                return Err(TesseraError::configuration(
                    "policy.mfa_max_age must be at least one second",
                ));
            }
        }
        Ok(())
    }
}

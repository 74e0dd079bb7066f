//! Naming convention for everything Tessera creates.
//!
//! Roles are named after their scope, groups are `{scope}-{account}`, and
//! both live under the managed IAM path. Anything outside that path is
//! invisible to the reconciler's update and delete logic.

use crate::config::ReconcileConfig;
use crate::error::{Result, TesseraError};

use super::model::{Account, AccountName, ScopeName};

/// Derives IAM names and ARNs from topology entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConvention {
    partition: String,
    managed_path: String,
    baseline_group: String,
}

impl NamingConvention {
    pub fn new(
        partition: impl Into<String>,
        managed_path: impl Into<String>,
        baseline_group: impl Into<String>,
    ) -> Result<Self> {
        let managed_path = managed_path.into();
        if !managed_path.starts_with('/') || !managed_path.ends_with('/') || managed_path == "/" {
            return Err(TesseraError::configuration(format!(
                "Managed path must be a non-root IAM path such as /tessera/: {}",
                managed_path
            )));
        }
        Ok(Self {
            partition: partition.into(),
            managed_path,
            baseline_group: baseline_group.into(),
        })
    }

    pub fn from_config(config: &ReconcileConfig) -> Result<Self> {
        Self::new(
            config.partition.clone(),
            config.managed_path.clone(),
            config.baseline_group.clone(),
        )
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn managed_path(&self) -> &str {
        &self.managed_path
    }

    pub fn baseline_group(&self) -> &str {
        &self.baseline_group
    }

    /// Whether an entity at `path` belongs to Tessera.
    pub fn is_managed(&self, path: &str) -> bool {
        path.starts_with(&self.managed_path)
    }

    pub fn role_name(&self, scope: &ScopeName) -> String {
        scope.to_string()
    }

    pub fn role_arn(&self, account: &Account, scope: &ScopeName) -> String {
        format!(
            "arn:{}:iam::{}:role{}{}",
            self.partition,
            account.id,
            self.managed_path,
            self.role_name(scope)
        )
    }

    pub fn group_name(&self, scope: &ScopeName, account: &AccountName) -> String {
        format!("{}-{}", scope, account)
    }

    /// Root principal of an account, as trusted by role trust policies.
    pub fn account_root(&self, account: &Account) -> String {
        format!("arn:{}:iam::{}:root", self.partition, account.id)
    }

    /// ARN of whichever user is making the request, for self-service grants.
    pub fn requesting_user_arn(&self, account: &Account) -> String {
        format!("arn:{}:iam::{}:user/${{aws:username}}", self.partition, account.id)
    }

    /// ARN of the requesting user's virtual MFA device.
    pub fn requesting_user_mfa_arn(&self, account: &Account) -> String {
        format!("arn:{}:iam::{}:mfa/${{aws:username}}", self.partition, account.id)
    }
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            partition: "aws".to_string(),
            managed_path: "/tessera/".to_string(),
            baseline_group: "users".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::AccountKind;

    fn target() -> Account {
        Account::new("222222222222", "A", AccountKind::Target)
    }

    #[test]
    fn test_role_arn_includes_path() {
        let naming = NamingConvention::default();
        assert_eq!(
            naming.role_arn(&target(), &ScopeName::new("vpc")),
            "arn:aws:iam::222222222222:role/tessera/vpc"
        );
    }

    #[test]
    fn test_group_name() {
        let naming = NamingConvention::default();
        assert_eq!(
            naming.group_name(&ScopeName::new("ec2"), &AccountName::new("B")),
            "ec2-B"
        );
    }

    #[test]
    fn test_requesting_user_arn_keeps_policy_variable() {
        let naming = NamingConvention::default();
        let management = Account::new("111111111111", "M", AccountKind::Management);
        assert_eq!(
            naming.requesting_user_arn(&management),
            "arn:aws:iam::111111111111:user/${aws:username}"
        );
    }

    #[test]
    fn test_managed_path_detection() {
        let naming = NamingConvention::default();
        assert!(naming.is_managed("/tessera/"));
        assert!(naming.is_managed("/tessera/nested/"));
        assert!(!naming.is_managed("/"));
        assert!(!naming.is_managed("/tesseract/"));
    }

    #[test]
    fn test_rejects_root_path() {
        assert!(NamingConvention::new("aws", "/", "users").is_err());
        assert!(NamingConvention::new("aws", "tessera", "users").is_err());
    }

    #[test]
    fn test_other_partition() {
        let naming = NamingConvention::new("aws-cn", "/ops/", "users").unwrap();
        assert_eq!(
            naming.role_arn(&target(), &ScopeName::new("admin")),
            "arn:aws-cn:iam::222222222222:role/ops/admin"
        );
    }
}

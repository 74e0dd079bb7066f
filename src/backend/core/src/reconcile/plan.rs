//! Ordered, typed operation sets produced by the diff.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::policy::PolicyDocument;
use crate::topology::{AccountId, UserName};

use super::desired::RoleSpec;

// ═══════════════════════════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════════════════════════

/// One IAM mutation. Applying it through an
/// [`IamControlPlane`](crate::apply::IamControlPlane) is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    CreateRole(RoleSpec),
    UpdateRole {
        spec: RoleSpec,
        /// Inline policies on the live role that the spec does not name.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        stale_policies: Vec<String>,
    },
    /// Recreate a managed role whose live path differs from the spec. IAM
    /// cannot move a role, so it is deleted and created again.
    ReplaceRole {
        spec: RoleSpec,
        previous_path: String,
        /// Inline policies on the live role, removed before the delete.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        inline_policies: Vec<String>,
    },
    DeleteRole {
        account: AccountId,
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        inline_policies: Vec<String>,
    },
    CreateGroup {
        account: AccountId,
        name: String,
        path: String,
    },
    DeleteGroup {
        account: AccountId,
        name: String,
    },
    PutGroupPolicy {
        account: AccountId,
        group: String,
        policy_name: String,
        document: PolicyDocument,
    },
    DeleteGroupPolicy {
        account: AccountId,
        group: String,
        policy_name: String,
    },
    AddMembership {
        account: AccountId,
        user: UserName,
        group: String,
    },
    RemoveMembership {
        account: AccountId,
        user: UserName,
        group: String,
    },
}

/// Operation discriminant, ordered by execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateRole,
    UpdateRole,
    ReplaceRole,
    CreateGroup,
    PutGroupPolicy,
    AddMembership,
    RemoveMembership,
    DeleteGroupPolicy,
    DeleteGroup,
    DeleteRole,
}

impl OperationKind {
    /// Execution phase. Creates run role, group, policy, membership; deletes
    /// run in the reverse dependency order afterwards.
    pub const fn phase(&self) -> u8 {
        match self {
            Self::CreateRole | Self::UpdateRole | Self::ReplaceRole => 0,
            Self::CreateGroup => 1,
            Self::PutGroupPolicy => 2,
            Self::AddMembership => 3,
            Self::RemoveMembership => 4,
            Self::DeleteGroupPolicy => 5,
            Self::DeleteGroup => 6,
            Self::DeleteRole => 7,
        }
    }

    pub const fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::ReplaceRole
                | Self::RemoveMembership
                | Self::DeleteGroupPolicy
                | Self::DeleteGroup
                | Self::DeleteRole
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRole => "create_role",
            Self::UpdateRole => "update_role",
            Self::ReplaceRole => "replace_role",
            Self::CreateGroup => "create_group",
            Self::PutGroupPolicy => "put_group_policy",
            Self::AddMembership => "add_membership",
            Self::RemoveMembership => "remove_membership",
            Self::DeleteGroupPolicy => "delete_group_policy",
            Self::DeleteGroup => "delete_group",
            Self::DeleteRole => "delete_role",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateRole(_) => OperationKind::CreateRole,
            Self::UpdateRole { .. } => OperationKind::UpdateRole,
            Self::ReplaceRole { .. } => OperationKind::ReplaceRole,
            Self::DeleteRole { .. } => OperationKind::DeleteRole,
            Self::CreateGroup { .. } => OperationKind::CreateGroup,
            Self::DeleteGroup { .. } => OperationKind::DeleteGroup,
            Self::PutGroupPolicy { .. } => OperationKind::PutGroupPolicy,
            Self::DeleteGroupPolicy { .. } => OperationKind::DeleteGroupPolicy,
            Self::AddMembership { .. } => OperationKind::AddMembership,
            Self::RemoveMembership { .. } => OperationKind::RemoveMembership,
        }
    }

    pub fn account(&self) -> &AccountId {
        match self {
            Self::CreateRole(spec)
            | Self::UpdateRole { spec, .. }
            | Self::ReplaceRole { spec, .. } => &spec.account,
            Self::DeleteRole { account, .. }
            | Self::CreateGroup { account, .. }
            | Self::DeleteGroup { account, .. }
            | Self::PutGroupPolicy { account, .. }
            | Self::DeleteGroupPolicy { account, .. }
            | Self::AddMembership { account, .. }
            | Self::RemoveMembership { account, .. } => account,
        }
    }

    /// Identifier of the entity the operation touches, e.g.
    /// `111111111111:group/vpc-A/member/alice`.
    pub fn target(&self) -> String {
        match self {
            Self::CreateRole(spec)
            | Self::UpdateRole { spec, .. }
            | Self::ReplaceRole { spec, .. } => {
                format!("{}:role/{}", spec.account, spec.name)
            }
            Self::DeleteRole { account, name, .. } => format!("{}:role/{}", account, name),
            Self::CreateGroup { account, name, .. } | Self::DeleteGroup { account, name } => {
                format!("{}:group/{}", account, name)
            }
            Self::PutGroupPolicy {
                account,
                group,
                policy_name,
                ..
            }
            | Self::DeleteGroupPolicy {
                account,
                group,
                policy_name,
            } => format!("{}:group/{}/policy/{}", account, group, policy_name),
            Self::AddMembership {
                account,
                user,
                group,
            }
            | Self::RemoveMembership {
                account,
                user,
                group,
            } => format!("{}:group/{}/member/{}", account, group, user),
        }
    }

    fn sort_key(&self) -> (u8, String) {
        (self.kind().phase(), self.target())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.target())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plan
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-blocking observation made while diffing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    /// A membership names a user the management account does not have.
    UnknownUser { account: AccountId, user: UserName },
    /// A desired role or group name is taken by an entity outside the
    /// managed path; it is left untouched.
    UnmanagedCollision {
        account: AccountId,
        entity: String,
        path: String,
    },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownUser { account, user } => write!(
                f,
                "user '{}' does not exist in management account {}; membership will fail until it is created",
                user, account
            ),
            Self::UnmanagedCollision {
                account,
                entity,
                path,
            } => write!(
                f,
                "{} in account {} exists at unmanaged path {} and is left untouched",
                entity, account, path
            ),
        }
    }
}

/// Ordered operations plus warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PlanWarning>,
}

impl Plan {
    /// Build a plan, sorting operations into execution order.
    pub fn new(mut operations: Vec<Operation>, mut warnings: Vec<PlanWarning>) -> Self {
        operations.sort_by_cached_key(Operation::sort_key);
        warnings.sort();
        warnings.dedup();
        Self {
            operations,
            warnings,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Operation count per kind.
    pub fn summary(&self) -> BTreeMap<OperationKind, usize> {
        let mut counts = BTreeMap::new();
        for op in &self.operations {
            *counts.entry(op.kind()).or_insert(0) += 1;
        }
        counts
    }

    pub fn has_destructive(&self) -> bool {
        self.operations.iter().any(|op| op.kind().is_destructive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> AccountId {
        AccountId::new("111111111111")
    }

    #[test]
    fn test_plan_orders_by_phase_then_target() {
        let plan = Plan::new(
            vec![
                Operation::DeleteGroup {
                    account: account(),
                    name: "old-A".to_string(),
                },
                Operation::AddMembership {
                    account: account(),
                    user: UserName::new("bob"),
                    group: "vpc-A".to_string(),
                },
                Operation::CreateGroup {
                    account: account(),
                    name: "vpc-B".to_string(),
                    path: "/tessera/".to_string(),
                },
                Operation::CreateGroup {
                    account: account(),
                    name: "vpc-A".to_string(),
                    path: "/tessera/".to_string(),
                },
                Operation::RemoveMembership {
                    account: account(),
                    user: UserName::new("carol"),
                    group: "old-A".to_string(),
                },
            ],
            Vec::new(),
        );

        let kinds: Vec<OperationKind> = plan.operations.iter().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::CreateGroup,
                OperationKind::CreateGroup,
                OperationKind::AddMembership,
                OperationKind::RemoveMembership,
                OperationKind::DeleteGroup,
            ]
        );
        assert_eq!(plan.operations[0].target(), "111111111111:group/vpc-A");
        assert!(plan.has_destructive());
    }

    #[test]
    fn test_summary_counts() {
        let plan = Plan::new(
            vec![
                Operation::CreateGroup {
                    account: account(),
                    name: "a".to_string(),
                    path: "/tessera/".to_string(),
                },
                Operation::CreateGroup {
                    account: account(),
                    name: "b".to_string(),
                    path: "/tessera/".to_string(),
                },
            ],
            Vec::new(),
        );
        assert_eq!(plan.summary().get(&OperationKind::CreateGroup), Some(&2));
        assert!(!plan.has_destructive());
    }

    #[test]
    fn test_operation_serializes_with_kind_tag() {
        let op = Operation::RemoveMembership {
            account: account(),
            user: UserName::new("alice"),
            group: "vpc-A".to_string(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "remove_membership");
        assert_eq!(json["user"], "alice");
    }
}

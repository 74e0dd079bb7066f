//! Reconciliation: desired state vs. live state.
//!
//! This module provides:
//! - **Desired**: roles, groups and memberships synthesized from a topology
//! - **Live**: the snapshot type and its source trait
//! - **Plan**: ordered typed operations and warnings
//! - **Diff**: the set-difference producing a plan
//! - **Script**: a plan rendered as `aws iam` commands
//!
//! Only entities under the managed path are ever updated or deleted. Policy
//! text is compared in canonical form, so whitespace and key order in live
//! documents never cause churn.

pub mod desired;
pub mod live;
pub mod plan;
pub mod script;

pub use desired::{DesiredGroup, DesiredRole, DesiredState, GroupPurpose, RoleSpec};
pub use live::{AccountState, LiveGroup, LiveRole, LiveState, LiveStateSource};
pub use plan::{Operation, OperationKind, Plan, PlanWarning};
pub use script::{render_script, ScriptOptions};

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::policy::canonicalize;
use crate::topology::{AccountId, NamingConvention};

/// Computes the minimal plan moving live state to desired state.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    naming: NamingConvention,
}

impl Reconciler {
    pub fn new(naming: NamingConvention) -> Self {
        Self { naming }
    }

    #[instrument(skip_all, fields(roles = desired.roles.len(), groups = desired.groups.len()))]
    pub fn diff(&self, desired: &DesiredState, live: &LiveState) -> Result<Plan> {
        let mut ops = Vec::new();
        let mut warnings = Vec::new();

        self.diff_roles(desired, live, &mut ops, &mut warnings)?;
        self.diff_groups(desired, live, &mut ops, &mut warnings)?;

        let plan = Plan::new(ops, warnings);
        info!(
            operations = plan.len(),
            warnings = plan.warnings.len(),
            "Computed reconciliation plan"
        );
        Ok(plan)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    fn diff_roles(
        &self,
        desired: &DesiredState,
        live: &LiveState,
        ops: &mut Vec<Operation>,
        warnings: &mut Vec<PlanWarning>,
    ) -> Result<()> {
        for role in desired.roles.values() {
            let spec = &role.spec;
            let existing = live
                .account(&spec.account)
                .and_then(|account| account.roles.get(&spec.name));

            let Some(existing) = existing else {
                ops.push(Operation::CreateRole(spec.clone()));
                continue;
            };

            if !self.naming.is_managed(&existing.path) {
                warnings.push(PlanWarning::UnmanagedCollision {
                    account: spec.account.clone(),
                    entity: format!("role {}", spec.name),
                    path: existing.path.clone(),
                });
                continue;
            }

            // Role ARNs embed the path, so a role elsewhere under the managed
            // prefix is unreachable through the delegation groups.
            if existing.path != spec.path {
                debug!(
                    account = %spec.account,
                    role = %spec.name,
                    live_path = %existing.path,
                    "Role path drifted"
                );
                ops.push(Operation::ReplaceRole {
                    spec: spec.clone(),
                    previous_path: existing.path.clone(),
                    inline_policies: existing.policies.keys().cloned().collect(),
                });
                continue;
            }

            let trust_matches = same_policy(&existing.trust_policy, &spec.trust_policy.canonical()?);
            let desired_policy = spec.policy.canonical()?;
            let policy_matches = existing
                .policies
                .get(&spec.policy_name)
                .is_some_and(|text| same_policy(text, &desired_policy));
            let stale_policies: Vec<String> = existing
                .policies
                .keys()
                .filter(|name| **name != spec.policy_name)
                .cloned()
                .collect();

            if !trust_matches || !policy_matches || !stale_policies.is_empty() {
                debug!(account = %spec.account, role = %spec.name, "Role drifted");
                ops.push(Operation::UpdateRole {
                    spec: spec.clone(),
                    stale_policies,
                });
            }
        }

        for (account, state) in &live.accounts {
            for (name, role) in &state.roles {
                if !self.naming.is_managed(&role.path) || desired.role(account, name).is_some() {
                    continue;
                }
                ops.push(Operation::DeleteRole {
                    account: account.clone(),
                    name: name.clone(),
                    inline_policies: role.policies.keys().cloned().collect(),
                });
            }
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups, group policies and memberships
    // ─────────────────────────────────────────────────────────────────────────

    fn diff_groups(
        &self,
        desired: &DesiredState,
        live: &LiveState,
        ops: &mut Vec<Operation>,
        warnings: &mut Vec<PlanWarning>,
    ) -> Result<()> {
        for group in desired.groups.values() {
            let account_state = live.account(&group.account);
            let existing = account_state.and_then(|state| state.groups.get(&group.name));

            let (live_members, live_policies) = match existing {
                None => {
                    ops.push(Operation::CreateGroup {
                        account: group.account.clone(),
                        name: group.name.clone(),
                        path: group.path.clone(),
                    });
                    (BTreeSet::new(), BTreeMap::new())
                }
                Some(existing) if !self.naming.is_managed(&existing.path) => {
                    warnings.push(PlanWarning::UnmanagedCollision {
                        account: group.account.clone(),
                        entity: format!("group {}", group.name),
                        path: existing.path.clone(),
                    });
                    continue;
                }
                Some(existing) => (existing.members.clone(), existing.policies.clone()),
            };

            let desired_policy = group.policy.canonical()?;
            let policy_current = live_policies
                .get(&group.policy_name)
                .is_some_and(|text| same_policy(text, &desired_policy));
            if !policy_current {
                ops.push(Operation::PutGroupPolicy {
                    account: group.account.clone(),
                    group: group.name.clone(),
                    policy_name: group.policy_name.clone(),
                    document: group.policy.clone(),
                });
            }
            for policy_name in live_policies.keys().filter(|n| **n != group.policy_name) {
                ops.push(Operation::DeleteGroupPolicy {
                    account: group.account.clone(),
                    group: group.name.clone(),
                    policy_name: policy_name.clone(),
                });
            }

            for user in group.members.difference(&live_members) {
                let known = account_state.is_some_and(|state| state.users.contains(user));
                if !known {
                    warnings.push(PlanWarning::UnknownUser {
                        account: group.account.clone(),
                        user: user.clone(),
                    });
                }
                ops.push(Operation::AddMembership {
                    account: group.account.clone(),
                    user: user.clone(),
                    group: group.name.clone(),
                });
            }
            for user in live_members.difference(&group.members) {
                ops.push(Operation::RemoveMembership {
                    account: group.account.clone(),
                    user: user.clone(),
                    group: group.name.clone(),
                });
            }
        }

        for (account, state) in &live.accounts {
            for (name, group) in &state.groups {
                if !self.naming.is_managed(&group.path) || self.is_desired_group(desired, account, name) {
                    continue;
                }
                for user in &group.members {
                    ops.push(Operation::RemoveMembership {
                        account: account.clone(),
                        user: user.clone(),
                        group: name.clone(),
                    });
                }
                for policy_name in group.policies.keys() {
                    ops.push(Operation::DeleteGroupPolicy {
                        account: account.clone(),
                        group: name.clone(),
                        policy_name: policy_name.clone(),
                    });
                }
                ops.push(Operation::DeleteGroup {
                    account: account.clone(),
                    name: name.clone(),
                });
            }
        }

        Ok(())
    }

    fn is_desired_group(&self, desired: &DesiredState, account: &AccountId, name: &str) -> bool {
        desired
            .group(name)
            .is_some_and(|group| &group.account == account)
    }
}

/// Live text matches desired canonical text. Unparseable live text never matches.
fn same_policy(live_text: &str, desired_canonical: &str) -> bool {
    canonicalize(live_text).is_some_and(|live| live == desired_canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyCompiler;
    use crate::topology::{AccountKind, Scope, TopologyBuilder, UserName};

    fn desired() -> DesiredState {
        let mut builder = TopologyBuilder::new();
        builder
            .add_account("111111111111", "M", AccountKind::Management)
            .unwrap()
            .add_account("222222222222", "A", AccountKind::Target)
            .unwrap()
            .add_scope(Scope::new("vpc").allow("ec2:*Vpc*"))
            .unwrap()
            .add_assignment("alice", "vpc", "A")
            .unwrap();
        DesiredState::synthesize(&builder.snapshot().unwrap(), &PolicyCompiler::default()).unwrap()
    }

    fn management() -> AccountId {
        AccountId::new("111111111111")
    }

    fn target() -> AccountId {
        AccountId::new("222222222222")
    }

    #[test]
    fn test_identical_state_yields_empty_plan() {
        let desired = desired();
        let live = desired.to_live().unwrap();
        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        assert!(plan.is_empty(), "unexpected operations: {:?}", plan.operations);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_reformatted_live_policy_is_not_drift() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        let role = live.account_mut(&target()).roles.get_mut("vpc").unwrap();
        role.trust_policy = desired.roles.values().next().unwrap().spec.trust_policy.pretty().unwrap();

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unparseable_trust_policy_forces_update() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        live.account_mut(&target())
            .roles
            .get_mut("vpc")
            .unwrap()
            .trust_policy = "%7B garbage".to_string();

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.operations[0].kind(), OperationKind::UpdateRole);
    }

    #[test]
    fn test_role_at_other_managed_path_is_replaced() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        let role = live.account_mut(&target()).roles.get_mut("vpc").unwrap();
        role.path = "/tessera/legacy/".to_string();
        role.policies.insert("hand-made".to_string(), "{}".to_string());

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.has_destructive());
        match &plan.operations[0] {
            Operation::ReplaceRole {
                spec,
                previous_path,
                inline_policies,
            } => {
                assert_eq!(spec.path, "/tessera/");
                assert_eq!(previous_path, "/tessera/legacy/");
                assert_eq!(
                    inline_policies,
                    &vec!["hand-made".to_string(), "scope-permissions".to_string()]
                );
            }
            other => panic!("expected ReplaceRole, got {:?}", other),
        }
    }

    #[test]
    fn test_extra_inline_policy_is_stale() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        live.account_mut(&target())
            .roles
            .get_mut("vpc")
            .unwrap()
            .policies
            .insert("hand-made".to_string(), "{}".to_string());

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        match &plan.operations[0] {
            Operation::UpdateRole { stale_policies, .. } => {
                assert_eq!(stale_policies, &vec!["hand-made".to_string()]);
            }
            other => panic!("expected UpdateRole, got {:?}", other),
        }
    }

    #[test]
    fn test_unmanaged_entities_are_never_touched() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        live.account_mut(&target()).roles.insert(
            "legacy-admin".to_string(),
            LiveRole {
                path: "/".to_string(),
                trust_policy: "{}".to_string(),
                policies: BTreeMap::new(),
            },
        );
        let mut legacy = LiveGroup::new("/");
        legacy.members.insert(UserName::new("alice"));
        live.account_mut(&management())
            .groups
            .insert("admins".to_string(), legacy);

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_name_collision_with_unmanaged_group_warns() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        live.account_mut(&management())
            .groups
            .get_mut("vpc-A")
            .unwrap()
            .path = "/legacy/".to_string();

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        assert!(plan.is_empty());
        assert!(matches!(
            plan.warnings.as_slice(),
            [PlanWarning::UnmanagedCollision { .. }]
        ));
    }

    #[test]
    fn test_orphaned_managed_group_is_torn_down() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        let mut orphan = LiveGroup::new("/tessera/");
        orphan.members.insert(UserName::new("alice"));
        orphan
            .policies
            .insert("assume-role".to_string(), "{}".to_string());
        live.account_mut(&management())
            .groups
            .insert("ec2-A".to_string(), orphan);

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        let kinds: Vec<OperationKind> = plan.operations.iter().map(Operation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::RemoveMembership,
                OperationKind::DeleteGroupPolicy,
                OperationKind::DeleteGroup,
            ]
        );
    }

    #[test]
    fn test_unknown_user_warns_but_still_adds() {
        let desired = desired();
        let mut live = desired.to_live().unwrap();
        let account = live.account_mut(&management());
        account.users.clear();
        for group in account.groups.values_mut() {
            group.members.clear();
        }

        let plan = Reconciler::default().diff(&desired, &live).unwrap();
        assert_eq!(plan.summary().get(&OperationKind::AddMembership), Some(&2));
        assert_eq!(
            plan.warnings,
            vec![PlanWarning::UnknownUser {
                account: management(),
                user: UserName::new("alice"),
            }]
        );
    }
}

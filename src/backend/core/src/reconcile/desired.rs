//! Desired-state synthesis: the concrete roles, groups, policies and
//! memberships a topology implies.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, instrument};

use crate::error::{Result, TesseraError};
use crate::policy::{PolicyCompiler, PolicyDocument};
use crate::topology::{Account, AccountId, AccountName, ScopeName, Topology, UserName};

use super::live::{AccountState, LiveGroup, LiveRole, LiveState};

/// Everything IAM needs to know to create or update a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub account: AccountId,
    pub name: String,
    pub path: String,
    pub trust_policy: PolicyDocument,
    pub policy_name: String,
    pub policy: PolicyDocument,
}

/// A role to exist in a target account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredRole {
    pub scope: ScopeName,
    pub account_name: AccountName,
    pub spec: RoleSpec,
}

/// What a management-account group is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupPurpose {
    /// Self-service group every assigned user joins.
    Baseline,
    /// Grants assumption of one scope's role in one account.
    Scope { scope: ScopeName, account: AccountName },
}

impl fmt::Display for GroupPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupPurpose::Baseline => write!(f, "baseline group"),
            GroupPurpose::Scope { scope, account } => {
                write!(f, "scope '{}' in account '{}'", scope, account)
            }
        }
    }
}

/// A group to exist in the management account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredGroup {
    pub account: AccountId,
    pub name: String,
    pub path: String,
    pub purpose: GroupPurpose,
    pub policy_name: String,
    pub policy: PolicyDocument,
    pub members: BTreeSet<UserName>,
}

/// Concrete desired IAM state derived from a topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// Account hosting users, groups and memberships.
    pub management: Option<Account>,

    /// Roles keyed by (account, role name).
    pub roles: BTreeMap<(AccountId, String), DesiredRole>,

    /// Groups keyed by name; all live in the management account.
    pub groups: BTreeMap<String, DesiredGroup>,
}

impl DesiredState {
    /// Derive the desired state.
    ///
    /// Every active scope gets a role in every target account; every active
    /// (scope, account) pair gets a delegation group; every assigned user
    /// joins the baseline group plus one group per distinct pair.
    #[instrument(skip_all, fields(scopes = topology.scopes().len(), assignments = topology.assignments().len()))]
    pub fn synthesize(topology: &Topology, compiler: &PolicyCompiler) -> Result<Self> {
        let naming = compiler.naming();
        let config = compiler.config();
        let policies = compiler.compile_all(topology)?;

        let Some(management) = topology.primary_management().cloned() else {
            return Ok(Self::default());
        };

        let trust_policy = compiler.trust_policy(&management);
        let active = topology.active_scopes();

        let mut roles = BTreeMap::new();
        for scope in topology.scopes().iter().filter(|s| active.contains(&s.name)) {
            let Some(policy) = policies.get(&scope.name) else {
                continue;
            };
            for account in topology.target_accounts() {
                let name = naming.role_name(&scope.name);
                let spec = RoleSpec {
                    account: account.id.clone(),
                    name: name.clone(),
                    path: naming.managed_path().to_string(),
                    trust_policy: trust_policy.clone(),
                    policy_name: config.role_policy_name.clone(),
                    policy: policy.clone(),
                };
                roles.insert(
                    (account.id.clone(), name),
                    DesiredRole {
                        scope: scope.name.clone(),
                        account_name: account.name.clone(),
                        spec,
                    },
                );
            }
        }

        let mut groups = BTreeMap::new();
        groups.insert(
            naming.baseline_group().to_string(),
            DesiredGroup {
                account: management.id.clone(),
                name: naming.baseline_group().to_string(),
                path: naming.managed_path().to_string(),
                purpose: GroupPurpose::Baseline,
                policy_name: config.self_service_policy_name.clone(),
                policy: compiler.self_service_policy(&management),
                members: topology.assigned_users(),
            },
        );

        for (scope, account_name) in topology.active_pairs() {
            let Some(account) = topology.account(&account_name) else {
                continue;
            };
            let name = naming.group_name(&scope, &account_name);
            let members = topology
                .assignments()
                .iter()
                .filter(|a| a.scope == scope && a.account == account_name)
                .map(|a| a.user.clone())
                .collect();

            let purpose = GroupPurpose::Scope {
                scope: scope.clone(),
                account: account_name.clone(),
            };
            // Group names are not injective over (scope, account): `a-b`/`c`
            // and `a`/`b-c` both yield `a-b-c`.
            match groups.entry(name.clone()) {
                Entry::Occupied(existing) => {
                    return Err(TesseraError::duplicate_key("group", name)
                        .with_context("claimed_by", existing.get().purpose.to_string())
                        .with_context("conflicts_with", purpose.to_string()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(DesiredGroup {
                        account: management.id.clone(),
                        name,
                        path: naming.managed_path().to_string(),
                        policy_name: config.delegation_policy_name.clone(),
                        policy: compiler.delegation_policy(&naming.role_arn(account, &scope)),
                        purpose,
                        members,
                    });
                }
            }
        }

        debug!(roles = roles.len(), groups = groups.len(), "Synthesized desired state");
        Ok(Self {
            management: Some(management),
            roles,
            groups,
        })
    }

    pub fn role(&self, account: &AccountId, name: &str) -> Option<&DesiredRole> {
        self.roles.get(&(account.clone(), name.to_string()))
    }

    pub fn group(&self, name: &str) -> Option<&DesiredGroup> {
        self.groups.get(name)
    }

    /// Groups a user belongs to, by name.
    pub fn memberships(&self, user: &UserName) -> BTreeSet<&str> {
        self.groups
            .values()
            .filter(|g| g.members.contains(user))
            .map(|g| g.name.as_str())
            .collect()
    }

    /// Every user with at least one membership.
    pub fn members(&self) -> BTreeSet<&UserName> {
        self.groups.values().flat_map(|g| g.members.iter()).collect()
    }

    pub fn scope_groups(&self) -> impl Iterator<Item = &DesiredGroup> {
        self.groups
            .values()
            .filter(|g| matches!(g.purpose, GroupPurpose::Scope { .. }))
    }

    /// The live state that would exist if this desired state were fully
    /// applied to empty accounts, members included as existing users.
    pub fn to_live(&self) -> Result<LiveState> {
        let mut live = LiveState::new();

        if let Some(management) = &self.management {
            let users = self.members().into_iter().cloned().collect();
            live.accounts.insert(
                management.id.clone(),
                AccountState {
                    users,
                    ..AccountState::default()
                },
            );
        }

        for role in self.roles.values() {
            let spec = &role.spec;
            live.account_mut(&spec.account).roles.insert(
                spec.name.clone(),
                LiveRole {
                    path: spec.path.clone(),
                    trust_policy: spec.trust_policy.canonical()?,
                    policies: BTreeMap::from([(spec.policy_name.clone(), spec.policy.canonical()?)]),
                },
            );
        }

        for group in self.groups.values() {
            live.account_mut(&group.account).groups.insert(
                group.name.clone(),
                LiveGroup {
                    path: group.path.clone(),
                    members: group.members.clone(),
                    policies: BTreeMap::from([(group.policy_name.clone(), group.policy.canonical()?)]),
                },
            );
        }

        Ok(live)
    }
}

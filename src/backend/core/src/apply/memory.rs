//! In-process IAM backed by a [`LiveState`].
//!
//! Serves as both the live-state source and the control plane, so a plan
//! can be computed, applied and re-diffed without touching AWS. Failure
//! injection makes partial applies reproducible in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::trace;

use crate::error::{Result, TesseraError};
use crate::policy::PolicyDocument;
use crate::reconcile::{LiveGroup, LiveRole, LiveState, LiveStateSource, RoleSpec};
use crate::topology::{AccountId, UserName};

use super::IamControlPlane;

#[derive(Debug, Default)]
struct Inner {
    state: LiveState,
    mutations: usize,
}

/// Mutex-guarded IAM simulation.
#[derive(Debug, Default)]
pub struct InMemoryIam {
    inner: Mutex<Inner>,
    fail_on: Option<usize>,
}

impl InMemoryIam {
    pub fn new(state: LiveState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                mutations: 0,
            }),
            fail_on: None,
        }
    }

    /// Reject the `n`-th mutation (1-based) without changing state.
    pub fn fail_on_mutation(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Copy of the current state.
    pub fn state(&self) -> LiveState {
        self.inner.lock().state.clone()
    }

    pub fn into_state(self) -> LiveState {
        self.inner.into_inner().state
    }

    /// Mutations attempted so far, failed ones included.
    pub fn mutation_count(&self) -> usize {
        self.inner.lock().mutations
    }

    fn mutate<F>(&self, operation: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut LiveState) -> Result<()>,
    {
        let mut inner = self.inner.lock();
        inner.mutations += 1;
        if self.fail_on == Some(inner.mutations) {
            return Err(TesseraError::control_plane(operation, "injected failure"));
        }
        trace!(operation, mutation = inner.mutations, "In-memory IAM mutation");
        apply(&mut inner.state)
    }
}

fn missing(operation: &str, what: String) -> TesseraError {
    TesseraError::control_plane(operation, format!("NoSuchEntity: {}", what))
}

#[async_trait]
impl LiveStateSource for InMemoryIam {
    async fn snapshot(&self, accounts: &[AccountId]) -> Result<LiveState> {
        Ok(self.inner.lock().state.restricted_to(accounts))
    }
}

#[async_trait]
impl IamControlPlane for InMemoryIam {
    async fn put_role(&self, spec: &RoleSpec, stale_policies: &[String]) -> Result<()> {
        let trust_policy = spec.trust_policy.canonical()?;
        let policy = spec.policy.canonical()?;

        self.mutate("PutRole", |state| {
            let roles = &mut state.account_mut(&spec.account).roles;
            let role = roles.entry(spec.name.clone()).or_insert_with(|| LiveRole {
                path: spec.path.clone(),
                trust_policy: String::new(),
                policies: BTreeMap::new(),
            });
            role.trust_policy = trust_policy;
            role.policies.insert(spec.policy_name.clone(), policy);
            for stale in stale_policies {
                role.policies.remove(stale);
            }
            Ok(())
        })
    }

    async fn delete_role(&self, account: &AccountId, name: &str, inline_policies: &[String]) -> Result<()> {
        self.mutate("DeleteRole", |state| {
            let roles = &mut state.account_mut(account).roles;
            let Some(role) = roles.get(name) else {
                return Ok(());
            };
            let leftover: Vec<&String> = role
                .policies
                .keys()
                .filter(|p| !inline_policies.contains(p))
                .collect();
            if !leftover.is_empty() {
                return Err(TesseraError::control_plane(
                    "DeleteRole",
                    format!("DeleteConflict: role {} still has inline policies {:?}", name, leftover),
                ));
            }
            roles.remove(name);
            Ok(())
        })
    }

    async fn create_group(&self, account: &AccountId, name: &str, path: &str) -> Result<()> {
        self.mutate("CreateGroup", |state| {
            state
                .account_mut(account)
                .groups
                .entry(name.to_string())
                .or_insert_with(|| LiveGroup::new(path));
            Ok(())
        })
    }

    async fn delete_group(&self, account: &AccountId, name: &str) -> Result<()> {
        self.mutate("DeleteGroup", |state| {
            let groups = &mut state.account_mut(account).groups;
            let Some(group) = groups.get(name) else {
                return Ok(());
            };
            if !group.members.is_empty() || !group.policies.is_empty() {
                return Err(TesseraError::control_plane(
                    "DeleteGroup",
                    format!("DeleteConflict: group {} still has members or policies", name),
                ));
            }
            groups.remove(name);
            Ok(())
        })
    }

    async fn put_group_policy(
        &self,
        account: &AccountId,
        group: &str,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> Result<()> {
        let text = document.canonical()?;
        self.mutate("PutGroupPolicy", |state| {
            let target = state
                .account_mut(account)
                .groups
                .get_mut(group)
                .ok_or_else(|| missing("PutGroupPolicy", format!("group {}", group)))?;
            target.policies.insert(policy_name.to_string(), text);
            Ok(())
        })
    }

    async fn delete_group_policy(&self, account: &AccountId, group: &str, policy_name: &str) -> Result<()> {
        self.mutate("DeleteGroupPolicy", |state| {
            if let Some(target) = state.account_mut(account).groups.get_mut(group) {
                target.policies.remove(policy_name);
            }
            Ok(())
        })
    }

    async fn add_user_to_group(&self, account: &AccountId, group: &str, user: &UserName) -> Result<()> {
        self.mutate("AddUserToGroup", |state| {
            let account_state = state.account_mut(account);
            if !account_state.users.contains(user) {
                return Err(missing("AddUserToGroup", format!("user {}", user)));
            }
            let target = account_state
                .groups
                .get_mut(group)
                .ok_or_else(|| missing("AddUserToGroup", format!("group {}", group)))?;
            target.members.insert(user.clone());
            Ok(())
        })
    }

    async fn remove_user_from_group(&self, account: &AccountId, group: &str, user: &UserName) -> Result<()> {
        self.mutate("RemoveUserFromGroup", |state| {
            if let Some(target) = state.account_mut(account).groups.get_mut(group) {
                target.members.remove(user);
            }
            Ok(())
        })
    }
}

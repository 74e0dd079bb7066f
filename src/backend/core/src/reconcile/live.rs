//! Snapshot of live IAM state, as reported by a [`LiveStateSource`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{ErrorContext, Result, TesseraError};
use crate::topology::{AccountId, UserName};

/// Live IAM entities across every account of interest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    #[serde(default)]
    pub accounts: BTreeMap<AccountId, AccountState>,
}

/// Users, groups and roles present in one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub users: BTreeSet<UserName>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, LiveGroup>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<String, LiveRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveGroup {
    pub path: String,

    #[serde(default)]
    pub members: BTreeSet<UserName>,

    /// Inline policies: name to policy text.
    #[serde(default)]
    pub policies: BTreeMap<String, String>,
}

impl LiveGroup {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            members: BTreeSet::new(),
            policies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRole {
    pub path: String,

    /// Assume-role policy text.
    pub trust_policy: String,

    /// Inline policies: name to policy text.
    #[serde(default)]
    pub policies: BTreeMap<String, String>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, id: &AccountId) -> Option<&AccountState> {
        self.accounts.get(id)
    }

    /// Mutable account state, created empty on first use.
    pub fn account_mut(&mut self, id: &AccountId) -> &mut AccountState {
        self.accounts.entry(id.clone()).or_default()
    }

    /// Record users that exist in an account.
    pub fn with_users<I, U>(mut self, account: &AccountId, users: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserName>,
    {
        self.account_mut(account)
            .users
            .extend(users.into_iter().map(Into::into));
        self
    }

    /// Restrict the snapshot to the given accounts. Accounts never seen are
    /// reported empty.
    pub fn restricted_to(&self, accounts: &[AccountId]) -> LiveState {
        LiveState {
            accounts: accounts
                .iter()
                .map(|id| (id.clone(), self.accounts.get(id).cloned().unwrap_or_default()))
                .collect(),
        }
    }

    /// Read a JSON state file. A missing file is an empty state.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::live_state_unavailable(e.to_string())
                .with_context("path", path.display().to_string())
        })?;
        serde_json::from_str(&text).map_err(|e| {
            TesseraError::live_state_unavailable(format!("malformed state file: {}", e))
                .with_context("path", path.display().to_string())
        })
    }

    /// Write a JSON state file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("Failed to render live state")?;
        std::fs::write(path, text)
            .map_err(|e| TesseraError::from(e).with_context("path", path.display().to_string()))?;
        Ok(())
    }
}

/// Read-only access to live IAM state.
#[async_trait]
pub trait LiveStateSource: Send + Sync {
    /// Snapshot the given accounts.
    async fn snapshot(&self, accounts: &[AccountId]) -> Result<LiveState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_to_fills_missing_accounts() {
        let a = AccountId::new("111111111111");
        let b = AccountId::new("222222222222");
        let live = LiveState::new().with_users(&a, ["alice"]);

        let view = live.restricted_to(&[a.clone(), b.clone()]);
        assert_eq!(view.accounts.len(), 2);
        assert!(view.account(&a).unwrap().users.contains(&UserName::new("alice")));
        assert_eq!(view.account(&b), Some(&AccountState::default()));
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert_eq!(LiveState::load(&path).unwrap(), LiveState::default());

        let account = AccountId::new("111111111111");
        let mut live = LiveState::new().with_users(&account, ["alice", "bob"]);
        live.account_mut(&account)
            .groups
            .insert("users".to_string(), LiveGroup::new("/tessera/"));
        live.save(&path).unwrap();

        assert_eq!(LiveState::load(&path).unwrap(), live);
    }

    #[test]
    fn test_corrupt_state_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{\"accounts\": [").unwrap();

        let err = LiveState::load(&path).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::LiveStateUnavailable);
        assert_eq!(err.exit_code(), 4);
        assert_eq!(
            err.details().context["path"],
            path.display().to_string()
        );
    }
}

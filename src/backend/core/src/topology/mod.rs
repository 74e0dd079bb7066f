//! Topology model: the declarative desired state.
//!
//! This module provides:
//! - **Models**: accounts, scopes, statements, users and assignments
//! - **Builder**: structural validation as entries are added
//! - **Snapshot**: an immutable, cheaply cloneable [`Topology`]
//! - **Document**: the YAML/JSON/TOML configuration format
//! - **Naming**: role/group names and ARNs derived from the topology
//!
//! # Usage
//!
//! ```rust,ignore
//! use tessera_core::topology::{AccountKind, Scope, TopologyBuilder};
//!
//! let mut builder = TopologyBuilder::new();
//! builder
//!     .add_account("111111111111", "M", AccountKind::Management)?
//!     .add_account("222222222222", "A", AccountKind::Target)?
//!     .add_scope(Scope::new("vpc").allow("ec2:*Vpc*"))?
//!     .add_assignment("alice", "vpc", "A")?;
//! let topology = builder.snapshot()?;
//! ```

pub mod document;
pub mod model;
pub mod naming;

pub use document::{DocumentFormat, TopologyDocument};
pub use model::{
    Account, AccountId, AccountKind, AccountName, Assignment, Scope, ScopeName, Statement,
    UserHome, UserName,
};
pub use naming::NamingConvention;

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{Result, TesseraError};

static ACCOUNT_ID_PATTERN: OnceLock<Regex> = OnceLock::new();
static ACCOUNT_NAME_PATTERN: OnceLock<Regex> = OnceLock::new();
static SCOPE_NAME_PATTERN: OnceLock<Regex> = OnceLock::new();
static USER_NAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("static pattern compiles"))
}

fn check_name(kind: &str, value: &str, regex: &Regex, rule: &str) -> Result<()> {
    if regex.is_match(value) {
        Ok(())
    } else {
        Err(TesseraError::invalid_input(format!(
            "Invalid {} '{}': {}",
            kind, value, rule
        ))
        .with_context("entity_type", kind))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Accumulates topology entries, rejecting duplicates and dangling references.
#[derive(Debug, Default, Clone)]
pub struct TopologyBuilder {
    accounts: Vec<Account>,
    scopes: Vec<Scope>,
    users: Vec<UserHome>,
    assignments: Vec<Assignment>,
    assignment_keys: HashSet<Assignment>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_by_name(&self, name: &AccountName) -> Option<&Account> {
        self.accounts.iter().find(|a| &a.name == name)
    }

    /// Declare an account.
    pub fn add_account(
        &mut self,
        id: impl Into<AccountId>,
        name: impl Into<AccountName>,
        kind: AccountKind,
    ) -> Result<&mut Self> {
        let account = Account::new(id, name, kind);

        check_name(
            "account id",
            account.id.as_str(),
            pattern(&ACCOUNT_ID_PATTERN, r"^[0-9]{12}$"),
            "must be exactly twelve digits",
        )?;
        check_name(
            "account name",
            account.name.as_str(),
            pattern(&ACCOUNT_NAME_PATTERN, r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,31}$"),
            "must be 1-32 letters, digits, '.', '_' or '-'",
        )?;

        if self.accounts.iter().any(|a| a.id == account.id) {
            return Err(TesseraError::duplicate_key("account id", account.id.as_str()));
        }
        if self.account_by_name(&account.name).is_some() {
            return Err(TesseraError::duplicate_key("account name", account.name.as_str()));
        }

        debug!(account = %account.name, id = %account.id, kind = %account.kind, "Adding account");
        self.accounts.push(account);
        Ok(self)
    }

    /// Declare a scope.
    pub fn add_scope(&mut self, scope: Scope) -> Result<&mut Self> {
        check_name(
            "scope name",
            scope.name.as_str(),
            pattern(&SCOPE_NAME_PATTERN, r"^[a-z0-9][a-z0-9_-]{0,47}$"),
            "must be 1-48 lower-case letters, digits, '_' or '-'",
        )?;

        if self.scopes.iter().any(|s| s.name == scope.name) {
            return Err(TesseraError::duplicate_key("scope", scope.name.as_str()));
        }

        for (list, statements) in [("allow", &scope.allow), ("deny", &scope.deny)] {
            let mut seen = HashSet::new();
            for statement in statements {
                if statement.action.trim().is_empty() || statement.resource.trim().is_empty() {
                    return Err(TesseraError::invalid_input(format!(
                        "Scope '{}' has an empty action or resource in its {} list",
                        scope.name, list
                    ))
                    .with_context("scope", scope.name.as_str()));
                }
                if !seen.insert(statement) {
                    return Err(TesseraError::duplicate_key(
                        format!("{} statement in scope {}", list, scope.name),
                        statement.to_string(),
                    ));
                }
            }
        }

        debug!(scope = %scope.name, allow = scope.allow.len(), deny = scope.deny.len(), "Adding scope");
        self.scopes.push(scope);
        Ok(self)
    }

    /// Declare the management account hosting a user.
    ///
    /// Declaring the same user in two management accounts is accepted here
    /// and reported by the constraint validator.
    pub fn add_user(
        &mut self,
        user: impl Into<UserName>,
        account: impl Into<AccountName>,
    ) -> Result<&mut Self> {
        let home = UserHome {
            name: user.into(),
            account: account.into(),
        };

        check_name(
            "user name",
            home.name.as_str(),
            pattern(&USER_NAME_PATTERN, r"^[A-Za-z0-9+=,.@_-]{1,64}$"),
            "must be 1-64 characters from [A-Za-z0-9+=,.@_-]",
        )?;

        let account = self.account_by_name(&home.account).ok_or_else(|| {
            TesseraError::unknown_reference(
                "account",
                home.account.as_str(),
                format!("user {}", home.name),
            )
        })?;
        if !account.is_management() {
            return Err(TesseraError::unknown_reference(
                "management account",
                home.account.as_str(),
                format!("user {} (users never live in target accounts)", home.name),
            ));
        }
        if self.users.contains(&home) {
            return Err(TesseraError::duplicate_key(
                "user",
                format!("{}@{}", home.name, home.account),
            ));
        }

        self.users.push(home);
        Ok(self)
    }

    /// Declare that `user` may assume `scope`'s role in `account`.
    pub fn add_assignment(
        &mut self,
        user: impl Into<UserName>,
        scope: impl Into<ScopeName>,
        account: impl Into<AccountName>,
    ) -> Result<&mut Self> {
        let assignment = Assignment::new(user, scope, account);
        let origin = format!("assignment {}", assignment);

        check_name(
            "user name",
            assignment.user.as_str(),
            pattern(&USER_NAME_PATTERN, r"^[A-Za-z0-9+=,.@_-]{1,64}$"),
            "must be 1-64 characters from [A-Za-z0-9+=,.@_-]",
        )?;

        if !self.scopes.iter().any(|s| s.name == assignment.scope) {
            return Err(TesseraError::unknown_reference(
                "scope",
                assignment.scope.as_str(),
                origin,
            ));
        }
        let account = self.account_by_name(&assignment.account).ok_or_else(|| {
            TesseraError::unknown_reference("account", assignment.account.as_str(), origin.clone())
        })?;
        if !account.is_target() {
            return Err(TesseraError::unknown_reference(
                "target account",
                assignment.account.as_str(),
                format!("{} (roles only live in target accounts)", origin),
            ));
        }
        if !self.assignment_keys.insert(assignment.clone()) {
            return Err(TesseraError::duplicate_key("assignment", assignment.to_string()));
        }

        self.assignments.push(assignment);
        Ok(self)
    }

    /// Freeze the builder into an immutable topology.
    pub fn snapshot(&self) -> Result<Topology> {
        if !self.assignments.is_empty() && !self.accounts.iter().any(Account::is_management) {
            return Err(TesseraError::invalid_input(
                "Topology has assignments but no management account to host users",
            ));
        }

        Ok(Topology {
            inner: Arc::new(TopologyInner {
                accounts: self.accounts.clone(),
                scopes: self.scopes.clone(),
                users: self.users.clone(),
                assignments: self.assignments.clone(),
            }),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq, Eq)]
struct TopologyInner {
    accounts: Vec<Account>,
    scopes: Vec<Scope>,
    users: Vec<UserHome>,
    assignments: Vec<Assignment>,
}

/// Immutable desired-state value. Declaration order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    inner: Arc<TopologyInner>,
}

impl Topology {
    pub fn accounts(&self) -> &[Account] {
        &self.inner.accounts
    }

    pub fn account(&self, name: &AccountName) -> Option<&Account> {
        self.inner.accounts.iter().find(|a| &a.name == name)
    }

    pub fn management_accounts(&self) -> impl Iterator<Item = &Account> {
        self.inner.accounts.iter().filter(|a| a.is_management())
    }

    /// The management account that hosts scope groups and memberships.
    pub fn primary_management(&self) -> Option<&Account> {
        self.management_accounts().next()
    }

    pub fn target_accounts(&self) -> impl Iterator<Item = &Account> {
        self.inner.accounts.iter().filter(|a| a.is_target())
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.inner.scopes
    }

    pub fn scope(&self, name: &ScopeName) -> Option<&Scope> {
        self.inner.scopes.iter().find(|s| &s.name == name)
    }

    pub fn user_homes(&self) -> &[UserHome] {
        &self.inner.users
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.inner.assignments
    }

    /// Every user that is declared or assigned.
    pub fn users(&self) -> BTreeSet<UserName> {
        self.inner
            .users
            .iter()
            .map(|u| u.name.clone())
            .chain(self.inner.assignments.iter().map(|a| a.user.clone()))
            .collect()
    }

    /// Users that hold at least one assignment.
    pub fn assigned_users(&self) -> BTreeSet<UserName> {
        self.inner.assignments.iter().map(|a| a.user.clone()).collect()
    }

    /// Management accounts hosting `user`; undeclared users live in the
    /// primary management account.
    pub fn homes_of(&self, user: &UserName) -> BTreeSet<AccountName> {
        let declared: BTreeSet<AccountName> = self
            .inner
            .users
            .iter()
            .filter(|u| &u.name == user)
            .map(|u| u.account.clone())
            .collect();

        if declared.is_empty() {
            self.primary_management()
                .map(|a| a.name.clone())
                .into_iter()
                .collect()
        } else {
            declared
        }
    }

    /// Scopes with at least one assignment.
    pub fn active_scopes(&self) -> BTreeSet<ScopeName> {
        self.inner.assignments.iter().map(|a| a.scope.clone()).collect()
    }

    /// Distinct (scope, target account) pairs with at least one assignment.
    pub fn active_pairs(&self) -> BTreeSet<(ScopeName, AccountName)> {
        self.inner
            .assignments
            .iter()
            .map(|a| (a.scope.clone(), a.account.clone()))
            .collect()
    }

    /// Distinct (scope, target account) pairs assigned to `user`.
    pub fn pairs_of(&self, user: &UserName) -> BTreeSet<(ScopeName, AccountName)> {
        self.inner
            .assignments
            .iter()
            .filter(|a| &a.user == user)
            .map(|a| (a.scope.clone(), a.account.clone()))
            .collect()
    }

    /// Target accounts each active scope is assigned in.
    pub fn scope_accounts(&self) -> BTreeMap<ScopeName, BTreeSet<AccountName>> {
        let mut map: BTreeMap<ScopeName, BTreeSet<AccountName>> = BTreeMap::new();
        for assignment in &self.inner.assignments {
            map.entry(assignment.scope.clone())
                .or_default()
                .insert(assignment.account.clone());
        }
        map
    }

    /// Convert back into the configuration document.
    pub fn to_document(&self) -> TopologyDocument {
        TopologyDocument::from_topology(self)
    }
}

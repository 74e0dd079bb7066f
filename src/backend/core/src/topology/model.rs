//! Topology data models: accounts, scopes, statements, users and assignments.

use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Twelve-digit AWS account identifier.
    AccountId
);
string_id!(
    /// Logical account name, used in group names (`vpc-prod`).
    AccountName
);
string_id!(
    /// Name of a permission topic.
    ScopeName
);
string_id!(
    /// IAM user name in the management account.
    UserName
);

// ═══════════════════════════════════════════════════════════════════════════════
// Accounts
// ═══════════════════════════════════════════════════════════════════════════════

/// What an account is for in the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Hosts every user and every scope group.
    Management,
    /// Hosts roles only.
    Target,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Management => write!(f, "management"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// An AWS account taking part in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: AccountName,
    pub kind: AccountKind,
}

impl Account {
    pub fn new(id: impl Into<AccountId>, name: impl Into<AccountName>, kind: AccountKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn is_management(&self) -> bool {
        self.kind == AccountKind::Management
    }

    pub fn is_target(&self) -> bool {
        self.kind == AccountKind::Target
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scopes
// ═══════════════════════════════════════════════════════════════════════════════

/// One action pattern on one resource pattern.
///
/// Serialized as a bare action string when the resource is `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "StatementRepr", into = "StatementRepr")]
pub struct Statement {
    pub action: String,
    pub resource: String,
}

impl Statement {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
        }
    }

    /// Statement on every resource.
    pub fn action(action: impl Into<String>) -> Self {
        Self::new(action, ANY_RESOURCE)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.action, self.resource)
    }
}

pub(crate) const ANY_RESOURCE: &str = "*";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StatementRepr {
    Short(String),
    Full {
        action: String,
        #[serde(default = "any_resource")]
        resource: String,
    },
}

fn any_resource() -> String {
    ANY_RESOURCE.to_string()
}

impl From<StatementRepr> for Statement {
    fn from(repr: StatementRepr) -> Self {
        match repr {
            StatementRepr::Short(action) => Statement::action(action),
            StatementRepr::Full { action, resource } => Statement::new(action, resource),
        }
    }
}

impl From<Statement> for StatementRepr {
    fn from(statement: Statement) -> Self {
        if statement.resource == ANY_RESOURCE {
            StatementRepr::Short(statement.action)
        } else {
            StatementRepr::Full {
                action: statement.action,
                resource: statement.resource,
            }
        }
    }
}

/// A named permission topic.
///
/// Deny statements carve exceptions out of the allows ("ec2 minus vpc").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: ScopeName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub allow: Vec<Statement>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<Statement>,
}

impl Scope {
    pub fn new(name: impl Into<ScopeName>) -> Self {
        Self {
            name: name.into(),
            description: None,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }

    /// Add an allow statement on every resource.
    pub fn allow(mut self, action: impl Into<String>) -> Self {
        self.allow.push(Statement::action(action));
        self
    }

    /// Add a deny exception on every resource.
    pub fn deny(mut self, action: impl Into<String>) -> Self {
        self.deny.push(Statement::action(action));
        self
    }

    pub fn allow_statement(mut self, statement: Statement) -> Self {
        self.allow.push(statement);
        self
    }

    pub fn deny_statement(mut self, statement: Statement) -> Self {
        self.deny.push(statement);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Users and Assignments
// ═══════════════════════════════════════════════════════════════════════════════

/// Declares which management account hosts a user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserHome {
    pub name: UserName,
    pub account: AccountName,
}

/// The desired fact that `user` may assume `scope`'s role in `account`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub user: UserName,
    pub scope: ScopeName,
    pub account: AccountName,
}

impl Assignment {
    pub fn new(
        user: impl Into<UserName>,
        scope: impl Into<ScopeName>,
        account: impl Into<AccountName>,
    ) -> Self {
        Self {
            user: user.into(),
            scope: scope.into(),
            account: account.into(),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user, self.scope, self.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_shorthand_round_trip() {
        let short: Statement = serde_json::from_str("\"ec2:*\"").unwrap();
        assert_eq!(short, Statement::action("ec2:*"));
        assert_eq!(serde_json::to_string(&short).unwrap(), "\"ec2:*\"");

        let full: Statement =
            serde_json::from_str(r#"{"action":"s3:GetObject","resource":"arn:aws:s3:::logs/*"}"#)
                .unwrap();
        assert_eq!(full.resource, "arn:aws:s3:::logs/*");
        let json = serde_json::to_string(&full).unwrap();
        assert!(json.contains("\"resource\""));
    }

    #[test]
    fn test_full_statement_defaults_resource() {
        let statement: Statement = serde_json::from_str(r#"{"action":"ec2:*"}"#).unwrap();
        assert_eq!(statement.resource, "*");
    }

    #[test]
    fn test_scope_builder_keeps_order() {
        let scope = Scope::new("ec2").allow("ec2:*").deny("ec2:*Vpc*").deny("ec2:*Subnet*");
        assert_eq!(scope.allow.len(), 1);
        assert_eq!(scope.deny[0].action, "ec2:*Vpc*");
        assert_eq!(scope.deny[1].action, "ec2:*Subnet*");
    }

    #[test]
    fn test_account_kind_serde() {
        let kind: AccountKind = serde_json::from_str("\"management\"").unwrap();
        assert_eq!(kind, AccountKind::Management);
        assert_eq!(AccountKind::Target.to_string(), "target");
    }
}

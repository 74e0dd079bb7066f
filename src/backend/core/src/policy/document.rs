//! IAM policy document model with deterministic rendering.
//!
//! Field order is fixed by the struct layout and condition maps are
//! `BTreeMap`s, so serializing the same document always yields the same
//! bytes. Single-valued lists render as a bare string, the way IAM itself
//! returns them; both forms are accepted when parsing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ErrorCode, Result, TesseraError};

/// Policy language version emitted for every document.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Condition block: operator -> key -> values.
pub type ConditionMap = BTreeMap<String, BTreeMap<String, ConditionValues>>;

// ═══════════════════════════════════════════════════════════════════════════════
// Document
// ═══════════════════════════════════════════════════════════════════════════════

/// An IAM policy document (identity, inline or trust policy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", default = "default_version")]
    pub version: String,

    #[serde(rename = "Statement", with = "one_or_many_statements")]
    pub statements: Vec<PolicyStatement>,
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: default_version(),
            statements,
        }
    }

    /// Parse policy text as returned by IAM or written by hand.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            TesseraError::with_internal(
                ErrorCode::DeserializationError,
                "Policy document does not parse",
                e.to_string(),
            )
            .with_source(e)
        })
    }

    /// Compact rendering used for comparison and submission.
    pub fn canonical(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented rendering for humans.
    pub fn pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// SHA-256 hex digest of the canonical rendering.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = self.canonical()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    pub fn allows(&self) -> impl Iterator<Item = &PolicyStatement> {
        self.statements.iter().filter(|s| s.effect == Effect::Allow)
    }

    pub fn denies(&self) -> impl Iterator<Item = &PolicyStatement> {
        self.statements.iter().filter(|s| s.effect == Effect::Deny)
    }
}

/// Canonical form of arbitrary policy text, or `None` if it does not parse.
pub fn canonicalize(text: &str) -> Option<String> {
    PolicyDocument::parse(text).ok()?.canonical().ok()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Statements
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "Allow"),
            Self::Deny => write!(f, "Deny"),
        }
    }
}

/// One statement of a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    #[serde(rename = "Action", with = "one_or_many")]
    pub actions: Vec<String>,

    #[serde(
        rename = "Resource",
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "one_or_many"
    )]
    pub resources: Vec<String>,

    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionMap,
}

impl PolicyStatement {
    pub fn new(effect: Effect) -> Self {
        Self {
            sid: None,
            effect,
            principal: None,
            actions: Vec::new(),
            resources: Vec::new(),
            condition: BTreeMap::new(),
        }
    }

    pub fn allow() -> Self {
        Self::new(Effect::Allow)
    }

    pub fn deny() -> Self {
        Self::new(Effect::Deny)
    }

    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// Add a condition `operator: { key: value }`.
    pub fn condition(
        mut self,
        operator: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.condition
            .entry(operator.into())
            .or_default()
            .entry(key.into())
            .or_default()
            .0
            .push(value.into());
        self
    }

    /// Values of `key` under `operator`, if present.
    pub fn condition_values(&self, operator: &str, key: &str) -> Option<&[String]> {
        self.condition
            .get(operator)
            .and_then(|keys| keys.get(key))
            .map(|values| values.0.as_slice())
    }
}

/// Principal block of a trust policy statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PrincipalRepr")]
pub struct Principal {
    #[serde(
        rename = "AWS",
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "one_or_many"
    )]
    pub aws: Vec<String>,

    #[serde(
        rename = "Service",
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "one_or_many"
    )]
    pub service: Vec<String>,
}

impl Principal {
    pub fn aws(arn: impl Into<String>) -> Self {
        Self {
            aws: vec![arn.into()],
            service: Vec::new(),
        }
    }

    /// Every principal identifier named by this block.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.aws.iter().chain(self.service.iter()).map(String::as_str)
    }
}

// `"Principal": "*"` is shorthand for every AWS principal.
#[derive(Deserialize)]
#[serde(untagged)]
enum PrincipalRepr {
    Wildcard(String),
    Block {
        #[serde(rename = "AWS", default, with = "one_or_many")]
        aws: Vec<String>,
        #[serde(rename = "Service", default, with = "one_or_many")]
        service: Vec<String>,
    },
}

impl From<PrincipalRepr> for Principal {
    fn from(repr: PrincipalRepr) -> Self {
        match repr {
            PrincipalRepr::Wildcard(value) => Principal::aws(value),
            PrincipalRepr::Block { aws, service } => Principal { aws, service },
        }
    }
}

/// Values of one condition key. IAM accepts strings, booleans and numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionValues(pub Vec<String>);

impl Serialize for ConditionValues {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        one_or_many::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for ConditionValues {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        one_or_many::deserialize(deserializer).map(ConditionValues)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Serde Helpers
// ═══════════════════════════════════════════════════════════════════════════════

mod one_or_many {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(values: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        match values {
            [single] => single.serialize(serializer),
            many => many.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Array(items) => items.into_iter().map(scalar::<D::Error>).collect(),
            other => Ok(vec![scalar(other)?]),
        }
    }

    fn scalar<E: Error>(value: Value) -> Result<String, E> {
        match value {
            Value::String(s) => Ok(s),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(E::custom(format!("expected a string, got {}", other))),
        }
    }
}

mod one_or_many_statements {
    use super::PolicyStatement;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Many(Vec<PolicyStatement>),
        One(Box<PolicyStatement>),
    }

    pub fn serialize<S: Serializer>(
        statements: &[PolicyStatement],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        statements.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<PolicyStatement>, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Many(statements) => statements,
            Repr::One(statement) => vec![*statement],
        })
    }
}

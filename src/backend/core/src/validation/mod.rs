//! Constraint validation.
//!
//! Checks a topology and its synthesized desired state against the safety
//! invariants of the scheme before anything is applied:
//!
//! | Check                   | Severity                         |
//! |-------------------------|----------------------------------|
//! | `MultiAccountUser`      | fatal                            |
//! | `GroupCeilingExceeded`  | fatal                            |
//! | `AsymmetricRole`        | warning, fatal in strict mode    |
//! | `MfaTrustMissing`       | fatal                            |
//! | `ForeignTrustPrincipal` | fatal                            |

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

use crate::config::ReconcileConfig;
use crate::error::{ErrorCode, ErrorDetails, Result, TesseraError};
use crate::policy::{Effect, PolicyDocument, MFA_PRESENT_KEY};
use crate::reconcile::DesiredState;
use crate::topology::{NamingConvention, Topology};

// ═══════════════════════════════════════════════════════════════════════════════
// Violations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MultiAccountUser,
    GroupCeilingExceeded,
    AsymmetricRole,
    MfaTrustMissing,
    ForeignTrustPrincipal,
}

impl ViolationKind {
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::MultiAccountUser => ErrorCode::MultiAccountUser,
            Self::GroupCeilingExceeded => ErrorCode::GroupCeilingExceeded,
            Self::AsymmetricRole => ErrorCode::AsymmetricRole,
            Self::MfaTrustMissing => ErrorCode::MfaTrustMissing,
            Self::ForeignTrustPrincipal => ErrorCode::ForeignTrustPrincipal,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error_code(), f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Fatal,
}

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    /// The user, scope or role the violation is about.
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.subject, self.message)
    }
}

/// Outcome of validation: fatal violations and warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn fatal(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Fatal)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Warning)
    }

    pub fn is_ok(&self) -> bool {
        self.fatal().next().is_none()
    }

    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    /// Fail closed when any violation is fatal.
    ///
    /// The error code is the violation's own code when every fatal
    /// violation is of one kind, `ValidationFailed` otherwise.
    pub fn into_result(self) -> Result<Self> {
        let fatal: Vec<&Violation> = self.fatal().collect();
        if fatal.is_empty() {
            return Ok(self);
        }

        let kinds: BTreeSet<ViolationKind> = fatal.iter().map(|v| v.kind).collect();
        let code = match kinds.iter().next() {
            Some(kind) if kinds.len() == 1 => kind.error_code(),
            _ => ErrorCode::ValidationFailed,
        };
        let lines: Vec<String> = fatal.iter().map(|v| v.to_string()).collect();
        let mut details = ErrorDetails::new()
            .with_context("violations", &lines)
            .with_suggestion("Fix the topology; nothing was applied");
        if let [only] = fatal.as_slice() {
            details = details.with_entity(only.kind.to_string(), &only.subject);
        }

        Err(TesseraError::new(
            code,
            format!(
                "Topology violates {} invariant(s): {}",
                lines.len(),
                lines.join("; ")
            ),
        )
        .with_details(details))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Validator
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs every invariant check.
#[derive(Debug, Clone)]
pub struct ConstraintValidator {
    group_ceiling: usize,
    strict_symmetry: bool,
    naming: NamingConvention,
}

impl Default for ConstraintValidator {
    fn default() -> Self {
        Self {
            group_ceiling: 10,
            strict_symmetry: false,
            naming: NamingConvention::default(),
        }
    }
}

impl ConstraintValidator {
    pub fn new(group_ceiling: usize, strict_symmetry: bool, naming: NamingConvention) -> Self {
        Self {
            group_ceiling,
            strict_symmetry,
            naming,
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Result<Self> {
        Ok(Self::new(
            config.group_ceiling,
            config.strict_symmetry,
            NamingConvention::from_config(config)?,
        ))
    }

    pub fn group_ceiling(&self) -> usize {
        self.group_ceiling
    }

    pub fn validate(&self, topology: &Topology, desired: &DesiredState) -> ValidationReport {
        let mut violations = Vec::new();

        self.check_user_placement(topology, &mut violations);
        self.check_group_ceiling(topology, &mut violations);
        self.check_symmetry(topology, &mut violations);
        self.check_trust_policies(desired, &mut violations);

        for violation in &violations {
            match violation.severity {
                Severity::Fatal => warn!(kind = %violation.kind, subject = %violation.subject, "{}", violation.message),
                Severity::Warning => debug!(kind = %violation.kind, subject = %violation.subject, "{}", violation.message),
            }
        }

        ValidationReport { violations }
    }

    fn check_user_placement(&self, topology: &Topology, out: &mut Vec<Violation>) {
        let primary = topology.primary_management().map(|a| a.name.clone());

        for user in topology.users() {
            let homes = topology.homes_of(&user);
            if homes.len() > 1 {
                let names: Vec<String> = homes.iter().map(ToString::to_string).collect();
                out.push(Violation {
                    kind: ViolationKind::MultiAccountUser,
                    severity: Severity::Fatal,
                    subject: user.to_string(),
                    message: format!("user is declared in {} accounts: {}", homes.len(), names.join(", ")),
                });
                continue;
            }

            let assigned = !topology.pairs_of(&user).is_empty();
            if let (Some(home), Some(primary)) = (homes.iter().next(), primary.as_ref()) {
                if assigned && home != primary {
                    out.push(Violation {
                        kind: ViolationKind::MultiAccountUser,
                        severity: Severity::Fatal,
                        subject: user.to_string(),
                        message: format!(
                            "user lives in {} but its groups live in {}",
                            home, primary
                        ),
                    });
                }
            }
        }
    }

    fn check_group_ceiling(&self, topology: &Topology, out: &mut Vec<Violation>) {
        for user in topology.assigned_users() {
            let memberships = 1 + topology.pairs_of(&user).len();
            if memberships > self.group_ceiling {
                out.push(Violation {
                    kind: ViolationKind::GroupCeilingExceeded,
                    severity: Severity::Fatal,
                    subject: user.to_string(),
                    message: format!(
                        "user needs {} group memberships (baseline included), ceiling is {}",
                        memberships, self.group_ceiling
                    ),
                });
            }
        }
    }

    fn check_symmetry(&self, topology: &Topology, out: &mut Vec<Violation>) {
        let targets: BTreeSet<_> = topology.target_accounts().map(|a| a.name.clone()).collect();
        let severity = if self.strict_symmetry {
            Severity::Fatal
        } else {
            Severity::Warning
        };

        for (scope, accounts) in topology.scope_accounts() {
            let missing: Vec<String> = targets.difference(&accounts).map(ToString::to_string).collect();
            if missing.is_empty() {
                continue;
            }
            out.push(Violation {
                kind: ViolationKind::AsymmetricRole,
                severity,
                subject: scope.to_string(),
                message: format!("scope is not assigned in: {}", missing.join(", ")),
            });
        }
    }

    fn check_trust_policies(&self, desired: &DesiredState, out: &mut Vec<Violation>) {
        let expected_root = desired
            .management
            .as_ref()
            .map(|m| self.naming.account_root(m));

        for role in desired.roles.values() {
            let subject = format!("{}:role/{}", role.spec.account, role.spec.name);
            let trust = &role.spec.trust_policy;

            if !requires_mfa(trust) {
                out.push(Violation {
                    kind: ViolationKind::MfaTrustMissing,
                    severity: Severity::Fatal,
                    subject: subject.clone(),
                    message: format!(
                        "an Allow statement does not require {} = true",
                        MFA_PRESENT_KEY
                    ),
                });
            }

            let foreign: Vec<&str> = trust
                .allows()
                .flat_map(|s| match &s.principal {
                    Some(principal) => principal.identifiers().collect::<Vec<_>>(),
                    None => vec!["<any>"],
                })
                .filter(|id| Some(*id) != expected_root.as_deref())
                .collect();
            if !foreign.is_empty() {
                out.push(Violation {
                    kind: ViolationKind::ForeignTrustPrincipal,
                    severity: Severity::Fatal,
                    subject,
                    message: format!("trust policy admits {}", foreign.join(", ")),
                });
            }
        }
    }
}

/// Every Allow statement carries `Bool: aws:MultiFactorAuthPresent = true`.
fn requires_mfa(trust: &PolicyDocument) -> bool {
    trust
        .statements
        .iter()
        .filter(|s| s.effect == Effect::Allow)
        .all(|s| {
            s.condition_values("Bool", MFA_PRESENT_KEY)
                .is_some_and(|values| !values.is_empty() && values.iter().all(|v| v.eq_ignore_ascii_case("true")))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyCompiler, PolicyStatement, Principal};
    use crate::topology::{AccountKind, Scope, TopologyBuilder};

    fn builder_with_scopes(count: usize) -> TopologyBuilder {
        let mut builder = TopologyBuilder::new();
        builder
            .add_account("111111111111", "M", AccountKind::Management)
            .unwrap()
            .add_account("222222222222", "A", AccountKind::Target)
            .unwrap();
        for i in 0..count {
            builder
                .add_scope(Scope::new(format!("s{}", i)).allow("ec2:*"))
                .unwrap();
        }
        builder
    }

    fn validate(builder: &TopologyBuilder) -> ValidationReport {
        let topology = builder.snapshot().unwrap();
        let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
        ConstraintValidator::default().validate(&topology, &desired)
    }

    #[test]
    fn test_ceiling_counts_baseline_group() {
        let mut builder = builder_with_scopes(10);
        for i in 0..9 {
            builder.add_assignment("alice", format!("s{}", i), "A").unwrap();
        }
        assert!(validate(&builder).is_ok());

        builder.add_assignment("alice", "s9", "A").unwrap();
        let report = validate(&builder);
        assert!(report.has(ViolationKind::GroupCeilingExceeded));
        let err = report.into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::GroupCeilingExceeded);
        assert_eq!(err.details().entity_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_multi_account_user_is_fatal() {
        let mut builder = builder_with_scopes(1);
        builder
            .add_account("999999999999", "M2", AccountKind::Management)
            .unwrap()
            .add_user("alice", "M")
            .unwrap()
            .add_user("alice", "M2")
            .unwrap();

        let report = validate(&builder);
        assert!(report.has(ViolationKind::MultiAccountUser));
        assert!(!report.is_ok());
    }

    #[test]
    fn test_user_homed_outside_primary_management() {
        let mut builder = builder_with_scopes(1);
        builder
            .add_account("999999999999", "M2", AccountKind::Management)
            .unwrap()
            .add_user("alice", "M2")
            .unwrap()
            .add_assignment("alice", "s0", "A")
            .unwrap();

        assert!(validate(&builder).has(ViolationKind::MultiAccountUser));
    }

    #[test]
    fn test_asymmetry_is_warning_unless_strict() {
        let mut builder = builder_with_scopes(1);
        builder
            .add_account("333333333333", "B", AccountKind::Target)
            .unwrap()
            .add_assignment("alice", "s0", "A")
            .unwrap();
        let topology = builder.snapshot().unwrap();
        let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();

        let report = ConstraintValidator::default().validate(&topology, &desired);
        assert_eq!(report.warnings().count(), 1);
        assert!(report.is_ok());

        let strict = ConstraintValidator::new(10, true, NamingConvention::default());
        let report = strict.validate(&topology, &desired);
        let err = report.into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::AsymmetricRole);
    }

    #[test]
    fn test_trust_without_mfa_is_fatal() {
        let mut builder = builder_with_scopes(1);
        builder.add_assignment("alice", "s0", "A").unwrap();
        let topology = builder.snapshot().unwrap();
        let mut desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();

        for role in desired.roles.values_mut() {
            role.spec.trust_policy = PolicyDocument::new(vec![PolicyStatement::allow()
                .principal(Principal::aws("arn:aws:iam::111111111111:root"))
                .action("sts:AssumeRole")]);
        }

        let err = ConstraintValidator::default()
            .validate(&topology, &desired)
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::MfaTrustMissing);
    }

    #[test]
    fn test_foreign_principal_is_fatal() {
        let mut builder = builder_with_scopes(1);
        builder.add_assignment("alice", "s0", "A").unwrap();
        let topology = builder.snapshot().unwrap();
        let mut desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();

        for role in desired.roles.values_mut() {
            role.spec.trust_policy = PolicyDocument::new(vec![PolicyStatement::allow()
                .principal(Principal::aws("arn:aws:iam::444444444444:root"))
                .action("sts:AssumeRole")
                .condition("Bool", MFA_PRESENT_KEY, "true")]);
        }

        let report = ConstraintValidator::default().validate(&topology, &desired);
        assert!(report.has(ViolationKind::ForeignTrustPrincipal));
        assert!(!report.has(ViolationKind::MfaTrustMissing));
    }

    #[test]
    fn test_mixed_violations_aggregate() {
        let mut builder = builder_with_scopes(10);
        builder
            .add_account("999999999999", "M2", AccountKind::Management)
            .unwrap()
            .add_user("bob", "M")
            .unwrap()
            .add_user("bob", "M2")
            .unwrap();
        for i in 0..10 {
            builder.add_assignment("alice", format!("s{}", i), "A").unwrap();
        }

        let err = validate(&builder).into_result().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }
}

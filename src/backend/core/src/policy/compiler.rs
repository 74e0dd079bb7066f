//! Renders scopes and topology relationships into IAM policy documents.

use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::config::PolicyConfig;
use crate::error::{Result, TesseraError};
use crate::topology::{Account, NamingConvention, Scope, ScopeName, Statement, Topology};

use super::document::{Effect, PolicyDocument, PolicyStatement, Principal};

/// Condition key that is `true` only for MFA-authenticated sessions.
pub const MFA_PRESENT_KEY: &str = "aws:MultiFactorAuthPresent";
/// Condition key carrying seconds since MFA authentication.
pub const MFA_AGE_KEY: &str = "aws:MultiFactorAuthAge";

const ASSUME_ROLE: &str = "sts:AssumeRole";

/// Pure renderer from topology entities to policy documents.
#[derive(Debug, Clone, Default)]
pub struct PolicyCompiler {
    naming: NamingConvention,
    config: PolicyConfig,
}

impl PolicyCompiler {
    pub fn new(naming: NamingConvention, config: PolicyConfig) -> Self {
        Self { naming, config }
    }

    pub fn naming(&self) -> &NamingConvention {
        &self.naming
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Render a scope's permission policy: every allow in declared order,
    /// then every deny exception.
    #[instrument(skip(self, scope), fields(scope = %scope.name))]
    pub fn compile_scope(&self, scope: &Scope) -> Result<PolicyDocument> {
        if scope.allow.is_empty() {
            return Err(TesseraError::empty_scope(scope.name.as_str()));
        }

        let prefix = sid_prefix(&scope.name);
        let allows = scope
            .allow
            .iter()
            .enumerate()
            .map(|(i, s)| scope_statement(Effect::Allow, format!("{}Allow{}", prefix, i + 1), s));
        let denies = scope
            .deny
            .iter()
            .enumerate()
            .map(|(i, s)| scope_statement(Effect::Deny, format!("{}Deny{}", prefix, i + 1), s));

        let document = PolicyDocument::new(allows.chain(denies).collect());
        debug!(statements = document.statements.len(), "Compiled scope policy");
        Ok(document)
    }

    /// Compile every scope in the topology, naming the first one that fails.
    pub fn compile_all(&self, topology: &Topology) -> Result<BTreeMap<ScopeName, PolicyDocument>> {
        topology
            .scopes()
            .iter()
            .map(|scope| Ok((scope.name.clone(), self.compile_scope(scope)?)))
            .collect()
    }

    /// Trust policy letting the management account assume a role with MFA.
    pub fn trust_policy(&self, management: &Account) -> PolicyDocument {
        let mut statement = PolicyStatement::allow()
            .sid("AssumeWithMfa")
            .principal(Principal::aws(self.naming.account_root(management)))
            .action(ASSUME_ROLE)
            .condition("Bool", MFA_PRESENT_KEY, "true");

        if let Some(max_age) = self.config.mfa_max_age {
            statement = statement.condition(
                "NumericLessThan",
                MFA_AGE_KEY,
                max_age.as_secs().to_string(),
            );
        }

        PolicyDocument::new(vec![statement])
    }

    /// Group policy granting assumption of exactly one role.
    pub fn delegation_policy(&self, role_arn: &str) -> PolicyDocument {
        PolicyDocument::new(vec![PolicyStatement::allow()
            .sid("AssumeScopeRole")
            .action(ASSUME_ROLE)
            .resource(role_arn)])
    }

    /// Baseline policy: read own user, manage own credentials and MFA device.
    pub fn self_service_policy(&self, management: &Account) -> PolicyDocument {
        let user = self.naming.requesting_user_arn(management);
        let mfa = self.naming.requesting_user_mfa_arn(management);

        PolicyDocument::new(vec![
            PolicyStatement::allow()
                .sid("ListAccountBasics")
                .actions([
                    "iam:GetAccountPasswordPolicy",
                    "iam:GetAccountSummary",
                    "iam:ListVirtualMFADevices",
                ])
                .resource("*"),
            PolicyStatement::allow()
                .sid("ViewOwnUser")
                .actions([
                    "iam:GetUser",
                    "iam:GetLoginProfile",
                    "iam:ListAccessKeys",
                    "iam:ListGroupsForUser",
                    "iam:ListMFADevices",
                    "iam:ListSSHPublicKeys",
                    "iam:ListSigningCertificates",
                ])
                .resource(user.clone()),
            PolicyStatement::allow()
                .sid("ManageOwnCredentials")
                .actions([
                    "iam:ChangePassword",
                    "iam:CreateAccessKey",
                    "iam:DeleteAccessKey",
                    "iam:UpdateAccessKey",
                    "iam:UploadSSHPublicKey",
                    "iam:DeleteSSHPublicKey",
                    "iam:UpdateSSHPublicKey",
                ])
                .resource(user.clone()),
            PolicyStatement::allow()
                .sid("ManageOwnMfaDevice")
                .actions(["iam:CreateVirtualMFADevice", "iam:DeleteVirtualMFADevice"])
                .resource(mfa),
            PolicyStatement::allow()
                .sid("EnrollOwnMfaDevice")
                .actions([
                    "iam:EnableMFADevice",
                    "iam:ResyncMFADevice",
                    "iam:DeactivateMFADevice",
                ])
                .resource(user),
        ])
    }
}

fn scope_statement(effect: Effect, sid: String, statement: &Statement) -> PolicyStatement {
    PolicyStatement::new(effect)
        .sid(sid)
        .action(statement.action.as_str())
        .resource(statement.resource.as_str())
}

/// `ec2-admin` becomes `Ec2Admin`; Sids must be alphanumeric.
fn sid_prefix(scope: &ScopeName) -> String {
    scope
        .as_str()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::topology::AccountKind;
    use std::time::Duration;

    fn management() -> Account {
        Account::new("111111111111", "M", AccountKind::Management)
    }

    #[test]
    fn test_allows_precede_denies() {
        let scope = Scope::new("ec2")
            .allow("ec2:*")
            .deny("ec2:*Vpc*")
            .allow("elasticloadbalancing:*");
        let document = PolicyCompiler::default().compile_scope(&scope).unwrap();

        let effects: Vec<Effect> = document.statements.iter().map(|s| s.effect).collect();
        assert_eq!(effects, vec![Effect::Allow, Effect::Allow, Effect::Deny]);
        assert_eq!(document.statements[1].actions, vec!["elasticloadbalancing:*"]);
        assert_eq!(document.statements[2].sid.as_deref(), Some("Ec2Deny1"));
    }

    #[test]
    fn test_empty_allow_names_scope() {
        let scope = Scope::new("broken").deny("ec2:*");
        let err = PolicyCompiler::default().compile_scope(&scope).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmptyScope);
        assert_eq!(err.details().entity_id.as_deref(), Some("broken"));
    }

    #[test]
    fn test_no_denies_without_exceptions() {
        let scope = Scope::new("vpc").allow("ec2:*Vpc*").allow("ec2:*Subnet*");
        let compiler = PolicyCompiler::default();
        let text = compiler.compile_scope(&scope).unwrap().canonical().unwrap();

        let parsed = PolicyDocument::parse(&text).unwrap();
        assert_eq!(parsed.denies().count(), 0);
        assert_eq!(parsed, compiler.compile_scope(&scope).unwrap());
    }

    #[test]
    fn test_compile_is_byte_identical() {
        let scope = Scope::new("ec2").allow("ec2:*").deny("ec2:*Vpc*");
        let compiler = PolicyCompiler::default();
        assert_eq!(
            compiler.compile_scope(&scope).unwrap().canonical().unwrap(),
            compiler.compile_scope(&scope).unwrap().canonical().unwrap()
        );
    }

    #[test]
    fn test_trust_policy_requires_mfa() {
        let document = PolicyCompiler::default().trust_policy(&management());
        let statement = &document.statements[0];

        assert_eq!(statement.effect, Effect::Allow);
        assert_eq!(
            statement.condition_values("Bool", MFA_PRESENT_KEY),
            Some(&["true".to_string()][..])
        );
        assert!(statement.condition_values("NumericLessThan", MFA_AGE_KEY).is_none());
        assert_eq!(
            statement.principal.as_ref().unwrap().aws,
            vec!["arn:aws:iam::111111111111:root"]
        );
    }

    #[test]
    fn test_trust_policy_with_max_age() {
        let config = PolicyConfig {
            mfa_max_age: Some(Duration::from_secs(3600)),
            ..PolicyConfig::default()
        };
        let compiler = PolicyCompiler::new(NamingConvention::default(), config);
        let document = compiler.trust_policy(&management());
        assert_eq!(
            document.statements[0].condition_values("NumericLessThan", MFA_AGE_KEY),
            Some(&["3600".to_string()][..])
        );
    }

    #[test]
    fn test_delegation_policy_targets_one_role() {
        let arn = "arn:aws:iam::222222222222:role/tessera/vpc";
        let document = PolicyCompiler::default().delegation_policy(arn);
        assert_eq!(document.statements.len(), 1);
        assert_eq!(document.statements[0].actions, vec!["sts:AssumeRole"]);
        assert_eq!(document.statements[0].resources, vec![arn]);
    }

    #[test]
    fn test_self_service_uses_policy_variable() {
        let text = PolicyCompiler::default()
            .self_service_policy(&management())
            .canonical()
            .unwrap();
        assert!(text.contains("user/${aws:username}"));
        assert!(text.contains("mfa/${aws:username}"));
    }

    #[test]
    fn test_sid_prefix() {
        assert_eq!(sid_prefix(&ScopeName::new("ec2")), "Ec2");
        assert_eq!(sid_prefix(&ScopeName::new("ec2-admin")), "Ec2Admin");
        assert_eq!(sid_prefix(&ScopeName::new("read_only")), "ReadOnly");
    }
}

//! Render a plan as the equivalent `aws iam` shell commands.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::policy::PolicyDocument;
use crate::topology::AccountId;

use super::desired::RoleSpec;
use super::plan::{Operation, Plan};

/// Options for script rendering.
#[derive(Debug, Clone, Default)]
pub struct ScriptOptions {
    /// AWS CLI profile to use per account. Accounts without an entry run
    /// against the default credentials.
    pub profiles: BTreeMap<AccountId, String>,
}

impl ScriptOptions {
    pub fn with_profile(mut self, account: impl Into<AccountId>, profile: impl Into<String>) -> Self {
        self.profiles.insert(account.into(), profile.into());
        self
    }
}

/// Script preamble. Creates and deletes fail on a second run, so a
/// partially applied script is never re-run as is.
const HEADER: &str = "#!/bin/sh
# Rendered by `tessera plan --script`. Not replay-safe: after a failure,
# re-run `tessera plan --script` against the new state instead.
set -eu
";

/// Render `plan` as a POSIX shell script that stops on the first failure.
pub fn render_script(plan: &Plan, options: &ScriptOptions) -> Result<String> {
    let mut out = String::from(HEADER);

    for warning in &plan.warnings {
        out.push_str(&format!("# warning: {}\n", warning));
    }

    for (index, op) in plan.operations.iter().enumerate() {
        out.push_str(&format!("\n# [{}] {}\n", index + 1, op));
        let profile = options
            .profiles
            .get(op.account())
            .map(|p| format!(" --profile {}", quote(p)))
            .unwrap_or_default();

        for command in commands(op)? {
            out.push_str(&format!("aws iam {}{}\n", command, profile));
        }
    }

    Ok(out)
}

fn commands(op: &Operation) -> Result<Vec<String>> {
    let cmds = match op {
        Operation::CreateRole(spec) => create_role(spec)?,
        Operation::UpdateRole {
            spec,
            stale_policies,
        } => {
            let mut cmds = vec![
                format!(
                    "update-assume-role-policy --role-name {} --policy-document {}",
                    quote(&spec.name),
                    document(&spec.trust_policy)?
                ),
                put_role_policy(&spec.name, &spec.policy_name, &spec.policy)?,
            ];
            cmds.extend(stale_policies.iter().map(|p| delete_role_policy(&spec.name, p)));
            cmds
        }
        Operation::ReplaceRole {
            spec,
            inline_policies,
            ..
        } => {
            let mut cmds: Vec<String> = inline_policies
                .iter()
                .map(|p| delete_role_policy(&spec.name, p))
                .collect();
            cmds.push(format!("delete-role --role-name {}", quote(&spec.name)));
            cmds.extend(create_role(spec)?);
            cmds
        }
        Operation::DeleteRole {
            name,
            inline_policies,
            ..
        } => {
            let mut cmds: Vec<String> = inline_policies
                .iter()
                .map(|p| delete_role_policy(name, p))
                .collect();
            cmds.push(format!("delete-role --role-name {}", quote(name)));
            cmds
        }
        Operation::CreateGroup { name, path, .. } => vec![format!(
            "create-group --path {} --group-name {}",
            quote(path),
            quote(name)
        )],
        Operation::DeleteGroup { name, .. } => {
            vec![format!("delete-group --group-name {}", quote(name))]
        }
        Operation::PutGroupPolicy {
            group,
            policy_name,
            document: policy,
            ..
        } => vec![format!(
            "put-group-policy --group-name {} --policy-name {} --policy-document {}",
            quote(group),
            quote(policy_name),
            document(policy)?
        )],
        Operation::DeleteGroupPolicy {
            group, policy_name, ..
        } => vec![format!(
            "delete-group-policy --group-name {} --policy-name {}",
            quote(group),
            quote(policy_name)
        )],
        Operation::AddMembership { user, group, .. } => vec![format!(
            "add-user-to-group --group-name {} --user-name {}",
            quote(group),
            quote(user.as_str())
        )],
        Operation::RemoveMembership { user, group, .. } => vec![format!(
            "remove-user-from-group --group-name {} --user-name {}",
            quote(group),
            quote(user.as_str())
        )],
    };
    Ok(cmds)
}

fn create_role(spec: &RoleSpec) -> Result<Vec<String>> {
    Ok(vec![
        format!(
            "create-role --path {} --role-name {} --assume-role-policy-document {}",
            quote(&spec.path),
            quote(&spec.name),
            document(&spec.trust_policy)?
        ),
        put_role_policy(&spec.name, &spec.policy_name, &spec.policy)?,
    ])
}

fn put_role_policy(role: &str, policy_name: &str, policy: &PolicyDocument) -> Result<String> {
    Ok(format!(
        "put-role-policy --role-name {} --policy-name {} --policy-document {}",
        quote(role),
        quote(policy_name),
        document(policy)?
    ))
}

fn delete_role_policy(role: &str, policy_name: &str) -> String {
    format!(
        "delete-role-policy --role-name {} --policy-name {}",
        quote(role),
        quote(policy_name)
    )
}

fn document(policy: &PolicyDocument) -> Result<String> {
    Ok(quote(&policy.canonical()?))
}

/// Single-quote for POSIX shells.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::UserName;

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_membership_script_with_profile() {
        let account = AccountId::new("111111111111");
        let plan = Plan::new(
            vec![Operation::AddMembership {
                account: account.clone(),
                user: UserName::new("alice"),
                group: "vpc-A".to_string(),
            }],
            Vec::new(),
        );
        let options = ScriptOptions::default().with_profile(account, "mgmt");
        let script = render_script(&plan, &options).unwrap();

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("\nset -eu\n"));
        assert!(script.contains(
            "aws iam add-user-to-group --group-name 'vpc-A' --user-name 'alice' --profile 'mgmt'"
        ));
    }

    #[test]
    fn test_delete_role_removes_inline_policies_first() {
        let plan = Plan::new(
            vec![Operation::DeleteRole {
                account: AccountId::new("222222222222"),
                name: "vpc".to_string(),
                inline_policies: vec!["scope-permissions".to_string()],
            }],
            Vec::new(),
        );
        let script = render_script(&plan, &ScriptOptions::default()).unwrap();
        let delete_policy = script.find("delete-role-policy").unwrap();
        let delete_role = script.find("delete-role --role-name").unwrap();
        assert!(delete_policy < delete_role);
    }

    #[test]
    fn test_script_warns_it_is_not_replay_safe() {
        let script = render_script(&Plan::default(), &ScriptOptions::default()).unwrap();
        assert!(script.contains("Not replay-safe"));
        assert!(script.lines().take(4).any(|line| line == "set -eu"));
    }

    #[test]
    fn test_replace_role_deletes_before_create() {
        let spec = RoleSpec {
            account: AccountId::new("222222222222"),
            name: "vpc".to_string(),
            path: "/tessera/".to_string(),
            trust_policy: PolicyDocument::new(Vec::new()),
            policy_name: "scope-permissions".to_string(),
            policy: PolicyDocument::new(Vec::new()),
        };
        let plan = Plan::new(
            vec![Operation::ReplaceRole {
                spec,
                previous_path: "/tessera/legacy/".to_string(),
                inline_policies: vec!["scope-permissions".to_string()],
            }],
            Vec::new(),
        );
        let script = render_script(&plan, &ScriptOptions::default()).unwrap();
        let delete_policy = script.find("delete-role-policy --role-name 'vpc'").unwrap();
        let delete_role = script.find("delete-role --role-name 'vpc'").unwrap();
        let create_role = script.find("create-role --path '/tessera/' --role-name 'vpc'").unwrap();
        let put_policy = script.find("put-role-policy --role-name 'vpc'").unwrap();
        assert!(delete_policy < delete_role);
        assert!(delete_role < create_role);
        assert!(create_role < put_policy);
    }
}

//! Reconciliation scenarios across topology, policy, validation and diff.

use std::collections::BTreeSet;

use tessera_core::error::ErrorCode;
use tessera_core::policy::{PolicyCompiler, PolicyDocument, PolicyStatement, Principal};
use tessera_core::reconcile::{
    DesiredState, GroupPurpose, LiveState, Operation, OperationKind, Reconciler,
};
use tessera_core::topology::{AccountId, AccountKind, Scope, Topology, TopologyBuilder, UserName};
use tessera_core::validation::{ConstraintValidator, Severity, ViolationKind};

// ============================================================================
// Test Utilities
// ============================================================================

const MANAGEMENT: &str = "111111111111";

fn scenario() -> Topology {
    let mut builder = TopologyBuilder::new();
    builder
        .add_account(MANAGEMENT, "M", AccountKind::Management)
        .unwrap()
        .add_account("222222222222", "A", AccountKind::Target)
        .unwrap()
        .add_account("333333333333", "B", AccountKind::Target)
        .unwrap()
        .add_scope(Scope::new("vpc").allow("ec2:*Vpc*"))
        .unwrap()
        .add_scope(Scope::new("ec2").allow("ec2:*").deny("ec2:*Vpc*"))
        .unwrap()
        .add_scope(Scope::new("admin").allow("*"))
        .unwrap()
        .add_assignment("Alice", "vpc", "A")
        .unwrap()
        .add_assignment("Alice", "vpc", "B")
        .unwrap()
        .add_assignment("Bob", "ec2", "B")
        .unwrap()
        .add_assignment("Charlie", "admin", "A")
        .unwrap()
        .add_assignment("Charlie", "admin", "B")
        .unwrap();
    builder.snapshot().unwrap()
}

fn management() -> AccountId {
    AccountId::new(MANAGEMENT)
}

fn live_with_users() -> LiveState {
    LiveState::new().with_users(&management(), ["Alice", "Bob", "Charlie"])
}

// ============================================================================
// Scenario: three scopes across two target accounts
// ============================================================================

#[test]
fn test_scenario_desired_state() {
    let topology = scenario();
    let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();

    assert_eq!(desired.roles.len(), 6);

    let scope_groups: BTreeSet<&str> = desired.scope_groups().map(|g| g.name.as_str()).collect();
    assert_eq!(
        scope_groups,
        BTreeSet::from(["vpc-A", "vpc-B", "ec2-B", "admin-A", "admin-B"])
    );
    assert!(desired.group("users").is_some());
    assert_eq!(desired.groups.len(), 6);

    assert_eq!(
        desired.memberships(&UserName::new("Alice")),
        BTreeSet::from(["users", "vpc-A", "vpc-B"])
    );
}

#[test]
fn test_scenario_validation() {
    let topology = scenario();
    let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
    let report = ConstraintValidator::default().validate(&topology, &desired);

    assert!(report.is_ok());
    assert!(!report.has(ViolationKind::GroupCeilingExceeded));

    let warnings: Vec<_> = report.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, ViolationKind::AsymmetricRole);
    assert_eq!(warnings[0].severity, Severity::Warning);
    assert_eq!(warnings[0].subject, "ec2");
}

#[test]
fn test_scenario_plan_against_empty_accounts() {
    let topology = scenario();
    let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
    let plan = Reconciler::default().diff(&desired, &live_with_users()).unwrap();

    let summary = plan.summary();
    assert_eq!(summary[&OperationKind::CreateRole], 6);
    assert_eq!(summary[&OperationKind::CreateGroup], 6);
    assert_eq!(summary[&OperationKind::PutGroupPolicy], 6);
    assert_eq!(summary[&OperationKind::AddMembership], 8);
    assert!(plan.warnings.is_empty());

    let phases: Vec<u8> = plan.operations.iter().map(|op| op.kind().phase()).collect();
    let mut sorted = phases.clone();
    sorted.sort();
    assert_eq!(phases, sorted, "operations must be phase ordered");
}

#[test]
fn test_roles_precede_groups_for_every_pair() {
    let topology = scenario();
    let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
    let plan = Reconciler::default().diff(&desired, &live_with_users()).unwrap();

    let position = |target: String| {
        plan.operations
            .iter()
            .position(|op| op.target() == target)
            .unwrap_or_else(|| panic!("no operation on {}", target))
    };

    for group in desired.scope_groups() {
        let GroupPurpose::Scope { scope, account } = &group.purpose else {
            unreachable!();
        };
        let account_id = &topology.account(account).unwrap().id;

        let role = position(format!("{}:role/{}", account_id, scope));
        let create = position(format!("{}:group/{}", MANAGEMENT, group.name));
        let policy = position(format!("{}:group/{}/policy/assume-role", MANAGEMENT, group.name));
        let member = plan
            .operations
            .iter()
            .position(|op| matches!(op, Operation::AddMembership { group: g, .. } if *g == group.name))
            .unwrap();

        assert!(role < create, "role after group for {}", group.name);
        assert!(create < policy, "policy before group for {}", group.name);
        assert!(policy < member, "membership before policy for {}", group.name);
    }
}

#[test]
fn test_identical_live_state_is_empty_plan() {
    let topology = scenario();
    let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
    let live = desired.to_live().unwrap();

    assert!(Reconciler::default().diff(&desired, &live).unwrap().is_empty());
}

#[test]
fn test_removing_assignment_removes_only_membership() {
    let desired_before = DesiredState::synthesize(&scenario(), &PolicyCompiler::default()).unwrap();
    let live = desired_before.to_live().unwrap();

    let mut document = scenario().to_document();
    document
        .assignments
        .retain(|a| !(a.user.as_str() == "Alice" && a.account.as_str() == "A"));
    document.assignments.push(tessera_core::topology::Assignment::new("Dave", "vpc", "A"));
    let topology = document.into_topology().unwrap();

    let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
    let plan = Reconciler::default().diff(&desired, &live).unwrap();

    let removals: Vec<String> = plan
        .operations
        .iter()
        .filter(|op| op.kind() == OperationKind::RemoveMembership)
        .map(Operation::target)
        .collect();
    assert_eq!(removals, vec![format!("{}:group/vpc-A/member/Alice", MANAGEMENT)]);
    assert!(!plan.operations.iter().any(|op| op.kind() == OperationKind::DeleteGroup));
    assert!(!plan.operations.iter().any(|op| op.kind() == OperationKind::DeleteRole));
}

#[test]
fn test_dropping_last_assignment_deletes_pair_group_and_roles() {
    let desired_before = DesiredState::synthesize(&scenario(), &PolicyCompiler::default()).unwrap();
    let live = desired_before.to_live().unwrap();

    let mut document = scenario().to_document();
    document.assignments.retain(|a| a.scope.as_str() != "ec2");
    let topology = document.into_topology().unwrap();

    let desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
    let plan = Reconciler::default().diff(&desired, &live).unwrap();
    let kinds: Vec<OperationKind> = plan.operations.iter().map(Operation::kind).collect();

    assert_eq!(
        kinds,
        vec![
            OperationKind::RemoveMembership,
            OperationKind::RemoveMembership,
            OperationKind::DeleteGroupPolicy,
            OperationKind::DeleteGroup,
            OperationKind::DeleteRole,
            OperationKind::DeleteRole,
        ]
    );
}

// ============================================================================
// Safety invariants
// ============================================================================

#[test]
fn test_trust_policy_without_mfa_is_rejected() {
    let topology = scenario();
    let mut desired = DesiredState::synthesize(&topology, &PolicyCompiler::default()).unwrap();
    let role = desired.roles.values_mut().next().unwrap();
    role.spec.trust_policy = PolicyDocument::new(vec![PolicyStatement::allow()
        .principal(Principal::aws(format!("arn:aws:iam::{}:root", MANAGEMENT)))
        .action("sts:AssumeRole")]);

    let err = ConstraintValidator::default()
        .validate(&topology, &desired)
        .into_result()
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::MfaTrustMissing);
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_eleventh_membership_exceeds_ceiling() {
    let mut builder = TopologyBuilder::new();
    builder
        .add_account(MANAGEMENT, "M", AccountKind::Management)
        .unwrap()
        .add_account("222222222222", "A", AccountKind::Target)
        .unwrap()
        .add_account("333333333333", "B", AccountKind::Target)
        .unwrap();
    for i in 0..5 {
        builder
            .add_scope(Scope::new(format!("scope{}", i)).allow("ec2:*"))
            .unwrap();
    }

    let mut pairs = Vec::new();
    for i in 0..5 {
        for account in ["A", "B"] {
            pairs.push((format!("scope{}", i), account));
        }
    }

    let compiler = PolicyCompiler::default();
    let validator = ConstraintValidator::default();
    for (count, (scope, account)) in pairs.into_iter().enumerate() {
        builder.add_assignment("alice", scope, account).unwrap();
        let topology = builder.snapshot().unwrap();
        let desired = DesiredState::synthesize(&topology, &compiler).unwrap();
        let memberships = desired.memberships(&UserName::new("alice")).len();
        let report = validator.validate(&topology, &desired);

        assert_eq!(memberships, count + 2);
        assert_eq!(
            report.has(ViolationKind::GroupCeilingExceeded),
            memberships > 10,
            "memberships = {}",
            memberships
        );
    }
}

#[test]
fn test_compiled_scope_round_trips_through_text() {
    let compiler = PolicyCompiler::default();
    for scope in scenario().scopes() {
        let document = compiler.compile_scope(scope).unwrap();
        let text = document.canonical().unwrap();
        let parsed = PolicyDocument::parse(&text).unwrap();

        assert_eq!(parsed, document);
        assert_eq!(parsed.canonical().unwrap(), text);
        assert_eq!(parsed.denies().count(), scope.deny.len());
    }
}

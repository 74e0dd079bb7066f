//! Plan execution against an IAM control plane.
//!
//! Operations run strictly in plan order, one at a time. The first failure
//! halts the run; nothing is rolled back. Re-diffing against a fresh live
//! snapshot and applying again is the retry path, and every operation is
//! idempotent so already-completed work is simply not re-planned.

pub mod memory;

pub use memory::InMemoryIam;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::{ErrorCode, ErrorDetails, Result, TesseraError};
use crate::policy::PolicyDocument;
use crate::reconcile::{Operation, Plan, RoleSpec};
use crate::telemetry::{OPERATIONS_APPLIED_TOTAL, OPERATIONS_FAILED_TOTAL};
use crate::topology::{AccountId, UserName};

// ═══════════════════════════════════════════════════════════════════════════════
// Control Plane
// ═══════════════════════════════════════════════════════════════════════════════

/// IAM mutation primitives. Every method must be idempotent.
#[async_trait]
pub trait IamControlPlane: Send + Sync {
    /// Create or update a role: trust policy, permission policy, and
    /// removal of the listed stale inline policies.
    async fn put_role(&self, spec: &RoleSpec, stale_policies: &[String]) -> Result<()>;

    /// Delete a role after removing its inline policies.
    async fn delete_role(&self, account: &AccountId, name: &str, inline_policies: &[String]) -> Result<()>;

    async fn create_group(&self, account: &AccountId, name: &str, path: &str) -> Result<()>;

    async fn delete_group(&self, account: &AccountId, name: &str) -> Result<()>;

    async fn put_group_policy(
        &self,
        account: &AccountId,
        group: &str,
        policy_name: &str,
        document: &PolicyDocument,
    ) -> Result<()>;

    async fn delete_group_policy(&self, account: &AccountId, group: &str, policy_name: &str) -> Result<()>;

    async fn add_user_to_group(&self, account: &AccountId, group: &str, user: &UserName) -> Result<()>;

    async fn remove_user_from_group(&self, account: &AccountId, group: &str, user: &UserName) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// A fully applied plan.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: Vec<Operation>,
}

/// A run halted by a failed operation.
#[derive(Debug, thiserror::Error)]
#[error("apply halted at {failed} after {} completed operation(s): {cause}", .completed.len())]
pub struct ApplyError {
    pub run_id: Uuid,
    pub completed: Vec<Operation>,
    pub failed: Operation,
    #[source]
    pub cause: TesseraError,
    pub pending: Vec<Operation>,
}

impl From<ApplyError> for TesseraError {
    fn from(error: ApplyError) -> Self {
        let details = ErrorDetails::new()
            .with_entity(error.failed.kind().to_string(), error.failed.target())
            .with_context("run_id", error.run_id)
            .with_context("completed", error.completed.len())
            .with_context("pending", error.pending.len())
            .with_context("cause_code", error.cause.code())
            .with_suggestion("Re-run plan against fresh live state and apply the remaining operations");
        TesseraError::new(ErrorCode::ApplyFailed, error.to_string())
            .with_details(details)
            .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Applier
// ═══════════════════════════════════════════════════════════════════════════════

/// Sequential plan executor.
#[derive(Clone)]
pub struct Applier {
    control_plane: Arc<dyn IamControlPlane>,
}

impl Applier {
    pub fn new(control_plane: Arc<dyn IamControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Execute every operation in order, halting on the first failure.
    pub async fn execute(&self, plan: &Plan) -> std::result::Result<ApplyReport, ApplyError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("apply", %run_id, operations = plan.len());
        self.run(run_id, plan).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, plan: &Plan) -> std::result::Result<ApplyReport, ApplyError> {
        let started_at = Utc::now();
        let mut completed = Vec::with_capacity(plan.len());

        for (index, op) in plan.operations.iter().enumerate() {
            let kind = op.kind();
            let start = Instant::now();

            match self.dispatch(op).await {
                Ok(()) => {
                    info!(
                        step = index + 1,
                        kind = %kind,
                        target = %op.target(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Applied operation"
                    );
                    counter!(OPERATIONS_APPLIED_TOTAL, "kind" => kind.as_str()).increment(1);
                    completed.push(op.clone());
                }
                Err(cause) => {
                    error!(
                        step = index + 1,
                        kind = %kind,
                        target = %op.target(),
                        error = %cause,
                        "Operation failed, halting"
                    );
                    counter!(OPERATIONS_FAILED_TOTAL, "kind" => kind.as_str()).increment(1);
                    return Err(ApplyError {
                        run_id,
                        completed,
                        failed: op.clone(),
                        cause,
                        pending: plan.operations[index + 1..].to_vec(),
                    });
                }
            }
        }

        info!(completed = completed.len(), "Plan applied");
        Ok(ApplyReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            completed,
        })
    }

    async fn dispatch(&self, op: &Operation) -> Result<()> {
        let cp = &self.control_plane;
        match op {
            Operation::CreateRole(spec) => cp.put_role(spec, &[]).await,
            Operation::UpdateRole {
                spec,
                stale_policies,
            } => cp.put_role(spec, stale_policies).await,
            Operation::ReplaceRole {
                spec,
                inline_policies,
                ..
            } => {
                cp.delete_role(&spec.account, &spec.name, inline_policies).await?;
                cp.put_role(spec, &[]).await
            }
            Operation::DeleteRole {
                account,
                name,
                inline_policies,
            } => cp.delete_role(account, name, inline_policies).await,
            Operation::CreateGroup {
                account,
                name,
                path,
            } => cp.create_group(account, name, path).await,
            Operation::DeleteGroup { account, name } => cp.delete_group(account, name).await,
            Operation::PutGroupPolicy {
                account,
                group,
                policy_name,
                document,
            } => cp.put_group_policy(account, group, policy_name, document).await,
            Operation::DeleteGroupPolicy {
                account,
                group,
                policy_name,
            } => cp.delete_group_policy(account, group, policy_name).await,
            Operation::AddMembership {
                account,
                user,
                group,
            } => cp.add_user_to_group(account, group, user).await,
            Operation::RemoveMembership {
                account,
                user,
                group,
            } => cp.remove_user_from_group(account, group, user).await,
        }
    }
}

impl std::fmt::Debug for Applier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::LiveState;

    fn plan() -> Plan {
        let account = AccountId::new("111111111111");
        Plan::new(
            vec![
                Operation::CreateGroup {
                    account: account.clone(),
                    name: "users".to_string(),
                    path: "/tessera/".to_string(),
                },
                Operation::AddMembership {
                    account: account.clone(),
                    user: UserName::new("alice"),
                    group: "users".to_string(),
                },
            ],
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_execute_applies_in_order() {
        let account = AccountId::new("111111111111");
        let iam = Arc::new(InMemoryIam::new(LiveState::new().with_users(&account, ["alice"])));
        let report = Applier::new(iam.clone()).execute(&plan()).await.unwrap();

        assert_eq!(report.completed.len(), 2);
        assert!(report.finished_at >= report.started_at);
        let state = iam.state();
        let group = &state.account(&account).unwrap().groups["users"];
        assert!(group.members.contains(&UserName::new("alice")));
    }

    #[tokio::test]
    async fn test_missing_user_halts_run() {
        let iam = Arc::new(InMemoryIam::default());
        let err = Applier::new(iam.clone()).execute(&plan()).await.unwrap_err();

        assert_eq!(err.completed.len(), 1);
        assert_eq!(err.failed.kind(), crate::reconcile::OperationKind::AddMembership);
        assert!(err.pending.is_empty());
        assert_eq!(err.cause.code(), ErrorCode::ControlPlaneError);

        let error: TesseraError = err.into();
        assert_eq!(error.code(), ErrorCode::ApplyFailed);
        assert_eq!(error.exit_code(), 4);
    }
}

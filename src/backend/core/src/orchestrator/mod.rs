//! Reconcile Orchestrator - runs the full pipeline.
//!
//! topology -> desired state -> validation (fail closed) -> live snapshot
//! -> diff -> apply (unless dry-run).

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::apply::{Applier, ApplyError, ApplyReport, IamControlPlane};
use crate::config::TesseraConfig;
use crate::error::Result;
use crate::policy::PolicyCompiler;
use crate::reconcile::{DesiredState, LiveStateSource, Plan, Reconciler};
use crate::topology::{AccountId, NamingConvention, Topology};
use crate::validation::{ConstraintValidator, ValidationReport, Violation};

/// Options for a reconciliation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Compute the plan but do not apply it.
    pub dry_run: bool,
}

/// What happened to the plan.
#[derive(Debug)]
pub enum ApplyStatus {
    DryRun,
    Applied(ApplyReport),
    Halted(ApplyError),
}

impl ApplyStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Halted(_))
    }
}

/// Result of a reconciliation run.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub plan: Plan,
    /// Non-fatal validation findings.
    pub warnings: Vec<Violation>,
    pub apply: ApplyStatus,
}

/// Desired state that passed validation.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub desired: DesiredState,
    pub report: ValidationReport,
}

/// Wires compiler, validator, reconciler and applier to the collaborators.
pub struct ReconcileOrchestrator {
    compiler: PolicyCompiler,
    validator: ConstraintValidator,
    reconciler: Reconciler,
    live: Arc<dyn LiveStateSource>,
    applier: Applier,
}

impl ReconcileOrchestrator {
    pub fn new(
        config: &TesseraConfig,
        live: Arc<dyn LiveStateSource>,
        control_plane: Arc<dyn IamControlPlane>,
    ) -> Result<Self> {
        config.validate()?;
        let naming = NamingConvention::from_config(&config.reconcile)?;

        Ok(Self {
            compiler: PolicyCompiler::new(naming.clone(), config.policy.clone()),
            validator: ConstraintValidator::from_config(&config.reconcile)?,
            reconciler: Reconciler::new(naming),
            live,
            applier: Applier::new(control_plane),
        })
    }

    pub fn compiler(&self) -> &PolicyCompiler {
        &self.compiler
    }

    /// Synthesize and validate, failing closed on any fatal violation.
    #[instrument(skip_all)]
    pub fn prepare(&self, topology: &Topology) -> Result<Prepared> {
        let desired = DesiredState::synthesize(topology, &self.compiler)?;
        let report = self.validator.validate(topology, &desired).into_result()?;
        for warning in report.warnings() {
            warn!(kind = %warning.kind, subject = %warning.subject, "{}", warning.message);
        }
        Ok(Prepared { desired, report })
    }

    /// Prepare, snapshot live state and diff.
    #[instrument(skip_all)]
    pub async fn plan(&self, topology: &Topology) -> Result<(Plan, ValidationReport)> {
        let prepared = self.prepare(topology)?;
        let accounts: Vec<AccountId> = topology.accounts().iter().map(|a| a.id.clone()).collect();
        let live = self.live.snapshot(&accounts).await?;
        let plan = self.reconciler.diff(&prepared.desired, &live)?;
        Ok((plan, prepared.report))
    }

    /// Full run: plan, then apply unless `dry_run`.
    #[instrument(skip_all, fields(dry_run = options.dry_run))]
    pub async fn reconcile(&self, topology: &Topology, options: ReconcileOptions) -> Result<ReconcileOutcome> {
        let (plan, report) = self.plan(topology).await?;
        let warnings: Vec<Violation> = report.warnings().cloned().collect();

        let apply = if options.dry_run {
            ApplyStatus::DryRun
        } else {
            match self.applier.execute(&plan).await {
                Ok(report) => ApplyStatus::Applied(report),
                Err(error) => ApplyStatus::Halted(error),
            }
        };

        info!(
            operations = plan.len(),
            warnings = warnings.len(),
            success = apply.is_success(),
            "Reconciliation finished"
        );
        Ok(ReconcileOutcome {
            plan,
            warnings,
            apply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::InMemoryIam;
    use crate::error::ErrorCode;
    use crate::reconcile::LiveState;
    use crate::topology::{AccountKind, Scope, TopologyBuilder};

    fn topology() -> Topology {
        let mut builder = TopologyBuilder::new();
        builder
            .add_account("111111111111", "M", AccountKind::Management)
            .unwrap()
            .add_account("222222222222", "A", AccountKind::Target)
            .unwrap()
            .add_scope(Scope::new("vpc").allow("ec2:*Vpc*"))
            .unwrap()
            .add_assignment("alice", "vpc", "A")
            .unwrap();
        builder.snapshot().unwrap()
    }

    fn orchestrator(iam: Arc<InMemoryIam>) -> ReconcileOrchestrator {
        ReconcileOrchestrator::new(&TesseraConfig::default(), iam.clone(), iam).unwrap()
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let iam = Arc::new(InMemoryIam::default());
        let outcome = orchestrator(iam.clone())
            .reconcile(&topology(), ReconcileOptions { dry_run: true })
            .await
            .unwrap();

        assert!(!outcome.plan.is_empty());
        assert!(matches!(outcome.apply, ApplyStatus::DryRun));
        assert_eq!(iam.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_converges() {
        let management = AccountId::new("111111111111");
        let iam = Arc::new(InMemoryIam::new(LiveState::new().with_users(&management, ["alice"])));
        let orchestrator = orchestrator(iam.clone());

        let outcome = orchestrator
            .reconcile(&topology(), ReconcileOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome.apply, ApplyStatus::Applied(_)));

        let (plan, _) = orchestrator.plan(&topology()).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_topology_never_reaches_control_plane() {
        let mut config = TesseraConfig::default();
        config.reconcile.group_ceiling = 1;
        let iam = Arc::new(InMemoryIam::default());
        let orchestrator = ReconcileOrchestrator::new(&config, iam.clone(), iam.clone()).unwrap();

        let err = orchestrator
            .reconcile(&topology(), ReconcileOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::GroupCeilingExceeded);
        assert_eq!(iam.mutation_count(), 0);
    }
}

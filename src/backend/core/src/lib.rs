#![allow(clippy::result_large_err)]
//! # Tessera Core
//!
//! Synthesizes and reconciles a multi-account AWS IAM topology: users live
//! in a management account, target accounts hold roles only, and users reach
//! roles through MFA-gated trust policies granted by group membership.
//!
//! ## Architecture
//!
//! - **Topology**: Accounts, scopes, users and assignments, with a YAML/JSON/TOML document format
//! - **Policy**: Deterministic rendering of scope, trust, delegation and self-service policies
//! - **Validation**: Single-account users, group ceiling, role symmetry and MFA trust checks
//! - **Reconcile**: Desired-state synthesis, live snapshots, and an ordered minimal diff
//! - **Apply**: Sequential, halt-on-failure execution against an IAM control plane
//! - **Orchestrator**: The end-to-end validate, diff and apply pipeline
//! - **Telemetry**: Structured logging and operation counters

pub mod apply;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod reconcile;
pub mod telemetry;
pub mod topology;
pub mod validation;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorReport, ErrorSeverity, Result, TesseraError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::apply::{Applier, ApplyError, ApplyReport, IamControlPlane, InMemoryIam};
    pub use crate::config::{PolicyConfig, ReconcileConfig, TesseraConfig};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, TesseraError};
    pub use crate::orchestrator::{ApplyStatus, ReconcileOptions, ReconcileOrchestrator, ReconcileOutcome};
    pub use crate::policy::{PolicyCompiler, PolicyDocument};
    pub use crate::reconcile::{
        render_script, DesiredState, LiveState, LiveStateSource, Operation, OperationKind, Plan,
        PlanWarning, Reconciler, ScriptOptions,
    };
    pub use crate::topology::{
        Account, AccountId, AccountKind, AccountName, Assignment, NamingConvention, Scope,
        ScopeName, Statement, Topology, TopologyBuilder, TopologyDocument, UserName,
    };
    pub use crate::validation::{ConstraintValidator, ValidationReport, Violation, ViolationKind};
}

//! Policy compilation.
//!
//! Scopes become permission policies on roles, the management account
//! becomes an MFA-gated trust principal, and every (scope, account) group
//! receives a delegation policy naming a single role ARN.

pub mod compiler;
pub mod document;

pub use compiler::{PolicyCompiler, MFA_AGE_KEY, MFA_PRESENT_KEY};
pub use document::{
    canonicalize, ConditionValues, Effect, PolicyDocument, PolicyStatement, Principal,
    POLICY_VERSION,
};

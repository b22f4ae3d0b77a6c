//! Stacks: bundles of services deployed under one namespace

pub mod bundle;
pub mod labels;
pub mod orchestrator;

pub use bundle::{StackBundle, LABEL_NAMESPACE};
pub use labels::{PermissionEncoder, PermissionGrant, PermissionLevel, ReservedLabelEncoder};
pub use orchestrator::{
    DeployOptions, DeployReport, RemoveReport, ServiceStatus, StackOrchestrator, StackSummary,
};

// ABOUTME: Error types for deployment state transitions and handlers.
// ABOUTME: Domain-rule violations surface as typed errors, never panics.

use crate::types::DeploymentId;

use super::deployment::{DeploymentStatus, OperationMode};

/// Errors raised by the deployment state machine and its handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeployError {
    /// Deployment not found in the repository.
    #[error("deployment not found: {0}")]
    NotFound(DeploymentId),

    /// Operation requires a running deployment.
    #[error("operation requires a running deployment, but status is {0}")]
    NotRunning(DeploymentStatus),

    /// Operation requires a deployment mid-installation.
    #[error("operation requires an installing deployment, but status is {0}")]
    NotInstalling(DeploymentStatus),

    /// Operation requires a deployment mid-upgrade.
    #[error("operation requires an upgrading deployment, but status is {0}")]
    NotUpgrading(DeploymentStatus),

    /// Operation requires a failed deployment.
    #[error("operation requires a failed deployment, but status is {0}")]
    NotFailed(DeploymentStatus),

    /// Target version equals the current version.
    #[error("stack is already running version {0}")]
    SameVersion(String),

    /// Target version is older than the current version.
    #[error("downgrade from {current} to {target} is not supported; use rollback instead")]
    DowngradeNotSupported { current: String, target: String },

    /// Rollback requested without a pre-upgrade snapshot.
    #[error("no pending upgrade snapshot to roll back to")]
    NoPendingSnapshot,

    /// The deployment was soft-removed and accepts no further operations.
    #[error("deployment has been removed")]
    Removed,

    /// Requested operation mode transition is not legal from the current mode.
    #[error("cannot switch operation mode from {from} to {to}")]
    IllegalModeChange { from: OperationMode, to: OperationMode },

    /// Variable resolution failed for the target configuration.
    #[error(transparent)]
    Resolution(#[from] crate::vars::ResolutionErrors),

    /// Container engine reported a failure.
    #[error("container engine error: {0}")]
    Engine(String),

    /// Repository load/save failed.
    #[error("repository error: {0}")]
    Repository(String),

    /// Catalog lookup failed.
    #[error("catalog error: {0}")]
    Catalog(String),
}

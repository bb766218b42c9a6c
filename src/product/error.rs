// ABOUTME: Error types for product deployment orchestration.
// ABOUTME: Domain errors via thiserror; unified orchestration error with SNAFU pattern.

use snafu::Snafu;

use crate::deploy::DeployError;
use crate::services::{CatalogError, RepositoryError};
use crate::types::{ProductDeploymentId, ProductGroupId, ProductId, StackName};

/// Domain-rule violations raised by the `ProductDeployment` aggregate and the
/// orchestrator's precondition checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("product not found in catalog: {0}")]
    ProductNotFound(ProductId),

    #[error("product deployment not found: {0}")]
    DeploymentNotFound(ProductDeploymentId),

    #[error("no stack entry named '{0}' in this product deployment")]
    UnknownStack(StackName),

    #[error("stack '{0}' is not part of the target product version")]
    StackNotInProduct(StackName),

    #[error(
        "an active deployment of product group {0} already exists in this environment"
    )]
    AlreadyActive(ProductGroupId),

    #[error("product deployment is not operational (status: {0})")]
    NotOperational(super::product::ProductDeploymentStatus),

    #[error("product is already at version {0}")]
    SameVersion(String),

    #[error("product downgrade from {current} to {target} is not supported")]
    DowngradeNotSupported { current: String, target: String },
}

/// Unified error for orchestration entry points, wrapping every failure
/// source that can reject an operation before or during a run.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OrchestrationError {
    #[snafu(display("validation failed: {message}"))]
    Validation { message: String },

    #[snafu(display("catalog lookup failed: {source}"))]
    Catalog { source: CatalogError },

    #[snafu(display("repository access failed: {source}"))]
    Repository { source: RepositoryError },

    #[snafu(display("{source}"))]
    Domain { source: ProductError },

    #[snafu(display("{source}"))]
    StackDomain { source: DeployError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationErrorKind {
    /// Caller input was invalid; nothing was mutated.
    Validation,
    /// Catalog collaborator failed.
    Catalog,
    /// Persistence collaborator failed.
    Storage,
    /// A domain precondition rejected the operation.
    DomainRule,
}

impl OrchestrationError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> OrchestrationErrorKind {
        match self {
            OrchestrationError::Validation { .. } => OrchestrationErrorKind::Validation,
            OrchestrationError::Catalog { .. } => OrchestrationErrorKind::Catalog,
            OrchestrationError::Repository { .. } => OrchestrationErrorKind::Storage,
            OrchestrationError::Domain { .. } | OrchestrationError::StackDomain { .. } => {
                OrchestrationErrorKind::DomainRule
            }
        }
    }
}

impl From<ProductError> for OrchestrationError {
    fn from(source: ProductError) -> Self {
        OrchestrationError::Domain { source }
    }
}

impl From<DeployError> for OrchestrationError {
    fn from(source: DeployError) -> Self {
        OrchestrationError::StackDomain { source }
    }
}

impl From<CatalogError> for OrchestrationError {
    fn from(source: CatalogError) -> Self {
        OrchestrationError::Catalog { source }
    }
}

impl From<RepositoryError> for OrchestrationError {
    fn from(source: RepositoryError) -> Self {
        OrchestrationError::Repository { source }
    }
}

// ABOUTME: Container engine capability trait - the seam to Docker Compose control.
// ABOUTME: Starting, stopping, and tearing down stacks happens behind this trait.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::deploy::{ServiceRecord, ServiceStatus};
use crate::types::{EnvironmentId, StackName};

/// Outcome of one container operation within a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    Started,
    Stopped,
    Failed { reason: String },
}

/// Per-container result reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerResult {
    /// Service name within the stack.
    pub service: String,
    pub outcome: ContainerOutcome,
}

impl ContainerResult {
    pub fn started(service: &str) -> Self {
        Self {
            service: service.to_string(),
            outcome: ContainerOutcome::Started,
        }
    }

    pub fn failed(service: &str, reason: &str) -> Self {
        Self {
            service: service.to_string(),
            outcome: ContainerOutcome::Failed {
                reason: reason.to_string(),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, ContainerOutcome::Failed { .. })
    }

    /// Convert to the service record persisted on the aggregate.
    pub fn to_record(&self) -> ServiceRecord {
        let status = match self.outcome {
            ContainerOutcome::Started => ServiceStatus::Running,
            ContainerOutcome::Stopped => ServiceStatus::Stopped,
            ContainerOutcome::Failed { .. } => ServiceStatus::Failed,
        };
        ServiceRecord {
            name: self.service.clone(),
            status,
        }
    }
}

/// Collect engine results into aggregate service records, plus the first
/// failure reason if any container failed.
pub fn summarize_results(results: &[ContainerResult]) -> (Vec<ServiceRecord>, Option<String>) {
    let records = results.iter().map(ContainerResult::to_record).collect();
    let failure = results.iter().find_map(|r| match &r.outcome {
        ContainerOutcome::Failed { reason } => {
            Some(format!("service '{}' failed: {}", r.service, reason))
        }
        _ => None,
    });
    (records, failure)
}

/// Errors from container engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("invalid stack content: {0}")]
    InvalidContent(String),

    #[error("stack not found on engine: {0}")]
    StackNotFound(String),

    #[error("engine operation failed: {0}")]
    Operation(String),
}

/// Container engine operations for a compose-based stack.
///
/// Implementations wrap the actual Docker Compose control plane. Timeouts are
/// the implementation's responsibility; the orchestrator awaits each call.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create or replace the stack's containers from rendered content.
    async fn deploy_stack(
        &self,
        environment: &EnvironmentId,
        stack: &StackName,
        rendered_content: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<Vec<ContainerResult>, EngineError>;

    /// Stop the stack's containers without removing them.
    async fn stop_stack(
        &self,
        environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<Vec<ContainerResult>, EngineError>;

    /// Start a previously stopped stack.
    async fn start_stack(
        &self,
        environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<Vec<ContainerResult>, EngineError>;

    /// Remove the stack's containers entirely.
    async fn teardown_stack(
        &self,
        environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<(), EngineError>;
}

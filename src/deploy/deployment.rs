// ABOUTME: The Deployment aggregate root - one stack instance in one environment.
// ABOUTME: Carries status, operation mode, variables, services, and the pending snapshot.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeploymentId, EnvironmentId, StackId, StackName};

/// Primary lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Installing,
    Running,
    Upgrading,
    Failed,
    Stopped,
    Removed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Installing => "installing",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Upgrading => "upgrading",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

/// Intended operational posture, orthogonal to `DeploymentStatus`. Status
/// gates which mode transitions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Normal,
    Maintenance,
    Migrating,
    Failed,
    Stopped,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationMode::Normal => "normal",
            OperationMode::Maintenance => "maintenance",
            OperationMode::Migrating => "migrating",
            OperationMode::Failed => "failed",
            OperationMode::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Runtime status of one service inside the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Failed,
}

/// One service runtime record as last reported by the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub status: ServiceStatus,
}

impl ServiceRecord {
    pub fn running(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ServiceStatus::Running,
        }
    }
}

/// Snapshot of the deployment's restorable state, captured immediately before
/// an upgrade begins and cleared when the upgrade completes. Its lifetime is
/// entirely owned by one deployment; at most one exists at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSnapshot {
    pub stack_version: String,
    pub variables: BTreeMap<String, String>,
    pub services: Vec<ServiceRecord>,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
}

/// One completed upgrade, kept for operator history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub from_version: String,
    pub to_version: String,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate root for one stack instance deployed into one environment.
///
/// All state transitions go through the guarded methods in `transitions.rs`;
/// illegal transitions return `DeployError` instead of mutating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    id: DeploymentId,
    environment_id: EnvironmentId,
    stack_name: StackName,
    /// Catalog reference; manual YAML deployments have none.
    stack_id: Option<StackId>,
    status: DeploymentStatus,
    operation_mode: OperationMode,
    stack_version: String,
    variables: BTreeMap<String, String>,
    services: Vec<ServiceRecord>,
    pending_snapshot: Option<UpgradeSnapshot>,
    status_reason: Option<String>,
    history: Vec<UpgradeRecord>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a fresh deployment at the start of an install.
    pub fn new_install(
        environment_id: EnvironmentId,
        stack_name: StackName,
        stack_id: Option<StackId>,
        stack_version: impl Into<String>,
        variables: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            environment_id,
            stack_name,
            stack_id,
            status: DeploymentStatus::Installing,
            operation_mode: OperationMode::Normal,
            stack_version: stack_version.into(),
            variables,
            services: Vec::new(),
            pending_snapshot: None,
            status_reason: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &DeploymentId {
        &self.id
    }

    pub fn environment_id(&self) -> &EnvironmentId {
        &self.environment_id
    }

    pub fn stack_name(&self) -> &StackName {
        &self.stack_name
    }

    pub fn stack_id(&self) -> Option<&StackId> {
        self.stack_id.as_ref()
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn operation_mode(&self) -> OperationMode {
        self.operation_mode
    }

    pub fn stack_version(&self) -> &str {
        &self.stack_version
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn services(&self) -> &[ServiceRecord] {
        &self.services
    }

    pub fn pending_snapshot(&self) -> Option<&UpgradeSnapshot> {
        self.pending_snapshot.as_ref()
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn history(&self) -> &[UpgradeRecord] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Upgrades are only legal from a running deployment.
    pub fn can_upgrade(&self) -> bool {
        self.status == DeploymentStatus::Running
    }

    /// Rollback is only legal for a failed deployment that still holds its
    /// pre-upgrade snapshot.
    pub fn can_rollback(&self) -> bool {
        self.status == DeploymentStatus::Failed && self.pending_snapshot.is_some()
    }

    // Field mutators for the transition methods.
    pub(crate) fn set_status(&mut self, status: DeploymentStatus, mode: OperationMode) {
        self.status = status;
        self.operation_mode = mode;
        self.touch();
    }

    pub(crate) fn set_reason(&mut self, reason: Option<String>) {
        self.status_reason = reason;
    }

    pub(crate) fn set_version_and_variables(
        &mut self,
        version: String,
        variables: BTreeMap<String, String>,
    ) {
        self.stack_version = version;
        self.variables = variables;
    }

    pub(crate) fn set_services(&mut self, services: Vec<ServiceRecord>) {
        self.services = services;
    }

    pub(crate) fn set_snapshot(&mut self, snapshot: Option<UpgradeSnapshot>) {
        self.pending_snapshot = snapshot;
    }

    pub(crate) fn push_history(&mut self, record: UpgradeRecord) {
        self.history.push(record);
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

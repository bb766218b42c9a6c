// ABOUTME: The ProductDeployment aggregate - multiple stacks deployed as one unit.
// ABOUTME: Tracks per-stack entries and derives the aggregate status from their counts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::ProductDefinition;
use crate::types::{
    DeploymentId, EnvironmentId, ProductDeploymentId, ProductGroupId, ProductId, StackId, StackName,
};

use super::error::ProductError;

/// Status of one stack entry within a product deployment. Independent of the
/// underlying `Deployment`'s own status; kept in sync by explicit calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackEntryStatus {
    Pending,
    Running,
    Failed,
    Removed,
}

/// Aggregate status of a product deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductDeploymentStatus {
    Deploying,
    Upgrading,
    Running,
    PartiallyRunning,
    Failed,
    Removed,
}

impl fmt::Display for ProductDeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductDeploymentStatus::Deploying => "deploying",
            ProductDeploymentStatus::Upgrading => "upgrading",
            ProductDeploymentStatus::Running => "running",
            ProductDeploymentStatus::PartiallyRunning => "partially_running",
            ProductDeploymentStatus::Failed => "failed",
            ProductDeploymentStatus::Removed => "removed",
        };
        write!(f, "{s}")
    }
}

/// One member stack of a product deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDeploymentEntry {
    pub stack_name: StackName,
    pub stack_display_name: String,
    pub stack_id: StackId,
    /// Set once the member `Deployment` exists.
    pub deployment_id: Option<DeploymentId>,
    pub status: StackEntryStatus,
    pub service_count: usize,
    pub variables: BTreeMap<String, String>,
    /// True when this stack was not part of the previous composition and was
    /// added by an upgrade.
    pub is_new_in_upgrade: bool,
    pub failure_reason: Option<String>,
}

/// Seed data for one stack entry when initiating a deployment or upgrade.
#[derive(Debug, Clone)]
pub struct StackSeed {
    pub name: StackName,
    pub display_name: String,
    pub stack_id: StackId,
    pub variables: BTreeMap<String, String>,
    pub is_new_in_upgrade: bool,
}

impl StackSeed {
    fn into_entry(self) -> StackDeploymentEntry {
        StackDeploymentEntry {
            stack_name: self.name,
            stack_display_name: self.display_name,
            stack_id: self.stack_id,
            deployment_id: None,
            status: StackEntryStatus::Pending,
            service_count: 0,
            variables: self.variables,
            is_new_in_upgrade: self.is_new_in_upgrade,
            failure_reason: None,
        }
    }
}

/// Aggregate root grouping the deployments of one product in one environment.
///
/// At most one non-removed product deployment exists per
/// `(environment, product group)` pair; the same aggregate survives upgrades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDeployment {
    id: ProductDeploymentId,
    environment_id: EnvironmentId,
    product_group_id: ProductGroupId,
    product_id: ProductId,
    product_name: String,
    product_version: String,
    entries: Vec<StackDeploymentEntry>,
    status: ProductDeploymentStatus,
    status_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductDeployment {
    /// Create a fresh aggregate for an initial product deployment. All member
    /// stacks start pending.
    pub fn initiate_deployment(
        environment_id: EnvironmentId,
        product: &ProductDefinition,
        seeds: Vec<StackSeed>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProductDeploymentId::generate(),
            environment_id,
            product_group_id: product.group_id.clone(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            product_version: product.version.clone(),
            entries: seeds.into_iter().map(StackSeed::into_entry).collect(),
            status: ProductDeploymentStatus::Deploying,
            status_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-target the aggregate at a newer product version. The identity (and
    /// in particular the group binding) survives; entries are rebuilt with
    /// every stack pending again.
    ///
    /// # Errors
    ///
    /// Returns `NotOperational` unless the aggregate is currently operational.
    pub fn initiate_upgrade(
        &mut self,
        target: &ProductDefinition,
        seeds: Vec<StackSeed>,
    ) -> Result<(), ProductError> {
        if !self.can_upgrade() {
            return Err(ProductError::NotOperational(self.status));
        }
        self.product_id = target.id.clone();
        self.product_name = target.name.clone();
        self.product_version = target.version.clone();
        self.entries = seeds.into_iter().map(StackSeed::into_entry).collect();
        self.status = ProductDeploymentStatus::Upgrading;
        self.status_reason = None;
        self.touch();
        Ok(())
    }

    pub fn id(&self) -> &ProductDeploymentId {
        &self.id
    }

    pub fn environment_id(&self) -> &EnvironmentId {
        &self.environment_id
    }

    pub fn product_group_id(&self) -> &ProductGroupId {
        &self.product_group_id
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn product_version(&self) -> &str {
        &self.product_version
    }

    pub fn status(&self) -> ProductDeploymentStatus {
        self.status
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn entries(&self) -> &[StackDeploymentEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &StackName) -> Option<&StackDeploymentEntry> {
        self.entries.iter().find(|e| &e.stack_name == name)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn total_stacks(&self) -> usize {
        self.entries.len()
    }

    pub fn completed_stacks(&self) -> usize {
        self.count(StackEntryStatus::Running)
    }

    pub fn failed_stacks(&self) -> usize {
        self.count(StackEntryStatus::Failed)
    }

    pub fn pending_stacks(&self) -> usize {
        self.count(StackEntryStatus::Pending)
    }

    fn count(&self, status: StackEntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Running or partially running: the product is serving.
    pub fn is_operational(&self) -> bool {
        matches!(
            self.status,
            ProductDeploymentStatus::Running | ProductDeploymentStatus::PartiallyRunning
        )
    }

    /// Deploying or upgrading: an orchestrator run owns this aggregate.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.status,
            ProductDeploymentStatus::Deploying | ProductDeploymentStatus::Upgrading
        )
    }

    pub fn is_removed(&self) -> bool {
        self.status == ProductDeploymentStatus::Removed
    }

    pub fn can_upgrade(&self) -> bool {
        self.is_operational()
    }

    /// Mark a stack as picked up by the orchestrator and link its deployment
    /// record once known.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStack` when no entry carries this name.
    pub fn start_stack(
        &mut self,
        name: &StackName,
        deployment_id: Option<DeploymentId>,
    ) -> Result<(), ProductError> {
        let entry = self.entry_mut(name)?;
        if let Some(id) = deployment_id {
            entry.deployment_id = Some(id);
        }
        self.touch();
        Ok(())
    }

    /// Record a successfully deployed stack.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStack` when no entry carries this name.
    pub fn complete_stack(
        &mut self,
        name: &StackName,
        deployment_id: DeploymentId,
        service_count: usize,
        variables: BTreeMap<String, String>,
    ) -> Result<(), ProductError> {
        let entry = self.entry_mut(name)?;
        entry.deployment_id = Some(deployment_id);
        entry.status = StackEntryStatus::Running;
        entry.service_count = service_count;
        entry.variables = variables;
        entry.failure_reason = None;
        self.touch();
        Ok(())
    }

    /// Record a failed stack. Legal with or without a linked deployment:
    /// failures before the member `Deployment` exists land here too.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStack` when no entry carries this name.
    pub fn fail_stack(
        &mut self,
        name: &StackName,
        reason: impl Into<String>,
    ) -> Result<(), ProductError> {
        let entry = self.entry_mut(name)?;
        entry.status = StackEntryStatus::Failed;
        entry.failure_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Reflect an externally observed entry status (reconciliation).
    ///
    /// # Errors
    ///
    /// Returns `UnknownStack` when no entry carries this name.
    pub fn observe_stack_status(
        &mut self,
        name: &StackName,
        status: StackEntryStatus,
    ) -> Result<(), ProductError> {
        let entry = self.entry_mut(name)?;
        entry.status = status;
        self.touch();
        Ok(())
    }

    /// Derive the aggregate status after a sequential run ends (normally,
    /// aborted, or cancelled): all members running means the product runs;
    /// any progress at all means partially running; otherwise failed.
    pub fn finalize_status(&mut self, reason: Option<String>) {
        let completed = self.completed_stacks();
        let failed = self.failed_stacks();

        self.status = if completed == self.total_stacks() {
            ProductDeploymentStatus::Running
        } else if completed > 0 {
            ProductDeploymentStatus::PartiallyRunning
        } else if failed > 0 {
            ProductDeploymentStatus::Failed
        } else {
            // Cancelled before any stack completed; nothing is serving.
            ProductDeploymentStatus::Failed
        };
        self.status_reason = reason;
        self.touch();
    }

    /// Recompute the aggregate status from entry statuses during
    /// reconciliation. Never touches an in-progress or removed aggregate.
    /// Returns true when the status changed.
    pub fn recompute_status(&mut self) -> bool {
        if self.is_in_progress() || self.is_removed() {
            return false;
        }

        let removed = self.count(StackEntryStatus::Removed);
        let completed = self.completed_stacks();
        let active_total = self.total_stacks() - removed;

        let next = if active_total == 0 {
            ProductDeploymentStatus::Removed
        } else if completed == active_total {
            ProductDeploymentStatus::Running
        } else if completed > 0 {
            ProductDeploymentStatus::PartiallyRunning
        } else {
            ProductDeploymentStatus::Failed
        };

        if next != self.status {
            self.status = next;
            self.touch();
            true
        } else {
            false
        }
    }

    /// Soft-remove the aggregate, freeing the `(environment, group)` slot.
    pub fn mark_removed(&mut self) {
        self.status = ProductDeploymentStatus::Removed;
        for entry in &mut self.entries {
            entry.status = StackEntryStatus::Removed;
        }
        self.touch();
    }

    fn entry_mut(
        &mut self,
        name: &StackName,
    ) -> Result<&mut StackDeploymentEntry, ProductError> {
        self.entries
            .iter_mut()
            .find(|e| &e.stack_name == name)
            .ok_or_else(|| ProductError::UnknownStack(name.clone()))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

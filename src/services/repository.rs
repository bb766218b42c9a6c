// ABOUTME: Repository traits for aggregate persistence, plus in-memory reference impls.
// ABOUTME: Persistence mechanics beyond load/save are the embedder's concern.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::deploy::{Deployment, DeploymentStatus};
use crate::product::ProductDeployment;
use crate::types::{DeploymentId, EnvironmentId, ProductDeploymentId, ProductGroupId, StackName};

/// Errors from aggregate load/save.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Persistence for `Deployment` aggregates.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, RepositoryError>;

    async fn save(&self, deployment: &Deployment) -> Result<(), RepositoryError>;

    async fn by_environment(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<Deployment>, RepositoryError>;

    /// The non-removed deployment with this stack name, if any. Stack names
    /// are unique within an environment among non-removed deployments.
    async fn by_stack_name(
        &self,
        environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<Option<Deployment>, RepositoryError>;

    /// All deployments currently in one of the given statuses.
    async fn by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> Result<Vec<Deployment>, RepositoryError>;
}

/// Persistence for `ProductDeployment` aggregates.
#[async_trait]
pub trait ProductDeploymentRepository: Send + Sync {
    async fn get(
        &self,
        id: &ProductDeploymentId,
    ) -> Result<Option<ProductDeployment>, RepositoryError>;

    async fn save(&self, deployment: &ProductDeployment) -> Result<(), RepositoryError>;

    async fn by_environment(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<ProductDeployment>, RepositoryError>;

    /// The single active (non-removed) product deployment for a group within
    /// an environment, if any.
    async fn active_for_group(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Option<ProductDeployment>, RepositoryError>;

    /// All non-removed product deployments across environments.
    async fn all_active(&self) -> Result<Vec<ProductDeployment>, RepositoryError>;
}

/// In-memory deployment repository. The reference persistence for tests and
/// embedders without a database.
#[derive(Default)]
pub struct InMemoryDeploymentRepository {
    items: RwLock<HashMap<DeploymentId, Deployment>>,
}

impl InMemoryDeploymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryDeploymentRepository {
    async fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, RepositoryError> {
        Ok(self.items.read().get(id).cloned())
    }

    async fn save(&self, deployment: &Deployment) -> Result<(), RepositoryError> {
        self.items
            .write()
            .insert(deployment.id().clone(), deployment.clone());
        Ok(())
    }

    async fn by_environment(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<Deployment>, RepositoryError> {
        Ok(self
            .items
            .read()
            .values()
            .filter(|d| d.environment_id() == environment)
            .cloned()
            .collect())
    }

    async fn by_stack_name(
        &self,
        environment: &EnvironmentId,
        stack: &StackName,
    ) -> Result<Option<Deployment>, RepositoryError> {
        Ok(self
            .items
            .read()
            .values()
            .find(|d| {
                d.environment_id() == environment
                    && d.stack_name() == stack
                    && d.status() != DeploymentStatus::Removed
            })
            .cloned())
    }

    async fn by_status(
        &self,
        statuses: &[DeploymentStatus],
    ) -> Result<Vec<Deployment>, RepositoryError> {
        Ok(self
            .items
            .read()
            .values()
            .filter(|d| statuses.contains(&d.status()))
            .cloned()
            .collect())
    }
}

/// In-memory product deployment repository.
#[derive(Default)]
pub struct InMemoryProductDeploymentRepository {
    items: RwLock<HashMap<ProductDeploymentId, ProductDeployment>>,
}

impl InMemoryProductDeploymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductDeploymentRepository for InMemoryProductDeploymentRepository {
    async fn get(
        &self,
        id: &ProductDeploymentId,
    ) -> Result<Option<ProductDeployment>, RepositoryError> {
        Ok(self.items.read().get(id).cloned())
    }

    async fn save(&self, deployment: &ProductDeployment) -> Result<(), RepositoryError> {
        self.items
            .write()
            .insert(deployment.id().clone(), deployment.clone());
        Ok(())
    }

    async fn by_environment(
        &self,
        environment: &EnvironmentId,
    ) -> Result<Vec<ProductDeployment>, RepositoryError> {
        Ok(self
            .items
            .read()
            .values()
            .filter(|d| d.environment_id() == environment)
            .cloned()
            .collect())
    }

    async fn active_for_group(
        &self,
        environment: &EnvironmentId,
        group: &ProductGroupId,
    ) -> Result<Option<ProductDeployment>, RepositoryError> {
        Ok(self
            .items
            .read()
            .values()
            .find(|d| {
                d.environment_id() == environment
                    && d.product_group_id() == group
                    && !d.is_removed()
            })
            .cloned())
    }

    async fn all_active(&self) -> Result<Vec<ProductDeployment>, RepositoryError> {
        Ok(self
            .items
            .read()
            .values()
            .filter(|d| !d.is_removed())
            .cloned()
            .collect())
    }
}

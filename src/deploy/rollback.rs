// ABOUTME: Rollback handler restoring a failed deployment from its pre-upgrade snapshot.
// ABOUTME: Re-renders the previous template and redeploys containers with restored config.

use crate::services::{
    ContainerEngine, DeploymentRepository, ProductCatalog, summarize_results,
};
use crate::types::DeploymentId;
use crate::vars::{ValueTiers, resolve};

use super::deployment::ServiceRecord;
use super::error::DeployError;

/// Result of a completed rollback.
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub deployment_id: DeploymentId,
    /// The version restored from the snapshot.
    pub restored_version: String,
    pub services: Vec<ServiceRecord>,
}

/// Roll a failed deployment back to its pre-upgrade snapshot and redeploy.
///
/// The snapshot's version and variables are restored bit-for-bit on the
/// aggregate; the template at the restored version is re-rendered with the
/// restored values and handed back to the engine. Only legal for a failed
/// deployment that still holds a snapshot.
///
/// # Errors
///
/// Returns `NotFailed`/`NoPendingSnapshot` for illegal requests, `Catalog`
/// when the restored template cannot be resolved, and `Engine` when the
/// redeploy itself fails (the deployment is then `Failed` again, but with the
/// restored configuration and no snapshot).
pub async fn rollback_deployment(
    engine: &dyn ContainerEngine,
    catalog: &dyn ProductCatalog,
    deployments: &dyn DeploymentRepository,
    id: &DeploymentId,
) -> Result<RollbackOutcome, DeployError> {
    let mut deployment = deployments
        .get(id)
        .await
        .map_err(|e| DeployError::Repository(e.to_string()))?
        .ok_or_else(|| DeployError::NotFound(id.clone()))?;

    if !deployment.can_rollback() {
        if deployment.pending_snapshot().is_none() {
            return Err(DeployError::NoPendingSnapshot);
        }
        return Err(DeployError::NotFailed(deployment.status()));
    }

    let snapshot = deployment
        .pending_snapshot()
        .cloned()
        .ok_or(DeployError::NoPendingSnapshot)?;

    // Resolve the restored template before mutating anything, so a catalog
    // problem leaves the deployment (and its snapshot) untouched.
    let stack_id = deployment
        .stack_id()
        .cloned()
        .ok_or_else(|| DeployError::Catalog("deployment has no catalog stack reference".into()))?;

    let template = catalog
        .stack_template(&stack_id, &snapshot.stack_version)
        .await
        .map_err(|e| DeployError::Catalog(e.to_string()))?
        .ok_or_else(|| {
            DeployError::Catalog(format!(
                "no template for stack {} at version {}",
                stack_id, snapshot.stack_version
            ))
        })?;

    // The snapshot's values were the final effective values of that deploy;
    // feeding them back as overrides reproduces the same rendered content.
    let resolved = resolve(
        &template,
        ValueTiers::fresh(None, Some(&snapshot.variables)),
    )?;

    let restored_version = deployment.rollback_to_previous()?;
    deployments
        .save(&deployment)
        .await
        .map_err(|e| DeployError::Repository(e.to_string()))?;

    let engine_result = engine
        .deploy_stack(
            deployment.environment_id(),
            deployment.stack_name(),
            &resolved.content,
            &resolved.values,
        )
        .await;

    let failure = match engine_result {
        Ok(results) => {
            let (records, failure) = summarize_results(&results);
            deployment.record_services(records);
            failure
        }
        Err(e) => Some(e.to_string()),
    };

    match failure {
        None => {
            let services = deployment.services().to_vec();
            deployment.complete_install(services)?;
            deployments
                .save(&deployment)
                .await
                .map_err(|e| DeployError::Repository(e.to_string()))?;
            Ok(RollbackOutcome {
                deployment_id: id.clone(),
                restored_version,
                services: deployment.services().to_vec(),
            })
        }
        Some(reason) => {
            deployment.fail_install(reason.clone())?;
            deployments
                .save(&deployment)
                .await
                .map_err(|e| DeployError::Repository(e.to_string()))?;
            Err(DeployError::Engine(reason))
        }
    }
}

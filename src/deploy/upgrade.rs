// ABOUTME: Single-stack upgrade handler and upgrade-availability check.
// ABOUTME: Version guard, snapshot capture, engine redeploy, and completion bookkeeping.

use std::collections::BTreeMap;

use crate::services::{
    ContainerEngine, DeploymentRepository, ProductCatalog, summarize_results,
};
use crate::types::{DeploymentId, VersionRelation, compare};
use crate::vars::{ValueTiers, resolve};

use super::deployment::ServiceRecord;
use super::error::DeployError;

/// Version-compare information for a prospective upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeCheck {
    pub current_version: String,
    /// Relation of the proposed target, when one was given.
    pub target_relation: Option<VersionRelation>,
    pub can_upgrade: bool,
    pub can_rollback: bool,
    /// Catalog versions newer than the current one.
    pub available_versions: Vec<String>,
}

/// Request to upgrade a single deployment outside a product run.
#[derive(Debug, Clone)]
pub struct UpgradeDeploymentCommand {
    pub deployment_id: DeploymentId,
    pub target_version: String,
    pub shared_variables: BTreeMap<String, String>,
    pub overrides: BTreeMap<String, String>,
}

/// Result of a completed single-stack upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    pub deployment_id: DeploymentId,
    pub from_version: String,
    pub to_version: String,
    pub services: Vec<ServiceRecord>,
}

/// Report whether and where a deployment can go from its current version.
///
/// # Errors
///
/// Returns `NotFound` for unknown deployments and `Catalog`/`Repository` for
/// collaborator failures. A deployment without a catalog reference yields an
/// empty version list rather than an error.
pub async fn check_upgrade(
    deployments: &dyn DeploymentRepository,
    catalog: &dyn ProductCatalog,
    id: &DeploymentId,
    target_version: Option<&str>,
) -> Result<UpgradeCheck, DeployError> {
    let deployment = deployments
        .get(id)
        .await
        .map_err(|e| DeployError::Repository(e.to_string()))?
        .ok_or_else(|| DeployError::NotFound(id.clone()))?;

    let available_versions = match deployment.stack_id() {
        Some(stack_id) => catalog
            .stack_versions(stack_id, deployment.stack_version())
            .await
            .map_err(|e| DeployError::Catalog(e.to_string()))?,
        None => Vec::new(),
    };

    Ok(UpgradeCheck {
        current_version: deployment.stack_version().to_string(),
        target_relation: target_version.map(|t| compare(deployment.stack_version(), t)),
        can_upgrade: deployment.can_upgrade(),
        can_rollback: deployment.can_rollback(),
        available_versions,
    })
}

/// Upgrade a single deployment to a target catalog version.
///
/// Previously deployed values carry forward underneath shared and explicit
/// overrides, so user customizations survive the upgrade. The pre-upgrade
/// snapshot is captured before the engine touches any container.
///
/// # Errors
///
/// Returns the version-guard errors (`SameVersion`, `DowngradeNotSupported`),
/// `NotRunning` for non-running deployments, `Resolution` for variable
/// failures, and `Engine` when the redeploy fails (the deployment is then
/// `Failed` with its snapshot retained for rollback).
pub async fn upgrade_deployment(
    engine: &dyn ContainerEngine,
    catalog: &dyn ProductCatalog,
    deployments: &dyn DeploymentRepository,
    cmd: UpgradeDeploymentCommand,
) -> Result<UpgradeOutcome, DeployError> {
    let mut deployment = deployments
        .get(&cmd.deployment_id)
        .await
        .map_err(|e| DeployError::Repository(e.to_string()))?
        .ok_or_else(|| DeployError::NotFound(cmd.deployment_id.clone()))?;

    let stack_id = deployment
        .stack_id()
        .cloned()
        .ok_or_else(|| DeployError::Catalog("deployment has no catalog stack reference".into()))?;

    let template = catalog
        .stack_template(&stack_id, &cmd.target_version)
        .await
        .map_err(|e| DeployError::Catalog(e.to_string()))?
        .ok_or_else(|| {
            DeployError::Catalog(format!(
                "no template for stack {} at version {}",
                stack_id, cmd.target_version
            ))
        })?;

    let previous = deployment.variables().clone();
    let shared = (!cmd.shared_variables.is_empty()).then_some(&cmd.shared_variables);
    let overrides = (!cmd.overrides.is_empty()).then_some(&cmd.overrides);
    let resolved = resolve(&template, ValueTiers::upgrade(&previous, shared, overrides))?;

    let from_version = deployment.stack_version().to_string();
    deployment.begin_upgrade(
        &cmd.target_version,
        resolved.values.clone(),
        Some(format!("upgrade from {from_version}")),
    )?;
    deployments
        .save(&deployment)
        .await
        .map_err(|e| DeployError::Repository(e.to_string()))?;

    // Point of no return: containers are mutated from here on.
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
            deployment.complete_upgrade()?;
            deployments
                .save(&deployment)
                .await
                .map_err(|e| DeployError::Repository(e.to_string()))?;
            Ok(UpgradeOutcome {
                deployment_id: cmd.deployment_id,
                from_version,
                to_version: deployment.stack_version().to_string(),
                services: deployment.services().to_vec(),
            })
        }
        Some(reason) => {
            deployment.fail_upgrade(reason.clone())?;
            deployments
                .save(&deployment)
                .await
                .map_err(|e| DeployError::Repository(e.to_string()))?;
            Err(DeployError::Engine(reason))
        }
    }
}

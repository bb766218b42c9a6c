// ABOUTME: Operation mode change handler for a single deployment.
// ABOUTME: Dispatches by the current mode, so leaving Failed or Migrating recovers correctly.

use crate::services::{ContainerEngine, DeploymentRepository};
use crate::types::DeploymentId;

use super::deployment::OperationMode;
use super::error::DeployError;

/// Result of a mode change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChangeOutcome {
    pub deployment_id: DeploymentId,
    pub previous_mode: OperationMode,
    pub mode: OperationMode,
    /// False when the deployment was already in the requested mode.
    pub changed: bool,
}

/// Switch a deployment's operation mode.
///
/// Requesting the mode the deployment is already in is a no-op success; no
/// containers are touched. Returning to `Normal` dispatches on the CURRENT
/// mode rather than assuming `Maintenance` was the prior state: leaving
/// `Failed` recovers the deployment, leaving `Migrating` completes the
/// migration, and leaving `Stopped` starts the containers back up.
///
/// # Errors
///
/// Returns `IllegalModeChange` for target modes that are driven by the
/// upgrade/failure machinery (`Migrating`, `Failed`), and the underlying
/// transition errors when the deployment's status does not permit the change.
pub async fn change_operation_mode(
    engine: &dyn ContainerEngine,
    deployments: &dyn DeploymentRepository,
    id: &DeploymentId,
    target: OperationMode,
    reason: Option<String>,
) -> Result<ModeChangeOutcome, DeployError> {
    let mut deployment = deployments
        .get(id)
        .await
        .map_err(|e| DeployError::Repository(e.to_string()))?
        .ok_or_else(|| DeployError::NotFound(id.clone()))?;

    let previous_mode = deployment.operation_mode();

    if previous_mode == target {
        return Ok(ModeChangeOutcome {
            deployment_id: id.clone(),
            previous_mode,
            mode: target,
            changed: false,
        });
    }

    match target {
        OperationMode::Maintenance => deployment.enter_maintenance()?,

        OperationMode::Normal => match previous_mode {
            OperationMode::Maintenance => deployment.exit_maintenance()?,
            OperationMode::Failed => deployment.recover_from_failure(reason.clone())?,
            OperationMode::Migrating => deployment.complete_upgrade()?,
            OperationMode::Stopped => {
                engine
                    .start_stack(deployment.environment_id(), deployment.stack_name())
                    .await
                    .map_err(|e| DeployError::Engine(e.to_string()))?;
                deployment.resume()?;
            }
            OperationMode::Normal => unreachable!("handled by the no-op branch"),
        },

        OperationMode::Stopped => {
            engine
                .stop_stack(deployment.environment_id(), deployment.stack_name())
                .await
                .map_err(|e| DeployError::Engine(e.to_string()))?;
            deployment.stop(reason.clone())?;
        }

        // These modes are owned by the upgrade and failure machinery.
        OperationMode::Migrating | OperationMode::Failed => {
            return Err(DeployError::IllegalModeChange {
                from: previous_mode,
                to: target,
            });
        }
    }

    deployments
        .save(&deployment)
        .await
        .map_err(|e| DeployError::Repository(e.to_string()))?;

    tracing::info!(
        deployment = %id,
        from = %previous_mode,
        to = %deployment.operation_mode(),
        "operation mode changed"
    );

    Ok(ModeChangeOutcome {
        deployment_id: id.clone(),
        previous_mode,
        mode: deployment.operation_mode(),
        changed: true,
    })
}

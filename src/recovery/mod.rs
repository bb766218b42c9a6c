// ABOUTME: Startup recovery for deployments interrupted by an orchestrator crash.
// ABOUTME: Installing/Upgrading records are deterministically failed, never resumed.

use crate::deploy::DeploymentStatus;
use crate::services::DeploymentRepository;
use crate::types::DeploymentId;

/// What the startup recovery pass did.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Deployments transitioned to failed.
    pub recovered: Vec<DeploymentId>,
    /// Deployments that could not be processed.
    pub errors: usize,
}

/// Fail every deployment stuck in a transitional state after an unclean
/// shutdown. Runs once at process start, before orchestration requests are
/// accepted.
///
/// The policy is deliberately pessimistic: container state after an
/// interrupted operation cannot be verified, so the ambiguity always surfaces
/// as a failure requiring operator or rollback action. Errors here are logged
/// and swallowed; startup must never be blocked.
pub async fn recover_interrupted(deployments: &dyn DeploymentRepository) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    let stuck = match deployments
        .by_status(&[DeploymentStatus::Installing, DeploymentStatus::Upgrading])
        .await
    {
        Ok(list) => list,
        Err(e) => {
            tracing::error!(error = %e, "startup recovery could not query deployments");
            report.errors += 1;
            return report;
        }
    };

    for mut deployment in stuck {
        let result = match deployment.status() {
            DeploymentStatus::Installing => {
                deployment.fail_install("orchestrator restarted during installation")
            }
            DeploymentStatus::Upgrading => {
                deployment.fail_upgrade("orchestrator restarted during upgrade")
            }
            other => {
                tracing::warn!(deployment = %deployment.id(), status = %other, "unexpected status in recovery query");
                continue;
            }
        };

        if let Err(e) = result {
            tracing::error!(deployment = %deployment.id(), error = %e, "startup recovery transition failed");
            report.errors += 1;
            continue;
        }

        if let Err(e) = deployments.save(&deployment).await {
            tracing::error!(deployment = %deployment.id(), error = %e, "startup recovery could not persist");
            report.errors += 1;
            continue;
        }

        tracing::warn!(
            deployment = %deployment.id(),
            stack = %deployment.stack_name(),
            "deployment failed deterministically after restart"
        );
        report.recovered.push(deployment.id().clone());
    }

    if !report.recovered.is_empty() {
        tracing::info!(
            count = report.recovered.len(),
            "startup recovery marked interrupted deployments as failed"
        );
    }

    report
}

// ABOUTME: Background status reconciliation for product deployments.
// ABOUTME: Re-derives aggregate status from member deployments; skips in-flight members.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::deploy::DeploymentStatus;
use crate::product::StackEntryStatus;
use crate::services::{DeploymentRepository, ProductDeploymentRepository};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Operational aggregates examined.
    pub examined: usize,
    /// Aggregates persisted because something changed.
    pub updated: usize,
    /// Aggregates skipped because of a collaborator error.
    pub errors: usize,
}

/// Periodic corrector for drift between member deployments and their product
/// aggregate. The orchestrator owns aggregates while a run is in progress;
/// the reconciler only touches operational ones, and within those it never
/// maps `Installing`/`Upgrading` members, which belong to an in-flight run.
pub struct StatusReconciler {
    products: Arc<dyn ProductDeploymentRepository>,
    deployments: Arc<dyn DeploymentRepository>,
    interval: Duration,
}

impl StatusReconciler {
    pub fn new(
        products: Arc<dyn ProductDeploymentRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            products,
            deployments,
            interval,
        }
    }

    /// Run reconciliation on the configured interval until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so startup recovery can
        // finish before the first pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("status reconciler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let summary = self.reconcile_once().await;
                    if summary.updated > 0 || summary.errors > 0 {
                        tracing::info!(
                            examined = summary.examined,
                            updated = summary.updated,
                            errors = summary.errors,
                            "status reconciliation pass finished"
                        );
                    }
                }
            }
        }
    }

    /// One reconciliation pass over every operational product deployment.
    /// Collaborator errors are logged and counted, never raised.
    pub async fn reconcile_once(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let aggregates = match self.products.all_active().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "could not list product deployments for reconciliation");
                summary.errors += 1;
                return summary;
            }
        };

        for mut aggregate in aggregates {
            if !aggregate.is_operational() {
                continue;
            }
            summary.examined += 1;

            let mut changed = false;
            let mut failed = false;

            for entry in aggregate.entries().to_vec() {
                let Some(deployment_id) = entry.deployment_id.clone() else {
                    continue;
                };

                let deployment = match self.deployments.get(&deployment_id).await {
                    Ok(Some(d)) => d,
                    Ok(None) => {
                        // The member record vanished; leave the entry alone.
                        tracing::warn!(
                            product_deployment = %aggregate.id(),
                            stack = %entry.stack_name,
                            "member deployment record missing during reconciliation"
                        );
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(
                            product_deployment = %aggregate.id(),
                            stack = %entry.stack_name,
                            error = %e,
                            "could not load member deployment"
                        );
                        failed = true;
                        break;
                    }
                };

                let Some(derived) = map_status(deployment.status()) else {
                    // Installing/Upgrading are owned by an in-progress run.
                    continue;
                };

                if derived != entry.status
                    && aggregate
                        .observe_stack_status(&entry.stack_name, derived)
                        .is_ok()
                {
                    tracing::debug!(
                        product_deployment = %aggregate.id(),
                        stack = %entry.stack_name,
                        status = ?derived,
                        "member status drift corrected"
                    );
                    changed = true;
                }
            }

            if failed {
                summary.errors += 1;
                continue;
            }

            if changed {
                aggregate.recompute_status();
                if let Err(e) = self.products.save(&aggregate).await {
                    tracing::warn!(
                        product_deployment = %aggregate.id(),
                        error = %e,
                        "could not persist reconciled aggregate"
                    );
                    summary.errors += 1;
                } else {
                    summary.updated += 1;
                }
            }
        }

        summary
    }
}

/// Map a member deployment's status to its entry status. `None` means the
/// status is intentionally unmapped and must not be written concurrently.
fn map_status(status: DeploymentStatus) -> Option<StackEntryStatus> {
    match status {
        DeploymentStatus::Running => Some(StackEntryStatus::Running),
        DeploymentStatus::Failed => Some(StackEntryStatus::Failed),
        DeploymentStatus::Removed => Some(StackEntryStatus::Removed),
        DeploymentStatus::Installing
        | DeploymentStatus::Upgrading
        | DeploymentStatus::Stopped => None,
    }
}

// ABOUTME: Sequential multi-stack orchestration for product deploy and upgrade.
// ABOUTME: Persists the aggregate after every stack to bound mid-sequence crash damage.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::deploy::{DeployError, Deployment};
use crate::diagnostics::{Diagnostics, Warning};
use crate::services::{
    ContainerEngine, Notification, NotificationLevel, ProductCatalog, ProductDefinition,
    ProductDeploymentRepository, ProgressEvent, ProgressNotifier, ProgressPhase, StackManifest,
    summarize_results,
};
use crate::services::DeploymentRepository;
use crate::types::{
    DeploymentId, EnvironmentId, ProductDeploymentId, ProductId, StackName, VersionRelation,
    compare,
};
use crate::vars::{ResolvedTemplate, ValueTiers, resolve};

use super::error::{OrchestrationError, ProductError};
use super::guard::GuardRegistry;
use super::product::{ProductDeployment, ProductDeploymentStatus, StackSeed};

/// Caller-provided configuration for one stack in a product operation.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    pub overrides: BTreeMap<String, String>,
}

/// Request to deploy a product into an environment.
#[derive(Debug, Clone)]
pub struct DeployProductCommand {
    pub environment_id: EnvironmentId,
    pub product_id: ProductId,
    /// Per-stack overrides, keyed by stack name. Stacks without an entry
    /// deploy with shared and default values only.
    pub stack_configs: BTreeMap<StackName, StackConfig>,
    pub shared_variables: BTreeMap<String, String>,
    pub continue_on_error: bool,
    pub session_id: Option<String>,
}

/// Request to upgrade an existing product deployment to a newer version.
#[derive(Debug, Clone)]
pub struct UpgradeProductCommand {
    pub environment_id: EnvironmentId,
    pub product_deployment_id: ProductDeploymentId,
    pub target_product_id: ProductId,
    pub stack_configs: BTreeMap<StackName, StackConfig>,
    pub shared_variables: BTreeMap<String, String>,
    pub continue_on_error: bool,
    pub session_id: Option<String>,
}

/// What happened to one stack during a product operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcomeKind {
    Completed,
    Failed,
    /// Never attempted: the run aborted or was cancelled first.
    Skipped,
}

/// Per-stack result carried back to the caller.
#[derive(Debug, Clone)]
pub struct StackOutcome {
    pub stack: StackName,
    pub deployment_id: Option<DeploymentId>,
    pub kind: StackOutcomeKind,
    pub message: Option<String>,
}

/// Overall result of a product deploy or upgrade.
#[derive(Debug, Clone)]
pub struct ProductOperationOutcome {
    pub product_deployment_id: ProductDeploymentId,
    pub status: ProductDeploymentStatus,
    pub stacks: Vec<StackOutcome>,
    pub warnings: Vec<Warning>,
}

impl ProductOperationOutcome {
    pub fn completed(&self) -> usize {
        self.count(StackOutcomeKind::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(StackOutcomeKind::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(StackOutcomeKind::Skipped)
    }

    fn count(&self, kind: StackOutcomeKind) -> usize {
        self.stacks.iter().filter(|s| s.kind == kind).count()
    }
}

/// A stack prepared for deployment: manifest, resolved template, and the
/// upgrade bookkeeping needed during the sequential loop.
struct PreparedStack {
    manifest: StackManifest,
    resolved: ResolvedTemplate,
    is_new_in_upgrade: bool,
}

enum StackRun {
    Completed {
        deployment_id: DeploymentId,
        service_count: usize,
        variables: BTreeMap<String, String>,
        message: Option<String>,
    },
    Failed {
        deployment_id: Option<DeploymentId>,
        reason: String,
    },
}

/// Drives product deployments and upgrades, one stack at a time.
///
/// Stacks are never deployed concurrently within one product: at most one
/// stack is in flight at any instant, so a crash leaves at most one stack
/// ambiguous and the rest clearly done or clearly pending.
pub struct ProductOrchestrator {
    engine: Arc<dyn ContainerEngine>,
    catalog: Arc<dyn ProductCatalog>,
    deployments: Arc<dyn DeploymentRepository>,
    products: Arc<dyn ProductDeploymentRepository>,
    notifier: Arc<dyn ProgressNotifier>,
    guards: Arc<GuardRegistry>,
}

impl ProductOrchestrator {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        catalog: Arc<dyn ProductCatalog>,
        deployments: Arc<dyn DeploymentRepository>,
        products: Arc<dyn ProductDeploymentRepository>,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Self {
        Self {
            engine,
            catalog,
            deployments,
            products,
            notifier,
            guards: GuardRegistry::new(),
        }
    }

    /// Deploy a product into an environment.
    ///
    /// Validation and the duplicate-active check happen before anything is
    /// persisted; after that, the aggregate is saved immediately and then
    /// after every stack, so a crash mid-sequence leaves a recoverable record.
    ///
    /// # Errors
    ///
    /// Returns `OrchestrationError` for validation failures, duplicate active
    /// deployments, and collaborator failures before the run starts.
    /// Per-stack failures do not error; they are reported in the outcome.
    pub async fn deploy_product(
        &self,
        cmd: DeployProductCommand,
        cancel: &CancellationToken,
    ) -> Result<ProductOperationOutcome, OrchestrationError> {
        let product = self
            .catalog
            .product_by_id(&cmd.product_id)
            .await?
            .ok_or_else(|| ProductError::ProductNotFound(cmd.product_id.clone()))?;

        let _guard = self
            .guards
            .acquire(&cmd.environment_id, &product.group_id, &product.name)
            .map_err(|e| OrchestrationError::Validation {
                message: e.to_string(),
            })?;

        if let Some(existing) = self
            .products
            .active_for_group(&cmd.environment_id, &product.group_id)
            .await?
            && (existing.is_in_progress() || existing.is_operational())
        {
            return Err(ProductError::AlreadyActive(product.group_id.clone()).into());
        }

        validate_stack_configs(&product, &cmd.stack_configs)?;
        let prepared = prepare_stacks(
            &product,
            &cmd.stack_configs,
            &cmd.shared_variables,
            None,
        )?;

        let seeds = prepared
            .iter()
            .map(|p| StackSeed {
                name: p.manifest.name.clone(),
                display_name: p.manifest.display_name.clone(),
                stack_id: p.manifest.stack_id.clone(),
                variables: p.resolved.values.clone(),
                is_new_in_upgrade: false,
            })
            .collect();

        let mut aggregate =
            ProductDeployment::initiate_deployment(cmd.environment_id.clone(), &product, seeds);
        self.products.save(&aggregate).await?;

        tracing::info!(
            product = %product.name,
            version = %product.version,
            environment = %cmd.environment_id,
            stacks = prepared.len(),
            "product deployment started"
        );

        let outcome = self
            .run_sequence(
                &mut aggregate,
                &prepared,
                cmd.continue_on_error,
                cmd.session_id.as_deref(),
                cancel,
                false,
            )
            .await?;

        Ok(outcome)
    }

    /// Upgrade an existing product deployment to a newer catalog version.
    ///
    /// Prior per-stack variable values carry forward as defaults underneath
    /// shared and per-stack overrides. Same-version and downgrade requests
    /// are rejected when both versions parse as SemVer.
    ///
    /// # Errors
    ///
    /// Returns `OrchestrationError` for validation and precondition failures;
    /// per-stack failures are reported in the outcome.
    pub async fn upgrade_product(
        &self,
        cmd: UpgradeProductCommand,
        cancel: &CancellationToken,
    ) -> Result<ProductOperationOutcome, OrchestrationError> {
        let mut aggregate = self
            .products
            .get(&cmd.product_deployment_id)
            .await?
            .ok_or_else(|| ProductError::DeploymentNotFound(cmd.product_deployment_id.clone()))?;

        let target = self
            .catalog
            .product_by_id(&cmd.target_product_id)
            .await?
            .ok_or_else(|| ProductError::ProductNotFound(cmd.target_product_id.clone()))?;

        if target.group_id != *aggregate.product_group_id() {
            return Err(OrchestrationError::Validation {
                message: format!(
                    "target product belongs to group {}, existing deployment to group {}",
                    target.group_id,
                    aggregate.product_group_id()
                ),
            });
        }

        let _guard = self
            .guards
            .acquire(&cmd.environment_id, &target.group_id, &target.name)
            .map_err(|e| OrchestrationError::Validation {
                message: e.to_string(),
            })?;

        if !aggregate.can_upgrade() {
            return Err(ProductError::NotOperational(aggregate.status()).into());
        }

        match compare(aggregate.product_version(), &target.version) {
            VersionRelation::Same => {
                return Err(
                    ProductError::SameVersion(aggregate.product_version().to_string()).into(),
                );
            }
            VersionRelation::Downgrade => {
                return Err(ProductError::DowngradeNotSupported {
                    current: aggregate.product_version().to_string(),
                    target: target.version.clone(),
                }
                .into());
            }
            VersionRelation::Upgrade | VersionRelation::Unknown => {}
        }

        validate_stack_configs(&target, &cmd.stack_configs)?;

        // Previous per-stack values become the second resolution tier.
        let previous_values: BTreeMap<StackName, BTreeMap<String, String>> = aggregate
            .entries()
            .iter()
            .map(|e| (e.stack_name.clone(), e.variables.clone()))
            .collect();

        let prepared = prepare_stacks(
            &target,
            &cmd.stack_configs,
            &cmd.shared_variables,
            Some(&previous_values),
        )?;

        // Stacks present before but absent from the target composition get
        // torn down after a fully successful run.
        let dropped: Vec<StackName> = aggregate
            .entries()
            .iter()
            .filter(|e| target.stack(&e.stack_name).is_none())
            .map(|e| e.stack_name.clone())
            .collect();

        let seeds = prepared
            .iter()
            .map(|p| StackSeed {
                name: p.manifest.name.clone(),
                display_name: p.manifest.display_name.clone(),
                stack_id: p.manifest.stack_id.clone(),
                variables: p.resolved.values.clone(),
                is_new_in_upgrade: p.is_new_in_upgrade,
            })
            .collect();

        aggregate.initiate_upgrade(&target, seeds)?;
        self.products.save(&aggregate).await?;

        tracing::info!(
            product = %target.name,
            version = %target.version,
            environment = %cmd.environment_id,
            "product upgrade started"
        );

        let outcome = self
            .run_sequence(
                &mut aggregate,
                &prepared,
                cmd.continue_on_error,
                cmd.session_id.as_deref(),
                cancel,
                true,
            )
            .await?;

        if outcome.failed() == 0 && outcome.skipped() == 0 {
            self.teardown_dropped_stacks(&cmd.environment_id, &dropped)
                .await;
        } else if !dropped.is_empty() {
            tracing::warn!(
                count = dropped.len(),
                "skipping teardown of dropped stacks: upgrade did not fully succeed"
            );
        }

        Ok(outcome)
    }

    /// The sequential per-stack loop shared by deploy and upgrade.
    async fn run_sequence(
        &self,
        aggregate: &mut ProductDeployment,
        prepared: &[PreparedStack],
        continue_on_error: bool,
        session_id: Option<&str>,
        cancel: &CancellationToken,
        upgrading: bool,
    ) -> Result<ProductOperationOutcome, OrchestrationError> {
        let mut diagnostics = Diagnostics::default();
        let mut outcomes: Vec<StackOutcome> = Vec::with_capacity(prepared.len());
        let mut aborted = false;
        let mut cancelled = false;

        self.notify(
            &mut diagnostics,
            progress_event(
                aggregate,
                ProgressPhase::Started,
                None,
                format!(
                    "{} product '{}' ({} stacks)",
                    if upgrading { "upgrading" } else { "deploying" },
                    aggregate.product_name(),
                    prepared.len()
                ),
                session_id,
            ),
        )
        .await;

        for stack in prepared {
            if aborted {
                outcomes.push(StackOutcome {
                    stack: stack.manifest.name.clone(),
                    deployment_id: None,
                    kind: StackOutcomeKind::Skipped,
                    message: None,
                });
                continue;
            }

            // Cancellation is only honored between stacks, never mid-stack.
            if cancel.is_cancelled() {
                cancelled = true;
                aborted = true;
                outcomes.push(StackOutcome {
                    stack: stack.manifest.name.clone(),
                    deployment_id: None,
                    kind: StackOutcomeKind::Skipped,
                    message: Some("cancelled".to_string()),
                });
                continue;
            }

            let name = &stack.manifest.name;
            self.notify(
                &mut diagnostics,
                progress_event(
                    aggregate,
                    ProgressPhase::StackStarted,
                    Some(name),
                    format!("deploying stack '{name}'"),
                    session_id,
                ),
            )
            .await;

            let run = if upgrading {
                self.upgrade_single_stack(aggregate.environment_id().clone(), stack)
                    .await
            } else {
                self.install_single_stack(aggregate.environment_id().clone(), stack)
                    .await
            };

            match run {
                StackRun::Completed {
                    deployment_id,
                    service_count,
                    variables,
                    message,
                } => {
                    aggregate.start_stack(name, Some(deployment_id.clone()))?;
                    aggregate.complete_stack(
                        name,
                        deployment_id.clone(),
                        service_count,
                        variables,
                    )?;
                    self.products.save(aggregate).await?;

                    self.notify(
                        &mut diagnostics,
                        progress_event(
                            aggregate,
                            ProgressPhase::StackCompleted,
                            Some(name),
                            format!("stack '{name}' deployed"),
                            session_id,
                        ),
                    )
                    .await;

                    outcomes.push(StackOutcome {
                        stack: name.clone(),
                        deployment_id: Some(deployment_id),
                        kind: StackOutcomeKind::Completed,
                        message,
                    });
                }
                StackRun::Failed {
                    deployment_id,
                    reason,
                } => {
                    aggregate.start_stack(name, deployment_id.clone())?;
                    aggregate.fail_stack(name, reason.clone())?;
                    self.products.save(aggregate).await?;

                    self.notify(
                        &mut diagnostics,
                        progress_event(
                            aggregate,
                            ProgressPhase::StackFailed,
                            Some(name),
                            format!("stack '{name}' failed: {reason}"),
                            session_id,
                        ),
                    )
                    .await;

                    outcomes.push(StackOutcome {
                        stack: name.clone(),
                        deployment_id,
                        kind: StackOutcomeKind::Failed,
                        message: Some(reason),
                    });

                    if !continue_on_error {
                        aborted = true;
                    }
                }
            }
        }

        aggregate.finalize_status(cancelled.then(|| "cancelled by caller".to_string()));
        self.products.save(aggregate).await?;

        let summary = format!(
            "product '{}' {}: {} completed, {} failed, {} pending",
            aggregate.product_name(),
            aggregate.status(),
            aggregate.completed_stacks(),
            aggregate.failed_stacks(),
            aggregate.pending_stacks(),
        );

        self.notify(
            &mut diagnostics,
            progress_event(
                aggregate,
                ProgressPhase::Finished,
                None,
                summary.clone(),
                session_id,
            ),
        )
        .await;

        let level = match aggregate.status() {
            ProductDeploymentStatus::Running => NotificationLevel::Info,
            ProductDeploymentStatus::PartiallyRunning => NotificationLevel::Warning,
            _ => NotificationLevel::Error,
        };
        if let Err(e) = self
            .notifier
            .publish(&Notification {
                level,
                title: format!("Product {}", aggregate.status()),
                body: summary,
            })
            .await
        {
            diagnostics.warn(Warning::notification_delivery(e.to_string()));
        }

        tracing::info!(
            product = %aggregate.product_name(),
            status = %aggregate.status(),
            completed = aggregate.completed_stacks(),
            failed = aggregate.failed_stacks(),
            "product orchestration finished"
        );

        Ok(ProductOperationOutcome {
            product_deployment_id: aggregate.id().clone(),
            status: aggregate.status(),
            stacks: outcomes,
            warnings: diagnostics.into_warnings(),
        })
    }

    /// Install one fresh stack. Never returns an error: every failure becomes
    /// a `StackRun::Failed` so one stack's problem cannot sink the product run.
    async fn install_single_stack(
        &self,
        environment: EnvironmentId,
        stack: &PreparedStack,
    ) -> StackRun {
        let name = &stack.manifest.name;

        match self.deployments.by_stack_name(&environment, name).await {
            Ok(Some(_)) => {
                return StackRun::Failed {
                    deployment_id: None,
                    reason: format!("stack name '{name}' is already in use in this environment"),
                };
            }
            Ok(None) => {}
            Err(e) => {
                return StackRun::Failed {
                    deployment_id: None,
                    reason: format!("repository error: {e}"),
                };
            }
        }

        let mut deployment = Deployment::new_install(
            environment.clone(),
            name.clone(),
            Some(stack.manifest.stack_id.clone()),
            stack.manifest.version.clone(),
            stack.resolved.values.clone(),
        );
        if let Err(e) = self.deployments.save(&deployment).await {
            return StackRun::Failed {
                deployment_id: None,
                reason: format!("repository error: {e}"),
            };
        }

        self.run_engine_install(&environment, stack, &mut deployment)
            .await
    }

    /// Upgrade one stack, or install it fresh when it is new in this upgrade.
    async fn upgrade_single_stack(
        &self,
        environment: EnvironmentId,
        stack: &PreparedStack,
    ) -> StackRun {
        let name = &stack.manifest.name;

        let existing = match self.deployments.by_stack_name(&environment, name).await {
            Ok(found) => found,
            Err(e) => {
                return StackRun::Failed {
                    deployment_id: None,
                    reason: format!("repository error: {e}"),
                };
            }
        };

        let Some(mut deployment) = existing else {
            // New in this upgrade (or its record vanished): fresh install.
            return self.install_single_stack(environment, stack).await;
        };

        match deployment.begin_upgrade(
            &stack.manifest.version,
            stack.resolved.values.clone(),
            Some(format!(
                "upgrade to {} via product upgrade",
                stack.manifest.version
            )),
        ) {
            Ok(()) => {}
            Err(DeployError::SameVersion(v)) => {
                // Unchanged between product versions; nothing to redeploy.
                return StackRun::Completed {
                    deployment_id: deployment.id().clone(),
                    service_count: deployment.services().len(),
                    variables: deployment.variables().clone(),
                    message: Some(format!("already at version {v}")),
                };
            }
            Err(e) => {
                return StackRun::Failed {
                    deployment_id: Some(deployment.id().clone()),
                    reason: e.to_string(),
                };
            }
        }

        if let Err(e) = self.deployments.save(&deployment).await {
            return StackRun::Failed {
                deployment_id: Some(deployment.id().clone()),
                reason: format!("repository error: {e}"),
            };
        }

        // Point of no return: containers are about to be mutated.
        let engine_result = self
            .engine
            .deploy_stack(
                &environment,
                name,
                &stack.resolved.content,
                &stack.resolved.values,
            )
            .await;

        let deployment_id = deployment.id().clone();
        match engine_result {
            Ok(results) => {
                let (records, failure) = summarize_results(&results);
                deployment.record_services(records);
                match failure {
                    None => {
                        if let Err(e) = deployment.complete_upgrade() {
                            return StackRun::Failed {
                                deployment_id: Some(deployment_id),
                                reason: e.to_string(),
                            };
                        }
                        let service_count = deployment.services().len();
                        let variables = deployment.variables().clone();
                        if let Err(e) = self.deployments.save(&deployment).await {
                            return StackRun::Failed {
                                deployment_id: Some(deployment_id),
                                reason: format!("repository error: {e}"),
                            };
                        }
                        StackRun::Completed {
                            deployment_id,
                            service_count,
                            variables,
                            message: None,
                        }
                    }
                    Some(reason) => {
                        self.fail_upgrade_and_save(&mut deployment, &reason).await;
                        StackRun::Failed {
                            deployment_id: Some(deployment_id),
                            reason,
                        }
                    }
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail_upgrade_and_save(&mut deployment, &reason).await;
                StackRun::Failed {
                    deployment_id: Some(deployment_id),
                    reason,
                }
            }
        }
    }

    /// Engine call plus completion bookkeeping for a fresh install.
    async fn run_engine_install(
        &self,
        environment: &EnvironmentId,
        stack: &PreparedStack,
        deployment: &mut Deployment,
    ) -> StackRun {
        let deployment_id = deployment.id().clone();

        let engine_result = self
            .engine
            .deploy_stack(
                environment,
                &stack.manifest.name,
                &stack.resolved.content,
                &stack.resolved.values,
            )
            .await;

        match engine_result {
            Ok(results) => {
                let (records, failure) = summarize_results(&results);
                match failure {
                    None => {
                        if let Err(e) = deployment.complete_install(records) {
                            return StackRun::Failed {
                                deployment_id: Some(deployment_id),
                                reason: e.to_string(),
                            };
                        }
                        let service_count = deployment.services().len();
                        let variables = deployment.variables().clone();
                        if let Err(e) = self.deployments.save(deployment).await {
                            return StackRun::Failed {
                                deployment_id: Some(deployment_id),
                                reason: format!("repository error: {e}"),
                            };
                        }
                        StackRun::Completed {
                            deployment_id,
                            service_count,
                            variables,
                            message: None,
                        }
                    }
                    Some(reason) => {
                        deployment.record_services(records);
                        self.fail_install_and_save(deployment, &reason).await;
                        StackRun::Failed {
                            deployment_id: Some(deployment_id),
                            reason,
                        }
                    }
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail_install_and_save(deployment, &reason).await;
                StackRun::Failed {
                    deployment_id: Some(deployment_id),
                    reason,
                }
            }
        }
    }

    async fn fail_install_and_save(&self, deployment: &mut Deployment, reason: &str) {
        if let Err(e) = deployment.fail_install(reason) {
            tracing::error!(deployment = %deployment.id(), error = %e, "could not record install failure");
        }
        if let Err(e) = self.deployments.save(deployment).await {
            tracing::error!(deployment = %deployment.id(), error = %e, "could not persist failed install");
        }
    }

    async fn fail_upgrade_and_save(&self, deployment: &mut Deployment, reason: &str) {
        if let Err(e) = deployment.fail_upgrade(reason) {
            tracing::error!(deployment = %deployment.id(), error = %e, "could not record upgrade failure");
        }
        if let Err(e) = self.deployments.save(deployment).await {
            tracing::error!(deployment = %deployment.id(), error = %e, "could not persist failed upgrade");
        }
    }

    /// Tear down stacks dropped by an upgrade. Best effort: failures are
    /// logged, the upgrade result stands.
    async fn teardown_dropped_stacks(&self, environment: &EnvironmentId, dropped: &[StackName]) {
        for name in dropped {
            tracing::info!(stack = %name, "tearing down stack dropped by upgrade");
            if let Err(e) = self.engine.teardown_stack(environment, name).await {
                tracing::warn!(stack = %name, error = %e, "teardown of dropped stack failed");
            }
            match self.deployments.by_stack_name(environment, name).await {
                Ok(Some(mut deployment)) => {
                    if deployment.mark_removed().is_ok()
                        && let Err(e) = self.deployments.save(&deployment).await
                    {
                        tracing::warn!(stack = %name, error = %e, "could not persist removal");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(stack = %name, error = %e, "could not load dropped stack");
                }
            }
        }
    }

    /// Fire-and-forget progress delivery: failures are warned and swallowed.
    async fn notify(&self, diagnostics: &mut Diagnostics, event: ProgressEvent) {
        if let Err(e) = self.notifier.deployment_progress(&event).await {
            diagnostics.warn(Warning::notification_delivery(e.to_string()));
        }
    }
}

fn progress_event(
    aggregate: &ProductDeployment,
    phase: ProgressPhase,
    stack: Option<&StackName>,
    message: String,
    session_id: Option<&str>,
) -> ProgressEvent {
    ProgressEvent {
        product_deployment_id: aggregate.id().clone(),
        environment_id: aggregate.environment_id().clone(),
        phase,
        stack: stack.cloned(),
        message,
        completed: aggregate.completed_stacks(),
        failed: aggregate.failed_stacks(),
        total: aggregate.total_stacks(),
        session_id: session_id.map(str::to_string),
    }
}

/// Every configured stack must exist in the target product version.
fn validate_stack_configs(
    product: &ProductDefinition,
    configs: &BTreeMap<StackName, StackConfig>,
) -> Result<(), OrchestrationError> {
    for name in configs.keys() {
        if product.stack(name).is_none() {
            return Err(ProductError::StackNotInProduct(name.clone()).into());
        }
    }
    Ok(())
}

/// Resolve every stack's template up front. Resolution failures reject the
/// whole operation before any state is persisted.
fn prepare_stacks(
    product: &ProductDefinition,
    configs: &BTreeMap<StackName, StackConfig>,
    shared: &BTreeMap<String, String>,
    previous_values: Option<&BTreeMap<StackName, BTreeMap<String, String>>>,
) -> Result<Vec<PreparedStack>, OrchestrationError> {
    let mut prepared = Vec::new();

    for manifest in product.stacks.iter() {
        let overrides = configs.get(&manifest.name).map(|c| &c.overrides);
        let previous = previous_values.and_then(|prev| prev.get(&manifest.name));

        let tiers = match previous {
            Some(prev) => ValueTiers::upgrade(prev, Some(shared), overrides),
            None => ValueTiers::fresh(Some(shared), overrides),
        };

        let resolved = resolve(&manifest.template, tiers).map_err(|errors| {
            OrchestrationError::Validation {
                message: format!("stack '{}': {errors}", manifest.name),
            }
        })?;

        prepared.push(PreparedStack {
            manifest: manifest.clone(),
            resolved,
            is_new_in_upgrade: previous_values.is_some() && previous.is_none(),
        });
    }

    Ok(prepared)
}

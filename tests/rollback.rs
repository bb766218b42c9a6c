// ABOUTME: Integration tests for single-stack upgrade, rollback, and upgrade checks.
// ABOUTME: Exercises the snapshot protocol end to end against mock collaborators.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use flotilla::deploy::{
    DeployError, Deployment, DeploymentStatus, ServiceRecord, UpgradeDeploymentCommand,
    check_upgrade, rollback_deployment, upgrade_deployment,
};
use flotilla::services::{DeploymentRepository, InMemoryDeploymentRepository};
use flotilla::types::{DeploymentId, EnvironmentId, StackId, VersionRelation};
use flotilla::vars::{StackTemplate, VariableSpec};

use support::{MockCatalog, MockEngine, name, vars};

struct Harness {
    engine: Arc<MockEngine>,
    catalog: Arc<MockCatalog>,
    deployments: Arc<InMemoryDeploymentRepository>,
}

fn harness() -> Harness {
    support::init_tracing();
    Harness {
        engine: MockEngine::new(),
        catalog: MockCatalog::new(),
        deployments: Arc::new(InMemoryDeploymentRepository::new()),
    }
}

fn template(content: &str) -> StackTemplate {
    StackTemplate::new(
        content,
        vec![VariableSpec::plain("DB_HOST").with_default("localhost")],
    )
}

async fn deployed_stack(h: &Harness) -> DeploymentId {
    let stack_id = StackId::new("stack-webshop");
    h.catalog
        .add_stack_template(&stack_id, "1.0.0", template("v1: ${DB_HOST}"));
    h.catalog
        .add_stack_template(&stack_id, "2.0.0", template("v2: ${DB_HOST}"));
    h.catalog.set_stack_versions(&stack_id, &["2.0.0"]);

    let mut d = Deployment::new_install(
        EnvironmentId::new("env-1"),
        name("webshop"),
        Some(stack_id),
        "1.0.0",
        vars(&[("DB_HOST", "db-prod")]),
    );
    d.complete_install(vec![ServiceRecord::running("app")])
        .unwrap();
    h.deployments.save(&d).await.unwrap();
    d.id().clone()
}

fn upgrade_cmd(id: &DeploymentId, target: &str) -> UpgradeDeploymentCommand {
    UpgradeDeploymentCommand {
        deployment_id: id.clone(),
        target_version: target.to_string(),
        shared_variables: BTreeMap::new(),
        overrides: BTreeMap::new(),
    }
}

/// Test: A successful upgrade updates version and history and clears the
/// snapshot; prior values survive without being re-passed.
#[tokio::test]
async fn upgrade_succeeds_and_clears_snapshot() {
    let h = harness();
    let id = deployed_stack(&h).await;

    let outcome = upgrade_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        upgrade_cmd(&id, "2.0.0"),
    )
    .await
    .unwrap();

    assert_eq!(outcome.from_version, "1.0.0");
    assert_eq!(outcome.to_version, "2.0.0");

    let stored = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status(), DeploymentStatus::Running);
    assert_eq!(stored.variables().get("DB_HOST").unwrap(), "db-prod");
    assert!(stored.pending_snapshot().is_none());
    assert_eq!(stored.history().len(), 1);
}

/// Test: Upgrading to the current version fails with an "already running"
/// message; downgrades point at rollback; non-SemVer targets are permitted.
#[tokio::test]
async fn version_guard_matrix() {
    let h = harness();
    let id = deployed_stack(&h).await;

    let err = upgrade_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        upgrade_cmd(&id, "1.0.0"),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("already running"));

    let err = upgrade_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        upgrade_cmd(&id, "0.9.0"),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("not supported"));
    assert!(err.to_string().contains("rollback"));

    // Non-SemVer target: comparison skipped, upgrade proceeds.
    let stack_id = StackId::new("stack-webshop");
    h.catalog
        .add_stack_template(&stack_id, "beta", template("beta: ${DB_HOST}"));
    let outcome = upgrade_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        upgrade_cmd(&id, "beta"),
    )
    .await
    .unwrap();
    assert_eq!(outcome.to_version, "beta");
}

/// Test: A failed upgrade leaves a rollbackable deployment, and rollback
/// restores the previous configuration and redeploys it.
#[tokio::test]
async fn failed_upgrade_then_rollback_restores_and_redeploys() {
    let h = harness();
    let id = deployed_stack(&h).await;
    h.engine.fail_stack("webshop", "migration step died");

    let err = upgrade_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        upgrade_cmd(&id, "2.0.0"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DeployError::Engine(_)));

    let stored = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status(), DeploymentStatus::Failed);
    assert!(stored.can_rollback());

    // Containers behave again; roll back.
    h.engine.heal_stack("webshop");
    let outcome = rollback_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        &id,
    )
    .await
    .unwrap();

    assert_eq!(outcome.restored_version, "1.0.0");
    let stored = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status(), DeploymentStatus::Running);
    assert_eq!(stored.stack_version(), "1.0.0");
    assert_eq!(stored.variables().get("DB_HOST").unwrap(), "db-prod");
    assert!(stored.pending_snapshot().is_none());

    // The engine saw the upgrade deploy and the rollback redeploy.
    assert_eq!(h.engine.deploy_order(), vec!["webshop", "webshop"]);
}

/// Test: Rollback without a snapshot is rejected and mutates nothing.
#[tokio::test]
async fn rollback_without_snapshot_is_rejected() {
    let h = harness();
    let id = deployed_stack(&h).await;

    let err = rollback_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        &id,
    )
    .await
    .unwrap_err();
    assert_eq!(err, DeployError::NoPendingSnapshot);

    let stored = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status(), DeploymentStatus::Running);
}

/// Test: check_upgrade reports the version relation, catalog versions, and
/// rollback availability.
#[tokio::test]
async fn check_upgrade_reports_relation_and_versions() {
    let h = harness();
    let id = deployed_stack(&h).await;

    let check = check_upgrade(
        h.deployments.as_ref(),
        h.catalog.as_ref(),
        &id,
        Some("2.0.0"),
    )
    .await
    .unwrap();

    assert_eq!(check.current_version, "1.0.0");
    assert_eq!(check.target_relation, Some(VersionRelation::Upgrade));
    assert!(check.can_upgrade);
    assert!(!check.can_rollback);
    assert_eq!(check.available_versions, vec!["2.0.0"]);

    // After a failed upgrade, rollback becomes available.
    h.engine.fail_stack("webshop", "boom");
    let _ = upgrade_deployment(
        h.engine.as_ref(),
        h.catalog.as_ref(),
        h.deployments.as_ref(),
        upgrade_cmd(&id, "2.0.0"),
    )
    .await;

    let check = check_upgrade(h.deployments.as_ref(), h.catalog.as_ref(), &id, None)
        .await
        .unwrap();
    assert!(!check.can_upgrade);
    assert!(check.can_rollback);
    assert_eq!(check.target_relation, None);
}

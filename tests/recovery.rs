// ABOUTME: Integration tests for the startup recovery pass.
// ABOUTME: Interrupted installs and upgrades must be failed deterministically.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use flotilla::deploy::{Deployment, DeploymentStatus, ServiceRecord};
use flotilla::recovery::recover_interrupted;
use flotilla::services::{DeploymentRepository, InMemoryDeploymentRepository};
use flotilla::types::EnvironmentId;

use support::{name, vars};

fn installing(stack: &str) -> Deployment {
    Deployment::new_install(
        EnvironmentId::new("env-1"),
        name(stack),
        None,
        "1.0.0",
        BTreeMap::new(),
    )
}

fn running(stack: &str) -> Deployment {
    let mut d = installing(stack);
    d.complete_install(vec![ServiceRecord::running("app")])
        .unwrap();
    d
}

fn upgrading(stack: &str) -> Deployment {
    let mut d = running(stack);
    d.begin_upgrade("2.0.0", vars(&[("A", "1")]), None).unwrap();
    d
}

/// Test: A deployment found Upgrading at process start is always Failed
/// afterwards, with a reason mentioning the restart, regardless of its other
/// fields.
#[tokio::test]
async fn interrupted_upgrade_is_failed_with_restart_reason() {
    support::init_tracing();
    let repo = Arc::new(InMemoryDeploymentRepository::new());
    let d = upgrading("webshop");
    let id = d.id().clone();
    repo.save(&d).await.unwrap();

    let report = recover_interrupted(repo.as_ref()).await;

    assert_eq!(report.recovered, vec![id.clone()]);
    assert_eq!(report.errors, 0);

    let stored = repo.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status(), DeploymentStatus::Failed);
    assert!(stored.status_reason().unwrap().contains("restart"));
    assert!(stored.status_reason().unwrap().contains("upgrade"));
    // The snapshot survives the crash, so rollback remains possible.
    assert!(stored.can_rollback());
}

/// Test: Interrupted installs get the installation-specific reason.
#[tokio::test]
async fn interrupted_install_is_failed_with_install_reason() {
    let repo = Arc::new(InMemoryDeploymentRepository::new());
    let d = installing("webshop");
    let id = d.id().clone();
    repo.save(&d).await.unwrap();

    recover_interrupted(repo.as_ref()).await;

    let stored = repo.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.status(), DeploymentStatus::Failed);
    assert!(stored.status_reason().unwrap().contains("installation"));
    assert!(!stored.can_rollback());
}

/// Test: Healthy and terminal deployments are untouched by recovery.
#[tokio::test]
async fn settled_deployments_are_untouched() {
    let repo = Arc::new(InMemoryDeploymentRepository::new());

    let healthy = running("healthy");
    repo.save(&healthy).await.unwrap();

    let mut stopped = running("stopped");
    stopped.stop(None).unwrap();
    repo.save(&stopped).await.unwrap();

    let mut failed = upgrading("failed");
    failed.fail_upgrade("real failure").unwrap();
    repo.save(&failed).await.unwrap();

    let report = recover_interrupted(repo.as_ref()).await;
    assert!(report.recovered.is_empty());

    let stored = repo.get(healthy.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), DeploymentStatus::Running);
    let stored = repo.get(failed.id()).await.unwrap().unwrap();
    assert_eq!(stored.status_reason(), Some("real failure"));
}

/// Test: Recovery handles a mixed population in one pass.
#[tokio::test]
async fn recovery_processes_every_stuck_deployment() {
    let repo = Arc::new(InMemoryDeploymentRepository::new());
    for stack in ["a", "b"] {
        repo.save(&installing(stack)).await.unwrap();
    }
    repo.save(&upgrading("c")).await.unwrap();
    repo.save(&running("d")).await.unwrap();

    let report = recover_interrupted(repo.as_ref()).await;
    assert_eq!(report.recovered.len(), 3);
    assert_eq!(report.errors, 0);

    let failed = repo.by_status(&[DeploymentStatus::Failed]).await.unwrap();
    assert_eq!(failed.len(), 3);
}

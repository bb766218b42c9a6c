// ABOUTME: Guarded state transition methods for the Deployment aggregate.
// ABOUTME: Implements install, upgrade with point-of-no-return snapshot, rollback, and maintenance.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::types::{VersionRelation, compare};

use super::deployment::{
    Deployment, DeploymentStatus, OperationMode, ServiceRecord, UpgradeRecord, UpgradeSnapshot,
};
use super::error::DeployError;

impl Deployment {
    /// Finish a successful installation: containers are up.
    ///
    /// # Errors
    ///
    /// Returns `NotInstalling` unless the deployment is mid-install.
    pub fn complete_install(&mut self, services: Vec<ServiceRecord>) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Installing {
            return Err(DeployError::NotInstalling(self.status()));
        }
        self.set_services(services);
        self.set_reason(None);
        self.set_status(DeploymentStatus::Running, OperationMode::Normal);
        tracing::info!(deployment = %self.id(), stack = %self.stack_name(), "installation completed");
        Ok(())
    }

    /// Record an installation failure. Nothing to roll back to: no snapshot
    /// exists before the first successful install.
    ///
    /// # Errors
    ///
    /// Returns `NotInstalling` unless the deployment is mid-install.
    pub fn fail_install(&mut self, reason: impl Into<String>) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Installing {
            return Err(DeployError::NotInstalling(self.status()));
        }
        let reason = reason.into();
        tracing::warn!(deployment = %self.id(), stack = %self.stack_name(), %reason, "installation failed");
        self.set_reason(Some(reason));
        self.set_status(DeploymentStatus::Failed, OperationMode::Failed);
        Ok(())
    }

    /// Begin an upgrade to the target version and configuration.
    ///
    /// The pre-upgrade snapshot is captured before any field changes; the
    /// point of no return is the first container mutation after this method
    /// returns. Before that, aborting is free. After it, only forward
    /// recovery or explicit rollback applies.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` unless the deployment is running, `SameVersion`
    /// when the target equals the current version, or `DowngradeNotSupported`
    /// when it is older. Version checks are skipped when either side is not
    /// valid SemVer.
    pub fn begin_upgrade(
        &mut self,
        target_version: &str,
        target_variables: BTreeMap<String, String>,
        description: Option<String>,
    ) -> Result<(), DeployError> {
        if !self.can_upgrade() {
            return Err(DeployError::NotRunning(self.status()));
        }

        match compare(self.stack_version(), target_version) {
            VersionRelation::Same => {
                return Err(DeployError::SameVersion(self.stack_version().to_string()));
            }
            VersionRelation::Downgrade => {
                return Err(DeployError::DowngradeNotSupported {
                    current: self.stack_version().to_string(),
                    target: target_version.to_string(),
                });
            }
            VersionRelation::Upgrade | VersionRelation::Unknown => {}
        }

        let snapshot = UpgradeSnapshot {
            stack_version: self.stack_version().to_string(),
            variables: self.variables().clone(),
            services: self.services().to_vec(),
            created_at: Utc::now(),
            description,
        };
        self.set_snapshot(Some(snapshot));
        self.set_version_and_variables(target_version.to_string(), target_variables);
        self.set_reason(None);
        self.set_status(DeploymentStatus::Upgrading, OperationMode::Migrating);
        tracing::info!(
            deployment = %self.id(),
            stack = %self.stack_name(),
            target = target_version,
            "upgrade started, snapshot captured"
        );
        Ok(())
    }

    /// Finish a successful upgrade: clear the snapshot and record history.
    ///
    /// # Errors
    ///
    /// Returns `NotUpgrading` unless the deployment is mid-upgrade.
    pub fn complete_upgrade(&mut self) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Upgrading {
            return Err(DeployError::NotUpgrading(self.status()));
        }
        let from_version = self
            .pending_snapshot()
            .map(|s| s.stack_version.clone())
            .unwrap_or_default();
        self.push_history(UpgradeRecord {
            from_version,
            to_version: self.stack_version().to_string(),
            completed_at: Utc::now(),
        });
        self.set_snapshot(None);
        self.set_reason(None);
        self.set_status(DeploymentStatus::Running, OperationMode::Normal);
        tracing::info!(deployment = %self.id(), stack = %self.stack_name(), "upgrade completed");
        Ok(())
    }

    /// Record an upgrade failure. The snapshot is retained so the operator
    /// can roll back.
    ///
    /// # Errors
    ///
    /// Returns `NotUpgrading` unless the deployment is mid-upgrade.
    pub fn fail_upgrade(&mut self, reason: impl Into<String>) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Upgrading {
            return Err(DeployError::NotUpgrading(self.status()));
        }
        let reason = reason.into();
        tracing::warn!(deployment = %self.id(), stack = %self.stack_name(), %reason, "upgrade failed");
        self.set_reason(Some(reason));
        self.set_status(DeploymentStatus::Failed, OperationMode::Failed);
        Ok(())
    }

    /// Restore version, variables, and services from the pre-upgrade snapshot
    /// and clear it. The deployment lands back in `Installing` so callers can
    /// redeploy containers with the restored configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotFailed` unless the deployment is failed, or
    /// `NoPendingSnapshot` when there is nothing to restore.
    pub fn rollback_to_previous(&mut self) -> Result<String, DeployError> {
        if self.status() != DeploymentStatus::Failed {
            return Err(DeployError::NotFailed(self.status()));
        }
        let snapshot = self
            .pending_snapshot()
            .cloned()
            .ok_or(DeployError::NoPendingSnapshot)?;

        let restored_version = snapshot.stack_version.clone();
        self.set_version_and_variables(snapshot.stack_version, snapshot.variables);
        self.set_services(snapshot.services);
        self.set_snapshot(None);
        self.set_reason(None);
        self.set_status(DeploymentStatus::Installing, OperationMode::Normal);
        tracing::info!(
            deployment = %self.id(),
            stack = %self.stack_name(),
            version = %restored_version,
            "rolled back to pre-upgrade snapshot"
        );
        Ok(restored_version)
    }

    /// Manually mark a failed deployment healthy again. Discards the snapshot:
    /// after recovery the current configuration is the accepted one.
    ///
    /// # Errors
    ///
    /// Returns `NotFailed` unless the deployment is failed.
    pub fn recover_from_failure(&mut self, reason: Option<String>) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Failed {
            return Err(DeployError::NotFailed(self.status()));
        }
        self.set_snapshot(None);
        self.set_reason(reason);
        self.set_status(DeploymentStatus::Running, OperationMode::Normal);
        tracing::info!(deployment = %self.id(), stack = %self.stack_name(), "recovered from failure");
        Ok(())
    }

    /// Enter maintenance mode. Touches neither status nor snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` unless the deployment is running.
    pub fn enter_maintenance(&mut self) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Running {
            return Err(DeployError::NotRunning(self.status()));
        }
        self.set_status(DeploymentStatus::Running, OperationMode::Maintenance);
        Ok(())
    }

    /// Leave maintenance mode back to normal operation.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` unless the deployment is running.
    pub fn exit_maintenance(&mut self) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Running {
            return Err(DeployError::NotRunning(self.status()));
        }
        self.set_status(DeploymentStatus::Running, OperationMode::Normal);
        Ok(())
    }

    /// Update the service runtime records after an engine call.
    pub fn record_services(&mut self, services: Vec<ServiceRecord>) {
        self.set_services(services);
        self.touch();
    }

    /// Stop a running deployment.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` unless the deployment is running.
    pub fn stop(&mut self, reason: Option<String>) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Running {
            return Err(DeployError::NotRunning(self.status()));
        }
        self.set_reason(reason);
        self.set_status(DeploymentStatus::Stopped, OperationMode::Stopped);
        Ok(())
    }

    /// Resume a stopped deployment after its containers are started again.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` unless the deployment is stopped.
    pub fn resume(&mut self) -> Result<(), DeployError> {
        if self.status() != DeploymentStatus::Stopped {
            return Err(DeployError::NotRunning(self.status()));
        }
        self.set_reason(None);
        self.set_status(DeploymentStatus::Running, OperationMode::Normal);
        Ok(())
    }

    /// Soft-remove the deployment. The record survives so stack-name
    /// uniqueness checks keep their history.
    ///
    /// # Errors
    ///
    /// Returns `Removed` when already removed.
    pub fn mark_removed(&mut self) -> Result<(), DeployError> {
        if self.status() == DeploymentStatus::Removed {
            return Err(DeployError::Removed);
        }
        self.set_snapshot(None);
        self.set_status(DeploymentStatus::Removed, OperationMode::Stopped);
        tracing::info!(deployment = %self.id(), stack = %self.stack_name(), "deployment removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnvironmentId, StackName};

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn running_deployment() -> Deployment {
        let mut d = Deployment::new_install(
            EnvironmentId::new("env-1"),
            StackName::new("webshop").unwrap(),
            None,
            "1.0.0",
            vars(&[("DB_HOST", "db1")]),
        );
        d.complete_install(vec![ServiceRecord::running("web")])
            .unwrap();
        d
    }

    #[test]
    fn install_lifecycle_reaches_running() {
        let d = running_deployment();
        assert_eq!(d.status(), DeploymentStatus::Running);
        assert_eq!(d.operation_mode(), OperationMode::Normal);
        assert!(d.pending_snapshot().is_none());
    }

    #[test]
    fn failed_install_has_no_snapshot() {
        let mut d = Deployment::new_install(
            EnvironmentId::new("env-1"),
            StackName::new("webshop").unwrap(),
            None,
            "1.0.0",
            BTreeMap::new(),
        );
        d.fail_install("image pull failed").unwrap();
        assert_eq!(d.status(), DeploymentStatus::Failed);
        assert!(d.pending_snapshot().is_none());
        assert!(!d.can_rollback());
    }

    #[test]
    fn begin_upgrade_snapshots_prior_state() {
        let mut d = running_deployment();
        d.begin_upgrade("2.0.0", vars(&[("DB_HOST", "db2")]), None)
            .unwrap();

        assert_eq!(d.status(), DeploymentStatus::Upgrading);
        assert_eq!(d.operation_mode(), OperationMode::Migrating);
        assert_eq!(d.stack_version(), "2.0.0");
        assert_eq!(d.variables(), &vars(&[("DB_HOST", "db2")]));

        let snapshot = d.pending_snapshot().expect("snapshot must exist");
        assert_eq!(snapshot.stack_version, "1.0.0");
        assert_eq!(snapshot.variables, vars(&[("DB_HOST", "db1")]));
        assert_eq!(snapshot.services, vec![ServiceRecord::running("web")]);
    }

    #[test]
    fn complete_upgrade_clears_snapshot_and_records_history() {
        let mut d = running_deployment();
        d.begin_upgrade("2.0.0", BTreeMap::new(), None).unwrap();
        d.complete_upgrade().unwrap();

        assert_eq!(d.status(), DeploymentStatus::Running);
        assert!(d.pending_snapshot().is_none());
        assert_eq!(d.history().len(), 1);
        assert_eq!(d.history()[0].from_version, "1.0.0");
        assert_eq!(d.history()[0].to_version, "2.0.0");
    }

    #[test]
    fn failed_upgrade_retains_snapshot_for_rollback() {
        let mut d = running_deployment();
        d.begin_upgrade("2.0.0", BTreeMap::new(), None).unwrap();
        d.fail_upgrade("service crashed on start").unwrap();

        assert_eq!(d.status(), DeploymentStatus::Failed);
        assert_eq!(d.operation_mode(), OperationMode::Failed);
        assert!(d.pending_snapshot().is_some());
        assert!(d.can_rollback());
        assert_eq!(d.status_reason(), Some("service crashed on start"));
    }

    #[test]
    fn rollback_restores_pre_migration_state_exactly() {
        let mut d = running_deployment();
        let version_before = d.stack_version().to_string();
        let variables_before = d.variables().clone();
        let services_before = d.services().to_vec();

        d.begin_upgrade("2.0.0", vars(&[("DB_HOST", "db2")]), None)
            .unwrap();
        d.fail_upgrade("boom").unwrap();
        let restored = d.rollback_to_previous().unwrap();

        assert_eq!(restored, version_before);
        assert_eq!(d.stack_version(), version_before);
        assert_eq!(d.variables(), &variables_before);
        assert_eq!(d.services(), services_before.as_slice());
        assert!(d.pending_snapshot().is_none());
        assert_eq!(d.status(), DeploymentStatus::Installing);
    }

    #[test]
    fn rollback_without_snapshot_is_rejected() {
        let mut d = Deployment::new_install(
            EnvironmentId::new("env-1"),
            StackName::new("webshop").unwrap(),
            None,
            "1.0.0",
            BTreeMap::new(),
        );
        d.fail_install("bad template").unwrap();
        assert_eq!(d.rollback_to_previous(), Err(DeployError::NoPendingSnapshot));
    }

    #[test]
    fn upgrade_requires_running_status() {
        let mut d = running_deployment();
        d.stop(None).unwrap();
        assert!(matches!(
            d.begin_upgrade("2.0.0", BTreeMap::new(), None),
            Err(DeployError::NotRunning(DeploymentStatus::Stopped))
        ));
    }

    #[test]
    fn same_version_upgrade_is_rejected() {
        let mut d = running_deployment();
        let err = d
            .begin_upgrade("1.0.0", BTreeMap::new(), None)
            .unwrap_err();
        assert_eq!(err, DeployError::SameVersion("1.0.0".to_string()));
        // Nothing changed.
        assert_eq!(d.status(), DeploymentStatus::Running);
        assert!(d.pending_snapshot().is_none());
    }

    #[test]
    fn downgrade_is_rejected_with_rollback_hint() {
        let mut d = running_deployment();
        d.begin_upgrade("2.0.0", BTreeMap::new(), None).unwrap();
        d.complete_upgrade().unwrap();

        let err = d
            .begin_upgrade("1.9.0", BTreeMap::new(), None)
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));
        assert!(err.to_string().contains("rollback"));
    }

    #[test]
    fn non_semver_versions_skip_the_guard() {
        let mut d = running_deployment();
        // "abc" does not parse; comparison is skipped and the upgrade begins.
        assert!(d.begin_upgrade("abc", BTreeMap::new(), None).is_ok());
        assert_eq!(d.status(), DeploymentStatus::Upgrading);
    }

    #[test]
    fn maintenance_toggles_mode_only() {
        let mut d = running_deployment();
        d.enter_maintenance().unwrap();
        assert_eq!(d.status(), DeploymentStatus::Running);
        assert_eq!(d.operation_mode(), OperationMode::Maintenance);
        d.exit_maintenance().unwrap();
        assert_eq!(d.operation_mode(), OperationMode::Normal);
    }

    #[test]
    fn maintenance_requires_running() {
        let mut d = running_deployment();
        d.begin_upgrade("2.0.0", BTreeMap::new(), None).unwrap();
        assert!(matches!(
            d.enter_maintenance(),
            Err(DeployError::NotRunning(DeploymentStatus::Upgrading))
        ));
    }

    #[test]
    fn recover_from_failure_clears_snapshot() {
        let mut d = running_deployment();
        d.begin_upgrade("2.0.0", BTreeMap::new(), None).unwrap();
        d.fail_upgrade("boom").unwrap();
        d.recover_from_failure(Some("operator accepted state".to_string()))
            .unwrap();

        assert_eq!(d.status(), DeploymentStatus::Running);
        assert_eq!(d.operation_mode(), OperationMode::Normal);
        assert!(d.pending_snapshot().is_none());
    }

    #[test]
    fn removal_is_terminal() {
        let mut d = running_deployment();
        d.mark_removed().unwrap();
        assert_eq!(d.status(), DeploymentStatus::Removed);
        assert_eq!(d.mark_removed(), Err(DeployError::Removed));
    }
}

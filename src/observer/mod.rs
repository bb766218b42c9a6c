// ABOUTME: Maintenance observer configuration, evaluation, and polling task.
// ABOUTME: Closed set of observer kinds with a single dispatch point over a probe capability.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::deploy::{OperationMode, change_operation_mode};
use crate::services::{ContainerEngine, DeploymentRepository};
use crate::types::DeploymentId;

/// What an observed value says the deployment's mode should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredMode {
    Maintenance,
    Normal,
}

/// Type-specific settings for one observer kind. The variant set is closed:
/// evaluation dispatches over it in exactly one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverSource {
    /// Read a SQL Server extended property.
    SqlExtendedProperty {
        connection_string: String,
        property_name: String,
    },
    /// Run a scalar SQL query.
    SqlQuery {
        connection_string: String,
        query: String,
    },
    /// GET a URL and read the response body.
    Http {
        url: String,
        /// Status the response must have, when set.
        #[serde(default)]
        expect_status: Option<u16>,
    },
    /// Read a file's contents.
    File { path: String },
}

/// Configuration of a maintenance observer attached to one deployment:
/// a polling interval plus the values that signal maintenance and normal
/// operation, and the kind-specific source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceObserverConfig {
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
    pub maintenance_value: String,
    pub normal_value: String,
    #[serde(flatten)]
    pub source: ObserverSource,
}

/// Structural problems with an observer configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObserverConfigError {
    #[error("observer field '{0}' must not be blank")]
    BlankField(&'static str),

    #[error("polling interval must be greater than zero")]
    ZeroInterval,

    #[error("maintenance value and normal value must differ")]
    IndistinctValues,

    #[error("http url must start with http:// or https://")]
    InvalidUrlScheme,
}

impl MaintenanceObserverConfig {
    /// Check the configuration for structural errors. Returns every problem
    /// found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ObserverConfigError>> {
        let mut errors = Vec::new();

        if self.polling_interval.is_zero() {
            errors.push(ObserverConfigError::ZeroInterval);
        }
        if self.maintenance_value.trim().is_empty() {
            errors.push(ObserverConfigError::BlankField("maintenance_value"));
        }
        if self.normal_value.trim().is_empty() {
            errors.push(ObserverConfigError::BlankField("normal_value"));
        }
        if !self.maintenance_value.trim().is_empty()
            && self.maintenance_value.trim().eq_ignore_ascii_case(self.normal_value.trim())
        {
            errors.push(ObserverConfigError::IndistinctValues);
        }

        match &self.source {
            ObserverSource::SqlExtendedProperty {
                connection_string,
                property_name,
            } => {
                if connection_string.trim().is_empty() {
                    errors.push(ObserverConfigError::BlankField("connection_string"));
                }
                if property_name.trim().is_empty() {
                    errors.push(ObserverConfigError::BlankField("property_name"));
                }
            }
            ObserverSource::SqlQuery {
                connection_string,
                query,
            } => {
                if connection_string.trim().is_empty() {
                    errors.push(ObserverConfigError::BlankField("connection_string"));
                }
                if query.trim().is_empty() {
                    errors.push(ObserverConfigError::BlankField("query"));
                }
            }
            ObserverSource::Http { url, .. } => {
                if url.trim().is_empty() {
                    errors.push(ObserverConfigError::BlankField("url"));
                } else if !url.starts_with("http://") && !url.starts_with("https://") {
                    errors.push(ObserverConfigError::InvalidUrlScheme);
                }
            }
            ObserverSource::File { path } => {
                if path.trim().is_empty() {
                    errors.push(ObserverConfigError::BlankField("path"));
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Read the raw observed value through the probe. This is the single
    /// dispatch point over the observer kinds.
    ///
    /// # Errors
    ///
    /// Propagates probe failures, including an unexpected HTTP status when
    /// `expect_status` is set.
    pub async fn observe(&self, probe: &dyn MaintenanceProbe) -> Result<String, ProbeError> {
        match &self.source {
            ObserverSource::SqlExtendedProperty {
                connection_string,
                property_name,
            } => {
                probe
                    .sql_extended_property(connection_string, property_name)
                    .await
            }
            ObserverSource::SqlQuery {
                connection_string,
                query,
            } => probe.sql_query(connection_string, query).await,
            ObserverSource::Http { url, expect_status } => {
                let (status, body) = probe.http_get(url).await?;
                if let Some(expected) = expect_status
                    && status != *expected
                {
                    return Err(ProbeError::UnexpectedStatus {
                        expected: *expected,
                        actual: status,
                    });
                }
                Ok(body)
            }
            ObserverSource::File { path } => probe.read_file(path).await,
        }
    }

    /// Map an observed value onto a desired mode. Unmatched values mean "no
    /// action", not an error: third parties may write other values.
    pub fn interpret(&self, observed: &str) -> Option<DesiredMode> {
        let observed = observed.trim();
        if observed.eq_ignore_ascii_case(self.maintenance_value.trim()) {
            Some(DesiredMode::Maintenance)
        } else if observed.eq_ignore_ascii_case(self.normal_value.trim()) {
            Some(DesiredMode::Normal)
        } else {
            None
        }
    }

    /// Observe and interpret in one step.
    ///
    /// # Errors
    ///
    /// Propagates probe failures.
    pub async fn evaluate(
        &self,
        probe: &dyn MaintenanceProbe,
    ) -> Result<Option<DesiredMode>, ProbeError> {
        let observed = self.observe(probe).await?;
        Ok(self.interpret(&observed))
    }
}

/// Poll a maintenance signal and steer one deployment's operation mode.
///
/// Each tick evaluates the observer; a matched value requests the matching
/// mode through the mode-change handler, whose idempotence makes repeated
/// matches free. Probe failures and rejected mode changes (for example while
/// the deployment is mid-upgrade) are logged and retried on the next tick.
pub async fn run_observer(
    config: MaintenanceObserverConfig,
    probe: Arc<dyn MaintenanceProbe>,
    engine: Arc<dyn ContainerEngine>,
    deployments: Arc<dyn DeploymentRepository>,
    deployment_id: DeploymentId,
    cancel: CancellationToken,
) {
    if let Err(errors) = config.validate() {
        tracing::error!(
            deployment = %deployment_id,
            ?errors,
            "maintenance observer not started: invalid configuration"
        );
        return;
    }

    let mut ticker = tokio::time::interval(config.polling_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(deployment = %deployment_id, "maintenance observer stopping");
                return;
            }
            _ = ticker.tick() => {
                observe_and_apply(&config, probe.as_ref(), engine.as_ref(),
                    deployments.as_ref(), &deployment_id).await;
            }
        }
    }
}

async fn observe_and_apply(
    config: &MaintenanceObserverConfig,
    probe: &dyn MaintenanceProbe,
    engine: &dyn ContainerEngine,
    deployments: &dyn DeploymentRepository,
    deployment_id: &DeploymentId,
) {
    let desired = match config.evaluate(probe).await {
        Ok(Some(mode)) => mode,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(deployment = %deployment_id, error = %e, "maintenance probe failed");
            return;
        }
    };

    let target = match desired {
        DesiredMode::Maintenance => OperationMode::Maintenance,
        DesiredMode::Normal => OperationMode::Normal,
    };

    // Only steer steady states. Migrating/Failed/Stopped are owned by the
    // upgrade and failure machinery; exiting them is an operator decision.
    match deployments.get(deployment_id).await {
        Ok(Some(d))
            if matches!(
                d.operation_mode(),
                OperationMode::Normal | OperationMode::Maintenance
            ) => {}
        Ok(Some(_)) | Ok(None) => return,
        Err(e) => {
            tracing::warn!(deployment = %deployment_id, error = %e, "maintenance observer could not load deployment");
            return;
        }
    }

    match change_operation_mode(
        engine,
        deployments,
        deployment_id,
        target,
        Some("maintenance observer".to_string()),
    )
    .await
    {
        Ok(outcome) if outcome.changed => {
            tracing::info!(
                deployment = %deployment_id,
                mode = %outcome.mode,
                "maintenance observer switched operation mode"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(
                deployment = %deployment_id,
                error = %e,
                "maintenance observer could not switch mode"
            );
        }
    }
}

/// Errors from probing an external maintenance signal.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe target unreachable: {0}")]
    Unreachable(String),

    #[error("probe query failed: {0}")]
    Query(String),

    #[error("unexpected http status: expected {expected}, got {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },
}

/// External capability that reads maintenance signals. Implementations own
/// the SQL/HTTP/file plumbing and its timeouts.
#[async_trait]
pub trait MaintenanceProbe: Send + Sync {
    async fn sql_extended_property(
        &self,
        connection_string: &str,
        property_name: &str,
    ) -> Result<String, ProbeError>;

    async fn sql_query(&self, connection_string: &str, query: &str) -> Result<String, ProbeError>;

    /// Returns the response status and body.
    async fn http_get(&self, url: &str) -> Result<(u16, String), ProbeError>;

    async fn read_file(&self, path: &str) -> Result<String, ProbeError>;
}

// ABOUTME: Notification capability traits for progress and in-app messages.
// ABOUTME: Fire-and-forget - delivery failures never affect orchestration outcomes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{EnvironmentId, ProductDeploymentId, StackName};

/// Phase of a product orchestration run a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Started,
    StackStarted,
    StackCompleted,
    StackFailed,
    Finished,
}

/// A progress event emitted while a product deploy/upgrade runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub product_deployment_id: ProductDeploymentId,
    pub environment_id: EnvironmentId,
    pub phase: ProgressPhase,
    /// The stack this event concerns, absent for run-level events.
    pub stack: Option<StackName>,
    pub message: String,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    /// Caller session to route the event back to, if any.
    pub session_id: Option<String>,
}

/// Severity of a persisted in-app notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A persisted in-app notification summarizing an orchestration outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
}

/// Errors from notification delivery. Callers log and swallow these.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery of progress events and persisted notifications.
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    /// Deliver a live progress event to connected observers.
    async fn deployment_progress(&self, event: &ProgressEvent) -> Result<(), NotifyError>;

    /// Persist an in-app notification.
    async fn publish(&self, note: &Notification) -> Result<(), NotifyError>;
}

/// A notifier that drops everything. Useful for embedders and tests that
/// don't care about delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl ProgressNotifier for NullNotifier {
    async fn deployment_progress(&self, _event: &ProgressEvent) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn publish(&self, _note: &Notification) -> Result<(), NotifyError> {
        Ok(())
    }
}

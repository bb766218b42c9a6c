// ABOUTME: In-process guard against concurrent orchestration of one product group.
// ABOUTME: Closes the check-then-act race between duplicate-initiation checks and the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::{EnvironmentId, ProductGroupId};

/// Information about who holds an orchestration guard.
#[derive(Debug, Clone)]
pub struct GuardInfo {
    /// Hostname of the machine running the orchestrator.
    pub holder: String,
    /// Process ID of the guard holder.
    pub pid: u32,
    /// When the guard was acquired.
    pub started_at: DateTime<Utc>,
    /// Product being orchestrated.
    pub product: String,
}

impl GuardInfo {
    fn new(product: &str) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            product: product.to_string(),
        }
    }
}

/// A guard acquisition failure: the slot is already taken.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "product group is already being orchestrated by {holder} (pid {pid}) since {started_at}"
)]
pub struct GuardHeld {
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

type GuardKey = (EnvironmentId, ProductGroupId);

/// Registry of in-flight orchestration runs, keyed by
/// `(environment, product group)`. The repository duplicate check remains the
/// cross-process layer; this registry makes the check atomic within one
/// process.
#[derive(Default)]
pub struct GuardRegistry {
    held: Mutex<HashMap<GuardKey, GuardInfo>>,
}

impl GuardRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the guard for a product group. Released when the returned
    /// guard drops.
    ///
    /// # Errors
    ///
    /// Returns `GuardHeld` with holder details when another run owns the slot.
    pub fn acquire(
        self: &Arc<Self>,
        environment: &EnvironmentId,
        group: &ProductGroupId,
        product: &str,
    ) -> Result<ActiveGuard, GuardHeld> {
        let key = (environment.clone(), group.clone());
        let mut held = self.held.lock();

        if let Some(existing) = held.get(&key) {
            return Err(GuardHeld {
                holder: existing.holder.clone(),
                pid: existing.pid,
                started_at: existing.started_at,
            });
        }

        held.insert(key.clone(), GuardInfo::new(product));
        Ok(ActiveGuard {
            registry: Arc::clone(self),
            key,
        })
    }
}

/// A held orchestration guard that releases on drop.
pub struct ActiveGuard {
    registry: Arc<GuardRegistry>,
    key: GuardKey,
}

impl std::fmt::Debug for ActiveGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveGuard")
            .field("environment", &self.key.0)
            .field("group", &self.key.1)
            .finish()
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.registry.held.lock().remove(&self.key);
    }
}

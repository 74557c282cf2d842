//! Pessimistic case locking for multi-worker deployments.
//!
//! Every worker claims a case instance before running a unit of work on it
//! and releases the claim afterwards. Contention is expected and is not an
//! error: [`LockManager::try_lock`] returns `Ok(false)` and the worker moves
//! on. Leases expire, so a crashed worker's claims become reclaimable after
//! the TTL instead of wedging the case forever.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use docket_storage::CaseStorage;

use crate::error::EngineError;

/// Lease-based lock manager bound to one worker identity.
pub struct LockManager {
    storage: Arc<dyn CaseStorage>,
    owner: String,
    ttl: Duration,
}

impl LockManager {
    pub const DEFAULT_TTL: Duration = Duration::minutes(5);

    pub fn new(storage: Arc<dyn CaseStorage>, owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            storage,
            owner: owner.into(),
            ttl,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Try to claim a case instance. `Ok(false)` means another worker holds
    /// it; the caller skips the case rather than failing.
    pub fn try_lock(&self, case_id: &str) -> Result<bool, EngineError> {
        let expires_at = OffsetDateTime::now_utc() + self.ttl;
        let acquired = self.storage.update_lock(case_id, &self.owner, expires_at)?;
        if !acquired {
            tracing::debug!(
                case_instance_id = %case_id,
                owner = %self.owner,
                "case lock contended, skipping"
            );
        }
        Ok(acquired)
    }

    /// Release a claim. Idempotent; releasing a case this worker no longer
    /// owns is a no-op.
    pub fn unlock(&self, case_id: &str) -> Result<(), EngineError> {
        self.storage.clear_lock(case_id)?;
        Ok(())
    }

    /// Release every claim held by this worker (shutdown cleanup).
    pub fn unlock_all(&self) -> Result<(), EngineError> {
        self.storage.clear_all_locks(&self.owner)?;
        Ok(())
    }
}

// ABOUTME: Durable storage for deployment records, service locks, and abort requests.
// ABOUTME: Every write is complete before the call returns; callers persist ahead of side effects.

mod error;
mod file;
mod memory;

pub use error::StoreError;
pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::deploy::{Deployment, DeploymentStatus, LockInfo};
use crate::types::{DeploymentId, ServiceName};

/// Persistence for rollout state.
///
/// Implementations must make `put` atomic: a reader sees either the previous
/// record or the new one, never a partial write.
pub trait StateStore: Send + Sync {
    /// Insert or replace a deployment record.
    fn put(&self, deployment: &Deployment) -> Result<(), StoreError>;

    fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError>;

    /// All records, oldest first.
    fn list(&self) -> Result<Vec<Deployment>, StoreError>;

    /// Remove a record and any abort marker for it. Returns whether it existed.
    fn delete(&self, id: &DeploymentId) -> Result<bool, StoreError>;

    /// Take the service lock if it is free.
    ///
    /// Returns `None` when the lock was acquired and `Some(existing)` when
    /// another holder already has it.
    fn try_lock(&self, lock: &LockInfo) -> Result<Option<LockInfo>, StoreError>;

    fn read_lock(&self, service: &ServiceName) -> Result<Option<LockInfo>, StoreError>;

    /// Release the lock if `holder` owns it. Returns whether anything was released.
    fn release_lock(
        &self,
        service: &ServiceName,
        holder: &DeploymentId,
    ) -> Result<bool, StoreError>;

    /// Remove the lock regardless of holder.
    fn break_lock(&self, service: &ServiceName) -> Result<(), StoreError>;

    /// Record an operator abort request so any process driving the rollout sees it.
    fn request_abort(&self, id: &DeploymentId) -> Result<(), StoreError>;

    fn abort_requested(&self, id: &DeploymentId) -> Result<bool, StoreError>;

    fn list_for_service(&self, service: &ServiceName) -> Result<Vec<Deployment>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|d| d.service() == service)
            .collect())
    }

    /// The non-terminal deployment for a service, if one exists.
    fn active_for_service(&self, service: &ServiceName) -> Result<Option<Deployment>, StoreError> {
        Ok(self
            .list_for_service(service)?
            .into_iter()
            .rev()
            .find(|d| !d.is_terminal()))
    }

    /// The most recent completed deployment, whose stable variant is what serves production.
    fn latest_completed(&self, service: &ServiceName) -> Result<Option<Deployment>, StoreError> {
        Ok(self
            .list_for_service(service)?
            .into_iter()
            .filter(|d| d.status() == DeploymentStatus::Completed)
            .max_by_key(|d| d.updated_at()))
    }
}

fn sort_by_creation(deployments: &mut [Deployment]) {
    deployments.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().as_str().cmp(b.id().as_str()))
    });
}

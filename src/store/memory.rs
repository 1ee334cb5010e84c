// ABOUTME: In-process state store backed by hash maps.
// ABOUTME: Used by tests and embedders that bring their own durability.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::deploy::{Deployment, LockInfo};
use crate::types::{DeploymentId, ServiceName};

use super::{StateStore, StoreError, sort_by_creation};

#[derive(Debug, Default)]
struct Inner {
    deployments: HashMap<DeploymentId, Deployment>,
    locks: HashMap<ServiceName, LockInfo>,
    aborts: HashSet<DeploymentId>,
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
    fail_releases: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail until switched off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `release_lock` fail until switched off again.
    pub fn set_fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn put(&self, deployment: &Deployment) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "writes disabled".to_string(),
            });
        }
        self.inner
            .lock()
            .deployments
            .insert(deployment.id().clone(), deployment.clone());
        Ok(())
    }

    fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError> {
        Ok(self.inner.lock().deployments.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Deployment>, StoreError> {
        let mut all: Vec<_> = self.inner.lock().deployments.values().cloned().collect();
        sort_by_creation(&mut all);
        Ok(all)
    }

    fn delete(&self, id: &DeploymentId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        inner.aborts.remove(id);
        Ok(inner.deployments.remove(id).is_some())
    }

    fn try_lock(&self, lock: &LockInfo) -> Result<Option<LockInfo>, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.locks.get(&lock.service) {
            return Ok(Some(existing.clone()));
        }
        inner.locks.insert(lock.service.clone(), lock.clone());
        Ok(None)
    }

    fn read_lock(&self, service: &ServiceName) -> Result<Option<LockInfo>, StoreError> {
        Ok(self.inner.lock().locks.get(service).cloned())
    }

    fn release_lock(
        &self,
        service: &ServiceName,
        holder: &DeploymentId,
    ) -> Result<bool, StoreError> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "lock release disabled".to_string(),
            });
        }
        let mut inner = self.inner.lock();
        match inner.locks.get(service) {
            Some(existing) if &existing.deployment_id == holder => {
                inner.locks.remove(service);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn break_lock(&self, service: &ServiceName) -> Result<(), StoreError> {
        self.inner.lock().locks.remove(service);
        Ok(())
    }

    fn request_abort(&self, id: &DeploymentId) -> Result<(), StoreError> {
        self.inner.lock().aborts.insert(id.clone());
        Ok(())
    }

    fn abort_requested(&self, id: &DeploymentId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().aborts.contains(id))
    }
}

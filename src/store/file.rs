// ABOUTME: JSON-per-record state store on the local filesystem.
// ABOUTME: Records are replaced via write-to-temp then rename; locks are hard-linked into place.

use snafu::ResultExt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::{Deployment, LockInfo};
use crate::types::{DeploymentId, ServiceName};

use super::error::{
    CreateDirSnafu, DecodeSnafu, EncodeSnafu, ReadSnafu, RemoveSnafu, WriteSnafu,
};
use super::{StateStore, StoreError, sort_by_creation};

const DEPLOYMENTS_DIR: &str = "deployments";
const LOCKS_DIR: &str = "locks";
const ABORTS_DIR: &str = "aborts";

/// An unreadable lock file younger than this is treated as held.
const CORRUPT_LOCK_GRACE: Duration = Duration::from_secs(60);

/// State store rooted at a directory:
///
/// ```text
/// <root>/deployments/<id>.json
/// <root>/locks/<service>.lock
/// <root>/aborts/<id>
/// ```
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for sub in [DEPLOYMENTS_DIR, LOCKS_DIR, ABORTS_DIR] {
            let path = root.join(sub);
            fs::create_dir_all(&path).context(CreateDirSnafu { path })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn deployment_path(&self, id: &DeploymentId) -> PathBuf {
        self.root.join(DEPLOYMENTS_DIR).join(format!("{id}.json"))
    }

    fn lock_path(&self, service: &ServiceName) -> PathBuf {
        self.root.join(LOCKS_DIR).join(format!("{service}.lock"))
    }

    fn abort_path(&self, id: &DeploymentId) -> PathBuf {
        self.root.join(ABORTS_DIR).join(id.as_str())
    }

    fn read_deployment(path: &Path) -> Result<Deployment, StoreError> {
        let bytes = fs::read(path).context(ReadSnafu { path })?;
        serde_json::from_slice(&bytes).context(DecodeSnafu { path })
    }

    /// Publish `lock` only if no lock file exists. The holder record is
    /// written to a private temp file first and hard-linked into place, so
    /// the lock path never holds a partial record.
    fn create_lock_file(&self, lock: &LockInfo) -> Result<bool, StoreError> {
        let path = self.lock_path(&lock.service);
        let body = serde_json::to_vec_pretty(lock).context(EncodeSnafu {
            id: lock.deployment_id.clone(),
        })?;
        let tmp = path.with_extension(format!("lock.{}.tmp", lock.deployment_id));
        {
            let mut file = fs::File::create(&tmp).context(WriteSnafu { path: &tmp })?;
            file.write_all(&body)
                .and_then(|()| file.sync_all())
                .context(WriteSnafu { path: &tmp })?;
        }
        let linked = match fs::hard_link(&tmp, &path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(StoreError::Write { path, source }),
        };
        remove_if_exists(&tmp)?;
        linked
    }

    /// Whether an unreadable lock file has been around long enough to break.
    fn lock_file_is_stale(path: &Path) -> Result<bool, StoreError> {
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        // A modification time in the future reads as fresh
        Ok(modified
            .elapsed()
            .is_ok_and(|age| age >= CORRUPT_LOCK_GRACE))
    }
}

/// Write `bytes` to `path` atomically.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp).context(WriteSnafu { path: &tmp })?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .context(WriteSnafu { path: &tmp })?;
    }
    fs::rename(&tmp, path).context(WriteSnafu { path })
}

fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl StateStore for FileStateStore {
    fn put(&self, deployment: &Deployment) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(deployment).context(EncodeSnafu {
            id: deployment.id().clone(),
        })?;
        write_atomic(&self.deployment_path(deployment.id()), &bytes)
    }

    fn get(&self, id: &DeploymentId) -> Result<Option<Deployment>, StoreError> {
        let path = self.deployment_path(id);
        match Self::read_deployment(&path) {
            Ok(d) => Ok(Some(d)),
            Err(StoreError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn list(&self) -> Result<Vec<Deployment>, StoreError> {
        let dir = self.root.join(DEPLOYMENTS_DIR);
        let entries = fs::read_dir(&dir).context(ReadSnafu { path: &dir })?;
        let mut deployments = Vec::new();
        for entry in entries {
            let path = entry.context(ReadSnafu { path: &dir })?.path();
            // Leftover temp files from an interrupted write are ignored
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            deployments.push(Self::read_deployment(&path)?);
        }
        sort_by_creation(&mut deployments);
        Ok(deployments)
    }

    fn delete(&self, id: &DeploymentId) -> Result<bool, StoreError> {
        remove_if_exists(&self.abort_path(id))?;
        remove_if_exists(&self.deployment_path(id))
    }

    fn try_lock(&self, lock: &LockInfo) -> Result<Option<LockInfo>, StoreError> {
        if self.create_lock_file(lock)? {
            return Ok(None);
        }
        match self.read_lock(&lock.service) {
            Ok(Some(existing)) => Ok(Some(existing)),
            // Released between our create and read
            Ok(None) => {
                if self.create_lock_file(lock)? {
                    Ok(None)
                } else {
                    Ok(self.read_lock(&lock.service)?)
                }
            }
            Err(StoreError::Decode { path, source }) => {
                if !Self::lock_file_is_stale(&path)? {
                    return Err(StoreError::Decode { path, source });
                }
                tracing::warn!(path = %path.display(), "lock file corrupted, breaking lock");
                remove_if_exists(&path)?;
                if self.create_lock_file(lock)? {
                    Ok(None)
                } else {
                    Ok(self.read_lock(&lock.service)?)
                }
            }
            Err(e) => Err(e),
        }
    }

    fn read_lock(&self, service: &ServiceName) -> Result<Option<LockInfo>, StoreError> {
        let path = self.lock_path(service);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .context(DecodeSnafu { path }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    fn release_lock(
        &self,
        service: &ServiceName,
        holder: &DeploymentId,
    ) -> Result<bool, StoreError> {
        match self.read_lock(service)? {
            Some(existing) if &existing.deployment_id == holder => {
                remove_if_exists(&self.lock_path(service))
            }
            _ => Ok(false),
        }
    }

    fn break_lock(&self, service: &ServiceName) -> Result<(), StoreError> {
        remove_if_exists(&self.lock_path(service)).map(|_| ())
    }

    fn request_abort(&self, id: &DeploymentId) -> Result<(), StoreError> {
        let path = self.abort_path(id);
        fs::write(&path, chrono::Utc::now().to_rfc3339()).context(WriteSnafu { path })
    }

    fn abort_requested(&self, id: &DeploymentId) -> Result<bool, StoreError> {
        Ok(self.abort_path(id).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RolloutConfig;
    use crate::deploy::Variant;
    use crate::types::{Color, ImageDigest};

    fn deployment(service: &str) -> Deployment {
        let stable = Variant::new(
            Color::Blue,
            ImageDigest::parse(&format!("sha256:{}", "a".repeat(64))).unwrap(),
            2,
        );
        Deployment::new(
            ServiceName::new(service).unwrap(),
            ImageDigest::parse(&format!("sha256:{}", "b".repeat(64))).unwrap(),
            stable,
            RolloutConfig::default(),
        )
    }

    #[test]
    fn put_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        let d = deployment("api");
        store.put(&d).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join(DEPLOYMENTS_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{}.json", d.id())]);
    }

    #[test]
    fn stray_temp_file_is_ignored_by_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        store.put(&deployment("api")).unwrap();
        fs::write(dir.path().join(DEPLOYMENTS_DIR).join("x.json.tmp"), b"{trunc").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn corrupted_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        let d = deployment("api");
        fs::write(store.lock_path(d.service()), b"not json").unwrap();

        let lock = LockInfo::new(&d);
        assert!(store.try_lock(&lock).unwrap().is_none());
        assert_eq!(
            store.read_lock(d.service()).unwrap().unwrap().deployment_id,
            *d.id()
        );
    }
}

use crate::clock::Clock;
use crate::codec::TokenId;
use crate::revocation::{RevocationRecord, RevocationStore};
use crate::{Error, Result};

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

type Records = BTreeMap<TokenId, u64>;

/// Revocation store persisted as a JSON array of [`RevocationRecord`]s.
///
/// Several handles, in one process or many, may share a file. Every change
/// re-reads the file under an exclusive lock on a sibling `.lock` file,
/// merges, and replaces the file atomically through a uniquely named temp
/// file. Lookups read the current file, so a `revoke` completed through any
/// handle is seen by every later `is_revoked`.
///
/// Meant for the operator CLI and single-host deployments; share a key-value
/// or relational store between nodes instead.
#[derive(Debug)]
pub struct FileRevocationStore {
    path: PathBuf,
    lock_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileRevocationStore {
    /// Open `path`, creating its directory. A missing file is an empty store;
    /// an unreadable one is [`Error::StoreUnavailable`].
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let mut lock_path = OsString::from(path.as_os_str());
        lock_path.push(".lock");
        let store = Self {
            path,
            lock_path: PathBuf::from(lock_path),
            clock,
        };

        let path = store.path.clone();
        let records = blocking(move || {
            std::fs::create_dir_all(parent_dir(&path)).map_err(|e| {
                Error::StoreUnavailable(format!("failed to create {}: {e}", path.display()))
            })?;
            read_records(&path)
        })
        .await?;

        tracing::debug!(path = %store.path.display(), records = records.len(), "opened revocation file");
        Ok(store)
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `change` on the current records with the file locked. The file is
    /// rewritten only when `change` reports that it modified something.
    async fn update<T, F>(&self, change: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Records) -> (bool, T) + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        blocking(move || {
            let _guard = lock_exclusive(&lock_path)?;
            let mut records = read_records(&path)?;
            let (changed, out) = change(&mut records);
            if changed {
                write_records(&path, &records)?;
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl RevocationStore for FileRevocationStore {
    async fn revoke(&self, token_id: &TokenId, expires_at: u64) -> Result<()> {
        let token_id = token_id.clone();
        self.update(move |records| {
            let current = records.get(&token_id).copied();
            let horizon = current.unwrap_or(0).max(expires_at);
            if current == Some(horizon) {
                return (false, ());
            }
            records.insert(token_id, horizon);
            (true, ())
        })
        .await
    }

    async fn is_revoked(&self, token_id: &TokenId) -> Result<bool> {
        let now = self.clock.now_secs();
        let path = self.path.clone();
        let records = blocking(move || read_records(&path)).await?;
        Ok(records.get(token_id).is_some_and(|horizon| now < *horizon))
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now_secs();
        self.update(move |records| {
            let before = records.len();
            records.retain(|_, horizon| now < *horizon);
            let removed = (before - records.len()) as u64;
            (removed > 0, removed)
        })
        .await
    }
}

async fn blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("revocation file task failed: {e}")))?
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Held for the life of the returned handle; closing it releases the lock.
fn lock_exclusive(lock_path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(|e| {
            Error::StoreUnavailable(format!("failed to open {}: {e}", lock_path.display()))
        })?;
    FileExt::lock_exclusive(&file).map_err(|e| {
        Error::StoreUnavailable(format!("failed to lock {}: {e}", lock_path.display()))
    })?;
    Ok(file)
}

fn read_records(path: &Path) -> Result<Records> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
        Ok(bytes) => {
            let list: Vec<RevocationRecord> = serde_json::from_slice(&bytes).map_err(|e| {
                Error::StoreUnavailable(format!("invalid JSON in {}: {e}", path.display()))
            })?;
            Ok(list
                .into_iter()
                .map(|r| (r.token_id, r.expires_at))
                .collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(Error::StoreUnavailable(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

fn write_records(path: &Path, records: &Records) -> Result<()> {
    let list: Vec<RevocationRecord> = records
        .iter()
        .map(|(token_id, expires_at)| RevocationRecord {
            token_id: token_id.clone(),
            expires_at: *expires_at,
        })
        .collect();
    let body = serde_json::to_vec_pretty(&list)
        .map_err(|e| Error::StoreUnavailable(format!("failed to encode records: {e}")))?;

    let dir = parent_dir(path);
    let write_err =
        |e: std::io::Error| Error::StoreUnavailable(format!("failed to write {}: {e}", path.display()));
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&body).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Namespace last selected for the context. Empty means unset.
    #[serde(default)]
    pub last_namespace: String,
    /// Explicit protect/unprotect override. `None` defers to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<bool>,
    /// While in the future, protection is suspended regardless of `protected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_until: Option<DateTime<Utc>>,
}

impl ContextRecord {
    /// Returns the lift expiry if it has not elapsed at `now`.
    pub fn active_lift(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.protected_until.filter(|until| *until > now)
    }

    fn has_expired_lift(&self, now: DateTime<Utc>) -> bool {
        self.protected_until.is_some_and(|until| until <= now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_context: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum StateError {
    #[error("context '{0}' not found")]
    NotFound(String),
    #[error("failed to acquire state lock {}: {reason}", path.display())]
    LockAcquisitionFailed { path: PathBuf, reason: String },
    #[error("state file io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse state file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Holds the advisory lock until dropped.
struct StateFileLock {
    file: File,
    path: PathBuf,
}

impl Drop for StateFileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release state file lock");
        }
    }
}

/// Per-context state shared by every kubert shell on the machine.
///
/// Mutations hold the in-process mutex, then an advisory `fs2` lock on `<state>.lock`,
/// re-read the file, apply the change and replace the file atomically. `get` and
/// `last_context` read the cached view without the file lock.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    cache: Mutex<State>,
}

impl StateStore {
    /// Open (creating if needed) the state file at `path`.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        Self::open_with_lock_timeout(path, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn open_with_lock_timeout(path: &Path, lock_timeout: Duration) -> Result<Self, StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        let store = Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
            lock_timeout,
            cache: Mutex::new(State::default()),
        };

        {
            let mut cache = store.cache_guard();
            let _lock = store.acquire_file_lock()?;
            if store.path.exists() {
                *cache = store.read_from_disk()?;
            } else {
                store.write_to_disk(&cache)?;
            }
        }
        tracing::debug!(path = %store.path.display(), "state store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn get(&self, name: &str) -> Option<ContextRecord> {
        self.cache_guard().contexts.get(name).cloned()
    }

    pub fn ensure_context(&self, name: &str) -> Result<(), StateError> {
        if self.get(name).is_some() {
            return Ok(());
        }
        self.mutate(|state| {
            state.contexts.entry(name.to_string()).or_default();
            Ok(())
        })
    }

    pub fn set_namespace(&self, name: &str, namespace: &str) -> Result<(), StateError> {
        self.update_record(name, |record| record.last_namespace = namespace.to_string())
    }

    /// Like [`StateStore::set_namespace`], but creates the record when it is missing.
    pub fn set_namespace_or_create(&self, name: &str, namespace: &str) -> Result<(), StateError> {
        self.mutate(|state| {
            state.contexts.entry(name.to_string()).or_default().last_namespace =
                namespace.to_string();
            Ok(())
        })
    }

    pub fn set_protection(&self, name: &str, protected: bool) -> Result<(), StateError> {
        self.update_record(name, |record| record.protected = Some(protected))
    }

    pub fn clear_protection(&self, name: &str) -> Result<(), StateError> {
        self.update_record(name, |record| record.protected = None)
    }

    pub fn lift_protection(&self, name: &str, until: DateTime<Utc>) -> Result<(), StateError> {
        self.update_record(name, |record| record.protected_until = Some(until))
    }

    pub fn clear_lift(&self, name: &str) -> Result<(), StateError> {
        self.update_record(name, |record| record.protected_until = None)
    }

    /// Clears the explicit override and any lift in a single write.
    pub fn reset_protection(&self, name: &str) -> Result<(), StateError> {
        self.update_record(name, |record| {
            record.protected = None;
            record.protected_until = None;
        })
    }

    /// Drops an elapsed lift. Returns true when the field was cleared.
    pub fn clear_expired_lift(&self, name: &str, now: DateTime<Utc>) -> Result<bool, StateError> {
        match self.get(name) {
            Some(record) if record.has_expired_lift(now) => {}
            _ => return Ok(false),
        }
        self.mutate(|state| {
            let Some(record) = state.contexts.get_mut(name) else {
                return Ok(false);
            };
            if !record.has_expired_lift(now) {
                return Ok(false);
            }
            record.protected_until = None;
            Ok(true)
        })
    }

    /// Reports only the stored override and lift; the configured default regex is
    /// applied by [`crate::protection::ProtectionPolicy`]. An elapsed lift is dropped
    /// from the file on the way.
    pub fn is_protected(&self, name: &str) -> Result<bool, StateError> {
        let now = Utc::now();
        let protected = self.is_protected_at(name, now)?;
        if let Err(err) = self.clear_expired_lift(name, now) {
            tracing::debug!(context = name, error = %err, "failed to clear expired lift");
        }
        Ok(protected)
    }

    /// Read-only evaluation at an arbitrary instant.
    pub fn is_protected_at(&self, name: &str, now: DateTime<Utc>) -> Result<bool, StateError> {
        let record = self
            .get(name)
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;
        if record.active_lift(now).is_some() {
            return Ok(false);
        }
        Ok(record.protected.unwrap_or(false))
    }

    pub fn set_last_context(&self, name: &str) -> Result<(), StateError> {
        self.mutate(|state| {
            state.last_context = Some(name.to_string());
            Ok(())
        })
    }

    pub fn last_context(&self) -> Option<String> {
        self.cache_guard().last_context.clone()
    }

    fn update_record(
        &self,
        name: &str,
        op: impl FnOnce(&mut ContextRecord),
    ) -> Result<(), StateError> {
        self.mutate(|state| {
            let record = state
                .contexts
                .get_mut(name)
                .ok_or_else(|| StateError::NotFound(name.to_string()))?;
            op(record);
            Ok(())
        })
    }

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut State) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let mut cache = self.cache_guard();
        let _lock = self.acquire_file_lock()?;
        let mut state = self.read_from_disk()?;
        let out = op(&mut state)?;
        self.write_to_disk(&state)?;
        *cache = state;
        Ok(out)
    }

    fn cache_guard(&self) -> MutexGuard<'_, State> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire_file_lock(&self) -> Result<StateFileLock, StateError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| StateError::LockAcquisitionFailed {
                path: self.lock_path.clone(),
                reason: e.to_string(),
            })?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    return Ok(StateFileLock {
                        file,
                        path: self.lock_path.clone(),
                    })
                }
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                    if start.elapsed() >= self.lock_timeout {
                        return Err(StateError::LockAcquisitionFailed {
                            path: self.lock_path.clone(),
                            reason: format!(
                                "still held by another kubert process after {}s",
                                self.lock_timeout.as_secs()
                            ),
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(StateError::LockAcquisitionFailed {
                        path: self.lock_path.clone(),
                        reason: err.to_string(),
                    })
                }
            }
        }
    }

    fn read_from_disk(&self) -> Result<State, StateError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(State::default()),
            Err(err) => return Err(StateError::io(&self.path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(State::default());
        }
        serde_json::from_str(&raw).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_to_disk(&self, state: &State) -> Result<(), StateError> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let raw = serde_json::to_vec_pretty(state)?;
        let mut temp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| StateError::io(&parent, e))?;
        temp.write_all(&raw)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| StateError::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| StateError::io(&self.path, e.error))?;
        Ok(())
    }
}

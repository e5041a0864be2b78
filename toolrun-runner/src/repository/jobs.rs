//! Job store
//!
//! One JSON document per job, named `<id>.json`, in a single directory.
//! Records are written to a temporary sibling and renamed into place, so a
//! crash mid-write never leaves a torn record under the real name. Writers
//! in every process serialise on an advisory `flock` of `.lock` in the same
//! directory.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::fs;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use toolrun_core::domain::job::{JOB_SCHEMA_VERSION, Job};
use tracing::{debug, info, warn};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";
const LOCK_FILE: &str = ".lock";

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the job store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("Job store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded
    #[error("Corrupt job record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record was written by a newer version of the runner
    #[error("Job record {path} has unsupported schema version {version}")]
    UnsupportedVersion { path: PathBuf, version: u64 },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable job record storage
pub trait JobStore: Send + Sync {
    /// Writes (or replaces) the record of `job`
    fn save(&self, job: &Job) -> Result<()>;

    /// Reads one record; `Ok(None)` if it does not exist
    fn load(&self, id: Uuid) -> Result<Option<Job>>;

    /// Reads, transforms and writes one record atomically
    ///
    /// `apply` receives the stored record and returns the record to write,
    /// or `None` to leave the store untouched. Returns what was written.
    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(Option<Job>) -> Option<Job>,
    ) -> Result<Option<Job>>;

    /// Removes one record; returns whether it existed
    fn delete(&self, id: Uuid) -> Result<bool>;

    /// Reads every readable record, skipping (and logging) bad ones
    fn list_all(&self) -> Result<Vec<Job>>;

    /// Deletes terminal records completed more than `older_than` ago
    ///
    /// Returns the number of deleted records.
    fn cleanup_terminal(&self, older_than: Duration) -> Result<usize>;
}

/// Exclusive advisory lock on a store directory
///
/// Held across a read-modify-write so another process (the CLI cancelling a
/// job, a runner claiming it) cannot interleave. Released on drop.
struct DirLock {
    file: fs::File,
}

impl DirLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        loop {
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if ret == 0 {
                return Ok(Self { file });
            }
            let error = std::io::Error::last_os_error();
            if error.kind() != std::io::ErrorKind::Interrupted {
                return Err(StoreError::io(path, error));
            }
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Directory-backed job store
///
/// A coarse in-process lock serialises every operation; mutations also take
/// the directory `flock`.
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileJobStore {
    /// Opens (creating if needed) the store at `dir`
    ///
    /// Temporary files left behind by an interrupted write are removed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let _dir_lock = DirLock::acquire(&dir.join(LOCK_FILE))?;
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if is_temp_file(&path) {
                debug!("Removing stale temporary record {}", path.display());
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }

        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn exclusive(&self) -> Result<(MutexGuard<'_, ()>, DirLock)> {
        let guard = self.lock.lock().unwrap();
        let dir_lock = DirLock::acquire(&self.dir.join(LOCK_FILE))?;
        Ok((guard, dir_lock))
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    fn read_record(path: &Path) -> Result<Job> {
        let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let value: JsonValue =
            serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;

        let version = value
            .get("schema_version")
            .and_then(JsonValue::as_u64)
            .unwrap_or(JOB_SCHEMA_VERSION as u64);
        if version > JOB_SCHEMA_VERSION as u64 {
            return Err(StoreError::UnsupportedVersion {
                path: path.to_path_buf(),
                version,
            });
        }

        serde_json::from_value(value).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_record(&self, job: &Job) -> Result<()> {
        let path = self.record_path(job.id);
        let tmp = self.dir.join(format!("{}.{}", job.id, TEMP_EXTENSION));
        let content = serde_json::to_vec_pretty(job).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))
    }

    fn record_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        Ok(entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION)
            })
            .collect())
    }
}

impl JobStore for FileJobStore {
    fn save(&self, job: &Job) -> Result<()> {
        let _locks = self.exclusive()?;
        self.write_record(job)
    }

    fn load(&self, id: Uuid) -> Result<Option<Job>> {
        let _guard = self.lock.lock().unwrap();

        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(Option<Job>) -> Option<Job>,
    ) -> Result<Option<Job>> {
        let _locks = self.exclusive()?;

        let path = self.record_path(id);
        let stored = if path.exists() {
            Some(Self::read_record(&path)?)
        } else {
            None
        };

        let Some(next) = apply(stored) else {
            return Ok(None);
        };
        self.write_record(&next)?;
        Ok(Some(next))
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let _locks = self.exclusive()?;

        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn list_all(&self) -> Result<Vec<Job>> {
        let _guard = self.lock.lock().unwrap();

        let mut jobs = Vec::new();
        for path in self.record_files()? {
            match Self::read_record(&path) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping job record: {}", e),
            }
        }
        Ok(jobs)
    }

    fn cleanup_terminal(&self, older_than: Duration) -> Result<usize> {
        let _locks = self.exclusive()?;

        let now = Utc::now();
        let mut removed = 0;
        for path in self.record_files()? {
            let Ok(job) = Self::read_record(&path) else {
                continue;
            };
            if !job.is_terminal() {
                continue;
            }

            let finished = job.completed_at.or_else(|| modified_at(&path));
            let Some(finished) = finished else {
                continue;
            };
            let age = (now - finished).to_std().unwrap_or(Duration::ZERO);
            if age <= older_than {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove expired record {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} expired job record(s)", removed);
        }
        Ok(removed)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(&format!(".{}", TEMP_EXTENSION)))
        .unwrap_or(false)
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified: SystemTime = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use toolrun_core::domain::job::{JobPriority, JobStatus};

    fn job() -> Job {
        Job::new("echo", HashMap::new(), JobPriority::Normal)
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        let mut job = job();
        store.save(&job).unwrap();
        job.start().unwrap();
        store.save(&job).unwrap();

        let loaded = store.load(job.id).unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Running);
        assert!(!dir.path().join(format!("{}.json.tmp", job.id)).exists());

        assert!(store.delete(job.id).unwrap());
        assert!(!store.delete(job.id).unwrap());
        assert!(store.load(job.id).unwrap().is_none());
    }

    #[test]
    fn test_update_applies_against_stored_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        let job = job();
        store.save(&job).unwrap();

        let written = store
            .update(job.id, &mut |stored| {
                let mut stored = stored?;
                stored.cancel().then_some(stored)
            })
            .unwrap();
        assert_eq!(written.unwrap().status, JobStatus::Cancelled);

        let second = store
            .update(job.id, &mut |stored| {
                let mut stored = stored?;
                stored.cancel().then_some(stored)
            })
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.load(job.id).unwrap().unwrap().status, JobStatus::Cancelled);

        let missing = store.update(Uuid::new_v4(), &mut |stored| stored).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_concurrent_stores_serialise_updates() {
        let dir = tempfile::tempdir().unwrap();
        let job = job();
        FileJobStore::open(dir.path()).unwrap().save(&job).unwrap();

        let stores: Vec<_> = (0..8)
            .map(|_| FileJobStore::open(dir.path()).unwrap())
            .collect();
        let handles: Vec<_> = stores
            .into_iter()
            .map(|store| {
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .update(job.id, &mut |stored| {
                                let mut stored = stored?;
                                stored.retry_count += 1;
                                Some(stored)
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = FileJobStore::open(dir.path()).unwrap();
        assert_eq!(store.load(job.id).unwrap().unwrap().retry_count, 80);
    }

    #[test]
    fn test_list_all_skips_corrupt_and_future_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        let good = job();
        store.save(&good).unwrap();

        std::fs::write(dir.path().join(format!("{}.json", Uuid::new_v4())), "{ truncated").unwrap();

        let mut future = serde_json::to_value(job()).unwrap();
        future["schema_version"] = serde_json::json!(JOB_SCHEMA_VERSION + 1);
        std::fs::write(
            dir.path().join(format!("{}.json", Uuid::new_v4())),
            future.to_string(),
        )
        .unwrap();

        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let jobs = store.list_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, good.id);
    }

    #[test]
    fn test_open_removes_stale_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{}.json.tmp", Uuid::new_v4()));
        std::fs::write(&stale, "{").unwrap();

        let _store = FileJobStore::open(dir.path()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_cleanup_terminal_removes_only_old_terminal_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        let mut old_done = job();
        assert!(old_done.cancel());
        old_done.completed_at = Some(Utc::now() - chrono::Duration::hours(48));
        store.save(&old_done).unwrap();

        let mut fresh_done = job();
        assert!(fresh_done.cancel());
        store.save(&fresh_done).unwrap();

        let pending = job();
        store.save(&pending).unwrap();

        let removed = store.cleanup_terminal(Duration::from_secs(24 * 60 * 60)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.load(old_done.id).unwrap().is_none());
        assert!(store.load(fresh_done.id).unwrap().is_some());
        assert!(store.load(pending.id).unwrap().is_some());
    }
}

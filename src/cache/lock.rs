//! File-based mutual exclusion for cache entries.
//!
//! One sentinel file per fingerprint, created with `create_new` so creation
//! doubles as acquisition. The file carries a JSON [`LockRecord`] naming its
//! owner; stale sentinels left by crashed processes are reclaimed once the
//! record is old enough and the owner pid is provably gone.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Age a lock record must reach before its owner is probed for liveness.
pub const STALE_LOCK_MS: i64 = 10_000;
const MAX_ACQUIRE_ATTEMPTS: u32 = 8;
const BASE_BACKOFF_MS: u64 = 50;

/// Owner identity written into the sentinel file. The nonce disambiguates
/// reused pids and guards the reclaim race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner_pid: u32,
    pub owner_nonce: String,
    pub timestamp: DateTime<Utc>,
}

/// Process-wide set of lock paths currently held, so the interrupt handler
/// can release everything before the process dies.
#[derive(Debug, Default, Clone)]
pub struct LockRegistry {
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, path: &Path) {
        if let Ok(mut held) = self.held.lock() {
            held.insert(path.to_path_buf());
        }
    }

    fn unregister(&self, path: &Path) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(path);
        }
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|held| held.len()).unwrap_or(0)
    }

    /// Best-effort synchronous release of every held lock. Only paths this
    /// process acquired are ever registered, so unconditional deletion is the
    /// owner-checked deletion.
    pub fn release_all(&self) {
        let paths: Vec<PathBuf> = match self.held.lock() {
            Ok(mut held) => held.drain().collect(),
            Err(_) => return,
        };
        for path in paths {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), %err, "failed to release lock on shutdown");
                }
            }
        }
    }
}

/// Exclusive lock over one cache entry. Acquisition is soft: exhausting the
/// attempt budget yields `false` and the caller degrades (miss / skipped
/// write) instead of erroring.
pub struct CacheLock {
    path: PathBuf,
    nonce: String,
    registry: LockRegistry,
    held: bool,
}

impl CacheLock {
    pub fn new(path: PathBuf, registry: LockRegistry) -> Self {
        Self {
            path,
            nonce: Uuid::new_v4().to_string(),
            registry,
            held: false,
        }
    }

    pub async fn acquire(&mut self) -> bool {
        for attempt in 0..MAX_ACQUIRE_ATTEMPTS {
            match self.try_create().await {
                Ok(true) => {
                    self.held = true;
                    self.registry.register(&self.path);
                    return true;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "lock sentinel write failed");
                }
            }
            if self.reclaim_if_stale().await {
                // sentinel is gone, race for it again without sleeping
                continue;
            }
            if attempt + 1 == MAX_ACQUIRE_ATTEMPTS {
                // no creation follows the last attempt, so don't sleep for it
                break;
            }
            let delay = BASE_BACKOFF_MS * (1u64 << attempt.min(6));
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        warn!(path = %self.path.display(), "gave up acquiring cache lock");
        false
    }

    async fn try_create(&self) -> std::io::Result<bool> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let record = LockRecord {
            owner_pid: std::process::id(),
            owner_nonce: self.nonce.clone(),
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_vec(&record)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&payload).await?;
                file.flush().await?;
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Remove the sentinel if its record is past the stale threshold and its
    /// owner process no longer exists. Returns true when the caller should
    /// retry creation immediately.
    async fn reclaim_if_stale(&self) -> bool {
        let metadata = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // sentinel vanished between attempts
            Err(_) => return true,
        };
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(_) => return true,
        };
        match serde_json::from_slice::<LockRecord>(&bytes) {
            Ok(record) => {
                let age_ms = (Utc::now() - record.timestamp).num_milliseconds();
                if age_ms < STALE_LOCK_MS {
                    return false;
                }
                if process_alive(record.owner_pid) {
                    return false;
                }
                // compare-and-delete: only remove the record we judged stale
                match read_record(&self.path).await {
                    Some(current) if current.owner_nonce == record.owner_nonce => {
                        debug!(
                            path = %self.path.display(),
                            pid = record.owner_pid,
                            "reclaiming stale lock from dead process"
                        );
                        fs::remove_file(&self.path).await.is_ok()
                    }
                    Some(_) => false,
                    None => true,
                }
            }
            Err(_) => {
                // unreadable sentinel: fall back to file mtime
                let stale = metadata
                    .modified()
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .map(|elapsed| elapsed.as_millis() as i64 >= STALE_LOCK_MS)
                    .unwrap_or(false);
                if stale {
                    warn!(path = %self.path.display(), "removing corrupt stale lock sentinel");
                    let _ = fs::remove_file(&self.path).await;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Delete the sentinel only while the on-disk record still names this
    /// lock instance.
    pub async fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        self.registry.unregister(&self.path);
        match read_record(&self.path).await {
            Some(record)
                if record.owner_pid == std::process::id() && record.owner_nonce == self.nonce =>
            {
                if let Err(err) = fs::remove_file(&self.path).await {
                    warn!(path = %self.path.display(), %err, "failed to remove lock sentinel");
                }
            }
            Some(_) => {
                warn!(path = %self.path.display(), "lock owner changed; leaving sentinel alone");
            }
            None => {}
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        // unwind path; normal control flow releases explicitly
        self.registry.unregister(&self.path);
        if let Ok(bytes) = std::fs::read(&self.path) {
            if let Ok(record) = serde_json::from_slice::<LockRecord>(&bytes) {
                if record.owner_pid == std::process::id() && record.owner_nonce == self.nonce {
                    let _ = std::fs::remove_file(&self.path);
                }
            }
        }
    }
}

async fn read_record(path: &Path) -> Option<LockRecord> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).ok(),
        Err(_) => None,
    }
}

/// Whether a process with `pid` currently exists on this machine.
pub fn process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> PathBuf {
        dir.path().join("entry.lock")
    }

    /// Pid of a process that has already been reaped.
    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .expect("spawn short-lived child");
        let pid = child.id();
        child.wait().expect("wait for child");
        pid
    }

    #[tokio::test]
    async fn acquire_then_release_removes_sentinel() {
        let dir = TempDir::new().expect("tempdir");
        let path = lock_path(&dir);
        let mut lock = CacheLock::new(path.clone(), LockRegistry::new());
        assert!(lock.acquire().await);
        assert!(path.exists());
        lock.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn held_lock_blocks_second_acquirer() {
        let dir = TempDir::new().expect("tempdir");
        let registry = LockRegistry::new();
        let mut first = CacheLock::new(lock_path(&dir), registry.clone());
        assert!(first.acquire().await);

        let mut second = CacheLock::new(lock_path(&dir), registry.clone());
        assert!(!second.acquire().await);

        first.release().await;
        assert!(second.acquire().await);
        second.release().await;
    }

    #[tokio::test]
    async fn exhausted_acquire_skips_the_final_backoff_sleep() {
        let dir = TempDir::new().expect("tempdir");
        let registry = LockRegistry::new();
        let mut holder = CacheLock::new(lock_path(&dir), registry.clone());
        assert!(holder.acquire().await);

        // backoff sleeps between the 8 attempts sum to ~6.35s; a sleep after
        // the final attempt would push this past 9.5s
        let started = std::time::Instant::now();
        let mut contender = CacheLock::new(lock_path(&dir), registry);
        assert!(!contender.acquire().await);
        assert!(
            started.elapsed() < Duration::from_millis(8_500),
            "gave up after {:?}",
            started.elapsed()
        );
        holder.release().await;
    }

    #[tokio::test]
    async fn stale_lock_from_dead_process_is_reclaimed() {
        let dir = TempDir::new().expect("tempdir");
        let path = lock_path(&dir);
        let record = LockRecord {
            owner_pid: dead_pid(),
            owner_nonce: Uuid::new_v4().to_string(),
            timestamp: Utc::now() - chrono::Duration::milliseconds(STALE_LOCK_MS * 2),
        };
        std::fs::write(&path, serde_json::to_vec(&record).expect("record")).expect("write");

        let mut lock = CacheLock::new(path.clone(), LockRegistry::new());
        assert!(lock.acquire().await);
        lock.release().await;
    }

    #[tokio::test]
    async fn fresh_lock_from_dead_process_is_not_reclaimed() {
        let dir = TempDir::new().expect("tempdir");
        let path = lock_path(&dir);
        let record = LockRecord {
            owner_pid: dead_pid(),
            owner_nonce: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&record).expect("record")).expect("write");

        let mut lock = CacheLock::new(path.clone(), LockRegistry::new());
        assert!(!lock.acquire().await);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn release_leaves_foreign_sentinel_in_place() {
        let dir = TempDir::new().expect("tempdir");
        let path = lock_path(&dir);
        let mut lock = CacheLock::new(path.clone(), LockRegistry::new());
        assert!(lock.acquire().await);

        // simulate another process stealing and rewriting the sentinel
        let foreign = LockRecord {
            owner_pid: std::process::id(),
            owner_nonce: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&foreign).expect("record")).expect("write");

        lock.release().await;
        assert!(path.exists(), "foreign sentinel must survive our release");
    }

    #[tokio::test]
    async fn registry_release_all_clears_held_locks() {
        let dir = TempDir::new().expect("tempdir");
        let registry = LockRegistry::new();
        let mut a = CacheLock::new(dir.path().join("a.lock"), registry.clone());
        let mut b = CacheLock::new(dir.path().join("b.lock"), registry.clone());
        assert!(a.acquire().await);
        assert!(b.acquire().await);
        assert_eq!(registry.held_count(), 2);

        registry.release_all();
        assert_eq!(registry.held_count(), 0);
        assert!(!dir.path().join("a.lock").exists());
        assert!(!dir.path().join("b.lock").exists());
        // suppress the Drop cleanup warnings on already-released locks
        a.held = false;
        b.held = false;
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}

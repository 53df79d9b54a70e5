//! Action-level cache keyed by test fingerprint.
//!
//! Layout: `<root>/<fingerprint>.json` for entries, `<root>/<fingerprint>.lock`
//! for the matching sentinel, `<root>/artifacts/<run_id>/` for screenshots.
//! Entries for different fingerprints never contend; operations on the same
//! fingerprint are serialized through [`CacheLock`].

pub mod lock;
pub mod retention;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs;
use tracing::{debug, warn};

use agent_core::{CacheData, CacheEntry, CacheStep, EntryMetadata, Fingerprint, TestSpec};

pub use lock::{CacheLock, LockRecord, LockRegistry};
pub use retention::RetentionPolicy;

pub struct ActionCache {
    root: PathBuf,
    registry: LockRegistry,
}

impl ActionCache {
    pub fn new(root: PathBuf, registry: LockRegistry) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create cache directory {}", root.display()))?;
        Ok(Self { root, registry })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(format!("{fingerprint}.json"))
    }

    pub fn lock_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(format!("{fingerprint}.lock"))
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Look up the entry for `fingerprint`. Missing, corrupt, and
    /// lock-unavailable all degrade to a miss; corrupt entries are deleted so
    /// they cannot wedge the cache.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let mut lock = CacheLock::new(self.lock_path(fingerprint), self.registry.clone());
        if !lock.acquire().await {
            warn!(%fingerprint, "cache lock unavailable, treating lookup as miss");
            return None;
        }
        let entry = self.read_entry(fingerprint).await;
        lock.release().await;
        entry
    }

    async fn read_entry(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let path = self.entry_path(fingerprint);
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => {
                    debug!(%fingerprint, steps = entry.data.steps.len(), "cache hit");
                    Some(entry)
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "corrupt cache entry, deleting");
                    let _ = fs::remove_file(&path).await;
                    None
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %path.display(), %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Persist one run's step record as the complete entry for `fingerprint`,
    /// overwriting whatever was there. Steps belong to the run that took
    /// them; the cache never buffers them across runs.
    pub async fn commit(
        &self,
        test: &TestSpec,
        fingerprint: &Fingerprint,
        steps: Vec<CacheStep>,
        metadata: EntryMetadata,
    ) -> Result<()> {
        let entry = CacheEntry {
            test: test.clone(),
            data: CacheData { steps },
            timestamp: Utc::now(),
            metadata: Some(metadata),
        };

        let mut lock = CacheLock::new(self.lock_path(fingerprint), self.registry.clone());
        if !lock.acquire().await {
            anyhow::bail!("cache lock unavailable for {fingerprint}, entry not written");
        }
        let result = self.write_entry(fingerprint, &entry).await;
        lock.release().await;
        result
    }

    async fn write_entry(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<()> {
        let path = self.entry_path(fingerprint);
        let payload = serde_json::to_vec_pretty(entry).context("failed to serialize cache entry")?;
        write_atomic(&path, &payload)
            .await
            .with_context(|| format!("failed to write cache entry {}", path.display()))?;
        debug!(%fingerprint, steps = entry.data.steps.len(), "cache entry committed");
        Ok(())
    }

    /// Remove the entry and its lock sentinel. Absence is not an error.
    pub async fn delete(&self, fingerprint: &Fingerprint) {
        for path in [self.entry_path(fingerprint), self.lock_path(fingerprint)] {
            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), %err, "failed to delete cache file");
                }
            }
        }
    }
}

/// Write via a temp file and rename so readers never observe a half-written
/// entry.
async fn write_atomic(path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await
}

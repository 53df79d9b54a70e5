//! Retention sweeps over cache entries and screenshot artifacts.
//!
//! Two independent policies: entries are kept for days (the replay record is
//! the valuable part), artifacts for hours (screenshots are only useful while
//! someone is debugging the run that took them).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, warn};

use super::ActionCache;

pub const DEFAULT_ENTRY_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;
pub const DEFAULT_ENTRY_MAX_COUNT: usize = 256;
pub const DEFAULT_ARTIFACT_MAX_AGE_MS: u64 = 5 * 60 * 60 * 1000;
pub const DEFAULT_ARTIFACTS_PER_RUN: usize = 10;

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub entry_max_age_ms: u64,
    pub entry_max_count: usize,
    pub artifact_max_age_ms: u64,
    pub artifacts_per_run: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            entry_max_age_ms: DEFAULT_ENTRY_MAX_AGE_MS,
            entry_max_count: DEFAULT_ENTRY_MAX_COUNT,
            artifact_max_age_ms: DEFAULT_ARTIFACT_MAX_AGE_MS,
            artifacts_per_run: DEFAULT_ARTIFACTS_PER_RUN,
        }
    }
}

impl RetentionPolicy {
    /// Zero-budget policy: the next sweep removes everything.
    pub fn force_purge() -> Self {
        Self {
            entry_max_age_ms: 0,
            entry_max_count: 0,
            artifact_max_age_ms: 0,
            artifacts_per_run: 0,
        }
    }
}

impl ActionCache {
    /// Delete entries older than `max_age_ms`, then everything beyond the
    /// `max_count` newest. Lock sentinels go with their entries.
    pub async fn sweep_entries(&self, max_age_ms: u64, max_count: usize) -> Result<usize> {
        let files = files_by_mtime_desc(self.root(), "json").await?;
        let now = SystemTime::now();
        let mut removed = 0usize;
        for (index, (path, modified)) in files.iter().enumerate() {
            let age_ms = now
                .duration_since(*modified)
                .unwrap_or_default()
                .as_millis() as u64;
            if age_ms <= max_age_ms && index < max_count {
                continue;
            }
            debug!(path = %path.display(), age_ms, "sweeping cache entry");
            if let Err(err) = fs::remove_file(path).await {
                warn!(path = %path.display(), %err, "failed to sweep cache entry");
                continue;
            }
            let sentinel = path.with_extension("lock");
            if let Err(err) = fs::remove_file(&sentinel).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %sentinel.display(), %err, "failed to sweep lock sentinel");
                }
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Per run directory, keep the `per_run` newest artifacts and drop
    /// anything older than `max_age_ms` regardless of count. Empty run
    /// directories are removed afterwards.
    pub async fn sweep_artifacts(&self, max_age_ms: u64, per_run: usize) -> Result<usize> {
        let dir = self.artifact_dir();
        let mut runs = match fs::read_dir(&dir).await {
            Ok(runs) => runs,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read artifact dir {}", dir.display()))
            }
        };

        let now = SystemTime::now();
        let mut removed = 0usize;
        while let Some(run) = runs.next_entry().await? {
            let run_path = run.path();
            if !run.file_type().await?.is_dir() {
                continue;
            }
            let mut kept = 0usize;
            for (index, (path, modified)) in
                all_files_by_mtime_desc(&run_path).await?.iter().enumerate()
            {
                let age_ms = now
                    .duration_since(*modified)
                    .unwrap_or_default()
                    .as_millis() as u64;
                if index < per_run && age_ms <= max_age_ms {
                    kept += 1;
                    continue;
                }
                if let Err(err) = fs::remove_file(path).await {
                    warn!(path = %path.display(), %err, "failed to sweep artifact");
                    kept += 1;
                    continue;
                }
                removed += 1;
            }
            if kept == 0 {
                let _ = fs::remove_dir(&run_path).await;
            }
        }
        Ok(removed)
    }

    /// Full retention pass as run by `agentest cache sweep`.
    pub async fn run_retention(&self, policy: &RetentionPolicy) -> Result<()> {
        let entries = self
            .sweep_entries(policy.entry_max_age_ms, policy.entry_max_count)
            .await?;
        let artifacts = self
            .sweep_artifacts(policy.artifact_max_age_ms, policy.artifacts_per_run)
            .await?;
        info!(entries, artifacts, "retention sweep complete");
        Ok(())
    }
}

async fn files_by_mtime_desc(dir: &Path, extension: &str) -> Result<Vec<(PathBuf, SystemTime)>> {
    collect_files(dir, Some(extension)).await
}

async fn all_files_by_mtime_desc(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    collect_files(dir, None).await
}

async fn collect_files(
    dir: &Path,
    extension: Option<&str>,
) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut out = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(wanted) = extension {
            if path.extension().and_then(|ext| ext.to_str()) != Some(wanted) {
                continue;
            }
        }
        let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        out.push((path, modified));
    }
    out.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(out)
}

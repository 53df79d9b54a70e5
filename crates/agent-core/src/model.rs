//! Persistent data model: test identity, verdicts, cache entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Version stamped into cache entry metadata. Bump when the on-disk entry
/// shape changes in a way old readers cannot tolerate.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Identity and definition of one test case. The fingerprint is derived from
/// every field, so renaming a test or editing its body invalidates its cache
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    pub file_path: String,
    pub body: String,
}

impl TestSpec {
    pub fn new(
        name: impl Into<String>,
        file_path: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            body: body.into(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self)
    }
}

/// Error for digests supplied from outside that are not fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint: expected 64 lowercase hex characters")]
pub struct InvalidFingerprint;

/// Lowercase hex SHA-256 over the full test definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn compute(spec: &TestSpec) -> Self {
        let mut hasher = Sha256::new();
        // NUL separators keep field boundaries unambiguous
        hasher.update(spec.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(spec.file_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(spec.body.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept an externally supplied digest, e.g. from the command line for
    /// cache maintenance. Fingerprints become file names under the cache
    /// root, so anything but a bare 64-char lowercase hex digest is rejected.
    pub fn from_hex(digest: impl Into<String>) -> Result<Self, InvalidFingerprint> {
        let digest = digest.into();
        let well_formed = digest.len() == 64
            && digest
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if well_formed {
            Ok(Self(digest))
        } else {
            Err(InvalidFingerprint)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final pass/fail outcome emitted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub reason: String,
}

impl Verdict {
    pub fn passed(reason: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Passed,
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Failed,
            reason: reason.into(),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == VerdictStatus::Passed
    }
}

/// Input/output token counts accumulated across provider round-trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
    }

    pub fn total(&self) -> u64 {
        self.input.saturating_add(self.output)
    }
}

/// The tool call a step executed, as issued by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAction {
    pub name: String,
    pub input: Value,
}

/// One recorded action of a run: what the model was thinking, what it did,
/// what came back, plus enrichment gathered while the page was still live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStep {
    pub reasoning: String,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Ordered step list of one successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheData {
    pub steps: Vec<CacheStep>,
}

/// Run summary persisted alongside the steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub version: u32,
    pub status: VerdictStatus,
    pub reason: String,
    pub token_usage: TokenUsage,
    pub run_id: String,
    pub from_cache: bool,
}

/// The whole on-disk cache entry for one fingerprint. Saved as a single JSON
/// document and always overwritten whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub test: TestSpec,
    pub data: CacheData,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
}

//! JSON snapshot persistence with integrity digest and atomic writes.
//!
//! A snapshot file is a small envelope: the serialized ledger body plus a
//! `sha-256=<hex>` digest of that body. On load we:
//! 1. Parse the envelope
//! 2. Recompute and compare the digest (mismatch = tampered or torn)
//! 3. Parse the body
//!
//! Writes go through temp file + rename so a crash never leaves a
//! half-written snapshot in place.

use crate::model::{AuditEntry, License, Reseller};
use crate::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

/// One fixed-window rate counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRecord {
    /// Counter key, e.g. `public-keygen:203.0.113.7`.
    pub bucket: String,
    /// Start of the window the count belongs to.
    pub window_start: DateTime<Utc>,
    /// Hits in that window.
    pub count: u64,
}

/// Full ledger contents as a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Format version.
    pub version: u32,
    /// Reseller collection.
    pub resellers: Vec<Reseller>,
    /// License collection.
    pub licenses: Vec<License>,
    /// Audit collection, append order.
    pub audit: Vec<AuditEntry>,
    /// Rate-limit counters.
    #[serde(default)]
    pub counters: Vec<CounterRecord>,
}

impl Snapshot {
    /// Build a snapshot at the current format version.
    pub fn new(
        resellers: Vec<Reseller>,
        licenses: Vec<License>,
        audit: Vec<AuditEntry>,
        counters: Vec<CounterRecord>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            resellers,
            licenses,
            audit,
            counters,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    digest: String,
    body: String,
}

/// Compute the `sha-256=<hex>` digest of a snapshot body.
pub fn body_digest(body: &str) -> String {
    let hash = Sha256::digest(body.as_bytes());
    format!("sha-256={}", hex::encode(hash))
}

/// A snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Use a snapshot file at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot stored under `dirs::data_dir()/<namespace>/ledger.json`.
    pub fn in_data_dir(namespace: &str) -> Result<Self, LedgerError> {
        if namespace.is_empty() {
            return Err(LedgerError::ConfigError(
                "snapshot namespace cannot be empty".to_string(),
            ));
        }
        let base_dir = dirs::data_dir().ok_or_else(|| {
            LedgerError::SnapshotIO("Could not find data directory".to_string())
        })?;
        Ok(Self::new(base_dir.join(namespace).join("ledger.json")))
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a snapshot atomically.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LedgerError::SnapshotIO(format!("Failed to create snapshot dir: {}", e))
            })?;
        }

        let body = serde_json::to_string(snapshot)
            .map_err(|e| LedgerError::SnapshotIO(format!("Failed to serialize snapshot: {}", e)))?;
        let envelope = Envelope {
            digest: body_digest(&body),
            body,
        };
        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|e| LedgerError::SnapshotIO(format!("Failed to serialize envelope: {}", e)))?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &json)
            .map_err(|e| LedgerError::SnapshotIO(format!("Failed to write temp file: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| LedgerError::SnapshotIO(format!("Failed to rename snapshot: {}", e)))?;

        tracing::debug!(
            path = %self.path.display(),
            resellers = snapshot.resellers.len(),
            licenses = snapshot.licenses.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load and verify a snapshot. `Ok(None)` if no file exists yet.
    pub fn load(&self) -> Result<Option<Snapshot>, LedgerError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.path)
            .map_err(|e| LedgerError::SnapshotIO(format!("Failed to read snapshot: {}", e)))?;
        let envelope: Envelope = serde_json::from_str(&json)
            .map_err(|e| LedgerError::SnapshotIO(format!("Failed to parse envelope: {}", e)))?;

        if body_digest(&envelope.body) != envelope.digest {
            tracing::error!(path = %self.path.display(), "snapshot digest mismatch");
            return Err(LedgerError::SnapshotTampered);
        }

        let snapshot: Snapshot = serde_json::from_str(&envelope.body)
            .map_err(|e| LedgerError::SnapshotIO(format!("Failed to parse snapshot: {}", e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LedgerError::SnapshotIO(format!(
                "Unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }
}

//! Append-only, hash-chained trace of engine steps.
//!
//! Every engine step appends a [`TraceEntry`] carrying a wall timestamp and
//! a duration measured on a monotonic clock. Entries are SHA-256 hash-chained
//! so post-hoc tampering of a persisted trace is detectable, and the whole
//! chain serializes as newline-delimited JSON for the persistence sink.
//!
//! ```text
//! TraceChain (negotiation neg_42)
//!   ├─ entry #0  formulation_ready    12ms   hash=ab31...
//!   ├─ entry #1  resonance_activated   3ms   hash=9c0e...  prev_hash=ab31...
//!   └─ entry #2  synthesis_complete  840ms   hash=44d7...  prev_hash=9c0e...
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// One recorded engine step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Zero-based position in the chain.
    pub index: u64,
    pub step_name: String,
    /// Wall-clock time the entry was appended.
    pub wall_timestamp: DateTime<Utc>,
    /// Duration of the step, measured on a monotonic clock by the caller.
    pub duration_ms: u64,
    pub input_summary: Option<String>,
    pub output_summary: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// SHA-256 hex of the previous entry (empty for the first).
    pub prev_hash: String,
    /// SHA-256 hex of this entry's canonical representation.
    pub hash: String,
}

impl TraceEntry {
    fn compute_hash(
        index: u64,
        step_name: &str,
        wall_timestamp: &DateTime<Utc>,
        duration_ms: u64,
        prev_hash: &str,
    ) -> String {
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            index,
            step_name,
            wall_timestamp.to_rfc3339(),
            duration_ms,
            prev_hash
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Append-only chain of [`TraceEntry`] records for one negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceChain {
    pub negotiation_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub entries: Vec<TraceEntry>,
}

impl TraceChain {
    pub fn new(negotiation_id: impl Into<String>) -> Self {
        Self {
            negotiation_id: negotiation_id.into(),
            started_at: Utc::now(),
            completed_at: None,
            entries: Vec::new(),
        }
    }

    /// Append a step record. Timestamps are taken here so they are
    /// non-decreasing in append order.
    pub fn append(
        &mut self,
        step_name: impl Into<String>,
        duration_ms: u64,
        input_summary: Option<String>,
        output_summary: Option<String>,
    ) -> &TraceEntry {
        self.append_with_metadata(step_name, duration_ms, input_summary, output_summary, HashMap::new())
    }

    pub fn append_with_metadata(
        &mut self,
        step_name: impl Into<String>,
        duration_ms: u64,
        input_summary: Option<String>,
        output_summary: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> &TraceEntry {
        let step_name = step_name.into();
        let index = self.entries.len() as u64;
        let wall_timestamp = Utc::now();
        let prev_hash = self
            .entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_default();
        let hash =
            TraceEntry::compute_hash(index, &step_name, &wall_timestamp, duration_ms, &prev_hash);
        self.entries.push(TraceEntry {
            index,
            step_name,
            wall_timestamp,
            duration_ms,
            input_summary,
            output_summary,
            metadata,
            prev_hash,
            hash,
        });
        self.entries.last().unwrap()
    }

    /// Mark the chain finished. Idempotent on the timestamp once set.
    pub fn complete(&mut self) {
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Walk the chain and recompute every hash.
    pub fn verify_integrity(&self) -> bool {
        let mut prev_hash = String::new();
        for entry in &self.entries {
            if entry.prev_hash != prev_hash {
                return false;
            }
            let expected = TraceEntry::compute_hash(
                entry.index,
                &entry.step_name,
                &entry.wall_timestamp,
                entry.duration_ms,
                &entry.prev_hash,
            );
            if entry.hash != expected {
                return false;
            }
            prev_hash = entry.hash.clone();
        }
        true
    }

    /// Append the chain's entries to a `.jsonl` file, one entry per line.
    pub fn persist_jsonl(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for entry in &self.entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}

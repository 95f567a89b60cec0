//! Compact on-disk archive of precomputed agent vectors.
//!
//! Agent vectors can be computed offline and shipped with a deployment so
//! production never loads an embedding model. The format is two parallel
//! arrays — `agent_ids[]` and `vectors[N][D]` float32 — laid out as:
//!
//! ```text
//! "AVEC"                       4-byte magic
//! header_len: u32 LE
//! header JSON: {"agent_ids": [...], "dim": D}
//! N * D little-endian f32 values
//! ```
//!
//! The loader validates that the id and vector counts match, that the byte
//! length is exactly `N * D * 4`, and leaves the dimension check against the
//! live encoder to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::accord::errors::AccordError;
use crate::accord::models::Vector;

const MAGIC: &[u8; 4] = b"AVEC";

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveHeader {
    agent_ids: Vec<String>,
    dim: usize,
}

/// A loaded archive: the shared dimension plus agent-id → vector map.
#[derive(Debug, Clone)]
pub struct VectorArchive {
    pub dim: usize,
    pub vectors: HashMap<String, Vector>,
}

/// Write an archive. All vectors must share one dimension.
pub fn save_archive(path: &Path, entries: &[(String, Vector)]) -> Result<(), AccordError> {
    let dim = match entries.first() {
        Some((_, v)) => v.len(),
        None => 0,
    };
    for (agent_id, vector) in entries {
        if vector.len() != dim {
            return Err(AccordError::config(format!(
                "vector archive: agent {} has dim {} but archive dim is {}",
                agent_id,
                vector.len(),
                dim
            )));
        }
    }

    let header = ArchiveHeader {
        agent_ids: entries.iter().map(|(id, _)| id.clone()).collect(),
        dim,
    };
    let header_bytes = serde_json::to_vec(&header)
        .map_err(|e| AccordError::config("vector archive: header encode failed").with_cause(Box::new(e)))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AccordError::config(format!("vector archive: cannot create {}", parent.display()))
                .with_cause(Box::new(e))
        })?;
    }
    let mut file = fs::File::create(path).map_err(|e| {
        AccordError::config(format!("vector archive: cannot create {}", path.display()))
            .with_cause(Box::new(e))
    })?;

    let write_err = |e: std::io::Error| {
        AccordError::config(format!("vector archive: write to {} failed", path.display()))
            .with_cause(Box::new(e))
    };
    file.write_all(MAGIC).map_err(write_err)?;
    file.write_all(&(header_bytes.len() as u32).to_le_bytes())
        .map_err(write_err)?;
    file.write_all(&header_bytes).map_err(write_err)?;
    for (_, vector) in entries {
        for value in vector {
            file.write_all(&value.to_le_bytes()).map_err(write_err)?;
        }
    }
    Ok(())
}

/// Load and validate an archive.
pub fn load_archive(path: &Path) -> Result<VectorArchive, AccordError> {
    let bytes = fs::read(path).map_err(|e| {
        AccordError::config(format!("vector archive: cannot read {}", path.display()))
            .with_cause(Box::new(e))
    })?;

    if bytes.len() < 8 || &bytes[0..4] != MAGIC {
        return Err(AccordError::config(format!(
            "vector archive: {} is not an AVEC file",
            path.display()
        )));
    }
    let header_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_end = 8 + header_len;
    if bytes.len() < header_end {
        return Err(AccordError::config("vector archive: truncated header"));
    }
    let header: ArchiveHeader = serde_json::from_slice(&bytes[8..header_end])
        .map_err(|e| AccordError::config("vector archive: malformed header").with_cause(Box::new(e)))?;

    let count = header.agent_ids.len();
    let body = &bytes[header_end..];
    let expected = count * header.dim * 4;
    if body.len() != expected {
        return Err(AccordError::config(format!(
            "vector archive: expected {} vector bytes for {} agents of dim {}, found {}",
            expected,
            count,
            header.dim,
            body.len()
        )));
    }

    let mut vectors = HashMap::with_capacity(count);
    for (i, agent_id) in header.agent_ids.iter().enumerate() {
        let start = i * header.dim * 4;
        let mut vector = Vec::with_capacity(header.dim);
        for j in 0..header.dim {
            let offset = start + j * 4;
            vector.push(f32::from_le_bytes([
                body[offset],
                body[offset + 1],
                body[offset + 2],
                body[offset + 3],
            ]));
        }
        vectors.insert(agent_id.clone(), vector);
    }

    log::info!(
        "loaded vector archive {} ({} agents, dim {})",
        path.display(),
        count,
        header.dim
    );
    Ok(VectorArchive {
        dim: header.dim,
        vectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.avec");

        let entries = vec![
            ("agent_alice".to_string(), vec![0.1f32, 0.2, 0.3]),
            ("agent_bob".to_string(), vec![-1.0f32, 0.5, 0.0]),
        ];
        save_archive(&path, &entries).unwrap();

        let archive = load_archive(&path).unwrap();
        assert_eq!(archive.dim, 3);
        assert_eq!(archive.vectors.len(), 2);
        assert_eq!(archive.vectors["agent_alice"], vec![0.1f32, 0.2, 0.3]);
        assert_eq!(archive.vectors["agent_bob"], vec![-1.0f32, 0.5, 0.0]);
    }

    #[test]
    fn test_mixed_dims_rejected_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.avec");
        let entries = vec![
            ("a".to_string(), vec![0.1f32, 0.2]),
            ("b".to_string(), vec![0.1f32]),
        ];
        assert!(save_archive(&path, &entries).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.avec");
        fs::write(&path, b"JUNKJUNKJUNK").unwrap();
        let err = load_archive(&path).unwrap_err();
        assert!(err.to_string().contains("not an AVEC file"));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.avec");
        let entries = vec![("a".to_string(), vec![0.1f32, 0.2, 0.3])];
        save_archive(&path, &entries).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, &bytes).unwrap();

        assert!(load_archive(&path).is_err());
    }
}

//! Content-hash rebuild gate.
//!
//! The index is rebuilt only when the SHA-256 digests of the tracked source
//! files (or the embedding model) differ from what the last successful
//! build recorded, or when any persisted artifact is missing. There is no
//! time-based expiry. The gate only reads; the digest record is written by
//! the index after a successful build.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{IndexConfig, SourceConfig};

/// Digests of every tracked source at build time. `None` marks a file that
/// did not exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigestRecord {
    pub model: String,
    pub dims: usize,
    pub files: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    MissingArtifact(PathBuf),
    UnreadableRecord(String),
    ModelChanged { stored: String, current: String },
    SourceSetChanged,
    FileChanged(String),
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::MissingArtifact(path) => write!(f, "missing artifact {}", path.display()),
            RebuildReason::UnreadableRecord(e) => write!(f, "unreadable digest record: {}", e),
            RebuildReason::ModelChanged { stored, current } => {
                write!(f, "embedding model changed ({} -> {})", stored, current)
            }
            RebuildReason::SourceSetChanged => f.write_str("tracked source set changed"),
            RebuildReason::FileChanged(name) => write!(f, "source '{}' changed", name),
        }
    }
}

/// SHA-256 of a file, or `None` if it does not exist. Other read errors are
/// treated like a missing file so that the gate errs toward rebuilding.
pub fn file_digest(path: &Path) -> Option<String> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Some(format!("{:x}", hasher.finalize()))
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "cannot hash source file");
            }
            None
        }
    }
}

pub struct RebuildGate<'a> {
    index: &'a IndexConfig,
    sources: &'a [SourceConfig],
    model: &'a str,
    dims: usize,
}

impl<'a> RebuildGate<'a> {
    pub fn new(index: &'a IndexConfig, sources: &'a [SourceConfig], model: &'a str, dims: usize) -> Self {
        Self {
            index,
            sources,
            model,
            dims,
        }
    }

    pub fn current(&self) -> FileDigestRecord {
        FileDigestRecord {
            model: self.model.to_string(),
            dims: self.dims,
            files: self
                .sources
                .iter()
                .map(|s| (s.name.clone(), file_digest(&s.path)))
                .collect(),
        }
    }

    pub fn needs_rebuild(&self) -> bool {
        match self.check() {
            Some(reason) => {
                tracing::info!(%reason, "index rebuild needed");
                true
            }
            None => false,
        }
    }

    /// Why a rebuild is needed, or `None` when the persisted index is
    /// current.
    pub fn check(&self) -> Option<RebuildReason> {
        for path in [
            self.index.index_path(),
            self.index.metadata_path(),
            self.index.digest_path(),
        ] {
            if !path.exists() {
                return Some(RebuildReason::MissingArtifact(path));
            }
        }

        let stored = match read_record(&self.index.digest_path()) {
            Ok(record) => record,
            Err(e) => return Some(RebuildReason::UnreadableRecord(format!("{:#}", e))),
        };
        compare(&stored, &self.current())
    }
}

/// Compare a stored record against the current state of the sources.
pub fn compare(stored: &FileDigestRecord, current: &FileDigestRecord) -> Option<RebuildReason> {
    if stored.model != current.model || stored.dims != current.dims {
        return Some(RebuildReason::ModelChanged {
            stored: format!("{}/{}", stored.model, stored.dims),
            current: format!("{}/{}", current.model, current.dims),
        });
    }
    if !stored.files.keys().eq(current.files.keys()) {
        return Some(RebuildReason::SourceSetChanged);
    }
    current
        .files
        .iter()
        .find(|(name, digest)| stored.files.get(*name) != Some(*digest))
        .map(|(name, _)| RebuildReason::FileChanged(name.clone()))
}

pub fn read_record(path: &Path) -> Result<FileDigestRecord> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read digest record {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid digest record {}", path.display()))
}

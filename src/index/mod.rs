//! Persisted nearest-neighbor index over knowledge chunks.
//!
//! # Artifacts
//!
//! | File | Content |
//! |------|---------|
//! | `vector_store.idx` | `JFIX` magic, u32 version, u32 dims, u64 count, then row-major little-endian `f32` |
//! | `metadata.json` | JSON array of [`Chunk`]s in row order |
//! | `file_hashes.json` | [`FileDigestRecord`] of the build |
//!
//! # Lifecycle
//!
//! [`VectorIndex::ensure_ready`] consults the [`RebuildGate`]: it rebuilds
//! when the gate says so, loads otherwise, and falls back to a rebuild if
//! loading fails. A failed build leaves the index empty and retrieval
//! degrades to "no context".
//!
//! Embedding happens before anything touches disk, so a failed build leaves
//! the previous artifacts and the in-memory snapshot untouched. Persisting
//! removes the digest record first and writes it last, so an interrupted
//! write always reads as "rebuild needed".
//!
//! Rebuilds are serialized by a mutex. Queries clone the current
//! `Arc<IndexSnapshot>` and never observe a partially built index.

pub mod gate;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::{Mutex, RwLock};

use crate::chunk;
use crate::config::{ChunkingConfig, Config, IndexConfig, SourceConfig};
use crate::embedding::{blob_to_vec, embed_query, squared_l2, vec_to_blob, Embedder};
use crate::models::{Chunk, RetrievalResult, SourceKind};

pub use gate::{FileDigestRecord, RebuildGate, RebuildReason};

const MAGIC: &[u8; 4] = b"JFIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Chunks plus their vectors, row-aligned. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    dims: usize,
    digests: Option<FileDigestRecord>,
}

impl IndexSnapshot {
    pub fn new(
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
        digests: Option<FileDigestRecord>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            bail!(
                "vector count {} does not match chunk count {}",
                vectors.len(),
                chunks.len()
            );
        }
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
            bail!("vector {} has dimension {}, expected {}", i, v.len(), dims);
        }
        if !vectors.is_empty() && dims == 0 {
            bail!("embedding vectors are empty");
        }
        Ok(Self {
            chunks,
            vectors,
            dims,
            digests,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn digests(&self) -> Option<&FileDigestRecord> {
        self.digests.as_ref()
    }

    pub fn count_by_kind(&self) -> BTreeMap<SourceKind, usize> {
        let mut counts = BTreeMap::new();
        for chunk in &self.chunks {
            *counts.entry(chunk.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Exact k-nearest search by squared L2. Returns `min(k, len)` results
    /// in ascending distance; ties keep row order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<RetrievalResult> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored
            .into_iter()
            .take(k)
            .map(|(i, distance)| {
                let chunk = &self.chunks[i];
                RetrievalResult {
                    chunk_id: chunk.id.clone(),
                    source: chunk.source.clone(),
                    kind: chunk.kind,
                    distance,
                    embedding_text: chunk.embedding_text.clone(),
                    body: chunk.body.clone(),
                }
            })
            .collect()
    }
}

/// Outcome of [`VectorIndex::ensure_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Loaded { chunks: usize },
    Built { chunks: usize },
    Unavailable { reason: String },
}

pub struct VectorIndex {
    config: IndexConfig,
    sources: Vec<SourceConfig>,
    chunking: ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    rebuild_lock: Mutex<()>,
}

impl VectorIndex {
    pub fn new(
        config: IndexConfig,
        sources: Vec<SourceConfig>,
        chunking: ChunkingConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            sources,
            chunking,
            embedder,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::empty())),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(
            config.index.clone(),
            config.sources.clone(),
            config.chunking.clone(),
            embedder,
        )
    }

    pub fn gate(&self) -> RebuildGate<'_> {
        RebuildGate::new(
            &self.config,
            &self.sources,
            self.embedder.model_name(),
            self.embedder.dims(),
        )
    }

    pub fn needs_rebuild(&self) -> bool {
        self.gate().needs_rebuild()
    }

    pub async fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Load if current, build otherwise. Never fails; a failed build leaves
    /// the index empty.
    pub async fn ensure_ready(&self) -> IndexState {
        let _guard = self.rebuild_lock.lock().await;

        if !self.gate().needs_rebuild() {
            match self.load_locked().await {
                Ok(chunks) => return IndexState::Loaded { chunks },
                Err(e) => tracing::warn!(error = %format!("{:#}", e), "index load failed; rebuilding"),
            }
        }

        match self.build_locked().await {
            Ok(snapshot) => IndexState::Built {
                chunks: snapshot.len(),
            },
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::error!(error = %reason, "index build failed; retrieval will return no context");
                IndexState::Unavailable { reason }
            }
        }
    }

    /// Chunk all sources, embed, swap in the new snapshot and persist it.
    pub async fn build(&self) -> Result<Arc<IndexSnapshot>> {
        let _guard = self.rebuild_lock.lock().await;
        self.build_locked().await
    }

    /// Load persisted artifacts. Returns `false` (and leaves the current
    /// snapshot alone) if any artifact is missing or inconsistent.
    pub async fn load(&self) -> bool {
        let _guard = self.rebuild_lock.lock().await;
        match self.load_locked().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "could not load index");
                false
            }
        }
    }

    /// Write the current snapshot to disk.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.rebuild_lock.lock().await;
        let snapshot = self.snapshot().await;
        let digests = snapshot
            .digests()
            .cloned()
            .context("snapshot has no digest record; build it first")?;
        self.write_artifacts(&snapshot, &digests)
    }

    /// Nearest chunks to `text`. `k` is clamped to the index size; an empty
    /// index returns nothing without calling the embedder.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.snapshot().await;
        if snapshot.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query = embed_query(self.embedder.as_ref(), text).await?;
        if query.len() != snapshot.dims() {
            bail!(
                "query embedding has dimension {}, index has {}",
                query.len(),
                snapshot.dims()
            );
        }
        Ok(snapshot.search(&query, k.min(snapshot.len())))
    }

    async fn build_locked(&self) -> Result<Arc<IndexSnapshot>> {
        // Digest before reading: an edit made mid-build must read as stale.
        let digests = self.gate().current();
        let chunks = chunk::chunk_sources(&self.sources, &self.chunking)?;
        if chunks.is_empty() {
            tracing::warn!("no chunks produced from sources; index will be empty");
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.embedding_text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed(&texts)
                .await
                .context("embedding index chunks")?
        };

        let expected = self.embedder.dims();
        if let Some(v) = vectors.first() {
            if expected != 0 && v.len() != expected {
                bail!(
                    "embedder returned dimension {}, configured {}",
                    v.len(),
                    expected
                );
            }
        }

        let snapshot = Arc::new(IndexSnapshot::new(chunks, vectors, Some(digests.clone()))?);
        self.write_artifacts(&snapshot, &digests)?;
        *self.snapshot.write().await = snapshot.clone();

        tracing::info!(
            chunks = snapshot.len(),
            dims = snapshot.dims(),
            by_kind = ?snapshot.count_by_kind(),
            "index built"
        );
        Ok(snapshot)
    }

    async fn load_locked(&self) -> Result<usize> {
        let digests = gate::read_record(&self.config.digest_path())?;
        let (dims, vectors) = read_index_file(&self.config.index_path())?;
        let metadata = std::fs::read_to_string(self.config.metadata_path())
            .with_context(|| format!("Failed to read {}", self.config.metadata_path().display()))?;
        let chunks: Vec<Chunk> =
            serde_json::from_str(&metadata).context("Invalid index metadata")?;

        let snapshot = IndexSnapshot::new(chunks, vectors, Some(digests))?;
        if !snapshot.is_empty() && snapshot.dims() != dims {
            bail!("index header dims {} disagree with data", dims);
        }
        let count = snapshot.len();
        *self.snapshot.write().await = Arc::new(snapshot);
        tracing::info!(chunks = count, "index loaded");
        Ok(count)
    }

    fn write_artifacts(&self, snapshot: &IndexSnapshot, digests: &FileDigestRecord) -> Result<()> {
        std::fs::create_dir_all(&self.config.data_dir).with_context(|| {
            format!("Failed to create {}", self.config.data_dir.display())
        })?;

        let digest_path = self.config.digest_path();
        match std::fs::remove_file(&digest_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to remove {}", digest_path.display()))
            }
        }

        let dims = snapshot.dims().max(digests.dims);
        write_atomic(&self.config.index_path(), &encode_index(dims, &snapshot.vectors))?;
        write_atomic(
            &self.config.metadata_path(),
            serde_json::to_string(&snapshot.chunks)?.as_bytes(),
        )?;
        write_atomic(&digest_path, serde_json::to_string_pretty(digests)?.as_bytes())?;
        Ok(())
    }
}

fn encode_index(dims: usize, vectors: &[Vec<f32>]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + vectors.len() * dims * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dims as u32).to_le_bytes());
    bytes.extend_from_slice(&(vectors.len() as u64).to_le_bytes());
    for v in vectors {
        bytes.extend_from_slice(&vec_to_blob(v));
    }
    bytes
}

fn decode_index(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        bail!("not a vector index file");
    }
    let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let version = u32_at(4);
    if version != FORMAT_VERSION {
        bail!("unsupported index format version {}", version);
    }
    let dims = u32_at(8) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = usize::try_from(u64::from_le_bytes(count_bytes))
        .map_err(|_| anyhow::anyhow!("index row count does not fit in memory"))?;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| anyhow::anyhow!("index header overflows: {} rows of {} dims", count, dims))?;
    if dims == 0 && count > 0 {
        bail!("index header declares {} rows of zero dims", count);
    }
    if body.len() != expected {
        bail!(
            "index body is {} bytes, expected {} rows of {} dims",
            body.len(),
            count,
            dims
        );
    }
    let vectors = if dims == 0 {
        vec![Vec::new(); count]
    } else {
        body.chunks_exact(dims * 4).map(blob_to_vec).collect()
    };
    Ok((dims, vectors))
}

fn read_index_file(path: &Path) -> Result<(usize, Vec<Vec<f32>>)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    decode_index(&bytes).with_context(|| format!("Corrupt index file {}", path.display()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!("{}.tmp", file_name));
    {
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// `jobfit index status`
pub async fn run_status(config: &Config) -> Result<()> {
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    let index = VectorIndex::from_config(config, embedder);

    println!("data_dir: {}", config.index.data_dir.display());
    println!("sources: {}", config.sources.len());
    match index.gate().check() {
        None => println!("status: current"),
        Some(reason) => println!("status: stale ({})", reason),
    }
    if index.load().await {
        let snapshot = index.snapshot().await;
        println!("chunks: {}", snapshot.len());
        println!("dims: {}", snapshot.dims());
        for (kind, count) in snapshot.count_by_kind() {
            println!("  {}: {}", kind, count);
        }
    }
    Ok(())
}

/// `jobfit index rebuild`
pub async fn run_rebuild(config: &Config) -> Result<()> {
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    let index = VectorIndex::from_config(config, embedder);
    let snapshot = index.build().await?;
    println!("chunks: {}", snapshot.len());
    for (kind, count) in snapshot.count_by_kind() {
        println!("  {}: {}", kind, count);
    }
    Ok(())
}

/// `jobfit index query`
pub async fn run_query(config: &Config, text: &str, k: usize) -> Result<()> {
    let embedder = crate::embedding::create_embedder(&config.embedding)?;
    let index = VectorIndex::from_config(config, embedder);
    if let IndexState::Unavailable { reason } = index.ensure_ready().await {
        bail!("Index unavailable: {}", reason);
    }
    let results = index.query(text, k).await?;
    if results.is_empty() {
        println!("No results.");
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({}) {}",
            rank + 1,
            result.distance,
            result.body.label(),
            result.kind,
            result.chunk_id
        );
    }
    Ok(())
}

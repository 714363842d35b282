//! TOML configuration.
//!
//! Every section except `[db]`, `[index]` and `[[sources]]` is optional and
//! falls back to the defaults below. [`load_config`] parses and validates the
//! file in one step so that commands never see a half-valid config.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::SourceKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub proposal: ProposalConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where the three index artifacts live.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
    #[serde(default = "default_digest_file")]
    pub digest_file: String,
}

fn default_index_file() -> String {
    "vector_store.idx".to_string()
}
fn default_metadata_file() -> String {
    "metadata.json".to_string()
}
fn default_digest_file() -> String {
    "file_hashes.json".to_string()
}

impl IndexConfig {
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(&self.metadata_file)
    }
    pub fn digest_path(&self) -> PathBuf {
        self.data_dir.join(&self.digest_file)
    }
}

/// A tracked knowledge source. `name` is the logical key used in the digest
/// record and as the chunk id prefix.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub path: PathBuf,
    pub kind: SourceKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Settings for the two completion workloads: batch scoring (low
/// temperature, large output) and proposal drafting.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_scoring_model")]
    pub scoring_model: String,
    #[serde(default = "default_proposal_model")]
    pub proposal_model: String,
    #[serde(default = "default_scoring_temperature")]
    pub scoring_temperature: f32,
    #[serde(default = "default_proposal_temperature")]
    pub proposal_temperature: f32,
    #[serde(default = "default_scoring_max_tokens")]
    pub scoring_max_tokens: u32,
    #[serde(default = "default_proposal_max_tokens")]
    pub proposal_max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            scoring_model: default_scoring_model(),
            proposal_model: default_proposal_model(),
            scoring_temperature: default_scoring_temperature(),
            proposal_temperature: default_proposal_temperature(),
            scoring_max_tokens: default_scoring_max_tokens(),
            proposal_max_tokens: default_proposal_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_max_retries(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_scoring_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_proposal_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_scoring_temperature() -> f32 {
    0.1
}
fn default_proposal_temperature() -> f32 {
    0.5
}
fn default_scoring_max_tokens() -> u32 {
    4096
}
fn default_proposal_max_tokens() -> u32 {
    2048
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_proposal_k")]
    pub proposal_k: usize,
    #[serde(default = "default_scoring_k")]
    pub scoring_k: usize,
    #[serde(default = "default_per_kind_limit")]
    pub per_kind_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            proposal_k: default_proposal_k(),
            scoring_k: default_scoring_k(),
            per_kind_limit: default_per_kind_limit(),
        }
    }
}

fn default_proposal_k() -> usize {
    8
}
fn default_scoring_k() -> usize {
    9
}
fn default_per_kind_limit() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProposalConfig {
    /// Markdown template. Missing file means the built-in default.
    #[serde(default)]
    pub template_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_agency_markers")]
    pub agency_markers: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            agency_markers: default_agency_markers(),
        }
    }
}

fn default_max_batch_size() -> usize {
    3
}
fn default_agency_markers() -> Vec<String> {
    [
        "no agencies",
        "no agency",
        "agencies do not apply",
        "agencies need not apply",
        "individual freelancers only",
        "freelancers only",
        "not for agencies",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CronConfig {
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_cron_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
            batch_size: default_cron_batch_size(),
            max_concurrency: default_max_concurrency(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

fn default_fetch_limit() -> usize {
    30
}
fn default_cron_batch_size() -> usize {
    3
}
fn default_max_concurrency() -> usize {
    4
}
fn default_batch_timeout_secs() -> u64 {
    300
}

/// The relevance switch. `enabled` forces the switch regardless of the
/// window; `None` means "follow the schedule".
#[derive(Debug, Deserialize, Clone)]
pub struct RelevanceConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default = "default_window_start")]
    pub window_start: String,
    #[serde(default = "default_window_end")]
    pub window_end: String,
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            window_start: default_window_start(),
            window_end: default_window_end(),
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

fn default_window_start() -> String {
    "18:30".to_string()
}
fn default_window_end() -> String {
    "03:30".to_string()
}
fn default_utc_offset_minutes() -> i32 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    let mut seen = std::collections::HashSet::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            anyhow::bail!("sources[].name must not be empty");
        }
        if !seen.insert(source.name.as_str()) {
            anyhow::bail!("duplicate source name: '{}'", source.name);
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.retrieval.proposal_k == 0 || config.retrieval.scoring_k == 0 {
        anyhow::bail!("retrieval.proposal_k and retrieval.scoring_k must be >= 1");
    }
    if config.scoring.max_batch_size == 0 {
        anyhow::bail!("scoring.max_batch_size must be >= 1");
    }
    if config.cron.batch_size == 0 || config.cron.batch_size > config.scoring.max_batch_size {
        anyhow::bail!(
            "cron.batch_size must be between 1 and scoring.max_batch_size ({})",
            config.scoring.max_batch_size
        );
    }
    if config.cron.max_concurrency == 0 {
        anyhow::bail!("cron.max_concurrency must be >= 1");
    }
    if config.cron.batch_timeout_secs == 0 {
        anyhow::bail!("cron.batch_timeout_secs must be >= 1");
    }

    crate::schedule::ScheduleWindow::from_config(&config.relevance)
        .context("invalid [relevance] window")?;

    Ok(())
}

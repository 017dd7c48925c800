//! TOML configuration.
//!
//! A single file drives every component: the credential database, the
//! persisted vector index, chunking, retrieval windows, the embedding and
//! language-model providers, token signing and the HTTP listener. Sections
//! other than `[db]`, `[storage]` and `[auth]` may be omitted entirely.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Location of the persisted vector index and document store.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub persist_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}
fn default_overlap() -> usize {
    16
}

/// Retrieval windows and the relevance cut-off used by chat discovery.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched in the discovery stage of chat.
    #[serde(default = "default_discovery_top_k")]
    pub discovery_top_k: usize,
    /// Discovery candidates must score strictly above this value.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Nodes handed to the language model in the context stage.
    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,
    /// Window used by `/v1/chunks`.
    #[serde(default = "default_chunks_limit")]
    pub chunks_limit: usize,
    /// Window used by `/v1/most_relevant_chunk`.
    #[serde(default = "default_most_relevant_window")]
    pub most_relevant_window: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            discovery_top_k: default_discovery_top_k(),
            score_threshold: default_score_threshold(),
            context_top_k: default_context_top_k(),
            chunks_limit: default_chunks_limit(),
            most_relevant_window: default_most_relevant_window(),
        }
    }
}

fn default_discovery_top_k() -> usize {
    6
}
fn default_score_threshold() -> f32 {
    0.45
}
fn default_context_top_k() -> usize {
    2
}
fn default_chunks_limit() -> usize {
    6
}
fn default_most_relevant_window() -> usize {
    10
}

/// Closed set of embedding backends, chosen once at startup.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Disabled,
    Mock,
    Openai,
    Ollama,
    Local,
}

impl std::fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EmbeddingKind::Disabled => "disabled",
            EmbeddingKind::Mock => "mock",
            EmbeddingKind::Openai => "openai",
            EmbeddingKind::Ollama => "ollama",
            EmbeddingKind::Local => "local",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_kind")]
    pub provider: EmbeddingKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (defaults to `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingKind::Disabled,
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_kind() -> EmbeddingKind {
    EmbeddingKind::Disabled
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != EmbeddingKind::Disabled
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    Mock,
    Openai,
    Azure,
    Ollama,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_mode")]
    pub mode: LlmMode,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides `https://api.openai.com/v1` for OpenAI-compatible endpoints.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Base URL for Ollama.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub azure_endpoint: Option<String>,
    #[serde(default)]
    pub deployment_name: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub max_new_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: default_llm_mode(),
            model: None,
            api_base: None,
            url: None,
            azure_endpoint: None,
            deployment_name: None,
            api_version: default_api_version(),
            max_new_tokens: None,
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_mode() -> LlmMode {
    LlmMode::Mock
}
fn default_api_version() -> String {
    "2023-05-15".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_timeout_secs() -> u64 {
    120
}

/// How a user's level is compared against a file's level.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// The user may see a file only when both levels are equal.
    #[default]
    Exact,
    /// The user may see any file at or below their own level.
    AtLeast,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HMAC secret used to sign bearer tokens.
    pub secret: String,
    #[serde(default = "default_token_expire_minutes")]
    pub token_expire_minutes: i64,
    #[serde(default)]
    pub access_policy: AccessPolicy,
}

fn default_token_expire_minutes() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Level assigned to a File the first time it is ingested.
    #[serde(default = "default_access_level")]
    pub default_access_level: i64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_access_level: default_access_level(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_access_level() -> i64 {
    1
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub default_system_prompt: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: default_system_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "You can only answer questions about the provided context. If you know the answer \
     but it is not based in the provided context, don't provide the answer, just state \
     the answer is not in the context provided."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_enabled: default_cors_enabled(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8001".to_string()
}
fn default_cors_enabled() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate retrieval
    let r = &config.retrieval;
    if r.discovery_top_k == 0
        || r.context_top_k == 0
        || r.chunks_limit == 0
        || r.most_relevant_window == 0
    {
        anyhow::bail!("retrieval windows must be >= 1");
    }
    if !(-1.0..=1.0).contains(&r.score_threshold) {
        anyhow::bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
    }

    // Validate embedding
    match config.embedding.provider {
        EmbeddingKind::Openai | EmbeddingKind::Ollama => {
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
        EmbeddingKind::Mock => {
            if config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0");
            }
        }
        EmbeddingKind::Disabled | EmbeddingKind::Local => {}
    }

    // Validate llm
    if config.llm.mode == LlmMode::Azure
        && (config.llm.azure_endpoint.is_none() || config.llm.deployment_name.is_none())
    {
        anyhow::bail!("llm.azure_endpoint and llm.deployment_name are required in azure mode");
    }

    if config.auth.secret.trim().is_empty() {
        anyhow::bail!("auth.secret must not be empty");
    }

    Ok(config)
}

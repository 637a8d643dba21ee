//! TOML configuration parsing and validation.
//!
//! Configuration is loaded once at startup with [`load_config`] and passed
//! by reference into the [`RetrievalClient`](crate::client::RetrievalClient).
//! Nothing is kept in global state, so several clusters can be driven from
//! one process.
//!
//! # Example
//!
//! ```toml
//! [[nodes]]
//! url = "https://node-1.example/api/v1/"
//! node_id = "did:nil:node1"
//! org = "did:nil:builder"
//!
//! [[nodes]]
//! url = "https://node-2.example/api/v1/"
//! node_id = "did:nil:node2"
//! org = "did:nil:builder"
//!
//! [auth]
//! token_ttl_secs = 3600
//!
//! [chunking]
//! chunk_size = 500
//! overlap = 100
//! ```
//!
//! Secrets are never read from the file itself: the signing key and the
//! sharing seed come from the environment variables named in `[auth]` and
//! `[sharing]`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use shardrag_core::chunk::{DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sharing: SharingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: Option<ChatConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    pub url: String,
    pub node_id: String,
    pub org: String,
}

/// Ids from an earlier provisioning run.
///
/// When both are present provisioning is skipped, which is how a restarted
/// client avoids minting a second schema on nodes that already hold one.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClusterConfig {
    pub schema_id: Option<Uuid>,
    pub diff_query_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key_env: default_secret_key_env(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

fn default_secret_key_env() -> String {
    "SHARDRAG_SECRET_KEY".to_string()
}
fn default_token_ttl() -> u64 {
    3600
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Read the hex signing key from the configured environment variable.
    pub fn secret_key(&self) -> Result<String> {
        std::env::var(&self.secret_key_env)
            .with_context(|| format!("{} environment variable not set", self.secret_key_env))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SharingConfig {
    #[serde(default = "default_seed_env")]
    pub seed_env: String,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            seed_env: default_seed_env(),
        }
    }
}

fn default_seed_env() -> String {
    "SHARDRAG_SHARING_SEED".to_string()
}

impl SharingConfig {
    pub fn seed(&self) -> Result<String> {
        std::env::var(&self.seed_env)
            .with_context(|| format!("{} environment variable not set", self.seed_env))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: default_embedding_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub url: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_chat_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_chat_key_env() -> String {
    "SHARDRAG_CHAT_API_KEY".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate cluster
    if config.nodes.is_empty() {
        bail!("at least one [[nodes]] entry is required");
    }
    for (i, node) in config.nodes.iter().enumerate() {
        if node.url.trim().is_empty() {
            bail!("nodes[{}].url must not be empty", i);
        }
        if node.node_id.trim().is_empty() {
            bail!("nodes[{}].node_id must not be empty", i);
        }
        if node.org.trim().is_empty() {
            bail!("nodes[{}].org must not be empty", i);
        }
    }
    if config.cluster.diff_query_id.is_some() && config.cluster.schema_id.is_none() {
        bail!("cluster.diff_query_id requires cluster.schema_id");
    }

    if config.auth.token_ttl_secs == 0 {
        bail!("auth.token_ttl_secs must be > 0");
    }
    if config.transport.timeout_secs == 0 {
        bail!("transport.timeout_secs must be > 0");
    }

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[[nodes]]
url = "http://localhost:8081/"
node_id = "n1"
org = "acme"

[[nodes]]
url = "http://localhost:8082"
node_id = "n2"
org = "acme"
"#;

    #[test]
    fn test_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.auth.token_ttl_secs, 3600);
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.chunking.overlap, 100);
        assert_eq!(cfg.transport.timeout(), Duration::from_secs(30));
        assert!(!cfg.embedding.is_enabled());
        assert!(cfg.chat.is_none());
        assert!(cfg.cluster.schema_id.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shardrag.toml");
        let content = format!(
            "{}\n[cluster]\nschema_id = \"{}\"\n\n[retrieval]\ntop_k = 3\n",
            MINIMAL,
            Uuid::nil()
        );
        fs::write(&path, content).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.cluster.schema_id, Some(Uuid::nil()));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/shardrag.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_rejects_empty_cluster() {
        let err = parse_config("nodes = []").unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_rejects_blank_org() {
        let err = parse_config("[[nodes]]\nurl = \"http://x\"\nnode_id = \"n1\"\norg = \" \"\n")
            .unwrap_err();
        assert!(err.to_string().contains("org"));
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        let content = format!("{}\n[chunking]\nchunk_size = 10\noverlap = 10\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_rejects_query_without_schema() {
        let content = format!("{}\n[cluster]\ndiff_query_id = \"{}\"\n", MINIMAL, Uuid::nil());
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let content = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let content = format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }
}

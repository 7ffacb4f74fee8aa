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
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Root directory for stored artifact binaries. Uploaded files land under
/// `uploaded_files/`, email attachment payloads under
/// `uploaded_files/attachments/`.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token ceiling per embedded chunk.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Token overlap between consecutive chunks of one oversized window.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Character threshold of the streaming rolling buffer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Characters retained between consecutive buffer windows.
    #[serde(default = "default_buffer_overlap")]
    pub buffer_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            buffer_size: default_buffer_size(),
            buffer_overlap: default_buffer_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    8000
}
fn default_overlap_tokens() -> usize {
    100
}
fn default_buffer_size() -> usize {
    7900
}
fn default_buffer_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
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
pub struct LimitsConfig {
    /// Hard ceiling on ingestible file size. Oversized artifacts fail without
    /// ever entering PROCESSING.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

fn default_max_file_size_mb() -> u64 {
    25
}

impl LimitsConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default `top_k` for the semantic search tools.
    #[serde(default = "default_top_k")]
    pub top_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Maximum conversation turns (user + assistant pairs) loaded as context.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    10
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    if config.chunking.buffer_size == 0 {
        anyhow::bail!("chunking.buffer_size must be > 0");
    }

    if config.limits.max_file_size_mb == 0 {
        anyhow::bail!("limits.max_file_size_mb must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("docket.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (tmp, path)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "/tmp/docket.sqlite"

[storage]
root = "/tmp/docket-store"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.max_tokens, 8000);
        assert_eq!(config.chunking.overlap_tokens, 100);
        assert_eq!(config.chunking.buffer_size, 7900);
        assert_eq!(config.chunking.buffer_overlap, 100);
        assert_eq!(config.limits.max_file_size_mb, 25);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.chat.max_turns, 10);
    }

    #[test]
    fn rejects_unknown_provider() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "/tmp/docket.sqlite"

[storage]
root = "/tmp/docket-store"

[embedding]
provider = "ollama"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_overlap_not_below_chunk_size() {
        let (_tmp, path) = write_config(
            r#"
[db]
path = "/tmp/docket.sqlite"

[storage]
root = "/tmp/docket-store"

[chunking]
max_tokens = 100
overlap_tokens = 100
"#,
        );
        assert!(load_config(&path).is_err());
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub gardener: GardenerConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    /// Minimum classifier confidence required to take the structured
    /// (control-aligned) chunking path.
    #[serde(default = "default_structured_threshold")]
    pub structured_confidence_threshold: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            structured_confidence_threshold: default_structured_threshold(),
        }
    }
}

fn default_structured_threshold() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// "openai" or "disabled". With "disabled" every LLM-assisted step
    /// degrades to its rule-based form.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            base_url: default_llm_base_url(),
            max_retries: default_llm_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// "local" (deterministic feature-hash vectors), "openai", or "disabled".
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_embedding_dims(),
            batch_size: default_embedding_batch_size(),
            max_retries: default_embedding_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_dims() -> usize {
    256
}
fn default_embedding_batch_size() -> usize {
    64
}
fn default_embedding_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on fallback-path confidence; strictly below the primary
    /// path's achievable ceiling.
    #[serde(default = "default_fallback_confidence_cap")]
    pub fallback_confidence_cap: f64,
    #[serde(default = "default_primary_confidence_ceiling")]
    pub primary_confidence_ceiling: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fallback_confidence_cap: default_fallback_confidence_cap(),
            primary_confidence_ceiling: default_primary_confidence_ceiling(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_fallback_confidence_cap() -> f64 {
    0.7
}
fn default_primary_confidence_ceiling() -> f64 {
    0.95
}

#[derive(Debug, Deserialize, Clone)]
pub struct GardenerConfig {
    #[serde(default = "default_gardener_interval_secs")]
    pub interval_secs: u64,
    /// Minimum text similarity for orphan repair to create an edge.
    #[serde(default = "default_orphan_similarity_threshold")]
    pub orphan_similarity_threshold: f64,
    /// Minimum LLM-reported confidence for a validated relationship to be
    /// written.
    #[serde(default = "default_link_confidence_threshold")]
    pub link_confidence_threshold: f64,
    /// Upper bound on candidate pairs sent to LLM validation per cycle.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for GardenerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_gardener_interval_secs(),
            orphan_similarity_threshold: default_orphan_similarity_threshold(),
            link_confidence_threshold: default_link_confidence_threshold(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

fn default_gardener_interval_secs() -> u64 {
    3600
}
fn default_orphan_similarity_threshold() -> f64 {
    0.8
}
fn default_link_confidence_threshold() -> f64 {
    0.7
}
fn default_candidate_limit() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct TasksConfig {
    /// Terminal tasks older than this are removed by cleanup.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    24 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if !(0.0..=1.0).contains(&config.classification.structured_confidence_threshold) {
        anyhow::bail!("classification.structured_confidence_threshold must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.gardener.orphan_similarity_threshold) {
        anyhow::bail!("gardener.orphan_similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.gardener.link_confidence_threshold) {
        anyhow::bail!("gardener.link_confidence_threshold must be in [0.0, 1.0]");
    }
    if config.gardener.interval_secs == 0 {
        anyhow::bail!("gardener.interval_secs must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.fallback_confidence_cap >= config.retrieval.primary_confidence_ceiling {
        anyhow::bail!(
            "retrieval.fallback_confidence_cap must be below retrieval.primary_confidence_ceiling"
        );
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown LLM provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified for the openai provider");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_applies_defaults() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[chunking]
max_tokens = 700

[server]
bind = "127.0.0.1:7040"
"#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chunking.overlap_tokens, 0);
        assert_eq!(config.classification.structured_confidence_threshold, 0.6);
        assert_eq!(config.gardener.orphan_similarity_threshold, 0.8);
        assert_eq!(config.gardener.link_confidence_threshold, 0.7);
        assert_eq!(config.llm.provider, "disabled");
        assert_eq!(config.embedding.provider, "local");
        assert!(config.retrieval.fallback_confidence_cap < config.retrieval.primary_confidence_ceiling);
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[chunking]
max_tokens = 0

[server]
bind = "127.0.0.1:7040"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[chunking]
max_tokens = 700

[gardener]
orphan_similarity_threshold = 1.5

[server]
bind = "127.0.0.1:7040"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_llm_without_model() {
        let f = write_config(
            r#"
[db]
path = "/tmp/atlas.sqlite"

[chunking]
max_tokens = 700

[llm]
provider = "openai"

[server]
bind = "127.0.0.1:7040"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}

use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docvec server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Vector index backend serving storage and search.
    pub vector_backend: VectorBackend,
    /// Base URL of the Qdrant instance (required for the `qdrant` backend).
    pub qdrant_url: Option<String>,
    /// Name of the collection that stores document chunks.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional override for the automatic chunk size selection.
    pub text_splitter_chunk_size: Option<usize>,
    /// Optional token overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: Option<usize>,
    /// Default number of results returned by search.
    pub search_default_limit: usize,
    /// Hard cap applied to caller-supplied `top_k`.
    pub search_max_limit: usize,
    /// Default inclusive score threshold for search results.
    pub search_default_score_threshold: f32,
    /// Over-fetch multiplier applied when the backend cannot filter by owner
    /// natively. Larger values keep post-filtered result sets closer to
    /// `top_k` in crowded multi-tenant collections at the cost of latency.
    pub search_overfetch_multiplier: usize,
    /// Upper bound on the over-fetched candidate count, limiting index load
    /// for large `top_k` requests.
    pub search_overfetch_ceiling: usize,
    /// Timeout in seconds applied to embedder and vector index calls.
    pub remote_timeout_secs: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported vector index backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Qdrant over its HTTP API.
    Qdrant,
    /// In-process store, useful for development and tests.
    Memory,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            vector_backend: load_env("VECTOR_BACKEND")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("VECTOR_BACKEND".to_string()))?,
            qdrant_url: load_env_optional("QDRANT_URL"),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "documents".to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?,
            search_default_limit: parse_optional("SEARCH_DEFAULT_LIMIT")?.unwrap_or(5),
            search_max_limit: parse_optional("SEARCH_MAX_LIMIT")?.unwrap_or(50),
            search_default_score_threshold: parse_optional("SEARCH_DEFAULT_SCORE_THRESHOLD")?
                .unwrap_or(0.25),
            search_overfetch_multiplier: parse_optional("SEARCH_OVERFETCH_MULTIPLIER")?
                .unwrap_or(4),
            search_overfetch_ceiling: parse_optional("SEARCH_OVERFETCH_CEILING")?.unwrap_or(256),
            remote_timeout_secs: parse_optional("REMOTE_TIMEOUT_SECS")?.unwrap_or(30),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for VectorBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        backend = ?config.vector_backend,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        dimension = config.embedding_dimension,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Install a deterministic configuration for unit tests, once per binary.
    pub(crate) fn ensure_test_config() {
        let _ = CONFIG.set(Config {
            vector_backend: VectorBackend::Memory,
            qdrant_url: Some("http://127.0.0.1:6333".into()),
            qdrant_collection_name: "documents-test".into(),
            qdrant_api_key: None,
            embedding_provider: EmbeddingProvider::OpenAI,
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimension: 16,
            text_splitter_chunk_size: Some(64),
            text_splitter_chunk_overlap: None,
            search_default_limit: 5,
            search_max_limit: 50,
            search_default_score_threshold: 0.0,
            search_overfetch_multiplier: 4,
            search_overfetch_ceiling: 256,
            remote_timeout_secs: 5,
            server_port: None,
        });
    }
}

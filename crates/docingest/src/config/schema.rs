use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: &str = "1.0";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            jobs: JobsConfig::default(),
            uploads: UploadsConfig::default(),
            chunking: ChunkingConfig::default(),
            database: DatabaseConfig::default(),
            vector_store: VectorStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Lifetime of a job record after its last write.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,
    #[serde(default = "default_soft_time_limit_seconds")]
    pub soft_time_limit_seconds: u64,
    #[serde(default = "default_hard_time_limit_seconds")]
    pub hard_time_limit_seconds: u64,
    /// Worker threads; 0 means one per CPU.
    #[serde(default)]
    pub workers: usize,
}

fn default_ttl_seconds() -> u64 {
    86_400
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_seconds() -> u64 {
    60
}

fn default_soft_time_limit_seconds() -> u64 {
    540
}

fn default_hard_time_limit_seconds() -> u64 {
    600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            max_retries: default_max_retries(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            soft_time_limit_seconds: default_soft_time_limit_seconds(),
            hard_time_limit_seconds: default_hard_time_limit_seconds(),
            workers: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    #[serde(default = "default_upload_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_upload_directory() -> PathBuf {
    std::env::temp_dir().join("docingest-uploads")
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["pdf".to_string(), "pptx".to_string()]
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            directory: default_upload_directory(),
            max_file_size_bytes: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    crate::chunker::DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    crate::chunker::DEFAULT_CHUNK_OVERLAP
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file for job records; `None` uses the per-user default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .or_else(crate::db::default_database_path)
            .unwrap_or_else(|| PathBuf::from("jobs.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Directory of the JSONL collections written by the CLI.
    #[serde(default = "default_vector_directory")]
    pub directory: PathBuf,
}

fn default_vector_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docingest")
        .join("vectors")
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            directory: default_vector_directory(),
        }
    }
}

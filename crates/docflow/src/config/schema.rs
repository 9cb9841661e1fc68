use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::default_database_path;
use crate::queue::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            queue: QueueConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `~/.docflow/data/docflow.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .or_else(default_database_path)
            .unwrap_or_else(|| PathBuf::from("docflow.db"))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Where uploads are staged before they are moved into `root`.
    /// Defaults to the system temp directory.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/upload")
}

fn default_bucket() -> String {
    "test-bucket".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
            temp_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Lowercase, without the leading dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_file_size() -> u64 {
    20 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    ["txt", "md", "csv", "json", "jsonl", "docx", "pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before retry `n` is `10 * (n + 1)` of these units.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_soft_time_limit_secs")]
    pub soft_time_limit_secs: u64,
    #[serde(default = "default_hard_time_limit_secs")]
    pub hard_time_limit_secs: u64,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_capacity() -> usize {
    64
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_soft_time_limit_secs() -> u64 {
    300
}

fn default_hard_time_limit_secs() -> u64 {
    600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            capacity: default_capacity(),
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit_ms(),
            soft_time_limit_secs: default_soft_time_limit_secs(),
            hard_time_limit_secs: default_hard_time_limit_secs(),
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            soft_time_limit: Some(Duration::from_secs(self.soft_time_limit_secs)),
            hard_time_limit: Some(Duration::from_secs(self.hard_time_limit_secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// `cl100k_base` or `characters`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

fn default_tokenizer() -> String {
    "cl100k_base".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            tokenizer: default_tokenizer(),
        }
    }
}

// Engine configuration.
//
// Loaded from `~/.canvas/config.toml` (or an explicit path), then
// overridden by `CANVAS_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONTEXT_BUDGET_BYTES: usize = 200 * 1024;
pub const DEFAULT_HANDLER_RESERVE_BYTES: usize = 2_000;
pub const DEFAULT_FOLLOWUP_RESERVE_BYTES: usize = 5_000;
pub const DEFAULT_SUMMARIZE_THRESHOLD_CHARS: usize = 300_000;

/// Root directory for canvas state: `~/.canvas/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".canvas"))
}

/// Path to the config file: `~/.canvas/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

// ── Engine config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP listen address for `canvasd`.
    pub listen_addr: String,
    /// Log filter directive (e.g. `info`, `canvas_daemon=debug`).
    pub log_filter: String,
    pub storage: StorageConfig,
    pub context: ContextConfig,
    pub pipeline: PipelineConfig,
    pub generation: GenerationConfig,
    pub sharing: SharingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".into(),
            log_filter: "info".into(),
            storage: StorageConfig::default(),
            context: ContextConfig::default(),
            pipeline: PipelineConfig::default(),
            generation: GenerationConfig::default(),
            sharing: SharingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `~/.canvas/config.toml` with env overrides. Missing or
    /// unreadable files fall back to defaults.
    pub fn load() -> Self {
        let file = global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default();
        file.with_env_overrides(|key| std::env::var(key))
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Apply environment overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `CANVAS_LISTEN_ADDR` | `listen_addr` |
    /// | `CANVAS_LOG_FILTER` | `log_filter` |
    /// | `CANVAS_STORAGE_BACKEND` | `storage.backend` |
    /// | `CANVAS_SQLITE_PATH` | `storage.sqlite_path` |
    /// | `CANVAS_DATABASE_URL` | `storage.database_url` |
    /// | `CANVAS_DB_MIN_CONNECTIONS` | `storage.min_connections` |
    /// | `CANVAS_DB_MAX_CONNECTIONS` | `storage.max_connections` |
    /// | `CANVAS_CONTEXT_BUDGET_BYTES` | `context.budget_bytes` |
    /// | `CANVAS_SUMMARIZE_THRESHOLD_CHARS` | `pipeline.summarize_threshold_chars` |
    /// | `CANVAS_REFLECTION_SCOPE_ID` | `pipeline.reflection_scope_id` |
    /// | `CANVAS_GENERATION_TIMEOUT_SECS` | `generation.timeout_secs` |
    pub fn with_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        if let Ok(value) = env("CANVAS_LISTEN_ADDR") {
            self.listen_addr = value;
        }
        if let Ok(value) = env("CANVAS_LOG_FILTER") {
            self.log_filter = value;
        }
        if let Some(backend) = env("CANVAS_STORAGE_BACKEND").ok().and_then(|v| v.parse().ok()) {
            self.storage.backend = backend;
        }
        if let Ok(value) = env("CANVAS_SQLITE_PATH") {
            self.storage.sqlite_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = env("CANVAS_DATABASE_URL") {
            self.storage.database_url = Some(value);
        }
        if let Some(value) = parse_env(&env, "CANVAS_DB_MIN_CONNECTIONS") {
            self.storage.min_connections = value;
        }
        if let Some(value) = parse_env(&env, "CANVAS_DB_MAX_CONNECTIONS") {
            self.storage.max_connections = value;
        }
        if let Some(value) = parse_env(&env, "CANVAS_CONTEXT_BUDGET_BYTES") {
            self.context.budget_bytes = value;
        }
        if let Some(value) = parse_env(&env, "CANVAS_SUMMARIZE_THRESHOLD_CHARS") {
            self.pipeline.summarize_threshold_chars = value;
        }
        if let Ok(value) = env("CANVAS_REFLECTION_SCOPE_ID") {
            self.pipeline.reflection_scope_id = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Some(value) = parse_env(&env, "CANVAS_GENERATION_TIMEOUT_SECS") {
            self.generation.timeout_secs = value;
        }
        self
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
{
    env(key).ok().and_then(|value| value.trim().parse().ok())
}

// ── Storage ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigError::Invalid(format!("unknown storage backend `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite file; defaults to `~/.canvas/canvas.db`.
    pub sqlite_path: Option<PathBuf>,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sqlite_path: None,
            database_url: None,
            min_connections: 2,
            max_connections: 20,
            acquire_timeout_secs: 10,
        }
    }
}

impl StorageConfig {
    pub fn resolved_sqlite_path(&self) -> Option<PathBuf> {
        self.sqlite_path.clone().or_else(|| global_dir().map(|d| d.join("canvas.db")))
    }
}

// ── Context budget ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum serialized size of a generation request.
    pub budget_bytes: usize,
    /// Headroom kept free for operation handler prompts.
    pub handler_reserve_bytes: usize,
    /// Headroom kept free for the follow-up prompt.
    pub followup_reserve_bytes: usize,
    /// Conversation size kept when a handler's context has to degrade.
    pub handler_degrade_floor_bytes: usize,
    /// Conversation size kept when the follow-up context has to degrade.
    pub followup_degrade_floor_bytes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_CONTEXT_BUDGET_BYTES,
            handler_reserve_bytes: DEFAULT_HANDLER_RESERVE_BYTES,
            followup_reserve_bytes: DEFAULT_FOLLOWUP_RESERVE_BYTES,
            handler_degrade_floor_bytes: DEFAULT_CONTEXT_BUDGET_BYTES / 2,
            followup_degrade_floor_bytes: 0,
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Transcript size above which the conversation is summarized.
    pub summarize_threshold_chars: usize,
    /// Title is (re)generated while the thread has at most this many messages.
    pub title_message_limit: usize,
    /// Scope under which reflections are read and written. Reflection is
    /// skipped when unset.
    pub reflection_scope_id: Option<String>,
    /// Ask the generation service whether a plain reply is wanted before
    /// generating or rewriting the artifact.
    pub intent_classification: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            summarize_threshold_chars: DEFAULT_SUMMARIZE_THRESHOLD_CHARS,
            title_message_limit: 4,
            reflection_scope_id: None,
            intent_classification: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry policy for the run-sharing integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SharingConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self { max_attempts: 5, retry_delay_ms: 5_000 }
    }
}

impl SharingConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(std::io::Error),
    #[error("config parse error: {0}")]
    Parse(toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

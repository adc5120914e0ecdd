//! Configuration file handling. The loaded [`Config`] is an explicit value
//! handed to whatever needs it; nothing here keeps process-wide state.

use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SCHEMA: &str = "main";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct DatabaseConfig {
    /// SQLite database file.
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Schema every table reference is qualified with.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// When false, names and projects are lower-cased before they are stored or looked up.
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            schema: default_schema(),
            case_sensitive: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SecurityConfig {
    /// Enables role based access control. When disabled every check is allowed.
    #[serde(default)]
    pub enable_auth: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LogConfig {
    /// Directory for rolling log files; console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_path() -> PathBuf {
    PathBuf::from("keel.sqlite")
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

/// Parses and validates a TOML document.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

/// Loads the file at `path`, then applies `KEEL_*` environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let mut cfg = parse_config(&content)?;
    cfg.apply_env();
    Ok(cfg)
}

/// Like [`load_config`] but falls back to defaults when no file is given.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut cfg = Config::default();
            cfg.apply_env();
            Ok(cfg)
        }
    }
}

impl Config {
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("KEEL_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(schema) = std::env::var("KEEL_DB_SCHEMA") {
            self.database.schema = schema;
        }
        if let Ok(raw) = std::env::var("KEEL_DB_CASE_SENSITIVE") {
            match parse_bool(&raw) {
                Some(flag) => self.database.case_sensitive = flag,
                None => tracing::warn!(value = %raw, "ignoring invalid KEEL_DB_CASE_SENSITIVE"),
            }
        }
        if let Some(ms) = std::env::var("KEEL_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.database.busy_timeout_ms = ms;
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

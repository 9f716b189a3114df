// Configuration loading and parsing (config/draft.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name inside `config/` (and `defaults/`).
pub const CONFIG_FILE: &str = "draft.toml";

/// Database file name used when no path is configured.
pub const DEFAULT_DB_FILE: &str = "draft-day.db";

pub const DEFAULT_LOG_FILTER: &str = "draft_day=info,warn";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub dynasty: DynastyConfig,
    pub db_path: String,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// draft.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire draft.toml file.
#[derive(Debug, Clone, Deserialize)]
struct DraftFile {
    dynasty: DynastyConfig,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    logging: LoggingConfig,
}

/// The dynasty and season the session drafts for.
#[derive(Debug, Clone, Deserialize)]
pub struct DynastyConfig {
    pub id: String,
    pub name: String,
    pub season: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Directory for the log file, relative to the working directory.
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: default_log_filter(),
            dir: default_log_dir(),
        }
    }
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/draft.toml` relative to the
/// given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let file: DraftFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let db_path = file.database.path.unwrap_or_else(default_db_path);

    let config = Config {
        dynasty: file.dynasty,
        db_path,
        logging: file.logging,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/draft.toml` from `defaults/draft.toml` when the user has
/// no config yet. Returns the path written, or `None` if a config already
/// existed. An existing config is never touched.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.is_file() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no {} and no {} to seed it from",
                target.display(),
                source.display()
            ),
        });
    }

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", dir.display()),
        })?;
    }
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {}: {e}", source.display()),
    })?;

    Ok(Some(target))
}

/// Load config relative to the current working directory, seeding it from
/// `defaults/` on first run.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// Database location when `[database] path` is not set: the platform data
/// directory, or the working directory if none can be determined.
pub fn default_db_path() -> String {
    directories::ProjectDirs::from("", "", "draft-day")
        .map(|dirs| dirs.data_dir().join(DEFAULT_DB_FILE))
        .and_then(|path| path.to_str().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_DB_FILE.to_string())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let text_fields: &[(&str, &str)] = &[
        ("dynasty.id", config.dynasty.id.as_str()),
        ("dynasty.name", config.dynasty.name.as_str()),
        ("database.path", config.db_path.as_str()),
        ("logging.filter", config.logging.filter.as_str()),
    ];
    for (name, val) in text_fields {
        if val.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    let season = config.dynasty.season;
    if !(1900..=9999).contains(&season) {
        return Err(ConfigError::ValidationError {
            field: "dynasty.season".into(),
            message: format!("must be between 1900 and 9999 inclusive, got {season}"),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

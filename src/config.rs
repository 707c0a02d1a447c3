//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MIMESHELL_CONFIG` (environment variable)
//! 2. `~/.config/mimeshell/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimeshell\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::parser::limit::MAX_HEADER_BYTES;
use crate::parser::{ParseMode, ParseOptions, MAX_DEPTH};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    /// Defaults for every parse started from the CLI.
    pub parser: ParserConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory (holds the log file).
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// "strict" or "tolerant".
    pub mode: ParseMode,
    /// Ceiling on the top-level header block, in bytes.
    pub max_header_bytes: u64,
    /// Multipart nesting levels to descend into.
    pub max_depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print JSON instead of tables.
    pub json: bool,
    /// Print sizes as "1.2 KiB" instead of byte counts.
    pub human_sizes: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            cache_dir: None,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            mode: ParseMode::Tolerant,
            max_header_bytes: MAX_HEADER_BYTES,
            max_depth: MAX_DEPTH,
        }
    }
}

impl ParserConfig {
    pub fn options(&self) -> ParseOptions {
        ParseOptions {
            mode: self.mode,
            max_header_bytes: self.max_header_bytes,
            max_depth: self.max_depth,
        }
    }
}

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load configuration from `path`, falling back to defaults on any error.
pub fn load_config_from(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
            return Config::default();
        }
    };
    match toml::from_str::<Config>(&contents) {
        Ok(cfg) => {
            tracing::info!(path = %path.display(), "Loaded config");
            cfg
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
            Config::default()
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MIMESHELL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mimeshell").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimeshell")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mimeshell.log")
}

//! Settings for the `emlshell` CLI, read from one TOML file.
//!
//! The file is `$EMLSHELL_CONFIG` when set, otherwise `emlshell/config.toml`
//! under the platform config directory. It has three sections:
//!
//! ```toml
//! [general]   # log_level, cache_dir (where emlshell.log goes)
//! [parser]    # max_depth: deepest multipart nesting that is split
//! [export]    # default_output_dir, decode_transfer_encoding, filename_max_len
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::export::attachment::ExportOptions;
use crate::parser::multipart;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Parser limits.
    pub parser: ParserConfig,
    /// Export defaults.
    pub export: ExportConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Parser limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Deepest multipart nesting that is split into children.
    pub max_depth: usize,
}

/// Export defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Default output directory.
    pub default_output_dir: Option<PathBuf>,
    /// Remove the transfer encoding from attachments before writing them.
    pub decode_transfer_encoding: bool,
    /// Maximum length of an exported filename, in characters.
    pub filename_max_len: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_depth: multipart::DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_output_dir: None,
            decode_transfer_encoding: true,
            filename_max_len: 150,
        }
    }
}

impl Config {
    /// Export options derived from this configuration.
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            decode: self.export.decode_transfer_encoding,
            filename_max_len: self.export.filename_max_len,
            max_depth: self.parser.max_depth,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration from [`config_file_path`].
///
/// Never fails: a missing file gives the defaults, and an unreadable or
/// malformed one gives the defaults with a warning.
pub fn load_config() -> Config {
    let Some(path) = config_file_path() else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    read_config(&path).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "Using default config");
        Config::default()
    })
}

/// Parse the TOML file at `path`. Sections left out take their defaults.
pub fn read_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Save configuration to [`config_file_path`].
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;
    write_config(config, &path)
}

/// Write `config` as TOML to `path`, creating parent directories.
pub fn write_config(config: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(config)?)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("EMLSHELL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("emlshell").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("emlshell")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("emlshell.log")
}

//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration follows a fixed priority order:
//! 1. Command-line argument (handled by each binary)
//! 2. Environment variable (`PROCTOR_ROOT_FOLDER`, then `PROCTOR_ROOT`)
//! 3. TOML config file (`~/.config/proctor/<module>.toml`, `/etc/proctor/<module>.toml`)
//! 4. OS-dependent compiled default
//!
//! A missing or unreadable TOML file is never fatal: the module logs a warning
//! and starts on compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Primary root folder environment variable
pub const ENV_ROOT_FOLDER: &str = "PROCTOR_ROOT_FOLDER";
/// Secondary (short form) root folder environment variable
pub const ENV_ROOT: &str = "PROCTOR_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "proctor.db";

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/proctor (or /var/lib/proctor for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("proctor"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/proctor"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("proctor"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/proctor"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("proctor"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\proctor"))
        } else {
            PathBuf::from("./proctor_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Detector collaborator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Inference endpoint receiving raw image bytes
    #[serde(default = "default_detector_url")]
    pub url: String,

    /// Per-attempt inference timeout
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per alert before the verification is marked inconclusive
    #[serde(default = "default_detector_max_attempts")]
    pub max_attempts: u32,

    /// Minimum detection confidence counted as a face (0.0-1.0)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: default_detector_url(),
            timeout_ms: default_detector_timeout_ms(),
            max_attempts: default_detector_max_attempts(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Session accounting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum time a session close waits for in-flight verifications
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Pending verifications allowed before intake reports saturation (0 = unbounded)
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Verifications allowed to run at the same time
    #[serde(default = "default_max_concurrent_verifications")]
    pub max_concurrent_verifications: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
            max_pending: default_max_pending(),
            max_concurrent_verifications: default_max_concurrent_verifications(),
        }
    }
}

/// Bootstrap configuration loaded from a module TOML file
///
/// These settings cannot change during runtime; the module must restart to
/// pick up edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_detector_url() -> String {
    "http://127.0.0.1:5800/detect".to_string()
}

fn default_detector_timeout_ms() -> u64 {
    5_000
}

fn default_detector_max_attempts() -> u32 {
    3
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

fn default_max_pending() -> usize {
    256
}

fn default_max_concurrent_verifications() -> usize {
    4
}

/// Candidate TOML locations for a module, most specific first
pub fn config_file_candidates(module_name: &str) -> Vec<PathBuf> {
    let file_name = format!("{}.toml", module_name);
    let mut candidates = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("proctor").join(&file_name));
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc/proctor").join(&file_name));
    }

    candidates
}

/// Parse a TOML config file
///
/// Returns `Error::Config` when the file exists but cannot be read or parsed.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// First existing TOML file for a module, if any
pub fn locate_config_file(module_name: &str) -> Option<PathBuf> {
    config_file_candidates(module_name)
        .into_iter()
        .find(|candidate| candidate.exists())
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolves the root folder for a module
pub struct RootFolderResolver {
    module_name: String,
    config: Option<TomlConfig>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            config: None,
        }
    }

    /// Use an already loaded TOML config instead of searching for one
    pub fn with_config(mut self, config: TomlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Resolve using environment → TOML → compiled default
    pub fn resolve(&self) -> PathBuf {
        if let Ok(path) = std::env::var(ENV_ROOT_FOLDER) {
            debug!("Root folder from {}", ENV_ROOT_FOLDER);
            return PathBuf::from(path);
        }

        if let Ok(path) = std::env::var(ENV_ROOT) {
            debug!("Root folder from {}", ENV_ROOT);
            return PathBuf::from(path);
        }

        if let Some(config) = &self.config {
            if let Some(root) = &config.root_folder {
                debug!("Root folder from loaded config");
                return root.clone();
            }
            return CompiledDefaults::for_current_platform().root_folder;
        }

        for candidate in config_file_candidates(&self.module_name) {
            if !candidate.exists() {
                continue;
            }
            match load_toml_config(&candidate) {
                Ok(TomlConfig {
                    root_folder: Some(root),
                    ..
                }) => {
                    debug!("Root folder from {}", candidate.display());
                    return root;
                }
                Ok(_) => {}
                Err(e) => warn!("Config file ignored during root resolution: {}", e),
            }
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout and names the files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            info!("Creating root folder: {}", self.root_folder.display());
        }
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Image storage (incoming + verified evidence)
    pub fn images_dir(&self) -> PathBuf {
        self.root_folder.join("images")
    }

    /// Rendered session reports
    pub fn reports_dir(&self) -> PathBuf {
        self.root_folder.join("reports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.detector.max_attempts, 3);
        assert_eq!(config.session.max_pending, 256);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [detector]
            confidence_threshold = 0.8
            "#,
        )
        .unwrap();

        assert_eq!(config.detector.confidence_threshold, 0.8);
        assert_eq!(config.detector.timeout_ms, 5_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_candidates_are_module_specific() {
        let candidates = config_file_candidates("proctor-vs");
        assert!(candidates
            .iter()
            .all(|p| p.file_name().unwrap() == "proctor-vs.toml"));
    }
}

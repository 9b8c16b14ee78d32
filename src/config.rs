//! Configuration management for the scan router.
//!
//! Loads configuration from TOML files and provides runtime defaults.
//! [`SettingsFile`] pairs a [`Config`] with its path and writes it back
//! after every mutation.

use crate::backend::BackendIdentifier;
use crate::types::ScanMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub trigger: TriggerConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Per-backend endpoint and model overrides, keyed by backend name
    #[serde(default)]
    pub backends: HashMap<String, BackendOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether scanning is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Scan automatically on pointer clicks
    #[serde(default)]
    pub auto_scan: bool,

    /// Clicks closer together than this are collapsed into one
    #[serde(default = "default_refractory")]
    pub refractory_ms: u64,

    /// Wait after a click before capturing
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            auto_scan: false,
            refractory_ms: 1000,
            settle_delay_ms: 500,
        }
    }
}

impl TriggerConfig {
    pub fn refractory(&self) -> Duration {
        Duration::from_millis(self.refractory_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Default scan mode
    #[serde(default = "default_mode")]
    pub mode: ScanMode,

    /// Ask which window to scan instead of using the first one
    #[serde(default)]
    pub target_window: bool,

    /// Backend used in describe mode
    #[serde(default = "default_backend")]
    pub backend: BackendIdentifier,

    /// User prompt sent with the image
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// System prompt sent with the image
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Write every delivered result into this directory
    #[serde(default)]
    pub auto_save_dir: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            target_window: false,
            backend: default_backend(),
            prompt: default_prompt(),
            system_prompt: default_system_prompt(),
            auto_save_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Path to the vision helper binary
    #[serde(default)]
    pub helper_path: Option<PathBuf>,

    /// Minimum recall a label needs at `min_precision`
    #[serde(default = "default_min_recall")]
    pub min_recall: f32,

    /// Precision operating point for the recall check
    #[serde(default = "default_min_precision")]
    pub min_precision: f32,

    /// Number of labels surfaced to the user
    #[serde(default = "default_max_labels")]
    pub max_labels: usize,

    /// Label text that makes classification also run OCR
    #[serde(default = "default_document_keyword")]
    pub document_keyword: String,

    /// Let the recognizer correct words against its language model
    #[serde(default = "default_true")]
    pub language_correction: bool,

    /// Timeout for one helper invocation
    #[serde(default = "default_helper_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            helper_path: None,
            min_recall: 0.1,
            min_precision: 0.9,
            max_labels: 5,
            document_keyword: default_document_keyword(),
            language_correction: true,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Request timeout for description backends
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_seconds: u64,

    /// Upper bound on the length of a description
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            max_tokens: 1000,
        }
    }
}

/// Overrides for one backend's table row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOverride {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub model: Option<String>,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refractory() -> u64 {
    1000
}

fn default_settle_delay() -> u64 {
    500
}

fn default_mode() -> ScanMode {
    ScanMode::Ocr
}

fn default_backend() -> BackendIdentifier {
    BackendIdentifier::Gpt
}

fn default_prompt() -> String {
    "Describe this image in detail.".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant for a blind user. Describe screenshots concisely and accurately, reading out any important text.".to_string()
}

fn default_min_recall() -> f32 {
    0.1
}

fn default_min_precision() -> f32 {
    0.9
}

fn default_max_labels() -> usize {
    5
}

fn default_document_keyword() -> String {
    "document".to_string()
}

fn default_helper_timeout() -> u64 {
    30
}

fn default_dispatch_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    1000
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Directory holding the config file and the secret store
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scan-router")
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Endpoint for a backend, honoring overrides
    pub fn endpoint_for(&self, backend: BackendIdentifier) -> String {
        self.backends
            .get(backend.as_str())
            .and_then(|o| o.endpoint.clone())
            .unwrap_or_else(|| backend.config().endpoint_url.to_string())
    }

    /// Model name for a backend, honoring overrides
    pub fn model_for(&self, backend: BackendIdentifier) -> String {
        self.backends
            .get(backend.as_str())
            .and_then(|o| o.model.clone())
            .unwrap_or_else(|| backend.config().model_name.to_string())
    }
}

/// A config file that is saved on every change
pub struct SettingsFile {
    path: PathBuf,
    config: Config,
}

impl SettingsFile {
    /// Load settings from the default path
    pub fn open_default() -> Self {
        Self::open(Config::default_config_path())
    }

    /// Load settings from `path`, falling back to defaults
    pub fn open(path: PathBuf) -> Self {
        let config = Config::load_from_path(path.clone());
        Self { path, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a change and persist it immediately
    pub fn update<F>(&mut self, change: F) -> std::io::Result<()>
    where
        F: FnOnce(&mut Config),
    {
        change(&mut self.config);
        self.config.save_to_path(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.enabled);
        assert_eq!(config.trigger.refractory(), Duration::from_secs(1));
        assert_eq!(config.scan.mode, ScanMode::Ocr);
        assert_eq!(config.recognition.max_labels, 5);
        assert_eq!(config.recognition.document_keyword, "document");
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[trigger]
auto_scan = true
refractory_ms = 1500

[scan]
mode = "describe"
backend = "ollama"

[backends.ollama]
endpoint = "http://10.0.0.2:11434/v1/chat/completions"
model = "llava:13b"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!(config.trigger.auto_scan);
        assert_eq!(config.trigger.refractory_ms, 1500);
        assert_eq!(config.trigger.settle_delay_ms, 500);
        assert_eq!(config.scan.mode, ScanMode::Describe);
        assert_eq!(config.scan.backend, BackendIdentifier::Ollama);
        assert_eq!(
            config.endpoint_for(BackendIdentifier::Ollama),
            "http://10.0.0.2:11434/v1/chat/completions"
        );
        assert_eq!(config.model_for(BackendIdentifier::Ollama), "llava:13b");
        assert_eq!(
            config.model_for(BackendIdentifier::Gpt),
            BackendIdentifier::Gpt.config().model_name
        );
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [not toml").unwrap();
        let config = Config::load_from_path(path);
        assert_eq!(config.scan.mode, ScanMode::Ocr);
    }

    #[test]
    fn test_settings_file_saves_on_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut settings = SettingsFile::open(path.clone());
        settings
            .update(|c| {
                c.scan.mode = ScanMode::Classify;
                c.scan.target_window = true;
            })
            .unwrap();

        let reloaded = Config::load_from_path(path);
        assert_eq!(reloaded.scan.mode, ScanMode::Classify);
        assert!(reloaded.scan.target_window);
    }
}

//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error_handling::{normalize_retry_budget, DownloadError, DEFAULT_CONCURRENCY};
use super::fetcher::{TransportConfig, DEFAULT_CHUNK_SIZE};
use super::ledger::{validate_key, LedgerPaths};

/// Upper bound accepted for the segment concurrency limit
pub const MAX_CONCURRENCY: usize = 64;

/// Upper bound accepted for the retry budget
pub const MAX_RETRY_ATTEMPTS: usize = 20;

/// Main application configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub download: DownloadConfig,
    pub paths: PathsConfig,
    pub ledger: LedgerConfig,
    pub mode: BackendMode,
}

/// What to do when the output file of a job already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Keep the existing file and report the job as not downloaded
    #[default]
    Skip,
    Overwrite,
}

impl OverwritePolicy {
    pub fn allows_overwrite(self) -> bool {
        self == OverwritePolicy::Overwrite
    }
}

/// Backend used for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Built-in segment pipeline
    #[default]
    Aio,
    /// External transcoder process
    Ff,
}

impl std::str::FromStr for BackendMode {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aio" => Ok(BackendMode::Aio),
            "ff" => Ok(BackendMode::Ff),
            other => Err(DownloadError::configuration(
                format!("unknown backend mode '{other}', expected 'aio' or 'ff'"),
                "mode",
            )),
        }
    }
}

/// Download-related configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Segments fetched at the same time
    pub concurrency: usize,
    /// Attempts per resource, 0 means the default of 3
    pub retry_attempts: usize,
    /// Connect timeout and longest wait for the next chunk, in seconds; 0 disables it
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    pub proxy: Option<String>,
    pub overwrite: OverwritePolicy,
    /// Write chunk size for streamed downloads, in bytes
    pub chunk_size: usize,
    /// Program used by the `ff` backend
    pub transcoder_program: String,
    /// Prefix of playlist manifest locations, e.g. `http://host/vedio/`
    pub playlist_base: String,
    /// Prefix joined with the relative links of a page index
    pub site_base: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_attempts: 3,
            timeout_seconds: transport.timeout,
            user_agent: transport.user_agent,
            headers: HashMap::new(),
            proxy: None,
            overwrite: OverwritePolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            transcoder_program: "ffmpeg".to_string(),
            playlist_base: String::new(),
            site_base: String::new(),
        }
    }
}

impl DownloadConfig {
    pub fn retry_budget(&self) -> usize {
        normalize_retry_budget(self.retry_attempts)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout_seconds,
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
            chunk_size: self.chunk_size.max(1),
        }
    }
}

/// Working directories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Downloaded manifests
    pub m3u8_dir: PathBuf,
    /// Segment files of jobs in progress
    pub tmp_dir: PathBuf,
    /// Assembled videos
    pub videos_dir: PathBuf,
    /// Log file directory
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            m3u8_dir: PathBuf::from("./m3u8"),
            tmp_dir: PathBuf::from("./tmp"),
            videos_dir: PathBuf::from("./videos"),
            log_dir: PathBuf::from("./log"),
        }
    }
}

/// Resume ledger files and batch filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub success_log: PathBuf,
    pub error_log: PathBuf,
    pub current_log: PathBuf,
    /// Overrides the stored resume point when set
    pub current: Option<String>,
    /// Keys never processed
    pub skip_keys: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let paths = LedgerPaths::in_dir("./logs");
        Self {
            success_log: paths.success_log,
            error_log: paths.error_log,
            current_log: paths.current_log,
            current: None,
            skip_keys: Vec::new(),
        }
    }
}

impl LedgerConfig {
    pub fn paths(&self) -> LedgerPaths {
        LedgerPaths {
            success_log: self.success_log.clone(),
            error_log: self.error_log.clone(),
            current_log: self.current_log.clone(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `config_path`, writing defaults if it does not exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let config: AppConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

            tracing::info!("Loaded configuration from: {:?}", config_path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = self.export()?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved configuration to: {:?}", config_path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "m3u8dl", "m3u8-dl")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Export configuration as JSON string
    pub fn export(&self) -> Result<String> {
        serde_json::to_string_pretty(self).with_context(|| "Failed to export configuration")
    }

    /// Parse and validate configuration from a JSON string
    pub fn import(json: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(json).with_context(|| "Failed to parse imported configuration")?;

        config
            .validate()
            .with_context(|| "Imported configuration is invalid")?;
        Ok(config)
    }

    /// Validate configuration values before any I/O happens
    pub fn validate(&self) -> Result<(), DownloadError> {
        let download = &self.download;

        if download.concurrency == 0 || download.concurrency > MAX_CONCURRENCY {
            return Err(DownloadError::configuration(
                format!("concurrency must be between 1 and {MAX_CONCURRENCY}"),
                "download.concurrency",
            ));
        }

        if download.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(DownloadError::configuration(
                format!("retry attempts should not exceed {MAX_RETRY_ATTEMPTS}"),
                "download.retry_attempts",
            ));
        }

        if self.mode == BackendMode::Ff && download.transcoder_program.trim().is_empty() {
            return Err(DownloadError::configuration(
                "transcoder program must be set for the ff backend",
                "download.transcoder_program",
            ));
        }

        for key in self.ledger.skip_keys.iter().chain(self.ledger.current.iter()) {
            validate_key(key)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.download.concurrency, 4);
        assert_eq!(config.download.retry_budget(), 3);
        assert_eq!(config.mode, BackendMode::Aio);
        assert_eq!(config.download.overwrite, OverwritePolicy::Skip);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = AppConfig::default();
        config.mode = BackendMode::Ff;
        config.download.headers.insert("Referer".into(), "http://x/".into());
        let json = config.export().unwrap();
        assert!(json.contains("\"mode\": \"ff\""));

        let parsed = AppConfig::import(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AppConfig::import(r#"{"download": {"concurrency": 8}}"#).unwrap();
        assert_eq!(config.download.concurrency, 8);
        assert_eq!(config.download.transcoder_program, "ffmpeg");
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = AppConfig::default();
        config.download.concurrency = 0;
        assert!(matches!(config.validate(), Err(DownloadError::Configuration { .. })));

        config.download.concurrency = MAX_CONCURRENCY + 1;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.download.retry_attempts = 21;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.mode = BackendMode::Ff;
        config.download.transcoder_program = " ".into();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.ledger.skip_keys = vec!["a\nb".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_attempts_means_default() {
        let mut config = AppConfig::default();
        config.download.retry_attempts = 0;
        assert!(config.validate().is_ok());
        assert_eq!(config.download.retry_budget(), 3);
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        let config = AppConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, AppConfig::default());

        let mut changed = config.clone();
        changed.download.overwrite = OverwritePolicy::Overwrite;
        changed.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap(), changed);
    }

    #[test]
    fn test_backend_mode_from_str() {
        assert_eq!("AIO".parse::<BackendMode>().unwrap(), BackendMode::Aio);
        assert_eq!("ff".parse::<BackendMode>().unwrap(), BackendMode::Ff);
        assert!("yt".parse::<BackendMode>().is_err());
    }
}

//! Application configuration

use api_proto::LibraryType;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub filesystem: FilesystemConfig,
    pub jobs: JobsConfig,
    pub transcoder: TranscoderConfig,
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Database location; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    /// Log location; `<platform data dir>/logs` when unset
    pub log_dir: Option<PathBuf>,
    /// Account named in suggested permission commands; current user when unset
    pub service_account: Option<String>,
    pub log_retention_days: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_dir: None,
            service_account: None,
            log_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    pub show_hidden: bool,
    /// Probed before the built-in root candidates
    pub extra_root_candidates: Vec<PathBuf>,
    pub media_folder_name: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            show_hidden: false,
            extra_root_candidates: Vec::new(),
            media_folder_name: app_fs::DEFAULT_MEDIA_FOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Interval between WorkEngine polls
    pub poll_interval_ms: u64,
    /// How long `cancel` waits for the engine to acknowledge
    pub cancel_timeout_ms: u64,
    /// Finished jobs kept per (kind, subject)
    pub retain_per_subject: usize,
    /// Finished jobs kept overall, oldest evicted first
    pub retain_total: usize,
    pub event_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            cancel_timeout_ms: 5000,
            retain_per_subject: 5,
            retain_total: 1000,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// External transcoder executable
    pub binary: PathBuf,
    /// Where transcodes land when the caller gives no output path
    pub output_dir: Option<PathBuf>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("streamvio_transcoder"),
            output_dir: None,
        }
    }
}

/// Media file extensions counted by library scans
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub video_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            video_extensions: list(&[
                "mkv", "mp4", "m4v", "avi", "mov", "webm", "wmv", "ts", "mpg", "mpeg", "flv",
            ]),
            audio_extensions: list(&[
                "mp3", "flac", "aac", "m4a", "ogg", "opus", "wav", "wma", "alac",
            ]),
            image_extensions: list(&[
                "jpg", "jpeg", "png", "gif", "webp", "heic", "bmp", "tif", "tiff",
            ]),
        }
    }
}

impl ScannerConfig {
    pub fn extensions_for(&self, library_type: LibraryType) -> &[String] {
        match library_type {
            LibraryType::Movies | LibraryType::Series => &self.video_extensions,
            LibraryType::Music => &self.audio_extensions,
            LibraryType::Photos => &self.image_extensions,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file; defaults when the file is absent
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::info!("Configuration loaded from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        tracing::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "StreamVio", "StreamVio")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }

    /// Effective database directory
    pub fn data_dir(&self) -> PathBuf {
        self.general.data_dir.clone().unwrap_or_else(app_db::db_dir)
    }

    /// Effective account for permission suggestions
    pub fn service_account(&self) -> String {
        self.general
            .service_account
            .clone()
            .unwrap_or_else(app_fs::current_account)
    }
}

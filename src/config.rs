use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub crop: CropConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// When false, queued events are marked processed without running detection.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Similarity threshold for automatic assignment (0-1).
    /// Detections below `confidence_threshold * 100` skip matching entirely.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_enabled")]
    pub auto_assign: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_confidence_threshold() -> f32 {
    0.6
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            confidence_threshold: default_confidence_threshold(),
            auto_assign: default_enabled(),
        }
    }
}

/// How duplicate relations are turned into merge groups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupingStrategy {
    /// Every pair inside a group must satisfy the duplicate predicate.
    #[default]
    Complete,
    /// Any chain of duplicate relations joins a group (A~B, B~C => {A,B,C}).
    Transitive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f32,

    /// Maximum center-to-center distance, in percent of the image.
    #[serde(default = "default_max_center_distance")]
    pub max_center_distance: f32,

    #[serde(default = "default_min_size_similarity")]
    pub min_size_similarity: f32,

    #[serde(default)]
    pub grouping: GroupingStrategy,
}

fn default_overlap_threshold() -> f32 {
    0.7
}

fn default_max_center_distance() -> f32 {
    5.0
}

fn default_min_size_similarity() -> f32 {
    0.8
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: default_overlap_threshold(),
            max_center_distance: default_max_center_distance(),
            min_size_similarity: default_min_size_similarity(),
            grouping: GroupingStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Remove crops and thumbnails older than this many days (0 = keep forever).
    #[serde(default)]
    pub cleanup_after_days: u32,
}

fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("doorbell-faces")
        .join("uploads")
}

impl StorageConfig {
    pub fn faces_dir(&self) -> PathBuf {
        self.base_dir.join("faces")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.base_dir.join("thumbnails")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            cleanup_after_days: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropConfig {
    /// Padding added on every side, as a fraction of the face size.
    #[serde(default = "default_padding")]
    pub padding: f32,

    #[serde(default = "default_crop_quality")]
    pub crop_quality: u8,

    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,

    /// Letterbox fill for thumbnails.
    #[serde(default = "default_background")]
    pub background: [u8; 3],
}

fn default_padding() -> f32 {
    0.05
}

fn default_crop_quality() -> u8 {
    90
}

fn default_thumbnail_size() -> u32 {
    150
}

fn default_thumbnail_quality() -> u8 {
    80
}

fn default_background() -> [u8; 3] {
    [240, 240, 240] // #f0f0f0
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            padding: default_padding(),
            crop_quality: default_crop_quality(),
            thumbnail_size: default_thumbnail_size(),
            thumbnail_quality: default_thumbnail_quality(),
            background: default_background(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Pause between consecutive jobs so vision providers are not saturated.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Jobs running longer than this are abandoned (0 disables the limit).
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_cooldown_ms() -> u64 {
    1000
}

fn default_job_timeout_secs() -> u64 {
    120
}

impl QueueConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_download_timeout_secs() -> u64 {
    15
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recognition: RecognitionConfig::default(),
            dedup: DedupConfig::default(),
            storage: StorageConfig::default(),
            crop: CropConfig::default(),
            queue: QueueConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, `DOORBELL_FACES_CONFIG`, or the default location.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("DOORBELL_FACES_CONFIG").map(PathBuf::from))
            .unwrap_or_else(Self::config_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("doorbell-faces")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            cooldown_ms = 0

            [dedup]
            grouping = "transitive"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.cooldown(), Duration::ZERO);
        assert_eq!(config.queue.job_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.dedup.grouping, GroupingStrategy::Transitive);
        assert!((config.dedup.overlap_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.crop.thumbnail_size, 150);
        assert!(config.recognition.enabled);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.crop.crop_quality, 90);

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.queue.cooldown_ms, config.queue.cooldown_ms);
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let queue = QueueConfig {
            cooldown_ms: 10,
            job_timeout_secs: 0,
        };
        assert_eq!(queue.job_timeout(), None);
    }
}

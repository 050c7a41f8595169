use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, path::PathBuf};

use crate::models::HashAlgorithm;

pub const CONFIG_PATH_ENV: &str = "CURATOR_CONFIG_PATH";

const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "m4v", "mp4", "mov", "wmv", "avi", "mpg", "mpeg", "rmvb", "rm", "flv", "asf", "mkv", "webm",
];
const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const DEFAULT_GALLERY_EXTENSIONS: &[&str] = &["zip", "cbz"];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub library: LibraryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default)]
    pub paths: Vec<LibraryPath>,
    /// Root directory for derived artifacts; pruned from the walk.
    pub generated_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryPath {
    pub path: PathBuf,
    #[serde(default)]
    pub exclude_video: bool,
    #[serde(default)]
    pub exclude_image: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub video_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub gallery_extensions: Vec<String>,
    /// Exclude patterns applied to video candidates.
    pub exclude: Vec<String>,
    /// Exclude patterns applied to image and gallery candidates.
    pub image_exclude: Vec<String>,
    /// 0 means auto-detect from available CPU parallelism.
    pub parallel_tasks: usize,
    pub calculate_md5: bool,
    pub video_hash_algorithm: HashAlgorithm,
    pub create_galleries_from_folders: bool,
    pub use_file_metadata: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_extensions(DEFAULT_VIDEO_EXTENSIONS),
            image_extensions: default_extensions(DEFAULT_IMAGE_EXTENSIONS),
            gallery_extensions: default_extensions(DEFAULT_GALLERY_EXTENSIONS),
            exclude: Vec::new(),
            image_exclude: Vec::new(),
            parallel_tasks: 0,
            calculate_md5: false,
            video_hash_algorithm: HashAlgorithm::Oshash,
            create_galleries_from_folders: false,
            use_file_metadata: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerateConfig {
    pub sprites: bool,
    pub previews: bool,
    pub image_previews: bool,
    pub preview_segments: u32,
    pub preview_segment_duration: f64,
    /// Seconds, or a percentage string such as "10%".
    pub preview_exclude_start: String,
    pub preview_exclude_end: String,
    pub preview_preset: String,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            sprites: true,
            previews: true,
            image_previews: false,
            preview_segments: 12,
            preview_segment_duration: 0.75,
            preview_exclude_start: "0".to_string(),
            preview_exclude_end: "0".to_string(),
            preview_preset: "slow".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl Settings {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let builder = config::Config::builder()
            .set_default("library.generated_path", "generated")?
            .set_default("database.path", "curator.sqlite")?
            .add_source(config::File::from(config_path).required(false))
            .add_source(config::Environment::with_prefix("CURATOR").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Operator-configured parallelism, or a conservative fraction of the
    /// available cores when unset, leaving headroom for the probing and
    /// encoding tools scan tasks shell out to.
    pub fn parallel_tasks_with_auto_detection(&self) -> usize {
        if self.scan.parallel_tasks > 0 {
            return self.scan.parallel_tasks;
        }
        let cores = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4);
        (cores / 4) + 1
    }

    fn validate(&self) -> Result<()> {
        for pattern in self.scan.exclude.iter().chain(&self.scan.image_exclude) {
            regex::Regex::new(pattern)
                .with_context(|| format!("invalid exclude pattern '{pattern}'"))?;
        }
        if self.generate.preview_segments == 0 {
            anyhow::bail!("generate.preview_segments must be at least 1");
        }
        if self.generate.preview_segment_duration <= 0.0 {
            anyhow::bail!("generate.preview_segment_duration must be positive");
        }
        for value in [
            &self.generate.preview_exclude_start,
            &self.generate.preview_exclude_end,
        ] {
            if parse_seconds_or_percent(value, 100.0).is_none() {
                anyhow::bail!("'{value}' is not a valid seconds or percentage value");
            }
        }
        Ok(())
    }
}

/// Parses a preview exclusion bound: either a number of seconds or a
/// percentage of the total duration ("10%").
pub fn parse_seconds_or_percent(value: &str, total_duration: f64) -> Option<f64> {
    let trimmed = value.trim();
    if let Some(percent) = trimmed.strip_suffix('%') {
        let percent: f64 = percent.trim().parse().ok()?;
        if !(0.0..=100.0).contains(&percent) {
            return None;
        }
        return Some(total_duration * percent / 100.0);
    }
    let seconds: f64 = trimmed.parse().ok()?;
    if seconds < 0.0 {
        return None;
    }
    Some(seconds)
}

fn default_extensions(defaults: &[&str]) -> Vec<String> {
    defaults.iter().map(|ext| ext.to_string()).collect()
}

fn default_config_path() -> Result<PathBuf> {
    let cwd = env::current_dir().context("failed to resolve current directory")?;
    Ok(cwd.join("config").join("curator.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_extension_lists() {
        let scan = ScanConfig::default();
        assert!(scan.video_extensions.iter().any(|ext| ext == "mp4"));
        assert!(scan.image_extensions.iter().any(|ext| ext == "jpg"));
        assert_eq!(scan.gallery_extensions, vec!["zip", "cbz"]);
    }

    #[test]
    fn parallel_tasks_auto_detects_when_zero() {
        let settings = Settings {
            library: LibraryConfig {
                paths: Vec::new(),
                generated_path: PathBuf::from("generated"),
            },
            scan: ScanConfig::default(),
            generate: GenerateConfig::default(),
            database: DatabaseConfig {
                path: PathBuf::from("curator.sqlite"),
            },
            tools: ToolsConfig::default(),
        };
        assert!(settings.parallel_tasks_with_auto_detection() >= 1);

        let mut fixed = settings;
        fixed.scan.parallel_tasks = 3;
        assert_eq!(fixed.parallel_tasks_with_auto_detection(), 3);
    }

    #[test]
    fn seconds_or_percent_parsing() {
        assert_eq!(parse_seconds_or_percent("0", 120.0), Some(0.0));
        assert_eq!(parse_seconds_or_percent("15", 120.0), Some(15.0));
        assert_eq!(parse_seconds_or_percent("10%", 120.0), Some(12.0));
        assert_eq!(parse_seconds_or_percent(" 50% ", 30.0), Some(15.0));
        assert_eq!(parse_seconds_or_percent("150%", 30.0), None);
        assert_eq!(parse_seconds_or_percent("-5", 30.0), None);
        assert_eq!(parse_seconds_or_percent("abc", 30.0), None);
    }

    #[test]
    fn rejects_invalid_exclude_pattern() {
        let settings = Settings {
            library: LibraryConfig {
                paths: Vec::new(),
                generated_path: PathBuf::from("generated"),
            },
            scan: ScanConfig {
                exclude: vec!["[unclosed".to_string()],
                ..ScanConfig::default()
            },
            generate: GenerateConfig::default(),
            database: DatabaseConfig {
                path: PathBuf::from("curator.sqlite"),
            },
            tools: ToolsConfig::default(),
        };
        assert!(settings.validate().is_err());
    }
}

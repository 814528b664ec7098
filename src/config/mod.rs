use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::capture::Rectangle;
use crate::recording::RecordingConfig;
use crate::sink::{CodecOptions, OutputKind};

const MAX_QUALITY: u8 = 100;
const MIN_FPS: u32 = 1;
const MAX_FPS: u32 = 60;
const MAX_DURATION_SECS: u32 = 3600;
const MAX_FILENAME_TEMPLATE_LEN: usize = 128;
const DEFAULT_FILENAME_TEMPLATE: &str = "recording_%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub recording: RecordingSection,
    #[serde(default)]
    pub encoder: CodecOptions,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingSection {
    pub fps: u32,
    /// `0` records until stopped.
    pub duration_secs: u32,
    pub output: OutputKind,
    #[serde(default)]
    pub region: Option<Rectangle>,
    #[serde(default)]
    pub monitor: Option<u32>,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub filename_template: String,
    pub gif_quality: u8,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.recording.fps < MIN_FPS || self.recording.fps > MAX_FPS {
            return Err(anyhow!("fps must be between {} and {}", MIN_FPS, MAX_FPS));
        }
        if self.recording.duration_secs > MAX_DURATION_SECS {
            return Err(anyhow!("duration_secs must be <= {}", MAX_DURATION_SECS));
        }
        if let Some(region) = self.recording.region {
            if region.is_empty() {
                return Err(anyhow!("region must have a non-zero size"));
            }
        }
        if self.recording.cache_dir.as_os_str().is_empty() {
            return Err(anyhow!("cache_dir must not be empty"));
        }
        if self.output.gif_quality > MAX_QUALITY || self.encoder.quality > MAX_QUALITY {
            return Err(anyhow!("quality must be <= {}", MAX_QUALITY));
        }
        if self.output.filename_template.len() > MAX_FILENAME_TEMPLATE_LEN {
            return Err(anyhow!("filename_template too long"));
        }
        if self.output.filename_template.contains('/')
            || self.output.filename_template.contains('\\')
            || self.output.filename_template.contains("..")
        {
            return Err(anyhow!("filename_template contains invalid path characters"));
        }
        if self.encoder.ffmpeg_path.as_os_str().is_empty() {
            return Err(anyhow!("ffmpeg_path must not be empty"));
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        self.recording.fps = self.recording.fps.clamp(MIN_FPS, MAX_FPS);
        self.recording.duration_secs = self.recording.duration_secs.min(MAX_DURATION_SECS);
        self.output.gif_quality = self.output.gif_quality.min(MAX_QUALITY);
        self.encoder.quality = self.encoder.quality.min(MAX_QUALITY);

        if self.recording.region.is_some_and(|r| r.is_empty()) {
            self.recording.region = None;
        }

        if self.output.filename_template.len() > MAX_FILENAME_TEMPLATE_LEN
            || self.output.filename_template.contains('/')
            || self.output.filename_template.contains('\\')
            || self.output.filename_template.contains("..")
        {
            self.output.filename_template = DEFAULT_FILENAME_TEMPLATE.to_string();
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let videos_dir = directories::UserDirs::new()
            .and_then(|d| d.video_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map(|b| b.home_dir().to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."))
            });

        let cache_dir = ProjectDirs::from("com", "capscr", "capscr-record")
            .map(|p| p.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("capscr-record"));

        Self {
            recording: RecordingSection {
                fps: 15,
                duration_secs: 30,
                output: OutputKind::Gif,
                region: None,
                monitor: None,
                cache_dir,
            },
            encoder: CodecOptions::default(),
            output: OutputConfig {
                directory: videos_dir.join("capscr"),
                filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
                gif_quality: 80,
            },
        }
    }
}

impl Config {
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "capscr", "capscr-record").map(|p| p.config_dir().to_path_buf())
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                return Self::parse(&content);
            }
        }
        Ok(Config::default())
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.validate()?;
        if let Some(dir) = Self::config_dir() {
            fs::create_dir_all(&dir)?;
            if let Some(path) = Self::config_path() {
                let content = toml::to_string_pretty(self)?;
                fs::write(&path, content)?;
            }
        }
        Ok(())
    }

    pub fn ensure_output_dir(&self) -> Result<()> {
        let dir = &self.output.directory;
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("Output directory path is empty"));
        }
        if dir.to_string_lossy().contains("..") {
            return Err(anyhow!("Output directory contains path traversal"));
        }
        fs::create_dir_all(dir)?;
        Ok(())
    }

    pub fn generate_filename(&self, kind: OutputKind) -> String {
        let now = chrono::Local::now();
        let formatted = now.format(&self.output.filename_template).to_string();
        let sanitized: String = formatted
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .take(200)
            .collect();
        let safe_name = if sanitized.is_empty() {
            format!("recording_{}", now.timestamp())
        } else {
            sanitized
        };
        format!("{}.{}", safe_name, kind.extension())
    }

    pub fn output_path(&self, kind: OutputKind) -> PathBuf {
        self.output.directory.join(self.generate_filename(kind))
    }

    pub fn cache_path(&self, kind: OutputKind) -> PathBuf {
        match kind {
            OutputKind::Gif => self.recording.cache_dir.join("frames"),
            OutputKind::Avi | OutputKind::Ffmpeg => self
                .recording
                .cache_dir
                .join(format!("intermediate.{}", kind.extension())),
        }
    }

    pub fn recording_config(&self, region: Rectangle) -> RecordingConfig {
        let kind = self.recording.output;
        RecordingConfig {
            fps: self.recording.fps,
            duration_secs: self.recording.duration_secs,
            region: self.recording.region.unwrap_or(region),
            output: kind,
            cache_path: self.cache_path(kind),
            codec: self.encoder.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::VideoCodec;

    const SAMPLE: &str = r#"
[recording]
fps = 120
duration_secs = 10
output = "avi"
cache_dir = "/tmp/capscr-record"
region = { x = 10, y = 20, width = 320, height = 240 }

[encoder]
ffmpeg_path = "/usr/bin/ffmpeg"
codec = "vp9"
quality = 60

[output]
directory = "/tmp/capscr-out"
filename_template = "../escape"
gif_quality = 200
"#;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_parse_sanitizes() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.recording.fps, MAX_FPS);
        assert_eq!(config.recording.output, OutputKind::Avi);
        assert_eq!(config.recording.region, Some(Rectangle::new(10, 20, 320, 240)));
        assert_eq!(config.encoder.codec, VideoCodec::Vp9);
        assert_eq!(config.output.gif_quality, MAX_QUALITY);
        assert_eq!(config.output.filename_template, DEFAULT_FILENAME_TEMPLATE);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let content = SAMPLE.replace("gif_quality = 200", "gif_quality = 20\nloop = true");
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = Config::default();
        let content = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::parse(&content).unwrap();
        assert_eq!(parsed.recording.fps, config.recording.fps);
        assert_eq!(parsed.encoder, config.encoder);
    }

    #[test]
    fn test_generate_filename_uses_kind_extension() {
        let config = Config::default();
        assert!(config.generate_filename(OutputKind::Gif).ends_with(".gif"));
        assert!(config.generate_filename(OutputKind::Avi).ends_with(".avi"));
        let name = config.generate_filename(OutputKind::Ffmpeg);
        assert!(name.starts_with("recording_"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_recording_config_prefers_configured_region() {
        let mut config = Config::default();
        let screen = Rectangle::new(0, 0, 1920, 1080);
        assert_eq!(config.recording_config(screen).region, screen);

        config.recording.region = Some(Rectangle::new(5, 5, 100, 100));
        config.recording.output = OutputKind::Ffmpeg;
        let rc = config.recording_config(screen);
        assert_eq!(rc.region, Rectangle::new(5, 5, 100, 100));
        assert!(rc.cache_path.ends_with("intermediate.mp4"));
    }
}

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    video::{BackgroundStyle, VideoParams},
};

/// Main configuration for Reddit-Narrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output video settings
    pub video: VideoParams,

    /// Narration length budget
    pub duration: DurationConfig,

    /// Speech synthesis settings
    pub voice: VoiceConfig,

    /// Background video and audio bed
    pub background: BackgroundConfig,

    /// Word-by-word caption overlay
    pub captions: CaptionConfig,

    /// Card rendering
    pub cards: CardConfig,

    /// ffmpeg invocation
    pub encoder: EncoderConfig,

    /// Reddit API access
    pub reddit: RedditConfig,

    /// Automatic post discovery
    pub automation: AutomationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.duration.validate()?;
        self.voice.validate()?;
        self.background.validate()?;
        self.captions.validate()?;
        self.encoder.validate()?;
        Ok(())
    }

    /// Narration budget for the configured mode
    pub fn target_duration(&self) -> f64 {
        self.duration.target_seconds()
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Short or long-form output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationMode {
    Short,
    Long,
}

/// Narration budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationConfig {
    pub mode: DurationMode,

    /// Budget in short mode (seconds)
    pub target_seconds: u32,

    /// Budget in long mode (seconds)
    pub long_seconds: u32,

    /// Comments to fetch; long mode always fetches at least 100
    pub max_comments: usize,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            mode: DurationMode::Short,
            target_seconds: 90,
            long_seconds: 3600,
            max_comments: 12,
        }
    }
}

impl DurationConfig {
    pub fn target_seconds(&self) -> f64 {
        match self.mode {
            DurationMode::Short => self.target_seconds as f64,
            DurationMode::Long => self.long_seconds as f64,
        }
    }

    pub fn fetch_limit(&self) -> usize {
        match self.mode {
            DurationMode::Short => self.max_comments,
            DurationMode::Long => self.max_comments.max(100),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_comments == 0 {
            return Err(invalid("duration.max_comments", self.max_comments).into());
        }
        Ok(())
    }
}

/// Which speech engine to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Piper,
    Espeak,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Primary engine
    pub engine: EngineKind,

    /// Engine used when the primary fails (None disables fallback)
    pub fallback: Option<EngineKind>,

    /// Piper executable
    pub piper_path: String,

    /// Piper ONNX voice model
    pub piper_model: PathBuf,

    /// espeak-ng executable
    pub espeak_path: String,

    /// espeak-ng voice name
    pub espeak_voice: String,

    /// espeak-ng words per minute
    pub espeak_rate: u32,

    /// Concurrent synthesis workers (1 = sequential, budget-aware)
    pub parallel_workers: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Piper,
            fallback: Some(EngineKind::Espeak),
            piper_path: "piper".to_string(),
            piper_model: PathBuf::from("./tts/en_US-amy-medium.onnx"),
            espeak_path: "espeak-ng".to_string(),
            espeak_voice: "en-us".to_string(),
            espeak_rate: 175,
            parallel_workers: 1,
        }
    }
}

impl VoiceConfig {
    fn validate(&self) -> Result<()> {
        if self.parallel_workers == 0 {
            return Err(invalid("voice.parallel_workers", self.parallel_workers).into());
        }
        if self.espeak_rate == 0 {
            return Err(invalid("voice.espeak_rate", self.espeak_rate).into());
        }
        Ok(())
    }
}

/// Background video and audio configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// User-supplied background video
    pub path: Option<PathBuf>,

    /// Generate a background when no path is given
    pub auto_generate: bool,

    /// Generated length in seconds (0 = derive from the narration)
    pub seconds: u32,

    /// Generated background look
    pub style: BackgroundStyle,

    /// Where generated backgrounds are cached
    pub cache_dir: PathBuf,

    /// Looping music bed mixed under the narration
    pub audio_path: Option<PathBuf>,

    pub audio_enabled: bool,

    /// Gain of the music bed relative to the narration
    pub audio_volume: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            path: None,
            auto_generate: true,
            seconds: 0,
            style: BackgroundStyle::Gradient,
            cache_dir: PathBuf::from("assets/cache/backgrounds"),
            audio_path: None,
            audio_enabled: true,
            audio_volume: 0.12,
        }
    }
}

impl BackgroundConfig {
    /// Effective bed volume (0 when the bed is disabled)
    pub fn effective_volume(&self) -> f64 {
        if self.audio_enabled {
            self.audio_volume
        } else {
            0.0
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=4.0).contains(&self.audio_volume) {
            return Err(invalid("background.audio_volume", self.audio_volume).into());
        }
        Ok(())
    }
}

/// Word-by-word caption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    pub enabled: bool,
    pub font_size: u32,
    pub font_color: String,
    pub border_color: String,
    pub border_width: u32,

    /// Vertical position as a fraction of frame height
    pub y_fraction: f64,

    /// Font handed to ffmpeg's drawtext (system default when unset)
    pub font_path: Option<PathBuf>,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            font_size: 60,
            font_color: "white".to_string(),
            border_color: "black".to_string(),
            border_width: 3,
            y_fraction: 0.7,
            font_path: None,
        }
    }
}

impl CaptionConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.y_fraction) {
            return Err(invalid("captions.y_fraction", self.y_fraction).into());
        }
        if self.font_size == 0 {
            return Err(invalid("captions.font_size", self.font_size).into());
        }
        Ok(())
    }
}

/// Card rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// TrueType font; common system fonts are searched when unset
    pub font_path: Option<PathBuf>,

    /// Card width in pixels before the overlay scale
    pub card_width: u32,

    pub title_font_size: f32,
    pub body_font_size: f32,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            card_width: 920,
            title_font_size: 56.0,
            body_font_size: 40.0,
        }
    }
}

/// ffmpeg invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    /// Overlay elements above which the filter graph goes into a script file
    pub script_threshold: usize,

    pub preset: String,
    pub video_bitrate: String,
    pub audio_bitrate: String,

    /// Upper bound for `-threads`
    pub max_threads: usize,

    /// Wall-clock limit for one encode
    pub timeout_secs: Option<u64>,

    /// Progress polling interval
    pub progress_poll_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            script_threshold: 24,
            preset: "faster".to_string(),
            video_bitrate: "8M".to_string(),
            audio_bitrate: "192k".to_string(),
            max_threads: 8,
            timeout_secs: None,
            progress_poll_ms: 500,
        }
    }
}

impl EncoderConfig {
    /// Thread count handed to ffmpeg
    pub fn threads(&self) -> usize {
        num_cpus::get().min(self.max_threads).max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.progress_poll_ms == 0 {
            return Err(invalid("encoder.progress_poll_ms", self.progress_poll_ms).into());
        }
        if self.max_threads == 0 {
            return Err(invalid("encoder.max_threads", self.max_threads).into());
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid("encoder.timeout_secs", 0).into());
        }
        Ok(())
    }
}

/// Reddit API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub user_agent: String,
    pub prefer_top_comments: bool,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: "reddit-narrator/0.1".to_string(),
            prefer_top_comments: true,
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Listing order used when searching a subreddit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Hot,
    Top,
    New,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Hot => "hot",
            SortBy::Top => "top",
            SortBy::New => "new",
        }
    }
}

/// Automatic post discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub subreddits: Vec<String>,
    pub sort_by: SortBy,

    /// hour, day, week, month, year, all (only used with `top`)
    pub time_filter: String,

    pub min_score: i64,
    pub min_comments: i64,

    /// JSON file listing already-produced thread ids
    pub produced_db: PathBuf,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            subreddits: vec!["AskReddit".to_string()],
            sort_by: SortBy::Hot,
            time_filter: "day".to_string(),
            min_score: 1000,
            min_comments: 50,
            produced_db: PathBuf::from("produced_videos.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_duration(), 90.0);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("narrator.toml");

        let mut original = Config::default();
        original.encoder.script_threshold = 7;
        original.background.style = BackgroundStyle::Radial;

        original.save_to_file(&file_path).unwrap();
        let loaded = Config::from_file(&file_path).unwrap();

        assert_eq!(loaded.encoder.script_threshold, 7);
        assert_eq!(loaded.background.style, BackgroundStyle::Radial);
        assert_eq!(loaded.video.resolution, original.video.resolution);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[duration]\nmode = \"long\"\n").unwrap();

        let loaded = Config::from_file(&file_path).unwrap();
        assert_eq!(loaded.duration.mode, DurationMode::Long);
        assert_eq!(loaded.target_duration(), 3600.0);
        assert_eq!(loaded.duration.fetch_limit(), 100);
        assert_eq!(loaded.encoder.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_invalid_caption_position() {
        let mut config = Config::default();
        config.captions.y_fraction = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_worker_count() {
        let mut config = Config::default();
        config.voice.parallel_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_bed_has_zero_volume() {
        let mut config = Config::default();
        config.background.audio_enabled = false;
        assert_eq!(config.background.effective_volume(), 0.0);
    }
}

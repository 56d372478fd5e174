use thiserror::Error;

/// Main error type for the Reddit-Narrator library
#[derive(Error, Debug)]
pub enum NarratorError {
    #[error("Duration probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Speech synthesis error: {0}")]
    Synth(#[from] SynthError),

    #[error("Timeline error: {0}")]
    Timeline(#[from] TimelineError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Card rendering error: {0}")]
    Card(#[from] CardError),

    #[error("Reddit error: {0}")]
    Reddit(#[from] RedditError),

    #[error("Composition error: {0}")]
    Composition(#[from] CompositionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Media duration probing errors
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Media file not found: {path}")]
    NotFound { path: String },

    #[error("Could not decode media file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("ffprobe failed for {path}: {stderr}")]
    ProbeFailed { path: String, stderr: String },
}

/// Text-to-speech errors
#[derive(Error, Debug)]
pub enum SynthError {
    #[error("Empty text for speech synthesis")]
    EmptyText,

    #[error("Speech engine '{engine}' could not be started: {reason}")]
    Spawn { engine: String, reason: String },

    #[error("Speech engine '{engine}' failed: {reason}")]
    EngineFailed { engine: String, reason: String },

    #[error("Speech engine '{engine}' produced no audio at {path}")]
    NoOutput { engine: String, path: String },
}

/// Timeline and precondition errors raised before any external process runs
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Image/duration count mismatch: {images} images, {durations} durations")]
    LengthMismatch { images: usize, durations: usize },

    #[error("No images provided for video rendering")]
    EmptyImages,

    #[error("No audio paths provided for concatenation")]
    EmptyAudio,

    #[error("No narration segments could be synthesized")]
    NoSegmentsSelected,

    #[error("Invalid segment duration at index {index}: {duration}")]
    InvalidDuration { index: usize, duration: f64 },
}

/// Encoder errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("ffmpeg not found at '{path}'")]
    FfmpegMissing { path: String },

    #[error("Failed to spawn ffmpeg: {reason}")]
    Spawn { reason: String },

    #[error("ffmpeg exited with {status}:\n{stderr}")]
    ProcessFailed { status: String, stderr: String },

    #[error("ffmpeg exceeded the {seconds}s time limit and was terminated")]
    TimedOut { seconds: u64 },

    #[error("Failed to write filter script {path}: {reason}")]
    ScriptWrite { path: String, reason: String },
}

/// Card rendering errors
#[derive(Error, Debug)]
pub enum CardError {
    #[error("No usable font found (tried: {tried})")]
    FontNotFound { tried: String },

    #[error("Failed to parse font {path}: {reason}")]
    FontParse { path: String, reason: String },

    #[error("Failed to save card image {path}: {reason}")]
    SaveFailed { path: String, reason: String },

    #[error("Failed to read image dimensions of {path}")]
    Dimensions { path: String },
}

/// Reddit fetching and automation errors
#[derive(Error, Debug)]
pub enum RedditError {
    #[error("Could not extract thread id from: {input}")]
    InvalidThreadId { input: String },

    #[error("Request failed after {attempts} attempts: {reason}")]
    RequestFailed { attempts: u32, reason: String },

    #[error("Reddit returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Unexpected Reddit JSON structure: {reason}")]
    UnexpectedShape { reason: String },
}

/// Orchestration errors
#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("Thread has no title")]
    MissingTitle,

    #[error("No background provided and auto-generation is disabled")]
    MissingBackground,

    #[error("Background file not found: {path}")]
    BackgroundNotFound { path: String },

    #[error("No suitable posts found that haven't been produced")]
    NoSuitablePost,

    #[error("Phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: String, reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using NarratorError
pub type Result<T> = std::result::Result<T, NarratorError>;

impl NarratorError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// True when the error was raised before any external process was invoked
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Timeline(_)
                | Self::Config(_)
                | Self::Composition(CompositionError::MissingBackground)
                | Self::Composition(CompositionError::BackgroundNotFound { .. })
                | Self::Composition(CompositionError::MissingTitle)
        )
    }

    /// Check if this error is recoverable (can be retried by the caller)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Reddit(RedditError::RequestFailed { .. }) => true,
            Self::Reddit(RedditError::BadStatus { status, .. }) => *status >= 500 || *status == 429,
            Self::Encode(EncodeError::TimedOut { .. }) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Encode(EncodeError::FfmpegMissing { path }) => {
                format!("ffmpeg was not found at '{}'. Install FFmpeg or set encoder.ffmpeg_path.", path)
            }
            Self::Card(CardError::FontNotFound { .. }) => {
                "No TrueType font found. Set cards.font_path in the configuration.".to_string()
            }
            Self::Reddit(RedditError::InvalidThreadId { input }) => {
                format!("'{}' is not a Reddit thread URL or id.", input)
            }
            Self::Composition(CompositionError::MissingBackground) => {
                "No background video given and background.auto_generate is false.".to_string()
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let err: NarratorError = TimelineError::LengthMismatch { images: 3, durations: 2 }.into();
        assert!(err.is_precondition());

        let err: NarratorError = EncodeError::ProcessFailed {
            status: "exit status: 1".to_string(),
            stderr: "boom".to_string(),
        }
        .into();
        assert!(!err.is_precondition());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_recoverable_statuses() {
        let err: NarratorError = RedditError::BadStatus { status: 503, body: String::new() }.into();
        assert!(err.is_recoverable());

        let err: NarratorError = RedditError::BadStatus { status: 404, body: String::new() }.into();
        assert!(!err.is_recoverable());
    }
}

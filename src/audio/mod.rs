//! # Audio Module
//!
//! Everything that produces or measures narration audio: duration probing,
//! speech synthesis with an explicit fallback, parallel synthesis and
//! concatenation of segment clips into one track.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reddit_narrator::audio::{DurationProbe, VoiceChain};
//! use reddit_narrator::config::Config;
//! use std::path::Path;
//!
//! let config = Config::default();
//! let probe = DurationProbe::new(config.encoder.ffprobe_path.as_str());
//! let voice = VoiceChain::from_config(&config.voice);
//!
//! let result = voice.synthesize("Hello from Reddit", Path::new("title.wav"));
//! if let Some(audio) = result.audio() {
//!     println!("{:.2}s", probe.duration(audio).unwrap_or(0.0));
//! }
//! ```

pub mod assembler;
pub mod parallel;
pub mod probe;
pub mod tts;

pub use assembler::{mix_background, AudioAssembler, AudioTrack};
pub use parallel::synthesize_parallel;
pub use probe::DurationProbe;
pub use tts::{EspeakEngine, PiperEngine, SpeechEngine, SynthResult, VoiceChain};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::config::{EngineKind, VoiceConfig};
use crate::error::{Result, SynthError};
use crate::timeline::WordTiming;

/// A text-to-speech backend writing one audio file per call
pub trait SpeechEngine: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Synthesize `text` into `out_path`
    ///
    /// Returns word timings when the engine reports them.
    fn synthesize(&self, text: &str, out_path: &Path) -> Result<Option<Vec<WordTiming>>>;
}

/// Outcome of one synthesis through a [`VoiceChain`]
#[derive(Debug, Clone)]
pub enum SynthResult {
    /// Primary engine succeeded
    Success {
        audio: PathBuf,
        timings: Option<Vec<WordTiming>>,
    },

    /// Primary failed; the fallback engine produced the audio
    Fallback { audio: PathBuf, reason: String },

    /// No engine produced audio
    Failure { reason: String },
}

impl SynthResult {
    pub fn audio(&self) -> Option<&Path> {
        match self {
            SynthResult::Success { audio, .. } | SynthResult::Fallback { audio, .. } => Some(audio),
            SynthResult::Failure { .. } => None,
        }
    }

    pub fn timings(&self) -> Option<&[WordTiming]> {
        match self {
            SynthResult::Success { timings: Some(t), .. } => Some(t),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SynthResult::Failure { .. })
    }
}

/// Primary engine with an optional fallback
pub struct VoiceChain {
    primary: Box<dyn SpeechEngine>,
    fallback: Option<Box<dyn SpeechEngine>>,
}

impl VoiceChain {
    pub fn new(primary: Box<dyn SpeechEngine>, fallback: Option<Box<dyn SpeechEngine>>) -> Self {
        Self { primary, fallback }
    }

    /// Build the chain described by the voice configuration
    pub fn from_config(config: &VoiceConfig) -> Self {
        let primary = build_engine(config.engine, config);
        let fallback = config
            .fallback
            .filter(|kind| *kind != config.engine)
            .map(|kind| build_engine(kind, config));
        Self::new(primary, fallback)
    }

    /// Synthesize one segment, falling back explicitly when the primary fails
    pub fn synthesize(&self, text: &str, out_path: &Path) -> SynthResult {
        let text = text.trim();
        if text.is_empty() {
            return SynthResult::Failure { reason: SynthError::EmptyText.to_string() };
        }

        if let Some(parent) = out_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return SynthResult::Failure { reason: e.to_string() };
            }
        }

        let primary_error = match self.primary.synthesize(text, out_path) {
            Ok(timings) => {
                debug!("{} synthesized {}", self.primary.name(), out_path.display());
                return SynthResult::Success {
                    audio: out_path.to_path_buf(),
                    timings,
                };
            }
            Err(e) => e.to_string(),
        };

        let Some(fallback) = &self.fallback else {
            return SynthResult::Failure { reason: primary_error };
        };

        warn!(
            "{} failed ({}), falling back to {}",
            self.primary.name(),
            primary_error,
            fallback.name()
        );
        match fallback.synthesize(text, out_path) {
            Ok(_) => SynthResult::Fallback {
                audio: out_path.to_path_buf(),
                reason: primary_error,
            },
            Err(e) => SynthResult::Failure {
                reason: format!("{}; fallback {}: {}", primary_error, fallback.name(), e),
            },
        }
    }
}

fn build_engine(kind: EngineKind, config: &VoiceConfig) -> Box<dyn SpeechEngine> {
    match kind {
        EngineKind::Piper => Box::new(PiperEngine::new(&config.piper_path, &config.piper_model)),
        EngineKind::Espeak => Box::new(EspeakEngine::new(
            &config.espeak_path,
            &config.espeak_voice,
            config.espeak_rate,
        )),
    }
}

/// Piper neural TTS (text on stdin, WAV out)
pub struct PiperEngine {
    binary: String,
    model: PathBuf,
}

impl PiperEngine {
    pub fn new<P: Into<PathBuf>>(binary: &str, model: P) -> Self {
        Self {
            binary: binary.to_string(),
            model: model.into(),
        }
    }
}

impl SpeechEngine for PiperEngine {
    fn name(&self) -> &str {
        "piper"
    }

    fn synthesize(&self, text: &str, out_path: &Path) -> Result<Option<Vec<WordTiming>>> {
        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SynthError::Spawn {
                engine: self.name().to_string(),
                reason: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(SynthError::EngineFailed {
                engine: self.name().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        ensure_output(self.name(), out_path)?;
        Ok(None)
    }
}

/// espeak-ng formant synthesizer (offline fallback)
pub struct EspeakEngine {
    binary: String,
    voice: String,
    rate: u32,
}

impl EspeakEngine {
    pub fn new(binary: &str, voice: &str, rate: u32) -> Self {
        Self {
            binary: binary.to_string(),
            voice: voice.to_string(),
            rate,
        }
    }
}

impl SpeechEngine for EspeakEngine {
    fn name(&self) -> &str {
        "espeak"
    }

    fn synthesize(&self, text: &str, out_path: &Path) -> Result<Option<Vec<WordTiming>>> {
        let output = Command::new(&self.binary)
            .args(["-v", &self.voice, "-s", &self.rate.to_string(), "-w"])
            .arg(out_path)
            .arg("--")
            .arg(text)
            .output()
            .map_err(|e| SynthError::Spawn {
                engine: self.name().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(SynthError::EngineFailed {
                engine: self.name().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        ensure_output(self.name(), out_path)?;
        Ok(None)
    }
}

fn ensure_output(engine: &str, path: &Path) -> Result<()> {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(SynthError::NoOutput {
            engine: engine.to_string(),
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::probe::tests::write_wav;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Writes a silent WAV whose length is the word count × `seconds_per_word`;
    /// texts in `fail_on` are rejected.
    pub(crate) struct FakeEngine {
        pub seconds_per_word: f64,
        pub fail_on: HashSet<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeEngine {
        pub(crate) fn new(seconds_per_word: f64) -> Self {
            Self {
                seconds_per_word,
                fail_on: HashSet::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing_on(mut self, text: &str) -> Self {
            self.fail_on.insert(text.to_string());
            self
        }
    }

    impl SpeechEngine for FakeEngine {
        fn name(&self) -> &str {
            "fake"
        }

        fn synthesize(&self, text: &str, out_path: &Path) -> Result<Option<Vec<WordTiming>>> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail_on.contains(text) {
                return Err(SynthError::EngineFailed {
                    engine: "fake".to_string(),
                    reason: "scripted failure".to_string(),
                }
                .into());
            }
            let words = text.split_whitespace().count().max(1);
            write_wav(out_path, words as f64 * self.seconds_per_word);
            Ok(None)
        }
    }

    #[test]
    fn test_primary_success() {
        let dir = tempdir().unwrap();
        let chain = VoiceChain::new(Box::new(FakeEngine::new(0.5)), None);
        let result = chain.synthesize("hello there", &dir.path().join("0.wav"));

        assert!(matches!(result, SynthResult::Success { .. }));
        assert!(result.audio().unwrap().exists());
    }

    #[test]
    fn test_fallback_branch_is_explicit() {
        let dir = tempdir().unwrap();
        let primary = FakeEngine::new(0.5).failing_on("hello");
        let chain = VoiceChain::new(Box::new(primary), Some(Box::new(FakeEngine::new(0.5))));
        let result = chain.synthesize("hello", &dir.path().join("0.wav"));

        match result {
            SynthResult::Fallback { audio, reason } => {
                assert!(audio.exists());
                assert!(reason.contains("scripted failure"));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_both_engines_fail() {
        let dir = tempdir().unwrap();
        let chain = VoiceChain::new(
            Box::new(FakeEngine::new(0.5).failing_on("x")),
            Some(Box::new(FakeEngine::new(0.5).failing_on("x"))),
        );
        let result = chain.synthesize("x", &dir.path().join("0.wav"));
        assert!(result.is_failure());
    }

    #[test]
    fn test_empty_text_is_failure() {
        let dir = tempdir().unwrap();
        let chain = VoiceChain::new(Box::new(FakeEngine::new(0.5)), None);
        assert!(chain.synthesize("   ", &dir.path().join("0.wav")).is_failure());
    }

    #[test]
    fn test_missing_binary_fails_cleanly() {
        let dir = tempdir().unwrap();
        let engine = EspeakEngine::new("definitely-not-a-real-espeak-binary", "en-us", 175);
        assert!(engine.synthesize("hi", &dir.path().join("0.wav")).is_err());
    }
}

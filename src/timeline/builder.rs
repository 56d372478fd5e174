use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::audio::{DurationProbe, SynthResult, VoiceChain};
use crate::timeline::types::{AudioClip, NarrationSegment};

/// Segments that fit the narration budget, with their audio
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub selected: Vec<NarrationSegment>,
    pub clips: Vec<AudioClip>,
}

impl Selection {
    pub fn total_duration(&self) -> f64 {
        self.clips.iter().map(|c| c.duration).sum()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    fn accept(&mut self, segment: &NarrationSegment, clip: AudioClip) {
        self.selected.push(segment.clone());
        self.clips.push(clip);
    }
}

/// Budget decision for one synthesized segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fit {
    /// Fits; keep scanning
    Accept,
    /// Over budget but nothing accepted yet; keep it and stop
    AcceptAndStop,
    /// Over budget; discard it and stop
    Reject,
}

fn fit(cumulative: f64, duration: f64, accepted: usize, target: f64) -> Fit {
    if cumulative + duration > target {
        if accepted == 0 {
            Fit::AcceptAndStop
        } else {
            Fit::Reject
        }
    } else {
        Fit::Accept
    }
}

/// Audio path for the segment at `index`; failed segments leave a numbering gap
pub fn segment_audio_path(dir: &Path, prefix: &str, index: usize) -> PathBuf {
    dir.join(format!("{}_{:03}.wav", prefix, index))
}

/// Greedy, order-dependent selection of segments under a duration budget
pub struct TimelineBuilder<'a> {
    voice: &'a VoiceChain,
    probe: &'a DurationProbe,
    prefix: String,
}

impl<'a> TimelineBuilder<'a> {
    pub fn new(voice: &'a VoiceChain, probe: &'a DurationProbe) -> Self {
        Self {
            voice,
            probe,
            prefix: "segment".to_string(),
        }
    }

    /// File name prefix for synthesized audio
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Synthesize segments in order until the next one would exceed `target_duration`
    ///
    /// At least one segment is accepted whenever any synthesis succeeds, even
    /// with a zero budget. Per-segment failures are logged and skipped.
    pub fn select(
        &self,
        segments: &[NarrationSegment],
        target_duration: f64,
        audio_dir: &Path,
    ) -> Selection {
        let mut selection = Selection::default();
        let mut cumulative = 0.0;

        for (index, segment) in segments.iter().enumerate() {
            let path = segment_audio_path(audio_dir, &self.prefix, index);
            let result = self.voice.synthesize(&segment.text, &path);

            let Some(clip) = self.clip_for(index, &result) else {
                continue;
            };

            match fit(cumulative, clip.duration, selection.len(), target_duration) {
                Fit::Accept => {
                    cumulative += clip.duration;
                    selection.accept(segment, clip);
                }
                Fit::AcceptAndStop => {
                    debug!("Segment {} exceeds budget but is the first; keeping it", index);
                    selection.accept(segment, clip);
                    break;
                }
                Fit::Reject => {
                    debug!(
                        "Segment {} ({:.2}s) would exceed {:.2}s budget; stopping",
                        index, clip.duration, target_duration
                    );
                    remove_quietly(&clip.path);
                    break;
                }
            }
        }

        info!(
            "Selected {}/{} segments ({:.2}s of {:.2}s budget)",
            selection.len(),
            segments.len(),
            selection.total_duration(),
            target_duration
        );
        selection
    }

    /// Apply the same budget to results synthesized ahead of time
    ///
    /// `results[i]` must belong to `segments[i]`. Audio of every segment past
    /// the cut-off is deleted.
    pub fn select_synthesized(
        &self,
        segments: &[NarrationSegment],
        results: &[SynthResult],
        target_duration: f64,
    ) -> Selection {
        let mut selection = Selection::default();
        let mut cumulative = 0.0;
        let mut stopped_at = None;

        for (index, (segment, result)) in segments.iter().zip(results).enumerate() {
            let Some(clip) = self.clip_for(index, result) else {
                continue;
            };

            match fit(cumulative, clip.duration, selection.len(), target_duration) {
                Fit::Accept => {
                    cumulative += clip.duration;
                    selection.accept(segment, clip);
                }
                Fit::AcceptAndStop => {
                    selection.accept(segment, clip);
                    stopped_at = Some(index + 1);
                    break;
                }
                Fit::Reject => {
                    stopped_at = Some(index);
                    break;
                }
            }
        }

        if let Some(first_unused) = stopped_at {
            for result in &results[first_unused..] {
                if let Some(audio) = result.audio() {
                    remove_quietly(audio);
                }
            }
        }

        info!(
            "Selected {}/{} pre-synthesized segments ({:.2}s of {:.2}s budget)",
            selection.len(),
            segments.len(),
            selection.total_duration(),
            target_duration
        );
        selection
    }

    fn clip_for(&self, index: usize, result: &SynthResult) -> Option<AudioClip> {
        let audio = match result {
            SynthResult::Failure { reason } => {
                warn!("Failed to generate TTS for segment {}: {}", index, reason);
                return None;
            }
            SynthResult::Fallback { reason, .. } => {
                debug!("Segment {} used fallback voice ({})", index, reason);
                result.audio()?
            }
            SynthResult::Success { .. } => result.audio()?,
        };

        match self.probe.duration(audio) {
            Ok(duration) => Some(AudioClip {
                path: audio.to_path_buf(),
                duration,
                word_timings: result.timings().map(|t| t.to_vec()),
            }),
            Err(e) => {
                warn!("Could not probe audio for segment {}: {}", index, e);
                remove_quietly(audio);
                None
            }
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

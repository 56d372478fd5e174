use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TimelineError};

/// One unit of spoken content: the thread title or a single comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    /// Text handed to the speech engine
    pub text: String,

    /// Position in the caller's ranking (0 = first)
    pub source_rank: usize,
}

impl NarrationSegment {
    pub fn new<S: Into<String>>(text: S, source_rank: usize) -> Self {
        Self {
            text: text.into(),
            source_rank,
        }
    }
}

/// Word with timing relative to the start of its own clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Synthesized speech for exactly one segment
///
/// `duration` is the probed value and is reused everywhere downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub path: PathBuf,
    pub duration: f64,

    /// Word timings reported by the engine, if it reports any
    pub word_timings: Option<Vec<WordTiming>>,
}

impl AudioClip {
    pub fn new<P: Into<PathBuf>>(path: P, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
            word_timings: None,
        }
    }
}

/// One rendered card, paired positionally with an audio clip
#[derive(Debug, Clone, PartialEq)]
pub struct VisualCard {
    pub path: PathBuf,

    /// Copied from the paired clip, never measured independently
    pub duration: f64,

    /// Pixel size of the rendered image (0 when unknown)
    pub width: u32,
    pub height: u32,
}

impl VisualCard {
    pub fn new<P: Into<PathBuf>>(path: P, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
            width: 0,
            height: 0,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Half-open visibility interval `[start, end)` in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start: f64,
    pub end: f64,
}

impl Window {
    pub fn new(start: f64, duration: f64) -> Self {
        Self {
            start,
            end: start + duration.max(0.0),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// `start <= t < end`; a zero-length window contains nothing
    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A card paired with its clip and the start time of the pair
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub card: VisualCard,
    pub clip: AudioClip,
    pub start_time: f64,
}

impl TimelineEntry {
    pub fn window(&self) -> Window {
        Window::new(self.start_time, self.clip.duration)
    }
}

/// Ordered (card, clip) pairs partitioning `[0, total_duration)`
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    total_duration: f64,
}

impl Timeline {
    /// Pair cards with clips; each card takes its clip's duration.
    pub fn build(cards: Vec<PathBuf>, clips: Vec<AudioClip>) -> Result<Self> {
        if cards.len() != clips.len() {
            return Err(TimelineError::LengthMismatch {
                images: cards.len(),
                durations: clips.len(),
            }
            .into());
        }
        if cards.is_empty() {
            return Err(TimelineError::EmptyImages.into());
        }

        let mut timeline = Timeline::default();
        for (card_path, clip) in cards.into_iter().zip(clips) {
            let card = VisualCard::new(card_path, clip.duration);
            timeline.push(card, clip)?;
        }
        Ok(timeline)
    }

    /// Append a pair; the card duration is overwritten with the clip duration.
    pub fn push(&mut self, mut card: VisualCard, clip: AudioClip) -> Result<()> {
        let duration = clip.duration;
        if !duration.is_finite() || duration < 0.0 {
            return Err(TimelineError::InvalidDuration {
                index: self.entries.len(),
                duration,
            }
            .into());
        }
        card.duration = duration;
        let start_time = self.total_duration;
        self.entries.push(TimelineEntry {
            card,
            clip,
            start_time,
        });
        self.total_duration = start_time + duration;
        Ok(())
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn cards(&self) -> Vec<VisualCard> {
        self.entries.iter().map(|e| e.card.clone()).collect()
    }

    pub fn audio_paths(&self) -> Vec<&Path> {
        self.entries.iter().map(|e| e.clip.path.as_path()).collect()
    }

    pub fn durations(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.clip.duration).collect()
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clips(durations: &[f64]) -> Vec<AudioClip> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| AudioClip::new(format!("{}.wav", i), *d))
            .collect()
    }

    fn cards(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("{}.png", i))).collect()
    }

    #[test]
    fn test_two_card_windows() {
        let timeline = Timeline::build(cards(2), clips(&[2.0, 3.0])).unwrap();
        let windows: Vec<Window> = timeline.entries().iter().map(|e| e.window()).collect();

        assert_eq!(windows[0], Window { start: 0.0, end: 2.0 });
        assert_eq!(windows[1], Window { start: 2.0, end: 5.0 });
        assert_eq!(timeline.total_duration(), 5.0);
    }

    #[test]
    fn test_partition_has_no_gaps() {
        let durations = [1.37, 0.0, 2.91, 0.333, 4.1];
        let timeline = Timeline::build(cards(5), clips(&durations)).unwrap();
        let entries = timeline.entries();

        for pair in entries.windows(2) {
            assert_eq!(pair[1].start_time, pair[0].start_time + pair[0].clip.duration);
        }
        let sum: f64 = timeline.durations().iter().sum();
        assert!((sum - timeline.total_duration()).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_card_is_never_visible() {
        let timeline = Timeline::build(cards(3), clips(&[1.0, 0.0, 2.0])).unwrap();
        let hidden = timeline.entries()[1].window();

        assert!(hidden.is_empty());
        assert!(!hidden.contains(1.0));
        assert_eq!(timeline.entries()[2].start_time, 1.0);
    }

    #[test]
    fn test_boundary_instant_belongs_to_next_window() {
        let timeline = Timeline::build(cards(2), clips(&[2.0, 3.0])).unwrap();
        let first = timeline.entries()[0].window();
        let second = timeline.entries()[1].window();

        assert!(!first.contains(2.0));
        assert!(second.contains(2.0));
    }

    #[test]
    fn test_card_duration_copied_from_clip() {
        let mut timeline = Timeline::default();
        let card = VisualCard::new("title.png", 99.0);
        timeline.push(card, AudioClip::new("title.wav", 1.5)).unwrap();

        assert_eq!(timeline.entries()[0].card.duration, 1.5);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let result = Timeline::build(cards(3), clips(&[1.0, 2.0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(Timeline::build(Vec::new(), Vec::new()).is_err());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut timeline = Timeline::default();
        let err = timeline.push(VisualCard::new("a.png", 0.0), AudioClip::new("a.wav", -1.0));
        assert!(err.is_err());
    }
}

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, TimelineError};
use crate::timeline::types::{Timeline, WordTiming};

const COMMA_PAUSE: f64 = 0.2;
const SENTENCE_END_PAUSE: f64 = 0.4;

/// Exponent applied to word length when sharing out speaking time
const LENGTH_WEIGHT: f64 = 0.75;

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\w[\w'-]*)|([,.!?])").expect("word pattern compiles"))
}

/// Estimate per-word timings for `text` spoken over `duration` seconds
///
/// Punctuation pauses are taken out first; the remaining time is shared
/// between words by length. Times are relative to the start of the clip.
pub fn estimate_word_timings(text: &str, duration: f64) -> Vec<WordTiming> {
    let elements: Vec<&str> = word_pattern().find_iter(text).map(|m| m.as_str()).collect();
    let duration = duration.max(0.0);

    let mut pause_total = 0.0;
    let mut weight_total = 0.0;
    for element in &elements {
        match *element {
            "," => pause_total += COMMA_PAUSE,
            "." | "!" | "?" => pause_total += SENTENCE_END_PAUSE,
            word => weight_total += weight(word),
        }
    }
    if weight_total == 0.0 {
        return Vec::new();
    }

    // Long punctuation runs on a short clip would leave no time for words
    let pause_scale = if pause_total > duration { duration / pause_total } else { 1.0 };
    let speaking = (duration - pause_total * pause_scale).max(0.0);

    let mut timings = Vec::new();
    let mut cursor = 0.0;
    for element in elements {
        match element {
            "," => cursor += COMMA_PAUSE * pause_scale,
            "." | "!" | "?" => cursor += SENTENCE_END_PAUSE * pause_scale,
            word => {
                let end = (cursor + speaking * weight(word) / weight_total).min(duration);
                timings.push(WordTiming {
                    word: word.to_string(),
                    start_ms: to_ms(cursor),
                    end_ms: to_ms(end),
                });
                cursor = end;
            }
        }
    }
    timings
}

fn weight(word: &str) -> f64 {
    (word.chars().count() as f64).powf(LENGTH_WEIGHT)
}

fn to_ms(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Word captions in absolute pipeline time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionTrack {
    words: Vec<WordTiming>,
}

#[derive(Serialize)]
struct CaptionRecord<'a> {
    word: &'a str,
    start_ms: u64,
    end_ms: u64,
    duration_ms: u64,
}

impl CaptionTrack {
    pub fn new(words: Vec<WordTiming>) -> Self {
        Self { words }
    }

    /// Offset each entry's word timings by the entry's start time
    ///
    /// `texts[i]` is the narration text of entry `i`; it is only used when the
    /// speech engine reported no timings for that clip. Words never extend
    /// past the end of their own segment.
    pub fn from_timeline(timeline: &Timeline, texts: &[String]) -> Result<Self> {
        if texts.len() != timeline.len() {
            return Err(TimelineError::LengthMismatch {
                images: timeline.len(),
                durations: texts.len(),
            }
            .into());
        }

        let mut words = Vec::new();
        for (entry, text) in timeline.entries().iter().zip(texts) {
            let window = entry.window();
            let offset_ms = to_ms(window.start);
            let end_ms = to_ms(window.end);

            let relative = match &entry.clip.word_timings {
                Some(timings) => timings.clone(),
                None => estimate_word_timings(text, entry.clip.duration),
            };

            for timing in relative {
                let start_ms = (offset_ms + timing.start_ms).min(end_ms);
                let stop_ms = (offset_ms + timing.end_ms).min(end_ms);
                if stop_ms > start_ms {
                    words.push(WordTiming {
                        word: timing.word,
                        start_ms,
                        end_ms: stop_ms,
                    });
                }
            }
        }

        debug!("Caption track: {} words", words.len());
        Ok(Self { words })
    }

    pub fn words(&self) -> &[WordTiming] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Dump the track as pretty JSON for inspection
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let records: Vec<CaptionRecord> = self
            .words
            .iter()
            .map(|w| CaptionRecord {
                word: &w.word,
                start_ms: w.start_ms,
                end_ms: w.end_ms,
                duration_ms: w.end_ms.saturating_sub(w.start_ms),
            })
            .collect();
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| crate::error::NarratorError::generic(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Escape text for an unquoted drawtext `text=` value inside a filter graph
///
/// The option parser and the graph parser each strip one level of escaping.
pub fn escape_drawtext(text: &str) -> String {
    let mut option_level = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(c);
    }

    let mut graph_level = String::with_capacity(option_level.len());
    for c in option_level.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph_level.push('\\');
        }
        graph_level.push(c);
    }
    graph_level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::types::AudioClip;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_estimate_fills_clip_with_pauses() {
        let timings = estimate_word_timings("Hello, world.", 2.0);
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[0].word, "Hello");
        assert_eq!(timings[0].start_ms, 0);
        // comma pause sits between the two words
        assert_eq!(timings[1].start_ms, timings[0].end_ms + 200);
        // the trailing full stop leaves 400ms of silence
        assert_eq!(timings[1].end_ms, 1600);
    }

    #[test]
    fn test_longer_words_get_more_time() {
        let timings = estimate_word_timings("a extraordinarily", 3.0);
        let short = timings[0].end_ms - timings[0].start_ms;
        let long = timings[1].end_ms - timings[1].start_ms;
        assert!(long > short);
    }

    #[test]
    fn test_punctuation_only_text_has_no_words() {
        assert!(estimate_word_timings("?!...", 1.0).is_empty());
    }

    #[test]
    fn test_words_never_exceed_clip() {
        let timings = estimate_word_timings("Wait, what? No. Yes, fine.", 0.5);
        assert!(timings.iter().all(|t| t.end_ms <= 500));
    }

    #[test]
    fn test_track_is_offset_by_segment_start() {
        let mut second = AudioClip::new("1.wav", 2.0);
        second.word_timings = Some(vec![WordTiming {
            word: "late".to_string(),
            start_ms: 100,
            end_ms: 2500,
        }]);
        let timeline = Timeline::build(
            vec![PathBuf::from("0.png"), PathBuf::from("1.png")],
            vec![AudioClip::new("0.wav", 1.5), second],
        )
        .unwrap();

        let texts = vec!["Title here".to_string(), "ignored".to_string()];
        let track = CaptionTrack::from_timeline(&timeline, &texts).unwrap();

        let late = track.words().last().unwrap();
        assert_eq!(late.word, "late");
        assert_eq!(late.start_ms, 1600);
        // clipped to the segment end at 3.5s
        assert_eq!(late.end_ms, 3500);
        assert!(track.words()[0].start_ms < 1500);
    }

    #[test]
    fn test_text_count_must_match_timeline() {
        let timeline = Timeline::build(
            vec![PathBuf::from("0.png")],
            vec![AudioClip::new("0.wav", 1.0)],
        )
        .unwrap();
        assert!(CaptionTrack::from_timeline(&timeline, &[]).is_err());
    }

    #[test]
    fn test_write_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captions").join("words.json");
        let track = CaptionTrack::new(vec![WordTiming {
            word: "hi".to_string(),
            start_ms: 10,
            end_ms: 250,
        }]);
        track.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["word"], "hi");
        assert_eq!(value[0]["duration_ms"], 240);
    }

    #[test]
    fn test_drawtext_escaping() {
        assert_eq!(escape_drawtext("plain"), "plain");
        assert_eq!(escape_drawtext("a:b"), "a\\\\:b");
        assert_eq!(escape_drawtext("it's"), "it\\\\\\'s");
        assert_eq!(escape_drawtext("x,y"), "x\\,y");
    }
}

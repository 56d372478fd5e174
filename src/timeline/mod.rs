//! # Timeline Module
//!
//! Turns narration segments into an ordered, gap-free timeline of
//! (card, clip) pairs.
//!
//! - [`TimelineBuilder`] synthesizes segments in ranking order and keeps the
//!   ones that fit the duration budget
//! - [`Timeline`] pairs cards with clips and fixes each pair's start time
//! - [`CaptionTrack`] places word captions in absolute time

pub mod builder;
pub mod captions;
pub mod types;

pub use builder::{segment_audio_path, Selection, TimelineBuilder};
pub use captions::{escape_drawtext, estimate_word_timings, CaptionTrack};
pub use types::{
    AudioClip, NarrationSegment, Timeline, TimelineEntry, VisualCard, Window, WordTiming,
};

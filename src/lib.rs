//! # Reddit-Narrator
//!
//! Turn Reddit discussion threads into narrated short-form videos.
//!
//! A thread's title and top comments are spoken by a text-to-speech engine,
//! drawn as cards, laid over a background video in sync with the narration
//! and encoded with ffmpeg.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reddit_narrator::{
//!     composition::{ProduceOptions, ProductionEngine},
//!     config::Config,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = ProductionEngine::new(Config::default())?;
//! let production = engine
//!     .produce("https://www.reddit.com/r/AskReddit/comments/abc123/", &ProduceOptions::default())
//!     .await?;
//! println!("{}", production.output_path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`timeline`] - Budgeted segment selection and the card/clip timeline
//! - [`audio`] - Duration probing, speech synthesis, narration assembly
//! - [`video`] - Overlay planning, background generation, encoding and progress
//! - [`cards`] - Title and comment card rendering
//! - [`reddit`] - Thread fetching, post search and the produced-video record
//! - [`composition`] - The production engine tying it all together
//! - [`config`] - Configuration management
//!
//! ## Planning without encoding
//!
//! ```rust
//! use reddit_narrator::timeline::VisualCard;
//! use reddit_narrator::video::OverlayPlanner;
//!
//! let planner = OverlayPlanner::new((1080, 1920), 486, 0.92);
//! let cards = vec![VisualCard::new("title.png", 2.5), VisualCard::new("c1.png", 4.0)];
//! let plan = planner.plan(&cards, None).unwrap();
//! assert_eq!(plan.total_duration(), 6.5);
//! ```

pub mod audio;
pub mod cards;
pub mod composition;
pub mod config;
pub mod error;
pub mod reddit;
pub mod timeline;
pub mod video;

#[cfg(all(test, unix))]
mod testing;

// Re-export commonly used types for convenience
pub use crate::{
    composition::{ProduceOptions, Production, ProductionEngine},
    config::Config,
    error::{NarratorError, Result},
    timeline::{Timeline, TimelineBuilder},
    video::{Encoder, OverlayPlanner, RenderJob},
};

//! # Video Module
//!
//! Overlay planning, background generation and the ffmpeg encoder with its
//! progress monitor.

pub mod background;
pub mod encoder;
pub mod overlay;
pub mod progress;
pub mod types;

pub use background::{BackgroundCache, BackgroundGenerator};
pub use encoder::{EncodedVideo, Encoder, Strategy};
pub use overlay::{CaptionStyle, InputLayout, OverlayPlan, OverlayPlanner};
pub use progress::{ProgressCallback, ProgressMonitor};
pub use types::{BackgroundStyle, RenderJob, VideoParams};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audio::AudioTrack;
use crate::error::{ConfigError, Result};
use crate::video::overlay::OverlayPlan;

/// Output video parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    /// Target frame rate for output
    pub fps: f64,

    /// Target resolution (width, height)
    pub resolution: (u32, u32),

    /// Video codec to use for output
    pub codec: String,

    /// Opacity of every card after the title card
    pub opacity: f64,

    /// Card overlay width as a fraction of frame width
    pub card_width_ratio: f64,

    /// Finished videos land in `{output_dir}/{subreddit}/`
    pub output_dir: PathBuf,

    /// Per-thread workspaces are created under this directory
    pub workspace_root: PathBuf,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            fps: 30.0,
            resolution: (1080, 1920),
            codec: "libx264".to_string(),
            opacity: 0.92,
            card_width_ratio: 0.45,
            output_dir: PathBuf::from("results"),
            workspace_root: PathBuf::from("assets/temp"),
        }
    }
}

impl VideoParams {
    pub fn width(&self) -> u32 {
        self.resolution.0
    }

    pub fn height(&self) -> u32 {
        self.resolution.1
    }

    /// Overlay width in pixels, rounded down to an even number
    pub fn card_width(&self) -> u32 {
        let width = (self.width() as f64 * self.card_width_ratio).floor() as u32;
        (width & !1).max(2)
    }

    pub fn validate(&self) -> Result<()> {
        let (w, h) = self.resolution;
        if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
            return Err(ConfigError::InvalidValue {
                key: "video.resolution".to_string(),
                value: format!("{}x{}", w, h),
            }
            .into());
        }
        if !(self.fps > 0.0 && self.fps <= 120.0) {
            return Err(ConfigError::InvalidValue {
                key: "video.fps".to_string(),
                value: self.fps.to_string(),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ConfigError::InvalidValue {
                key: "video.opacity".to_string(),
                value: self.opacity.to_string(),
            }
            .into());
        }
        if !(self.card_width_ratio > 0.0 && self.card_width_ratio <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "video.card_width_ratio".to_string(),
                value: self.card_width_ratio.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Look of a generated background
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundStyle {
    Gradient,
    Radial,
    Noise,
}

impl BackgroundStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackgroundStyle::Gradient => "gradient",
            BackgroundStyle::Radial => "radial",
            BackgroundStyle::Noise => "noise",
        }
    }
}

/// Everything the encoder needs for one output file
///
/// Built once per run and never mutated.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub background_path: PathBuf,
    pub overlay_plan: OverlayPlan,
    pub audio: AudioTrack,
    pub output_path: PathBuf,
    pub resolution: (u32, u32),
    pub fps: f64,
}

impl RenderJob {
    pub fn new(
        background_path: PathBuf,
        overlay_plan: OverlayPlan,
        audio: AudioTrack,
        output_path: PathBuf,
        params: &VideoParams,
    ) -> Self {
        Self {
            background_path,
            overlay_plan,
            audio,
            output_path,
            resolution: params.resolution,
            fps: params.fps,
        }
    }

    /// Declared output length; the encoder caps the file at this value
    pub fn total_duration(&self) -> f64 {
        self.overlay_plan.total_duration()
    }

    pub fn card_width(&self) -> u32 {
        self.overlay_plan.card_width()
    }

    pub fn opacity(&self) -> f64 {
        self.overlay_plan.opacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_card_width() {
        let params = VideoParams::default();
        assert_eq!(params.card_width(), 486);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_odd_resolution_rejected() {
        let params = VideoParams {
            resolution: (1081, 1920),
            ..VideoParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_opacity_range() {
        let params = VideoParams {
            opacity: 1.2,
            ..VideoParams::default()
        };
        assert!(params.validate().is_err());
    }
}

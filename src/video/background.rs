use std::path::{Path, PathBuf};
use std::process::Stdio;

use image::{Rgb, RgbImage};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{CardError, EncodeError, Result};
use crate::video::BackgroundStyle;

/// Colour pairs blended by the gradient and radial styles
const SCHEMES: [([u8; 3], [u8; 3]); 5] = [
    ([75, 0, 130], [255, 20, 147]),
    ([0, 30, 100], [0, 180, 216]),
    ([255, 69, 0], [220, 20, 60]),
    ([0, 128, 128], [34, 139, 34]),
    ([138, 43, 226], [65, 105, 225]),
];

fn blend(a: [u8; 3], b: [u8; 3], t: f32) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    Rgb([
        (a[0] as f32 * (1.0 - t) + b[0] as f32 * t) as u8,
        (a[1] as f32 * (1.0 - t) + b[1] as f32 * t) as u8,
        (a[2] as f32 * (1.0 - t) + b[2] as f32 * t) as u8,
    ])
}

/// Paint a still frame in the given style
pub fn paint_still<R: Rng>(width: u32, height: u32, style: BackgroundStyle, rng: &mut R) -> RgbImage {
    let (from, to) = *SCHEMES.choose(rng).unwrap_or(&SCHEMES[0]);
    let w = (width.max(2) - 1) as f32;
    let h = (height.max(2) - 1) as f32;

    match style {
        BackgroundStyle::Gradient => RgbImage::from_fn(width, height, |x, y| {
            blend(from, to, y as f32 / h * 0.6 + x as f32 / w * 0.4)
        }),
        BackgroundStyle::Radial => RgbImage::from_fn(width, height, |x, y| {
            let dx = x as f32 / w * 2.0 - 1.0;
            let dy = y as f32 / h * 2.0 - 1.0;
            blend(from, to, (dx * dx + dy * dy).sqrt() / std::f32::consts::SQRT_2)
        }),
        BackgroundStyle::Noise => {
            let base = [
                rng.gen_range(30u8..=80),
                rng.gen_range(30u8..=80),
                rng.gen_range(40u8..=90),
            ];
            let mut image = RgbImage::new(width, height);
            for pixel in image.pixels_mut() {
                let n: u8 = rng.gen_range(0..=90);
                *pixel = Rgb([
                    base[0].saturating_add(n),
                    base[1].saturating_add(n),
                    base[2].saturating_add(n),
                ]);
            }
            image
        }
    }
}

/// Renders a slowly zooming background video from a painted still
pub struct BackgroundGenerator {
    ffmpeg_path: String,
    fps: u32,
}

impl BackgroundGenerator {
    pub fn new<S: Into<String>>(ffmpeg_path: S, fps: f64) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            fps: fps.round().max(1.0) as u32,
        }
    }

    /// Write a `seconds`-long (at least 1 s) video to `out_path`
    pub async fn generate(
        &self,
        out_path: &Path,
        width: u32,
        height: u32,
        seconds: u32,
        style: BackgroundStyle,
    ) -> Result<PathBuf> {
        let seconds = seconds.max(1);
        if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let still = tempfile::Builder::new()
            .prefix("background_")
            .suffix(".png")
            .tempfile()?;
        let image = paint_still(width, height, style, &mut SmallRng::from_entropy());
        image.save(still.path()).map_err(|e| CardError::SaveFailed {
            path: still.path().display().to_string(),
            reason: e.to_string(),
        })?;

        let fps = self.fps;
        let filter = format!(
            "zoompan=z='1.15+0.15*sin(on/{fps}/2)':x='iw/2-(iw/zoom/2)+sin(on/{fps})*20':y='ih/2-(ih/zoom/2)+cos(on/{fps})*20':d=1:s={w}x{h}:fps={fps},format=yuv420p",
            fps = fps,
            w = width,
            h = height
        );

        info!("🎨 Generating {} background {}x{} ({}s)", style.as_str(), width, height, seconds);
        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-loop", "1", "-framerate"])
            .arg(fps.to_string())
            .arg("-i")
            .arg(still.path())
            .args(["-vf", &filter, "-c:v", "libx264", "-pix_fmt", "yuv420p", "-r"])
            .arg(fps.to_string())
            .arg("-t")
            .arg(seconds.to_string())
            .args(["-movflags", "+faststart"])
            .arg(out_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EncodeError::FfmpegMissing {
                    path: self.ffmpeg_path.clone(),
                },
                _ => EncodeError::Spawn { reason: e.to_string() },
            })?;

        if !output.status.success() {
            return Err(EncodeError::ProcessFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(out_path.to_path_buf())
    }
}

/// Generated backgrounds kept on disk across runs
pub struct BackgroundCache {
    dir: PathBuf,
}

impl BackgroundCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, style: BackgroundStyle, width: u32, height: u32, seconds: u32) -> PathBuf {
        self.dir
            .join(format!("bg_{}_{}x{}_{}.mp4", style.as_str(), width, height, seconds))
    }

    pub fn get(&self, style: BackgroundStyle, width: u32, height: u32, seconds: u32) -> Option<PathBuf> {
        let path = self.path_for(style, width, height, seconds);
        let hit = std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
        debug!(
            "Background cache {}: {}",
            if hit { "hit" } else { "miss" },
            path.display()
        );
        hit.then_some(path)
    }

    /// Return a cached background, generating and storing it on a miss
    pub async fn get_or_generate(
        &self,
        generator: &BackgroundGenerator,
        style: BackgroundStyle,
        width: u32,
        height: u32,
        seconds: u32,
    ) -> Result<PathBuf> {
        let seconds = seconds.max(1);
        if let Some(path) = self.get(style, width, height, seconds) {
            return Ok(path);
        }

        std::fs::create_dir_all(&self.dir)?;
        let target = self.path_for(style, width, height, seconds);
        let staging = target.with_extension("part.mp4");

        match generator.generate(&staging, width, height, seconds, style).await {
            Ok(_) => {
                std::fs::rename(&staging, &target)?;
                Ok(target)
            }
            Err(e) => {
                if staging.exists() {
                    if let Err(rm) = std::fs::remove_file(&staging) {
                        warn!("Could not remove {}: {}", staging.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }
}

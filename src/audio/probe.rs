use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{ProbeError, Result};

/// Default number of remembered paths
pub const DEFAULT_PROBE_CACHE: usize = 256;

/// Media duration prober with a bounded per-path cache
///
/// One instance is created per pipeline run and shared by reference, so
/// cached values never leak between runs.
pub struct DurationProbe {
    ffprobe_path: String,
    capacity: usize,
    cache: Mutex<ProbeCache>,
}

#[derive(Default)]
struct ProbeCache {
    durations: HashMap<PathBuf, f64>,
    order: VecDeque<PathBuf>,
}

impl DurationProbe {
    pub fn new<S: Into<String>>(ffprobe_path: S) -> Self {
        Self::with_capacity(ffprobe_path, DEFAULT_PROBE_CACHE)
    }

    pub fn with_capacity<S: Into<String>>(ffprobe_path: S, capacity: usize) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            capacity: capacity.max(1),
            cache: Mutex::new(ProbeCache::default()),
        }
    }

    /// Duration of a media file in seconds, memoized per path
    pub fn duration<P: AsRef<Path>>(&self, path: P) -> Result<f64> {
        let path = path.as_ref();

        if let Some(cached) = self.cached(path) {
            return Ok(cached);
        }

        if !path.exists() {
            return Err(ProbeError::NotFound { path: path.display().to_string() }.into());
        }

        let duration = sanitize(self.probe_uncached(path)?);
        debug!("Probed {}: {:.3}s", path.display(), duration);
        self.remember(path, duration);
        Ok(duration)
    }

    /// Forget one path (used when a file is rewritten in place)
    pub fn invalidate<P: AsRef<Path>>(&self, path: P) {
        if let Ok(mut cache) = self.cache.lock() {
            let path = path.as_ref();
            cache.durations.remove(path);
            cache.order.retain(|p| p != path);
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|c| c.durations.len()).unwrap_or(0)
    }

    fn cached(&self, path: &Path) -> Option<f64> {
        self.cache.lock().ok()?.durations.get(path).copied()
    }

    fn remember(&self, path: &Path, duration: f64) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        if cache.durations.insert(path.to_path_buf(), duration).is_none() {
            cache.order.push_back(path.to_path_buf());
        }
        while cache.order.len() > self.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.durations.remove(&oldest);
            }
        }
    }

    fn probe_uncached(&self, path: &Path) -> Result<f64> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "wav" => match probe_wav(path) {
                Ok(d) => Ok(d),
                Err(e) => {
                    warn!("hound could not read {}: {}; trying ffprobe", path.display(), e);
                    self.probe_ffprobe(path)
                }
            },
            "mp3" | "flac" | "ogg" | "m4a" | "aac" => match probe_symphonia(path) {
                Some(d) => Ok(d),
                None => self.probe_ffprobe(path),
            },
            _ => self.probe_ffprobe(path),
        }
    }

    fn probe_ffprobe(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v", "error",
                "-show_entries", "format=duration",
                "-of", "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .map_err(|e| ProbeError::ProbeFailed {
                path: path.display().to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProbeError::ProbeFailed {
                path: path.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_duration(&stdout).ok_or_else(|| {
            ProbeError::Unreadable {
                path: path.display().to_string(),
                reason: format!("unexpected ffprobe output '{}'", stdout.trim()),
            }
            .into()
        })
    }
}

/// WAV duration from the header (frames / sample rate)
fn probe_wav(path: &Path) -> std::result::Result<f64, hound::Error> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(0.0);
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Compressed audio duration from container metadata, when it is declared
fn probe_symphonia(path: &Path) -> Option<f64> {
    let file = File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .ok()?;

    let track = probed.format.default_track()?;
    let params = &track.codec_params;
    let n_frames = params.n_frames?;

    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(n_frames);
        return Some(time.seconds as f64 + time.frac);
    }
    params
        .sample_rate
        .filter(|rate| *rate > 0)
        .map(|rate| n_frames as f64 / rate as f64)
}

fn parse_ffprobe_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
}

fn sanitize(duration: f64) -> f64 {
    if duration.is_finite() {
        duration.max(0.0)
    } else {
        0.0
    }
}

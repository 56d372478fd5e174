use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, info, warn};

use crate::audio::DurationProbe;
use crate::config::EncoderConfig;
use crate::error::{EncodeError, Result, TimelineError};

/// Narration track handed to the encoder
#[derive(Debug, Clone, PartialEq)]
pub enum AudioTrack {
    /// Concatenated narration only
    Narration(PathBuf),

    /// Narration with a looping bed mixed underneath; the mix runs as long
    /// as the longer operand and the encoder caps it at the timeline total
    Mixed {
        narration: PathBuf,
        bed: PathBuf,
        volume: f64,
    },
}

impl AudioTrack {
    pub fn narration(&self) -> &Path {
        match self {
            AudioTrack::Narration(path) => path,
            AudioTrack::Mixed { narration, .. } => narration,
        }
    }

    pub fn bed(&self) -> Option<(&Path, f64)> {
        match self {
            AudioTrack::Narration(_) => None,
            AudioTrack::Mixed { bed, volume, .. } => Some((bed.as_path(), *volume)),
        }
    }
}

/// Joins segment audio into one narration track
pub struct AudioAssembler {
    ffmpeg_path: String,
    audio_bitrate: String,
}

impl AudioAssembler {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
        }
    }

    /// Concatenate `paths` in order into `out_path`
    ///
    /// Returns the sum of the inputs' probed durations, not the duration of
    /// the written file.
    pub fn concat(&self, paths: &[PathBuf], out_path: &Path, probe: &DurationProbe) -> Result<f64> {
        if paths.is_empty() {
            return Err(TimelineError::EmptyAudio.into());
        }

        let mut total = 0.0;
        for path in paths {
            total += probe.duration(path)?.max(0.0);
        }

        let list_path = out_path.with_extension("concat.txt");
        write_concat_list(&list_path, paths)?;
        debug!("Concatenating {} audio files via {}", paths.len(), list_path.display());

        // stream copy keeps the first header, so mixed formats would play at the wrong speed
        let copied = if same_wav_format(paths) {
            let output = self.run(&list_path, out_path, &["-c", "copy"])?;
            if !output.status.success() {
                warn!("Stream copy concat failed; retrying with re-encode");
            }
            output.status.success()
        } else {
            warn!("Narration clips differ in WAV format; re-encoding");
            false
        };
        if !copied {
            let reencode = self.reencode_args(out_path);
            let args: Vec<&str> = reencode.iter().map(String::as_str).collect();
            let output = self.run(&list_path, out_path, &args)?;
            if !output.status.success() {
                let _ = std::fs::remove_file(&list_path);
                return Err(EncodeError::ProcessFailed {
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
                .into());
            }
        }

        let _ = std::fs::remove_file(&list_path);
        probe.invalidate(out_path);
        info!("Narration track: {} clips, {:.2}s", paths.len(), total);
        Ok(total)
    }

    fn run(&self, list_path: &Path, out_path: &Path, codec_args: &[&str]) -> Result<Output> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"])
            .arg(list_path)
            .args(codec_args)
            .arg(out_path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EncodeError::FfmpegMissing {
                    path: self.ffmpeg_path.clone(),
                },
                _ => EncodeError::Spawn { reason: e.to_string() },
            })?;
        Ok(output)
    }

    fn reencode_args(&self, out_path: &Path) -> Vec<String> {
        let is_wav = out_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        if is_wav {
            vec!["-c:a".into(), "pcm_s16le".into(), "-ar".into(), "44100".into()]
        } else {
            vec!["-b:a".into(), self.audio_bitrate.clone()]
        }
    }
}

/// True when every input is a WAV with the same rate, channel count and
/// sample format; anything unreadable counts as a mismatch
fn same_wav_format(paths: &[PathBuf]) -> bool {
    let mut first: Option<hound::WavSpec> = None;
    for path in paths {
        let spec = match hound::WavReader::open(path) {
            Ok(reader) => reader.spec(),
            Err(e) => {
                debug!("Not a readable WAV {}: {}", path.display(), e);
                return false;
            }
        };
        match first {
            None => first = Some(spec),
            Some(expected) if expected != spec => {
                debug!(
                    "{} is {} Hz/{}ch, expected {} Hz/{}ch",
                    path.display(),
                    spec.sample_rate,
                    spec.channels,
                    expected.sample_rate,
                    expected.channels
                );
                return false;
            }
            Some(_) => {}
        }
    }
    true
}

/// Decide whether a background bed is mixed under the narration
///
/// A missing path, a file that does not exist or a non-positive volume all
/// leave the narration unchanged.
pub fn mix_background(narration: &Path, bed: Option<&Path>, volume: f64) -> AudioTrack {
    match bed {
        Some(bed) if volume > 0.0 && bed.exists() => {
            debug!("Mixing background audio {} at {:.2}", bed.display(), volume);
            AudioTrack::Mixed {
                narration: narration.to_path_buf(),
                bed: bed.to_path_buf(),
                volume,
            }
        }
        Some(bed) if volume > 0.0 => {
            warn!("Background audio {} not found; narration only", bed.display());
            AudioTrack::Narration(narration.to_path_buf())
        }
        _ => AudioTrack::Narration(narration.to_path_buf()),
    }
}

fn write_concat_list(list_path: &Path, paths: &[PathBuf]) -> Result<()> {
    let mut file = std::fs::File::create(list_path)?;
    for path in paths {
        let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        let escaped = absolute.display().to_string().replace('\'', "'\\''");
        writeln!(file, "file '{}'", escaped)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::probe::tests::{write_wav, write_wav_at};
    use tempfile::tempdir;

    fn assembler(ffmpeg: &Path) -> AudioAssembler {
        AudioAssembler::new(&EncoderConfig {
            ffmpeg_path: ffmpeg.display().to_string(),
            ..EncoderConfig::default()
        })
    }

    #[test]
    fn test_empty_input_is_precondition_error() {
        let dir = tempdir().unwrap();
        let probe = DurationProbe::new("ffprobe");
        let err = assembler(Path::new("ffmpeg"))
            .concat(&[], &dir.path().join("out.wav"), &probe)
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_mix_is_noop_without_bed() {
        let narration = Path::new("narration.wav");
        assert_eq!(
            mix_background(narration, None, 0.5),
            AudioTrack::Narration(narration.to_path_buf())
        );
    }

    #[test]
    fn test_mix_is_noop_for_missing_file_or_zero_volume() {
        let dir = tempdir().unwrap();
        let narration = dir.path().join("narration.wav");
        let bed = dir.path().join("bed.wav");

        let missing = mix_background(&narration, Some(&bed), 0.3);
        assert!(missing.bed().is_none());

        write_wav(&bed, 0.5);
        let muted = mix_background(&narration, Some(&bed), 0.0);
        assert!(muted.bed().is_none());

        let mixed = mix_background(&narration, Some(&bed), 0.3);
        assert_eq!(mixed.bed(), Some((bed.as_path(), 0.3)));
    }

    #[cfg(unix)]
    #[test]
    fn test_concat_returns_sum_of_inputs() {
        let dir = tempdir().unwrap();
        let (ffmpeg, log) = crate::testing::ffmpeg_ok(dir.path());
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_wav(&a, 1.25);
        write_wav(&b, 2.5);

        let probe = DurationProbe::new("ffprobe");
        let out = dir.path().join("narration.wav");
        let total = assembler(&ffmpeg).concat(&[a, b], &out, &probe).unwrap();

        assert!((total - 3.75).abs() < 1e-6);
        let calls = crate::testing::invocations(&log);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].windows(2).any(|w| w == ["-c", "copy"]));
    }

    #[cfg(unix)]
    #[test]
    fn test_concat_falls_back_to_reencode() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let ffmpeg = crate::testing::script(
            dir.path(),
            "ffmpeg-copy-fails",
            &format!(
                "echo \"$*\" >> '{}'\ncase \"$*\" in *\"-c copy\"*) exit 1;; esac\nexit 0",
                log.display()
            ),
        );
        let a = dir.path().join("a.wav");
        write_wav(&a, 0.5);

        let probe = DurationProbe::new("ffprobe");
        let total = assembler(&ffmpeg)
            .concat(&[a], &dir.path().join("narration.wav"), &probe)
            .unwrap();

        assert!((total - 0.5).abs() < 1e-6);
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 2);
        assert!(calls.contains("pcm_s16le"));
    }

    #[cfg(unix)]
    #[test]
    fn test_mixed_sample_rates_skip_stream_copy() {
        let dir = tempdir().unwrap();
        let (ffmpeg, log) = crate::testing::ffmpeg_ok(dir.path());
        let title = dir.path().join("title.wav");
        let comment = dir.path().join("comment_000.wav");
        write_wav_at(&title, 1.0, 22050);
        write_wav_at(&comment, 2.0, 16000);

        let probe = DurationProbe::new("ffprobe");
        let total = assembler(&ffmpeg)
            .concat(&[title, comment], &dir.path().join("narration.wav"), &probe)
            .unwrap();

        assert!((total - 3.0).abs() < 1e-6);
        let calls = crate::testing::invocations(&log);
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].windows(2).any(|w| w == ["-c", "copy"]));
        assert!(calls[0].windows(2).any(|w| w == ["-c:a", "pcm_s16le"]));
    }

    #[test]
    fn test_wav_format_comparison() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        let c = dir.path().join("c.wav");
        let junk = dir.path().join("junk.wav");
        write_wav_at(&a, 0.1, 22050);
        write_wav_at(&b, 0.2, 22050);
        write_wav_at(&c, 0.1, 16000);
        std::fs::write(&junk, b"not audio").unwrap();

        assert!(same_wav_format(&[a.clone(), b.clone()]));
        assert!(!same_wav_format(&[a.clone(), c]));
        assert!(!same_wav_format(&[a, junk]));
    }

    #[cfg(unix)]
    #[test]
    fn test_concat_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let ffmpeg = crate::testing::ffmpeg_failing(dir.path(), "Invalid data found");
        let a = dir.path().join("a.wav");
        write_wav(&a, 0.5);

        let probe = DurationProbe::new("ffprobe");
        let err = assembler(&ffmpeg)
            .concat(&[a], &dir.path().join("narration.wav"), &probe)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid data found"));
    }
}

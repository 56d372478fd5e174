use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::audio::AudioTrack;
use crate::config::EncoderConfig;
use crate::error::{CompositionError, EncodeError, Result};
use crate::video::overlay::{compile_graph, Filter, FilterChain, InputLayout, Pad};
use crate::video::progress::{ProgressCallback, ProgressChannel, ProgressMonitor};
use crate::video::RenderJob;

/// Shortest output ever requested from ffmpeg
const MIN_OUTPUT_SECONDS: f64 = 0.1;

const AUDIO_OUT: &str = "aout";

/// How the filter graph reaches ffmpeg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `-filter_complex <graph>` on the command line
    Inline,
    /// `-filter_complex_script <file>`, for graphs that would overflow the
    /// argument length limit
    Script,
}

/// A finished encode
#[derive(Debug, Clone)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub duration: f64,
    pub file_size: u64,
    pub strategy: Strategy,
    pub elapsed: Duration,
}

/// Drives ffmpeg to combine background, overlays and audio into one file
pub struct Encoder {
    config: EncoderConfig,
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn check_ffmpeg_available(&self) -> bool {
        std::process::Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub fn choose_strategy(&self, element_count: usize) -> Strategy {
        if element_count > self.config.script_threshold {
            Strategy::Script
        } else {
            Strategy::Inline
        }
    }

    /// Full filter graph for a job: overlays, then the audio mix if any
    pub fn filter_graph(&self, job: &RenderJob) -> String {
        let layout = InputLayout::standard(job.audio.bed().is_some());
        let mut chains: Vec<FilterChain> = job.overlay_plan.chains().to_vec();
        chains.extend(audio_chains(&job.audio));
        compile_graph(&chains, &layout)
    }

    /// Command-line arguments, excluding the program name
    pub fn build_args(
        &self,
        job: &RenderJob,
        graph: GraphSource<'_>,
        output: &Path,
        with_progress: bool,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |s: &str| args.push(OsString::from(s));

        push("-y");
        push("-hide_banner");
        push("-nostats");
        push("-loglevel");
        push("error");
        if with_progress {
            push("-progress");
            push("pipe:1");
        }

        push("-stream_loop");
        push("-1");
        push("-i");
        args.push(job.background_path.clone().into_os_string());

        args.push("-i".into());
        args.push(job.audio.narration().as_os_str().to_owned());

        if let Some((bed, _)) = job.audio.bed() {
            args.extend(["-stream_loop".into(), "-1".into(), "-i".into()]);
            args.push(bed.as_os_str().to_owned());
        }

        for card in job.overlay_plan.cards() {
            args.push("-i".into());
            args.push(card.as_os_str().to_owned());
        }

        match graph {
            GraphSource::Inline(text) => {
                args.push("-filter_complex".into());
                args.push(text.into());
            }
            GraphSource::Script(path) => {
                args.push("-filter_complex_script".into());
                args.push(path.as_os_str().to_owned());
            }
        }

        let audio_map = if job.audio.bed().is_some() {
            format!("[{}]", AUDIO_OUT)
        } else {
            "1:a".to_string()
        };
        let total = job.total_duration().max(MIN_OUTPUT_SECONDS);

        for value in [
            "-map".to_string(),
            format!("[{}]", job.overlay_plan.output_label()),
            "-map".to_string(),
            audio_map,
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.config.preset.clone(),
            "-b:v".to_string(),
            self.config.video_bitrate.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            format!("{}", job.fps),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-t".to_string(),
            format!("{:.3}", total),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-threads".to_string(),
            self.config.threads().to_string(),
            "-f".to_string(),
            "mp4".to_string(),
        ] {
            args.push(value.into());
        }
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Encode `job` into `job.output_path`
    ///
    /// ffmpeg writes to a `.part` sibling that is renamed only after a zero
    /// exit, so the output path never holds a partial file.
    pub async fn render(&self, job: &RenderJob, on_progress: Option<ProgressCallback>) -> Result<EncodedVideo> {
        if !job.background_path.exists() {
            return Err(CompositionError::BackgroundNotFound {
                path: job.background_path.display().to_string(),
            }
            .into());
        }

        let started = Instant::now();
        let strategy = self.choose_strategy(job.overlay_plan.element_count());
        let graph = self.filter_graph(job);
        info!(
            "🎞️ Encoding {} overlay elements ({:?} strategy), {:.2}s",
            job.overlay_plan.element_count(),
            strategy,
            job.total_duration()
        );

        if let Some(parent) = job.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let part_path = part_path(&job.output_path);

        // Kept alive until ffmpeg exits; removed on drop
        let script = match strategy {
            Strategy::Script => Some(write_script(&graph, &job.output_path)?),
            Strategy::Inline => None,
        };
        let source = match &script {
            Some(file) => GraphSource::Script(file.path()),
            None => GraphSource::Inline(&graph),
        };

        let args = self.build_args(job, source, &part_path, on_progress.is_some());
        debug!("ffmpeg {:?}", args);

        let result = self.run(args, job.total_duration(), on_progress).await;
        drop(script);

        if let Err(e) = result {
            remove_partial(&part_path);
            return Err(e);
        }

        std::fs::rename(&part_path, &job.output_path)?;
        let file_size = std::fs::metadata(&job.output_path).map(|m| m.len()).unwrap_or(0);
        let elapsed = started.elapsed();
        info!(
            "✅ Encoded {} ({:.1} MB) in {:.1}s",
            job.output_path.display(),
            file_size as f64 / 1024.0 / 1024.0,
            elapsed.as_secs_f64()
        );

        Ok(EncodedVideo {
            path: job.output_path.clone(),
            duration: job.total_duration(),
            file_size,
            strategy,
            elapsed,
        })
    }

    async fn run(&self, args: Vec<OsString>, total: f64, on_progress: Option<ProgressCallback>) -> Result<()> {
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(if on_progress.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EncodeError::FfmpegMissing {
                path: self.config.ffmpeg_path.clone(),
            },
            _ => EncodeError::Spawn { reason: e.to_string() },
        })?;

        // Drained concurrently so a full pipe never stalls ffmpeg
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut monitor = None;
        if let (Some(callback), Some(stdout)) = (on_progress, child.stdout.take()) {
            let channel = ProgressChannel::new();
            tokio::spawn(std::sync::Arc::clone(&channel).pump(stdout));
            monitor = Some(ProgressMonitor::start(
                channel,
                total,
                Duration::from_millis(self.config.progress_poll_ms),
                callback,
            ));
        }

        let status = match self.config.timeout_secs {
            Some(seconds) => {
                let waited = tokio::time::timeout(Duration::from_secs(seconds), child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!("ffmpeg exceeded {}s, terminating", seconds);
                        if let Err(e) = child.kill().await {
                            debug!("Could not kill ffmpeg: {}", e);
                        }
                        if let Some(monitor) = monitor {
                            monitor.stop(false).await;
                        }
                        if let Some(task) = stderr_task {
                            task.abort();
                        }
                        return Err(EncodeError::TimedOut { seconds }.into());
                    }
                }
            }
            None => child.wait().await?,
        };

        if let Some(monitor) = monitor {
            monitor.stop(status.success()).await;
        }

        if !status.success() {
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_else(|_| "failed to read ffmpeg stderr".to_string()),
                None => String::new(),
            };
            return Err(EncodeError::ProcessFailed {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Where ffmpeg reads the filter graph from
#[derive(Debug, Clone, Copy)]
pub enum GraphSource<'a> {
    Inline(&'a str),
    Script(&'a Path),
}

fn audio_chains(track: &AudioTrack) -> Vec<FilterChain> {
    match track.bed() {
        None => Vec::new(),
        Some((_, volume)) => vec![
            FilterChain::new(vec![Pad::Bed], vec![Filter::Volume(volume)], "bed"),
            FilterChain::new(
                vec![Pad::Narration, Pad::label("bed")],
                vec![Filter::Amix { inputs: 2 }],
                AUDIO_OUT,
            ),
        ],
    }
}

fn part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn write_script(graph: &str, output: &Path) -> Result<tempfile::NamedTempFile> {
    let dir = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);

    let script_error = |e: std::io::Error| EncodeError::ScriptWrite {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };

    let mut file = tempfile::Builder::new()
        .prefix("filter_graph_")
        .suffix(".txt")
        .tempfile_in(&dir)
        .map_err(script_error)?;
    file.write_all(graph.as_bytes()).map_err(script_error)?;
    file.flush().map_err(script_error)?;
    debug!("Filter graph script: {} ({} bytes)", file.path().display(), graph.len());
    Ok(file)
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Could not remove partial output {}: {}", path.display(), e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::mix_background;
    use crate::testing;
    use crate::timeline::VisualCard;
    use crate::video::{OverlayPlanner, VideoParams};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn encoder(ffmpeg: &Path, threshold: usize) -> Encoder {
        Encoder::new(EncoderConfig {
            ffmpeg_path: ffmpeg.display().to_string(),
            script_threshold: threshold,
            progress_poll_ms: 5,
            ..EncoderConfig::default()
        })
    }

    fn job(dir: &Path, durations: &[f64]) -> RenderJob {
        let background = dir.join("bg.mp4");
        std::fs::write(&background, b"not really a video").unwrap();
        let cards: Vec<VisualCard> = durations
            .iter()
            .enumerate()
            .map(|(i, d)| VisualCard::new(dir.join(format!("card_{}.png", i)), *d))
            .collect();
        let params = VideoParams::default();
        let plan = OverlayPlanner::from_params(&params).plan(&cards, None).unwrap();
        RenderJob::new(
            background,
            plan,
            AudioTrack::Narration(dir.join("narration.wav")),
            dir.join("out").join("video.mp4"),
            &params,
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[tokio::test]
    async fn test_inline_strategy_below_threshold() {
        let dir = tempdir().unwrap();
        let (ffmpeg, log) = testing::ffmpeg_ok(dir.path());
        let job = job(dir.path(), &[2.0, 3.0]);

        let encoded = encoder(&ffmpeg, 24).render(&job, None).await.unwrap();

        assert_eq!(encoded.strategy, Strategy::Inline);
        assert!(job.output_path.exists());
        assert!(!part_path(&job.output_path).exists());

        let args = &testing::invocations(&log)[0];
        assert!(value_after(args, "-filter_complex").unwrap().contains("[vout]"));
        assert_eq!(value_after(args, "-t"), Some("5.000"));
        assert_eq!(value_after(args, "-map"), Some("[vout]"));
        assert!(args.iter().all(|a| a != "-filter_complex_script"));
    }

    #[tokio::test]
    async fn test_script_strategy_above_threshold() {
        let dir = tempdir().unwrap();
        let copy = dir.path().join("graph_copy.txt");
        let log = dir.path().join("args.log");
        let ffmpeg = testing::script(
            dir.path(),
            "ffmpeg-script",
            &format!(
                "prev=''\nfor a in \"$@\"; do\n  echo \"$a\" >> '{log}'\n  if [ \"$prev\" = '-filter_complex_script' ]; then cp \"$a\" '{copy}'; fi\n  prev=\"$a\"\ndone\necho '--' >> '{log}'\nfor last; do :; done\n: > \"$last\"",
                log = log.display(),
                copy = copy.display()
            ),
        );
        let job = job(dir.path(), &[1.0, 1.5, 2.5]);
        let encoder = encoder(&ffmpeg, 2);

        let encoded = encoder.render(&job, None).await.unwrap();
        assert_eq!(encoded.strategy, Strategy::Script);

        let args = &testing::invocations(&log)[0];
        assert!(args.iter().all(|a| a != "-filter_complex"));
        assert_eq!(value_after(args, "-t"), Some("5.000"));

        // the script carries exactly the graph the inline strategy would pass
        let written = std::fs::read_to_string(&copy).unwrap();
        assert_eq!(written, encoder.filter_graph(&job));

        // script file is gone once the encode is over
        let script_path = value_after(args, "-filter_complex_script").unwrap();
        assert!(!Path::new(script_path).exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let ffmpeg = testing::ffmpeg_failing(dir.path(), "Error initializing filter 'overlay'");
        let job = job(dir.path(), &[1.0]);

        let err = encoder(&ffmpeg, 24).render(&job, None).await.unwrap_err();

        assert!(!err.is_precondition());
        assert!(err.to_string().contains("Error initializing filter"));
        assert!(!job.output_path.exists());
        assert!(!part_path(&job.output_path).exists());
    }

    #[tokio::test]
    async fn test_missing_background_fails_before_spawn() {
        let dir = tempdir().unwrap();
        let mut job = job(dir.path(), &[1.0]);
        job.background_path = dir.path().join("missing.mp4");

        let err = encoder(Path::new("/nonexistent/ffmpeg"), 24)
            .render(&job, None)
            .await
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_binary() {
        let dir = tempdir().unwrap();
        let job = job(dir.path(), &[1.0]);
        let err = encoder(Path::new("/nonexistent/ffmpeg"), 24)
            .render(&job, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::NarratorError::Encode(EncodeError::FfmpegMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_cleans_up() {
        let dir = tempdir().unwrap();
        let ffmpeg = testing::script(
            dir.path(),
            "ffmpeg-hangs",
            "for last; do :; done\n: > \"$last\"\nexec sleep 30",
        );
        let job = job(dir.path(), &[1.0]);
        let encoder = Encoder::new(EncoderConfig {
            ffmpeg_path: ffmpeg.display().to_string(),
            timeout_secs: Some(1),
            ..EncoderConfig::default()
        });

        let err = encoder.render(&job, None).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::NarratorError::Encode(EncodeError::TimedOut { seconds: 1 })
        ));
        assert!(!part_path(&job.output_path).exists());
        assert!(!job.output_path.exists());
    }

    #[tokio::test]
    async fn test_progress_reaches_completion() {
        let dir = tempdir().unwrap();
        let ffmpeg = testing::script(
            dir.path(),
            "ffmpeg-progress",
            "echo 'out_time_ms=1000000'\necho 'progress=continue'\nsleep 0.05\necho 'out_time_ms=500000'\necho 'out_time_ms=3000000'\necho 'progress=end'\nfor last; do :; done\n: > \"$last\"",
        );
        let job = job(dir.path(), &[2.0, 2.0]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |f| sink.lock().unwrap().push(f));

        encoder(&ffmpeg, 24).render(&job, Some(callback)).await.unwrap();

        let values = seen.lock().unwrap().clone();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values.last().copied(), Some(1.0));
    }

    #[test]
    fn test_bed_adds_input_and_mix() {
        let dir = tempdir().unwrap();
        let bed = dir.path().join("bed.mp3");
        std::fs::write(&bed, b"x").unwrap();

        let mut job = job(dir.path(), &[1.0, 1.0]);
        job.audio = mix_background(&dir.path().join("narration.wav"), Some(&bed), 0.12);
        let encoder = encoder(Path::new("ffmpeg"), 24);

        let graph = encoder.filter_graph(&job);
        assert!(graph.contains("[2:a]volume=0.120[bed]"));
        assert!(graph.ends_with("[1:a][bed]amix=inputs=2:duration=longest[aout]"));
        // cards move up one input slot
        assert!(graph.contains("[3:v]scale="));

        let args: Vec<String> = encoder
            .build_args(&job, GraphSource::Inline(&graph), Path::new("o.mp4"), false)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[aout]"));
        assert_eq!(args.iter().filter(|a| *a == "-stream_loop").count(), 2);
    }
}

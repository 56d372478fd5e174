use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::{
    audio::{mix_background, synthesize_parallel, AudioAssembler, DurationProbe, SynthResult, VoiceChain},
    cards::{CardRenderer, FontCache},
    config::{Config, DurationMode},
    error::{CompositionError, Result, TimelineError},
    reddit::{extract_thread_id, Comment, ProducedVideosTracker, RedditClient, SearchCriteria, Thread},
    timeline::{AudioClip, CaptionTrack, NarrationSegment, Selection, Timeline, TimelineBuilder, VisualCard},
    video::{
        BackgroundCache, BackgroundGenerator, CaptionStyle, Encoder, OverlayPlanner, ProgressCallback, RenderJob,
        Strategy,
    },
};

const MAX_TITLE_CHARS: usize = 120;

/// Per-run overrides on top of the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct ProduceOptions {
    /// Comments to fetch (overrides `duration.max_comments`)
    pub max_comments: Option<usize>,

    /// Background video (overrides `background.path`)
    pub background: Option<PathBuf>,

    /// Keep the per-thread workspace after a successful run
    pub keep_temp: bool,

    /// Use the long-form duration budget
    pub long_form: bool,
}

/// Pipeline stage, used to report where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Fetch,
    Speech,
    Cards,
    Background,
    Assembly,
    Encode,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Fetch => "fetch",
            Phase::Speech => "speech",
            Phase::Cards => "cards",
            Phase::Background => "background",
            Phase::Assembly => "assembly",
            Phase::Encode => "encode",
        };
        f.write_str(name)
    }
}

/// Wall-clock time spent in each phase of one run
#[derive(Debug, Clone, Default)]
pub struct PhaseTimings {
    pub fetch: Duration,
    pub tts: Duration,
    pub cards: Duration,
    pub background: Duration,
    pub assembly: Duration,
    pub encode: Duration,
    pub total: Duration,
}

impl PhaseTimings {
    pub fn log_summary(&self) {
        info!("⏱️  Phase timings:");
        for (name, took) in [
            ("fetch", self.fetch),
            ("tts", self.tts),
            ("cards", self.cards),
            ("background", self.background),
            ("assembly", self.assembly),
            ("encode", self.encode),
        ] {
            info!("      {:<10} {:>7.2}s", name, took.as_secs_f64());
        }
        info!("      {:<10} {:>7.2}s", "total", self.total.as_secs_f64());
    }
}

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct Production {
    pub thread_id: String,
    pub title: String,
    pub output_path: PathBuf,
    pub duration: f64,

    /// Narrated segments including the title
    pub segments: usize,

    pub strategy: Strategy,
    pub timings: PhaseTimings,
}

/// Drives fetch, speech, cards, background, assembly and encoding for one
/// thread at a time
///
/// The engine owns the per-run collaborators (speech chain, duration probe,
/// font cache, Reddit client). Nothing is shared between engines. Speech,
/// card rendering and audio concatenation run on the blocking pool.
pub struct ProductionEngine {
    config: Config,
    voice: Arc<VoiceChain>,
    probe: Arc<DurationProbe>,
    fonts: Arc<FontCache>,
    reddit: RedditClient,
}

impl ProductionEngine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let voice = Arc::new(VoiceChain::from_config(&config.voice));
        let probe = Arc::new(DurationProbe::new(config.encoder.ffprobe_path.clone()));
        let reddit = RedditClient::new(&config.reddit)?;
        Ok(Self {
            config,
            voice,
            probe,
            fonts: Arc::new(FontCache::default()),
            reddit,
        })
    }

    /// Replace the speech chain built from the configuration
    pub fn with_voice(mut self, voice: VoiceChain) -> Self {
        self.voice = Arc::new(voice);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch a thread by URL or id and turn it into a video
    pub async fn produce(&self, url_or_id: &str, options: &ProduceOptions) -> Result<Production> {
        let config = self.effective_config(options);
        let thread_id = extract_thread_id(url_or_id)?;
        info!("🎬 Producing video for thread {}", thread_id);

        let started = Instant::now();
        let thread = match self
            .reddit
            .fetch_thread(&thread_id, config.duration.fetch_limit(), config.reddit.prefer_top_comments)
            .await
        {
            Ok(thread) => thread,
            Err(e) => {
                error!("❌ Phase '{}' failed for {}: {}", Phase::Fetch, thread_id, e);
                return Err(e);
            }
        };
        let fetched = started.elapsed();

        let mut production = self.produce_thread(thread, options).await?;
        production.timings.fetch = fetched;
        production.timings.total += fetched;
        Ok(production)
    }

    /// Find the first unproduced post in the configured subreddits, produce
    /// it and record it as produced
    pub async fn produce_next(&self, options: &ProduceOptions) -> Result<Production> {
        let automation = &self.config.automation;
        let mut tracker = ProducedVideosTracker::load(&automation.produced_db);
        let criteria = SearchCriteria::from_config(automation);

        let post = self
            .reddit
            .find_suitable_post(&automation.subreddits, &criteria, &tracker)
            .await?
            .ok_or(CompositionError::NoSuitablePost)?;

        let production = self.produce(&post.id, options).await?;
        if let Err(e) = tracker.mark_produced(&post.id) {
            warn!("Could not record {} as produced: {}", post.id, e);
        }
        Ok(production)
    }

    /// Produce a video from an already fetched thread
    pub async fn produce_thread(&self, thread: Thread, options: &ProduceOptions) -> Result<Production> {
        let config = self.effective_config(options);
        let started = Instant::now();

        if thread.title.trim().is_empty() {
            return Err(CompositionError::MissingTitle.into());
        }
        let background = options.background.clone().or_else(|| config.background.path.clone());
        match &background {
            None if !config.background.auto_generate => return Err(CompositionError::MissingBackground.into()),
            Some(path) if !path.is_file() => {
                return Err(CompositionError::BackgroundNotFound {
                    path: path.display().to_string(),
                }
                .into())
            }
            _ => {}
        }

        let workspace = config.video.workspace_root.join(sanitize_folder(&thread.id));
        let mut phase = Phase::Setup;
        let mut timings = PhaseTimings::default();

        let result = self
            .run(&config, &thread, background.as_deref(), &workspace, &mut phase, &mut timings)
            .await;

        match result {
            Ok(mut production) => {
                timings.total = started.elapsed();
                production.timings = timings;
                production.timings.log_summary();

                if options.keep_temp {
                    info!("Keeping workspace {}", workspace.display());
                } else if let Err(e) = std::fs::remove_dir_all(&workspace) {
                    warn!("Could not remove workspace {}: {}", workspace.display(), e);
                }
                info!("🎉 Video ready: {}", production.output_path.display());
                Ok(production)
            }
            Err(e) => {
                error!("❌ Phase '{}' failed for {}: {}", phase, thread.id, e);
                if workspace.exists() {
                    warn!("Workspace left for inspection: {}", workspace.display());
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        config: &Config,
        thread: &Thread,
        background: Option<&Path>,
        workspace: &Path,
        phase: &mut Phase,
        timings: &mut PhaseTimings,
    ) -> Result<Production> {
        let audio_dir = workspace.join("audio");
        let cards_dir = workspace.join("cards");
        std::fs::create_dir_all(&audio_dir)?;
        std::fs::create_dir_all(&cards_dir)?;
        let dump = serde_json::to_string_pretty(thread).map_err(std::io::Error::from)?;
        std::fs::write(workspace.join("thread.json"), dump)?;

        // Step 1: narration
        *phase = Phase::Speech;
        let step = Instant::now();
        info!("🗣️  Step 1: Synthesizing narration...");
        let (title_clip, selection) = {
            let voice = Arc::clone(&self.voice);
            let probe = Arc::clone(&self.probe);
            let title = thread.title.clone();
            let comments = thread.comments.clone();
            let target = config.duration.target_seconds();
            let workers = config.voice.parallel_workers;
            let audio_dir = audio_dir.clone();
            blocking(Phase::Speech, move || {
                let title_clip = synthesize_title(&voice, &probe, &title, &audio_dir)?;
                let remaining = (target - title_clip.duration).max(0.0);
                info!(
                    "   Title {:.2}s, {:.2}s of {:.2}s left for comments",
                    title_clip.duration, remaining, target
                );
                let selection = select_comments(&voice, &probe, &comments, remaining, workers, &audio_dir)?;
                Ok((title_clip, selection))
            })
            .await?
        };
        timings.tts = step.elapsed();

        // Step 2: cards
        *phase = Phase::Cards;
        let step = Instant::now();
        info!("🃏 Step 2: Rendering cards...");
        let selected: Vec<Comment> = selection
            .selected
            .iter()
            .filter_map(|segment| thread.comments.get(segment.source_rank).cloned())
            .collect();
        let (title_card, comment_cards) = {
            let fonts = Arc::clone(&self.fonts);
            let card_config = config.cards.clone();
            let title = thread.title.clone();
            let subreddit = thread.subreddit.clone();
            let cards_dir = cards_dir.clone();
            blocking(Phase::Cards, move || {
                let renderer = CardRenderer::new(&fonts, &card_config)?;
                let title_card = renderer.render_title(&title, &subreddit, &cards_dir.join("title.png"))?;
                let comment_cards = renderer.render_comments(&selected, &cards_dir)?;
                Ok((title_card, comment_cards))
            })
            .await?
        };

        let mut timeline = Timeline::default();
        timeline.push(
            VisualCard::new(&title_card.path, 0.0).with_size(title_card.width, title_card.height),
            title_clip,
        )?;
        for (card, clip) in comment_cards.iter().zip(selection.clips.iter().cloned()) {
            timeline.push(VisualCard::new(&card.path, 0.0).with_size(card.width, card.height), clip)?;
        }
        timings.cards = step.elapsed();
        debug!("Timeline: {} entries, {:.2}s", timeline.len(), timeline.total_duration());

        // Step 3: background
        *phase = Phase::Background;
        let step = Instant::now();
        info!("🌄 Step 3: Preparing background...");
        let background_path = self
            .prepare_background(config, background, workspace, timeline.total_duration())
            .await?;
        timings.background = step.elapsed();

        // Step 4: audio and overlay plan
        *phase = Phase::Assembly;
        let step = Instant::now();
        info!("🧩 Step 4: Assembling audio and overlays...");
        let clip_paths: Vec<PathBuf> = timeline.entries().iter().map(|e| e.clip.path.clone()).collect();
        let narration = workspace.join("narration.wav");
        {
            let assembler = AudioAssembler::new(&config.encoder);
            let probe = Arc::clone(&self.probe);
            let narration = narration.clone();
            blocking(Phase::Assembly, move || assembler.concat(&clip_paths, &narration, &probe)).await?;
        }

        let bed = config.background.audio_path.as_deref();
        if let Some(bed) = bed.filter(|p| !p.exists()) {
            warn!("Background audio {} not found; narration only", bed.display());
        }
        let audio = mix_background(&narration, bed, config.background.effective_volume());

        let mut planner = OverlayPlanner::from_params(&config.video);
        let captions = if config.captions.enabled {
            let mut texts = vec![thread.title.clone()];
            texts.extend(selection.selected.iter().map(|s| s.text.clone()));
            let track = CaptionTrack::from_timeline(&timeline, &texts)?;
            track.write_json(workspace.join("captions.json"))?;
            planner = planner.with_captions(CaptionStyle::from_config(&config.captions, config.video.height()));
            Some(track)
        } else {
            None
        };
        let plan = planner.plan_timeline(&timeline, captions.as_ref())?;

        let output_path = output_path(&config.video.output_dir, &thread.subreddit, &thread.title);
        let job = RenderJob::new(background_path, plan, audio, output_path, &config.video);
        timings.assembly = step.elapsed();

        // Step 5: encode
        *phase = Phase::Encode;
        let step = Instant::now();
        info!("🎞️  Step 5: Encoding {}...", job.output_path.display());
        let encoded = Encoder::new(config.encoder.clone())
            .render(&job, Some(progress_logger()))
            .await?;
        timings.encode = step.elapsed();

        Ok(Production {
            thread_id: thread.id.clone(),
            title: thread.title.clone(),
            output_path: encoded.path,
            duration: encoded.duration,
            segments: timeline.len(),
            strategy: encoded.strategy,
            timings: PhaseTimings::default(),
        })
    }

    async fn prepare_background(
        &self,
        config: &Config,
        supplied: Option<&Path>,
        workspace: &Path,
        total_duration: f64,
    ) -> Result<PathBuf> {
        if let Some(source) = supplied {
            if !source.is_file() {
                return Err(CompositionError::BackgroundNotFound {
                    path: source.display().to_string(),
                }
                .into());
            }
            let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
            let target = workspace.join(format!("background.{}", ext));
            std::fs::copy(source, &target)?;
            info!("   Using supplied background {}", source.display());
            return Ok(target);
        }

        if !config.background.auto_generate {
            return Err(CompositionError::MissingBackground.into());
        }

        let seconds = if config.background.seconds > 0 {
            config.background.seconds
        } else {
            total_duration.max(0.0).ceil() as u32 + 1
        };
        let generator = BackgroundGenerator::new(config.encoder.ffmpeg_path.clone(), config.video.fps);
        BackgroundCache::new(&config.background.cache_dir)
            .get_or_generate(
                &generator,
                config.background.style,
                config.video.width(),
                config.video.height(),
                seconds,
            )
            .await
    }

    fn effective_config(&self, options: &ProduceOptions) -> Config {
        let mut config = self.config.clone();
        if options.long_form {
            config.duration.mode = DurationMode::Long;
        }
        if let Some(n) = options.max_comments {
            config.duration.max_comments = n.max(1);
        }
        config
    }
}

/// Run synchronous work (child processes, rayon pools, rasterizing) off the
/// async workers
async fn blocking<T, F>(phase: Phase, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| CompositionError::PhaseFailed {
        phase: phase.to_string(),
        reason: format!("worker task failed: {}", e),
    })?
}

/// The title is the one segment that must be spoken
fn synthesize_title(voice: &VoiceChain, probe: &DurationProbe, title: &str, audio_dir: &Path) -> Result<AudioClip> {
    let path = audio_dir.join("title.wav");
    let result = voice.synthesize(title, &path);
    let timings = result.timings().map(|t| t.to_vec());
    let audio = match result {
        SynthResult::Failure { reason } => {
            return Err(CompositionError::PhaseFailed {
                phase: Phase::Speech.to_string(),
                reason: format!("title could not be synthesized: {}", reason),
            }
            .into())
        }
        SynthResult::Fallback { audio, reason } => {
            warn!("Title spoken by the fallback engine: {}", reason);
            audio
        }
        SynthResult::Success { audio, .. } => audio,
    };

    let duration = probe.duration(&audio)?;
    Ok(AudioClip {
        path: audio,
        duration,
        word_timings: timings,
    })
}

fn select_comments(
    voice: &VoiceChain,
    probe: &DurationProbe,
    comments: &[Comment],
    budget: f64,
    workers: usize,
    audio_dir: &Path,
) -> Result<Selection> {
    if comments.is_empty() {
        warn!("Thread has no usable comments; producing a title-only video");
        return Ok(Selection::default());
    }

    let segments: Vec<NarrationSegment> = comments
        .iter()
        .enumerate()
        .map(|(rank, c)| NarrationSegment::new(c.body.clone(), rank))
        .collect();
    let builder = TimelineBuilder::new(voice, probe).with_prefix("comment");

    let selection = if workers > 1 {
        debug!("Parallel synthesis with {} workers", workers);
        let results = synthesize_parallel(&segments, voice, audio_dir, "comment", workers);
        builder.select_synthesized(&segments, &results, budget)
    } else {
        builder.select(&segments, budget, audio_dir)
    };

    if selection.is_empty() {
        return Err(TimelineError::NoSegmentsSelected.into());
    }
    Ok(selection)
}

/// Logs encode progress in 10% steps
fn progress_logger() -> ProgressCallback {
    let last_decile = Arc::new(AtomicU64::new(0));
    Arc::new(move |fraction: f64| {
        let decile = (fraction * 10.0).floor() as u64;
        if decile > last_decile.fetch_max(decile, Ordering::Relaxed) {
            info!("   Encoding {:>3.0}%", fraction * 100.0);
        }
    })
}

/// Keep word characters, whitespace and `-`
pub fn sanitize_folder(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "thread".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Strip characters unsafe in file names, collapse whitespace, cap at 120 chars
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '?' | '\\' | '/' | '"' | '%' | '*' | ':' | '|' | '<' | '>'))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let capped = capped.trim_end();
    if capped.is_empty() {
        "video".to_string()
    } else {
        capped.to_string()
    }
}

/// `{output_dir}/{subreddit}/{title}.mp4`
pub fn output_path(output_dir: &Path, subreddit: &str, title: &str) -> PathBuf {
    output_dir
        .join(sanitize_folder(subreddit))
        .join(format!("{}.mp4", sanitize_filename(title)))
}

use std::fmt::{self, Write as _};
use std::path::PathBuf;

use tracing::debug;

use crate::config::CaptionConfig;
use crate::error::{Result, TimelineError};
use crate::timeline::{escape_drawtext, CaptionTrack, Timeline, VisualCard, Window};
use crate::video::VideoParams;

/// Stream reference inside a filter graph
#[derive(Debug, Clone, PartialEq)]
pub enum Pad {
    /// Video stream of the background input
    Background,
    /// Narration audio input
    Narration,
    /// Background audio bed input
    Bed,
    /// Image input of the card with this index
    Card(usize),
    /// Intermediate labelled stream
    Label(String),
}

impl Pad {
    pub fn label<S: Into<String>>(name: S) -> Self {
        Pad::Label(name.into())
    }
}

/// Positions of the encoder's inputs, used to resolve [`Pad`]s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputLayout {
    pub background: usize,
    pub narration: usize,
    pub bed: Option<usize>,
    pub first_card: usize,
}

impl InputLayout {
    /// background, narration, optional bed, then cards
    pub fn standard(with_bed: bool) -> Self {
        Self {
            background: 0,
            narration: 1,
            bed: with_bed.then_some(2),
            first_card: if with_bed { 3 } else { 2 },
        }
    }

    fn resolve(&self, pad: &Pad) -> String {
        match pad {
            Pad::Background => format!("[{}:v]", self.background),
            Pad::Narration => format!("[{}:a]", self.narration),
            Pad::Bed => format!("[{}:a]", self.bed.unwrap_or(self.narration)),
            Pad::Card(index) => format!("[{}:v]", self.first_card + index),
            Pad::Label(name) => format!("[{}]", name),
        }
    }
}

/// Styling for burned-in word captions
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionStyle {
    pub font_size: u32,
    pub font_color: String,
    pub border_color: String,
    pub border_width: u32,
    /// Top edge of the text in pixels
    pub y: u32,
    pub font_path: Option<PathBuf>,
}

impl CaptionStyle {
    pub fn from_config(config: &CaptionConfig, frame_height: u32) -> Self {
        Self {
            font_size: config.font_size,
            font_color: config.font_color.clone(),
            border_color: config.border_color.clone(),
            border_width: config.border_width,
            y: (frame_height as f64 * config.y_fraction).round() as u32,
            font_path: config.font_path.clone(),
        }
    }
}

/// One typed filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Scale to `width:height`; `-1` keeps the aspect ratio
    Scale { width: i32, height: i32 },
    SetSar,
    /// Convert to a pixel format (`rgba` before alpha changes)
    Format(&'static str),
    /// Multiply the alpha channel
    Opacity(f64),
    /// Centre the second input over the first while `window` is active
    Overlay { window: Window },
    /// Burn one word in while `window` is active
    DrawText {
        text: String,
        window: Window,
        style: CaptionStyle,
    },
    Volume(f64),
    /// Mix `inputs` audio streams; the result is as long as the longest one
    Amix { inputs: usize },
}

/// `gte(t,S)*lt(t,E)`: half-open, so a boundary instant belongs to the later window
fn enable_expr(window: &Window) -> String {
    format!("'gte(t,{:.3})*lt(t,{:.3})'", window.start, window.end)
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Scale { width, height } => write!(f, "scale={}:{}", width, height),
            Filter::SetSar => write!(f, "setsar=1"),
            Filter::Format(pix_fmt) => write!(f, "format={}", pix_fmt),
            Filter::Opacity(alpha) => write!(f, "colorchannelmixer=aa={:.3}", alpha),
            Filter::Overlay { window } => write!(
                f,
                "overlay=x=(main_w-overlay_w)/2:y=(main_h-overlay_h)/2:enable={}",
                enable_expr(window)
            ),
            Filter::DrawText { text, window, style } => {
                write!(f, "drawtext=")?;
                if let Some(font) = &style.font_path {
                    write!(f, "fontfile={}:", escape_drawtext(&font.display().to_string()))?;
                }
                write!(
                    f,
                    "text={}:expansion=none:fontsize={}:fontcolor={}:borderw={}:bordercolor={}:x=(w-text_w)/2:y={}:enable={}",
                    escape_drawtext(text),
                    style.font_size,
                    style.font_color,
                    style.border_width,
                    style.border_color,
                    style.y,
                    enable_expr(window)
                )
            }
            Filter::Volume(gain) => write!(f, "volume={:.3}", gain),
            Filter::Amix { inputs } => write!(f, "amix=inputs={}:duration=longest", inputs),
        }
    }
}

/// Inputs, a linear run of filters, and one output label
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    pub inputs: Vec<Pad>,
    pub filters: Vec<Filter>,
    pub output: String,
}

impl FilterChain {
    pub fn new(inputs: Vec<Pad>, filters: Vec<Filter>, output: impl Into<String>) -> Self {
        Self {
            inputs,
            filters,
            output: output.into(),
        }
    }

    pub fn compile(&self, layout: &InputLayout) -> String {
        let mut out = String::new();
        for pad in &self.inputs {
            out.push_str(&layout.resolve(pad));
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{}", filter);
        }
        let _ = write!(out, "[{}]", self.output);
        out
    }
}

/// Compile chains into one `;`-separated filter graph
pub fn compile_graph(chains: &[FilterChain], layout: &InputLayout) -> String {
    chains
        .iter()
        .map(|chain| chain.compile(layout))
        .collect::<Vec<_>>()
        .join(";")
}

/// Video half of the filter graph: background, timed cards, captions
#[derive(Debug, Clone)]
pub struct OverlayPlan {
    chains: Vec<FilterChain>,
    cards: Vec<PathBuf>,
    windows: Vec<Window>,
    caption_words: usize,
    total_duration: f64,
    card_width: u32,
    opacity: f64,
}

/// Label of the finished video stream
pub const VIDEO_OUT: &str = "vout";

impl OverlayPlan {
    pub fn chains(&self) -> &[FilterChain] {
        &self.chains
    }

    /// Card image inputs in overlay order
    pub fn cards(&self) -> &[PathBuf] {
        &self.cards
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Overlay elements counted against the script threshold
    pub fn element_count(&self) -> usize {
        self.cards.len() + self.caption_words
    }

    pub fn caption_words(&self) -> usize {
        self.caption_words
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn card_width(&self) -> u32 {
        self.card_width
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    pub fn output_label(&self) -> &str {
        VIDEO_OUT
    }

    pub fn compile(&self, layout: &InputLayout) -> String {
        compile_graph(&self.chains, layout)
    }
}

/// Maps timed cards (and optional captions) onto a filter graph
#[derive(Debug, Clone)]
pub struct OverlayPlanner {
    resolution: (u32, u32),
    card_width: u32,
    opacity: f64,
    caption_style: Option<CaptionStyle>,
}

impl OverlayPlanner {
    pub fn new(resolution: (u32, u32), card_width: u32, opacity: f64) -> Self {
        Self {
            resolution,
            card_width,
            opacity,
            caption_style: None,
        }
    }

    pub fn from_params(params: &VideoParams) -> Self {
        Self::new(params.resolution, params.card_width(), params.opacity)
    }

    pub fn with_captions(mut self, style: CaptionStyle) -> Self {
        self.caption_style = Some(style);
        self
    }

    pub fn plan_timeline(&self, timeline: &Timeline, captions: Option<&CaptionTrack>) -> Result<OverlayPlan> {
        self.plan(&timeline.cards(), captions)
    }

    /// Plan from parallel image and duration lists
    pub fn plan_images(
        &self,
        images: &[PathBuf],
        durations: &[f64],
        captions: Option<&CaptionTrack>,
    ) -> Result<OverlayPlan> {
        if images.len() != durations.len() {
            return Err(TimelineError::LengthMismatch {
                images: images.len(),
                durations: durations.len(),
            }
            .into());
        }
        let cards: Vec<VisualCard> = images
            .iter()
            .zip(durations)
            .map(|(path, duration)| VisualCard::new(path.clone(), *duration))
            .collect();
        self.plan(&cards, captions)
    }

    /// Place each card in `[start, start + duration)` where `start` is the
    /// running sum of the durations before it
    pub fn plan(&self, cards: &[VisualCard], captions: Option<&CaptionTrack>) -> Result<OverlayPlan> {
        if cards.is_empty() {
            return Err(TimelineError::EmptyImages.into());
        }

        let (width, height) = self.resolution;
        let mut chains = vec![FilterChain::new(
            vec![Pad::Background],
            vec![
                Filter::Scale {
                    width: width as i32,
                    height: height as i32,
                },
                Filter::SetSar,
            ],
            "bg",
        )];

        let caption_words = match (captions, &self.caption_style) {
            (Some(track), Some(_)) => track.len(),
            _ => 0,
        };

        let mut windows = Vec::with_capacity(cards.len());
        let mut start = 0.0;
        let mut current = "bg".to_string();

        for (index, card) in cards.iter().enumerate() {
            let duration = card.duration;
            if !duration.is_finite() || duration < 0.0 {
                return Err(TimelineError::InvalidDuration { index, duration }.into());
            }
            let window = Window::new(start, duration);
            windows.push(window);
            start = window.end;

            let mut filters = vec![Filter::Scale {
                width: self.card_width as i32,
                height: -1,
            }];
            if index > 0 {
                filters.push(Filter::Format("rgba"));
                filters.push(Filter::Opacity(self.opacity));
            }
            let image = format!("img{}", index);
            chains.push(FilterChain::new(vec![Pad::Card(index)], filters, image.clone()));

            let is_last = index + 1 == cards.len();
            let next = if is_last && caption_words == 0 {
                VIDEO_OUT.to_string()
            } else {
                format!("v{}", index)
            };
            chains.push(FilterChain::new(
                vec![Pad::label(current.clone()), Pad::label(image)],
                vec![Filter::Overlay { window }],
                next.clone(),
            ));
            current = next;
        }

        if let (Some(track), Some(style), true) = (captions, &self.caption_style, caption_words > 0) {
            let filters = track
                .words()
                .iter()
                .map(|word| Filter::DrawText {
                    text: word.word.clone(),
                    window: Window {
                        start: word.start_ms as f64 / 1000.0,
                        end: word.end_ms as f64 / 1000.0,
                    },
                    style: style.clone(),
                })
                .collect();
            chains.push(FilterChain::new(vec![Pad::label(current)], filters, VIDEO_OUT));
        }

        debug!(
            "Overlay plan: {} cards, {} caption words, {:.2}s",
            cards.len(),
            caption_words,
            start
        );

        Ok(OverlayPlan {
            chains,
            cards: cards.iter().map(|c| c.path.clone()).collect(),
            windows,
            caption_words,
            total_duration: start,
            card_width: self.card_width,
            opacity: self.opacity,
        })
    }
}

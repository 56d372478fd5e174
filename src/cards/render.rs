use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fontdue::layout::{
    CoordinateSystem, GlyphRasterConfig, HorizontalAlign, Layout, LayoutSettings, TextStyle,
    VerticalAlign, WrapStyle,
};
use fontdue::Font;
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::cards::FontCache;
use crate::config::CardConfig;
use crate::error::{CardError, Result};
use crate::reddit::Comment;

/// A card written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCard {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Panel geometry and palette
#[derive(Debug, Clone)]
pub struct CardTheme {
    pub card_width: u32,
    pub padding: u32,
    pub radius: u32,
    pub title_size: f32,
    pub subtitle_size: f32,
    pub author_size: f32,
    pub body_size: f32,
    pub meta_size: f32,
    pub panel: [u8; 4],
    pub border: [u8; 4],
    pub shadow: [u8; 4],
    pub text: [u8; 4],
    pub muted: [u8; 4],
    pub accent: [u8; 4],
    pub author: [u8; 4],
    pub badge: [u8; 4],
}

impl CardTheme {
    pub fn from_config(config: &CardConfig) -> Self {
        Self {
            card_width: config.card_width.max(200),
            title_size: config.title_font_size,
            body_size: config.body_font_size,
            ..Self::default()
        }
    }
}

impl Default for CardTheme {
    fn default() -> Self {
        Self {
            card_width: 920,
            padding: 56,
            radius: 40,
            title_size: 56.0,
            subtitle_size: 32.0,
            author_size: 34.0,
            body_size: 40.0,
            meta_size: 26.0,
            panel: [15, 15, 20, 245],
            border: [138, 180, 248, 180],
            shadow: [0, 0, 0, 80],
            text: [255, 255, 255, 255],
            muted: [200, 200, 210, 240],
            accent: [138, 180, 248, 255],
            author: [100, 180, 255, 255],
            badge: [180, 100, 255, 140],
        }
    }
}

const TITLE_MIN_HEIGHT: u32 = 540;
const COMMENT_MIN_HEIGHT: u32 = 740;
const SHADOW_OFFSET: u32 = 6;
const BORDER_WIDTH: u32 = 3;
const COMMENT_HEADER: u32 = 120;

/// Greedy word wrap against a width function
///
/// Words wider than `max_width` on their own are split by character.
pub fn wrap_words<F>(text: &str, max_width: f32, measure: F) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if measure(&candidate) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if measure(word) <= max_width {
                current = word.to_string();
            } else {
                for c in word.chars() {
                    current.push(c);
                    if measure(&current) > max_width && current.chars().count() > 1 {
                        current.pop();
                        lines.push(std::mem::replace(&mut current, c.to_string()));
                    }
                }
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

/// `1234567` -> `1,234,567`
pub fn format_score(score: i64) -> String {
    let digits = score.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if score < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

fn rounded_rect_contains(x: u32, y: u32, rect: Rect, radius: u32) -> bool {
    if rect.w == 0 || rect.h == 0 {
        return false;
    }
    let right = rect.x + rect.w;
    let bottom = rect.y + rect.h;
    if x < rect.x || x >= right || y < rect.y || y >= bottom {
        return false;
    }
    if radius == 0 {
        return true;
    }

    // distance from the nearest corner centre, only inside the corner squares
    let cx = if x < rect.x + radius {
        rect.x + radius
    } else if x >= right - radius {
        right - radius - 1
    } else {
        return true;
    };
    let cy = if y < rect.y + radius {
        rect.y + radius
    } else if y >= bottom - radius {
        bottom - radius - 1
    } else {
        return true;
    };
    let dx = x as f32 - cx as f32;
    let dy = y as f32 - cy as f32;
    dx * dx + dy * dy <= (radius as f32) * (radius as f32)
}

/// Source-over compositing onto a possibly transparent pixel
fn blend_pixel(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let sa = src[3] as f32 / 255.0;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let value = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        dst[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round() as u8;
}

fn fill_rounded_rect(canvas: &mut RgbaImage, rect: Rect, radius: u32, color: [u8; 4]) {
    let (width, height) = canvas.dimensions();
    let radius = radius.min(rect.w / 2).min(rect.h / 2);
    let x1 = rect.x.saturating_add(rect.w).min(width);
    let y1 = rect.y.saturating_add(rect.h).min(height);
    for y in rect.y.min(height)..y1 {
        for x in rect.x.min(width)..x1 {
            if rounded_rect_contains(x, y, rect, radius) {
                blend_pixel(canvas.get_pixel_mut(x, y), color);
            }
        }
    }
}

fn stroke_rounded_rect(canvas: &mut RgbaImage, rect: Rect, radius: u32, color: [u8; 4], thickness: u32) {
    let (width, height) = canvas.dimensions();
    let thickness = thickness.min(rect.w / 2).min(rect.h / 2).max(1);
    let radius = radius.min(rect.w / 2).min(rect.h / 2);
    let inner = Rect {
        x: rect.x + thickness,
        y: rect.y + thickness,
        w: rect.w - thickness * 2,
        h: rect.h - thickness * 2,
    };
    let inner_radius = radius.saturating_sub(thickness);
    let x1 = rect.x.saturating_add(rect.w).min(width);
    let y1 = rect.y.saturating_add(rect.h).min(height);
    for y in rect.y.min(height)..y1 {
        for x in rect.x.min(width)..x1 {
            if rounded_rect_contains(x, y, rect, radius)
                && !rounded_rect_contains(x, y, inner, inner_radius)
            {
                blend_pixel(canvas.get_pixel_mut(x, y), color);
            }
        }
    }
}

/// Horizontal rule that fades out towards both ends
fn draw_divider(canvas: &mut RgbaImage, x: u32, y: u32, length: u32, color: [u8; 3], peak_alpha: u8) {
    let (width, height) = canvas.dimensions();
    let span = length.max(2) as f32 - 1.0;
    for i in 0..length {
        let t = i as f32 / span;
        let alpha = (peak_alpha as f32 * (1.0 - (t - 0.5).abs() * 2.0)).round() as u8;
        for dy in 0..2 {
            let (px, py) = (x + i, y + dy);
            if px < width && py < height {
                blend_pixel(canvas.get_pixel_mut(px, py), [color[0], color[1], color[2], alpha]);
            }
        }
    }
}

struct GlyphBitmap {
    width: usize,
    height: usize,
    bitmap: Vec<u8>,
}

/// Lays out and rasterizes single lines of text onto a canvas
struct TextPainter<'f> {
    font: &'f Font,
    glyph_cache: HashMap<GlyphRasterConfig, GlyphBitmap>,
    layout: Layout,
}

impl<'f> TextPainter<'f> {
    fn new(font: &'f Font) -> Self {
        Self {
            font,
            glyph_cache: HashMap::new(),
            layout: Layout::new(CoordinateSystem::PositiveYDown),
        }
    }

    fn measure(&self, text: &str, size: f32) -> f32 {
        text.chars()
            .map(|c| self.font.metrics(c, size).advance_width)
            .sum()
    }

    fn wrap(&self, text: &str, size: f32, max_width: u32) -> Vec<String> {
        wrap_words(text, max_width as f32, |line| self.measure(line, size))
    }

    fn draw_line(&mut self, canvas: &mut RgbaImage, x: u32, y: u32, text: &str, size: f32, color: [u8; 4]) {
        self.layout.reset(&LayoutSettings {
            x: x as f32,
            y: y as f32,
            max_width: None,
            max_height: None,
            horizontal_align: HorizontalAlign::Left,
            vertical_align: VerticalAlign::Top,
            line_height: 1.0,
            wrap_style: WrapStyle::Word,
            wrap_hard_breaks: false,
        });
        self.layout.append(&[self.font], &TextStyle::new(text, size, 0));

        let font = self.font;
        for glyph in self.layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let bitmap = self.glyph_cache.entry(glyph.key).or_insert_with(|| {
                let (_, bitmap) = font.rasterize_config(glyph.key);
                GlyphBitmap {
                    width: glyph.width,
                    height: glyph.height,
                    bitmap,
                }
            });
            blend_glyph(canvas, glyph.x.round() as i32, glyph.y.round() as i32, bitmap, color);
        }
    }
}

fn blend_glyph(canvas: &mut RgbaImage, x: i32, y: i32, glyph: &GlyphBitmap, color: [u8; 4]) {
    let (width, height) = canvas.dimensions();
    for row in 0..glyph.height {
        let py = y + row as i32;
        if py < 0 || py >= height as i32 {
            continue;
        }
        for col in 0..glyph.width {
            let px = x + col as i32;
            if px < 0 || px >= width as i32 {
                continue;
            }
            let mask = glyph.bitmap[row * glyph.width + col];
            if mask == 0 {
                continue;
            }
            let alpha = ((u16::from(mask) * u16::from(color[3])) / 255) as u8;
            blend_pixel(
                canvas.get_pixel_mut(px as u32, py as u32),
                [color[0], color[1], color[2], alpha],
            );
        }
    }
}

fn line_height(size: f32) -> u32 {
    (size * 1.22).round().max(1.0) as u32
}

/// Draws title and comment cards as translucent PNG panels
pub struct CardRenderer {
    font: Arc<Font>,
    theme: CardTheme,
}

impl CardRenderer {
    /// Resolve the configured (or a system) font through `fonts`
    pub fn new(fonts: &FontCache, config: &CardConfig) -> Result<Self> {
        let font = fonts.resolve(config.font_path.as_deref())?;
        Ok(Self::with_font(font, CardTheme::from_config(config)))
    }

    pub fn with_font(font: Arc<Font>, theme: CardTheme) -> Self {
        Self { font, theme }
    }

    pub fn theme(&self) -> &CardTheme {
        &self.theme
    }

    /// Panel with an accent bar, the wrapped title and `r/<subreddit>` underneath
    pub fn render_title(&self, title: &str, subreddit: &str, out_path: &Path) -> Result<RenderedCard> {
        let theme = &self.theme;
        let mut painter = TextPainter::new(&self.font);
        let width = theme.card_width;
        let text_x = theme.padding + 32;
        let max_text_w = width.saturating_sub(2 * theme.padding + 40);

        let title_lines = painter.wrap(title.trim(), theme.title_size, max_text_w);
        let subtitle = if subreddit.trim().is_empty() {
            String::new()
        } else {
            format!("r/{}", subreddit.trim())
        };
        let subtitle_lines = painter.wrap(&subtitle, theme.subtitle_size, max_text_w);

        let title_lh = line_height(theme.title_size);
        let sub_lh = line_height(theme.subtitle_size);
        let gap = if subtitle_lines.is_empty() { 20 } else { 40 };
        let content = 2 * theme.padding
            + title_lines.len() as u32 * title_lh
            + gap
            + subtitle_lines.len() as u32 * sub_lh
            + 20;
        let height = content.max(TITLE_MIN_HEIGHT);

        let mut canvas = self.panel(width, height);
        let bar = Rect {
            x: theme.padding - 4,
            y: theme.padding,
            w: 12,
            h: height.saturating_sub(2 * theme.padding),
        };
        for spread in (1..=4u32).rev() {
            let glow = Rect {
                x: bar.x.saturating_sub(spread * 2),
                y: bar.y,
                w: bar.w + spread * 4,
                h: bar.h,
            };
            let alpha = (50 * spread / 4) as u8;
            fill_rounded_rect(&mut canvas, glow, 8, [100, 180, 255, alpha]);
        }
        fill_rounded_rect(&mut canvas, bar, 8, theme.accent);

        let mut y = theme.padding;
        for line in &title_lines {
            painter.draw_line(&mut canvas, text_x, y, line, theme.title_size, theme.text);
            y += title_lh;
        }
        if !subtitle_lines.is_empty() {
            y += 16;
            for line in &subtitle_lines {
                painter.draw_line(&mut canvas, text_x, y, line, theme.subtitle_size, theme.muted);
                y += sub_lh;
            }
        }

        self.save(canvas, out_path)
    }

    /// Panel with `u/<author>`, a score badge, a divider and the wrapped body
    pub fn render_comment(&self, author: &str, body: &str, score: i64, out_path: &Path) -> Result<RenderedCard> {
        let theme = &self.theme;
        let mut painter = TextPainter::new(&self.font);
        let width = theme.card_width;
        let max_text_w = width.saturating_sub(2 * theme.padding);

        let body_lines = painter.wrap(body.trim(), theme.body_size, max_text_w);
        let body_lh = line_height(theme.body_size);
        let content = 2 * theme.padding + COMMENT_HEADER + body_lines.len() as u32 * body_lh + 30;
        let height = content.max(COMMENT_MIN_HEIGHT);

        let mut canvas = self.panel(width, height);
        let x = theme.padding;
        let y = theme.padding;
        painter.draw_line(&mut canvas, x, y, &format!("u/{}", author), theme.author_size, theme.author);

        let meta = format!("{} points", format_score(score));
        let badge_w = painter.measure(&meta, theme.meta_size).ceil() as u32 + 24;
        let badge_h = theme.meta_size.ceil() as u32 + 16;
        let badge = Rect {
            x: width.saturating_sub(theme.padding + badge_w),
            y: y.saturating_sub(4),
            w: badge_w,
            h: badge_h,
        };
        fill_rounded_rect(&mut canvas, badge, 16, theme.badge);
        painter.draw_line(&mut canvas, badge.x + 12, badge.y + 8, &meta, theme.meta_size, theme.text);

        let divider_y = y + 64;
        let rgb = [theme.border[0], theme.border[1], theme.border[2]];
        draw_divider(&mut canvas, x, divider_y, max_text_w, rgb, 60);

        let mut line_y = divider_y + 28;
        for line in &body_lines {
            painter.draw_line(&mut canvas, x, line_y, line, theme.body_size, theme.text);
            line_y += body_lh;
        }

        self.save(canvas, out_path)
    }

    /// One card per comment, rendered in parallel, returned in input order
    ///
    /// Files are named `comment_001.png`, `comment_002.png`, ... in `dir`.
    pub fn render_comments(&self, comments: &[Comment], dir: &Path) -> Result<Vec<RenderedCard>> {
        std::fs::create_dir_all(dir)?;
        let cards = comments
            .par_iter()
            .enumerate()
            .map(|(i, comment)| {
                let path = dir.join(format!("comment_{:03}.png", i + 1));
                self.render_comment(&comment.author, &comment.body, comment.score, &path)
            })
            .collect::<Result<Vec<_>>>()?;
        info!("🃏 Rendered {} comment cards", cards.len());
        Ok(cards)
    }

    /// Shadow, rounded body and border
    fn panel(&self, width: u32, height: u32) -> RgbaImage {
        let theme = &self.theme;
        let mut canvas = RgbaImage::new(width, height);
        let full = Rect { x: 0, y: 0, w: width, h: height };
        fill_rounded_rect(
            &mut canvas,
            Rect {
                x: SHADOW_OFFSET,
                y: SHADOW_OFFSET,
                w: width - SHADOW_OFFSET,
                h: height - SHADOW_OFFSET,
            },
            theme.radius,
            theme.shadow,
        );
        fill_rounded_rect(&mut canvas, full, theme.radius, theme.panel);
        stroke_rounded_rect(&mut canvas, full, theme.radius, theme.border, BORDER_WIDTH);
        canvas
    }

    fn save(&self, canvas: RgbaImage, out_path: &Path) -> Result<RenderedCard> {
        if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let (width, height) = canvas.dimensions();
        canvas.save(out_path).map_err(|e| CardError::SaveFailed {
            path: out_path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!("Card {} ({}x{})", out_path.display(), width, height);
        Ok(RenderedCard {
            path: out_path.to_path_buf(),
            width,
            height,
        })
    }
}

/// Pixel size of an image on disk
pub fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    image::image_dimensions(path).map_err(|_| {
        CardError::Dimensions {
            path: path.display().to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::font::system_font;
    use tempfile::tempdir;

    fn chars(s: &str) -> f32 {
        s.chars().count() as f32
    }

    #[test]
    fn test_wrap_words_greedy() {
        let lines = wrap_words("the quick brown fox jumps", 10.0, chars);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn test_wrap_splits_long_words_and_keeps_paragraphs() {
        let lines = wrap_words("abcdefghijkl\nok", 5.0, chars);
        assert_eq!(lines, vec!["abcde", "fghij", "kl", "ok"]);
        assert!(wrap_words("   ", 5.0, chars).is_empty());
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(0), "0");
        assert_eq!(format_score(999), "999");
        assert_eq!(format_score(1000), "1,000");
        assert_eq!(format_score(1234567), "1,234,567");
        assert_eq!(format_score(-4200), "-4,200");
    }

    #[test]
    fn test_rounded_corners_are_cut() {
        let rect = Rect { x: 0, y: 0, w: 100, h: 60 };
        assert!(!rounded_rect_contains(0, 0, rect, 20));
        assert!(rounded_rect_contains(20, 20, rect, 20));
        assert!(rounded_rect_contains(50, 0, rect, 20));
        assert!(rounded_rect_contains(0, 30, rect, 20));
        assert!(!rounded_rect_contains(100, 30, rect, 20));
    }

    #[test]
    fn test_blend_onto_transparent_keeps_source() {
        let mut px = Rgba([0, 0, 0, 0]);
        blend_pixel(&mut px, [200, 100, 50, 128]);
        assert_eq!(px, Rgba([200, 100, 50, 128]));

        blend_pixel(&mut px, [0, 0, 0, 0]);
        assert_eq!(px, Rgba([200, 100, 50, 128]));
    }

    #[test]
    fn test_panel_is_translucent_with_transparent_corners() {
        let Some(font) = system_font() else {
            return;
        };
        let dir = tempdir().unwrap();
        let renderer = CardRenderer::new(&FontCache::default(), &CardConfig {
            font_path: Some(font),
            ..CardConfig::default()
        })
        .unwrap();

        let card = renderer
            .render_title("What is the most useless fact you know?", "AskReddit", &dir.path().join("title.png"))
            .unwrap();
        assert_eq!(card.width, 920);
        assert!(card.height >= TITLE_MIN_HEIGHT);
        assert_eq!(image_dimensions(&card.path).unwrap(), (card.width, card.height));

        let image = image::open(&card.path).unwrap().to_rgba8();
        assert_eq!(image.get_pixel(0, 0)[3], 0);
        let centre = image.get_pixel(card.width / 2, card.height - 80)[3];
        assert!(centre > 200);
    }

    #[test]
    fn test_long_comment_grows_the_card() {
        let Some(font) = system_font() else {
            return;
        };
        let dir = tempdir().unwrap();
        let renderer = CardRenderer::with_font(
            FontCache::default().load(font).unwrap(),
            CardTheme::default(),
        );

        let short = renderer
            .render_comment("alice", "Short one.", 12, &dir.path().join("a.png"))
            .unwrap();
        let long_body = "This sentence keeps going. ".repeat(60);
        let long = renderer
            .render_comment("bob", &long_body, 45210, &dir.path().join("b.png"))
            .unwrap();

        assert_eq!(short.height, COMMENT_MIN_HEIGHT);
        assert!(long.height > COMMENT_MIN_HEIGHT);
    }

    #[test]
    fn test_parallel_comment_cards_keep_order() {
        let Some(font) = system_font() else {
            return;
        };
        let dir = tempdir().unwrap();
        let renderer = CardRenderer::with_font(
            FontCache::default().load(font).unwrap(),
            CardTheme::default(),
        );
        let comments: Vec<Comment> = (0..5)
            .map(|i| Comment {
                author: format!("user{}", i),
                body: "word ".repeat(40 * (i + 1)),
                score: i as i64,
            })
            .collect();

        let cards = renderer.render_comments(&comments, dir.path()).unwrap();
        assert_eq!(cards.len(), 5);
        for (i, card) in cards.iter().enumerate() {
            assert_eq!(card.path, dir.path().join(format!("comment_{:03}.png", i + 1)));
        }
        assert!(cards.windows(2).all(|w| w[0].height <= w[1].height));
    }

    #[test]
    fn test_missing_image_dimensions() {
        let err = image_dimensions(Path::new("/nope/card.png")).unwrap_err();
        assert!(err.to_string().contains("/nope/card.png"));
    }
}

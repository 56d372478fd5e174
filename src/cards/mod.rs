//! # Cards Module
//!
//! Title and comment cards drawn with `fontdue` onto RGBA `image` buffers.
//! A [`FontCache`] is built once per run and handed to the [`CardRenderer`].

pub mod font;
pub mod render;

pub use font::{FontCache, FONT_CANDIDATES};
pub use render::{format_score, image_dimensions, wrap_words, CardRenderer, CardTheme, RenderedCard};

//! # Production Engine
//!
//! Runs one thread through fetch, narration, cards, background, assembly and
//! encoding, and drives automation mode on top of it.

pub mod engine;

pub use engine::{
    output_path, sanitize_filename, sanitize_folder, Phase, PhaseTimings, ProduceOptions, Production,
    ProductionEngine,
};

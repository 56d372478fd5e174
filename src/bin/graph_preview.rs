// Print the overlay filter graph for a list of card durations without encoding

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use reddit_narrator::{
    config::{Config, EncoderConfig},
    video::{InputLayout, OverlayPlanner, Strategy},
    Encoder,
};

#[derive(Parser)]
#[command(name = "graph_preview", about = "Show the ffmpeg overlay graph for a set of card durations")]
struct Args {
    /// Card durations in seconds, title first
    #[arg(required = true)]
    durations: Vec<f64>,

    /// Overlay elements above which the graph goes into a script file
    #[arg(long)]
    threshold: Option<usize>,

    /// Configuration file for resolution, card width and opacity
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Include a background music bed input
    #[arg(long)]
    bed: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    println!("🎬 Overlay graph preview");
    println!(
        "   {}x{} @ {} fps, card width {}px",
        config.video.width(),
        config.video.height(),
        config.video.fps,
        config.video.card_width()
    );

    let images: Vec<PathBuf> = (0..args.durations.len())
        .map(|i| {
            if i == 0 {
                PathBuf::from("cards/title.png")
            } else {
                PathBuf::from(format!("cards/comment_{:03}.png", i))
            }
        })
        .collect();

    let planner = OverlayPlanner::from_params(&config.video);
    let plan = planner.plan_images(&images, &args.durations, None)?;

    println!("\n📋 Windows:");
    for (path, window) in plan.cards().iter().zip(plan.windows()) {
        println!("   {:<24} [{:>7.2}s, {:>7.2}s)", path.display(), window.start, window.end);
    }
    println!("   Total: {:.2}s", plan.total_duration());

    let encoder_config = EncoderConfig {
        script_threshold: args.threshold.unwrap_or(config.encoder.script_threshold),
        ..config.encoder.clone()
    };
    let encoder = Encoder::new(encoder_config);
    let strategy = encoder.choose_strategy(plan.element_count());
    let strategy_name = match strategy {
        Strategy::Inline => "inline (-filter_complex)",
        Strategy::Script => "script (-filter_complex_script)",
    };

    let graph = plan.compile(&InputLayout::standard(args.bed));
    println!("\n🔧 Strategy: {} for {} elements", strategy_name, plan.element_count());
    println!("   Graph length: {} bytes\n", graph.len());
    for chain in graph.split(';') {
        println!("{};", chain);
    }

    Ok(())
}

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reddit_narrator::{
    composition::{ProduceOptions, ProductionEngine},
    config::Config,
};

#[derive(Parser)]
#[command(
    name = "reddit-narrator",
    version,
    about = "Turn Reddit threads into narrated short-form videos",
    long_about = "Reddit-Narrator fetches a Reddit thread, speaks the title and top comments, renders them as cards over a background video and encodes the result with ffmpeg."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Produce a video from one thread
    Produce {
        /// Thread URL or id
        #[arg(short, long)]
        url: String,

        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Comments to fetch
        #[arg(long)]
        comments: Option<usize>,

        /// Background video to use instead of a generated one
        #[arg(short, long)]
        background: Option<PathBuf>,

        /// Keep the per-thread workspace
        #[arg(long)]
        keep_temp: bool,

        /// Use the long-form duration budget
        #[arg(long)]
        long: bool,
    },

    /// Find an unproduced post in the configured subreddits and produce it
    Auto {
        /// Configuration file (optional)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep the per-thread workspace
        #[arg(long)]
        keep_temp: bool,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination TOML file
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> reddit_narrator::Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Config::from_file(path)
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

async fn run(command: Command) -> reddit_narrator::Result<()> {
    match command {
        Command::Produce {
            url,
            config,
            comments,
            background,
            keep_temp,
            long,
        } => {
            let config = load_config(config.as_deref())?;
            let engine = ProductionEngine::new(config)?;
            let options = ProduceOptions {
                max_comments: comments,
                background,
                keep_temp,
                long_form: long,
            };
            let production = engine.produce(&url, &options).await?;
            info!(
                "Done: {} ({:.1}s, {} segments)",
                production.output_path.display(),
                production.duration,
                production.segments
            );
        }
        Command::Auto { config, keep_temp } => {
            let config = load_config(config.as_deref())?;
            let engine = ProductionEngine::new(config)?;
            let options = ProduceOptions {
                keep_temp,
                ..Default::default()
            };
            let production = engine.produce_next(&options).await?;
            info!("Done: {} (thread {})", production.output_path.display(), production.thread_id);
        }
        Command::InitConfig { path } => {
            Config::default().save_to_file(&path)?;
            info!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Reddit-Narrator v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli.command).await {
        error!("{}", e.user_message());
        return Err(anyhow::anyhow!(e));
    }
    Ok(())
}

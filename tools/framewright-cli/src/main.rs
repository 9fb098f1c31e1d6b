//! Framewright CLI: inspect project snapshots and drive the preview engine
//! headlessly.
//!
//! Usage:
//!   framewright info <PATH>        Show snapshot information
//!   framewright validate <PATH>    Validate a snapshot and its media
//!   framewright frame <PATH>       Render one frame to PNG
//!   framewright play <PATH>        Run the render loop and report stats
//!   framewright init <PATH>        Create an empty snapshot
//!   framewright check              Check decoders and fonts

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "framewright",
    about = "Real-time frame compositing and playback for timeline projects",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show snapshot information
    Info {
        /// Path to the snapshot JSON
        path: PathBuf,

        /// Print a machine-readable summary
        #[arg(long)]
        json: bool,
    },

    /// Validate a snapshot and check that local media exists
    Validate {
        /// Path to the snapshot JSON
        path: PathBuf,
    },

    /// Render a single frame to PNG
    Frame {
        /// Path to the snapshot JSON
        path: PathBuf,

        /// Timeline position in seconds
        #[arg(short, long, default_value = "0")]
        time: f64,

        /// Output PNG file
        #[arg(short, long, default_value = "frame.png")]
        output: PathBuf,

        /// Output width (defaults to the canvas width)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (defaults to the canvas height)
        #[arg(long)]
        height: Option<u32>,

        /// Use generated test patterns instead of decoding media
        #[arg(long)]
        synthetic: bool,
    },

    /// Play the timeline through the render loop
    Play {
        /// Path to the snapshot JSON
        path: PathBuf,

        /// Start position in seconds
        #[arg(long, default_value = "0")]
        from: f64,

        /// Wall-clock seconds to play for
        #[arg(long, default_value = "5")]
        seconds: f64,

        /// Output width (defaults to the canvas width)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (defaults to the canvas height)
        #[arg(long)]
        height: Option<u32>,

        /// Use generated test patterns instead of decoding media
        #[arg(long)]
        synthetic: bool,
    },

    /// Create a new empty snapshot
    Init {
        /// Where to write the snapshot JSON
        path: PathBuf,

        /// Project name
        #[arg(short, long, default_value = "Untitled Project")]
        name: String,

        /// Canvas width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Canvas height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Project frame rate
        #[arg(long, default_value = "30")]
        fps: f64,
    },

    /// Check decoders and fonts
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = framewright_common::config::AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    framewright_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Info { path, json } => commands::info::run(path, json),
        Commands::Validate { path } => commands::validate::run(path),
        Commands::Frame {
            path,
            time,
            output,
            width,
            height,
            synthetic,
        } => commands::frame::run(&config, path, time, output, width, height, synthetic).await,
        Commands::Play {
            path,
            from,
            seconds,
            width,
            height,
            synthetic,
        } => commands::play::run(&config, path, from, seconds, width, height, synthetic).await,
        Commands::Init {
            path,
            name,
            width,
            height,
            fps,
        } => commands::init::run(path, name, width, height, fps),
        Commands::Check => commands::check::run(&config),
    }
}

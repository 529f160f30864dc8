use clap::{Parser, Subcommand};
use clipshrink_av::QualityTier;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipshrink")]
#[command(author, version, about = "Video compression tool")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a video file and display its tracks
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Estimate output size per quality tier
    Estimate {
        /// File to estimate
        #[arg(required = true)]
        file: PathBuf,

        /// Only this tier (very-high, high, medium, low, very-low)
        #[arg(short, long)]
        quality: Option<QualityTier>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compress a video file
    Compress {
        /// Input file to compress
        #[arg(required = true)]
        input: PathBuf,

        /// Output file (default: <input>-compressed.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Quality tier (very-high, high, medium, low, very-low)
        #[arg(short, long)]
        quality: Option<QualityTier>,

        /// Replace the output file if it exists
        #[arg(long)]
        overwrite: bool,

        /// Relay synthetic samples into an in-memory encoder instead of transcoding
        #[arg(long)]
        simulate: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

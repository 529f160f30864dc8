mod cli;

use clipshrink::compress::{self, CompressOptions};
use clipshrink::config;
use clipshrink::report::{self, ProbeReport};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use clipshrink_av::{QualityTier, TranscodeOutcome};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipshrink=trace,clipshrink_av=trace,clipshrink_media=debug".to_string()
        } else {
            "clipshrink=info,clipshrink_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe { file, json } => probe_file(&file, json),
        Commands::Estimate {
            file,
            quality,
            json,
        } => estimate_file(&file, quality, json),
        Commands::Compress {
            input,
            output,
            quality,
            overwrite,
            simulate,
        } => {
            let options = CompressOptions {
                output,
                quality,
                overwrite,
                simulate,
            };
            compress_file(&input, &options, cli.config.as_deref())
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("clipshrink {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn probe_file(file: &Path, json: bool) -> Result<()> {
    let descriptor = compress::describe(file)?;
    let report = ProbeReport::new(file, &descriptor);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    Ok(())
}

fn estimate_file(file: &Path, quality: Option<QualityTier>, json: bool) -> Result<()> {
    let descriptor = compress::describe(file)?;
    let tiers = match quality {
        Some(tier) => vec![tier],
        None => QualityTier::ALL.to_vec(),
    };
    let rows = report::estimates(&descriptor, &tiers);

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "Source: {} over {}",
        report::format_bitrate(descriptor.estimated_source_bitrate()),
        report::format_duration(descriptor.duration_secs())
    );
    for row in &rows {
        println!(
            "  {:<10} {:>12}  {:>10}",
            row.quality.to_string(),
            report::format_bitrate(row.target_bitrate_bps),
            report::format_bytes(row.estimated_size_bytes)
        );
    }

    Ok(())
}

fn compress_file(input: &Path, options: &CompressOptions, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(compress::compress(input, options, &config))?;

    match summary.outcome {
        TranscodeOutcome::Success(path) => {
            println!("Output: {}", path.display());
            println!("Quality: {}", summary.quality);
            println!(
                "Estimated size: {}",
                report::format_bytes(summary.estimated_size_bytes)
            );
            if let Some(size) = summary.output_size_bytes {
                println!("Actual size: {} bytes", size);
            }
            if let Some(progress) = summary.last_progress {
                println!(
                    "Frames: {}/{}",
                    progress.completed_units, progress.total_units
                );
            }
            Ok(())
        }
        TranscodeOutcome::Cancelled => {
            anyhow::bail!("Compression of {:?} was cancelled", input)
        }
        TranscodeOutcome::Failure(reason) => {
            Err(anyhow::Error::new(reason).context(format!("Compression of {:?} failed", input)))
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Quality: {}", config.transcode.quality);
    println!(
        "  Readiness timeout: {} ms",
        config.transcode.readiness_timeout_ms
    );
    println!(
        "  Audio priming correction: {}",
        config.transcode.audio_priming_correction
    );
    println!("  Output suffix: {}", config.transcode.output_suffix);
    match &config.output.directory {
        Some(dir) => println!("  Output directory: {}", dir.display()),
        None => println!("  Output directory: next to input"),
    }
    println!("  Overwrite: {}", config.output.overwrite);

    Ok(())
}

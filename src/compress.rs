//! Compression of one file, from source selection to the final outcome.

use crate::config::Config;
use anyhow::{Context, Result};
use clipshrink_av::media::memory::{RecordingWriterFactory, SyntheticSource};
use clipshrink_av::media::{MediaSource, WriterFactory};
use clipshrink_av::{
    ProgressReport, QualityTier, TrackDescriptor, TranscodeEvent, TranscodeOutcome,
    TranscodeSession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-invocation settings; unset fields fall back to the config.
#[derive(Debug, Clone, Default)]
pub struct CompressOptions {
    pub output: Option<PathBuf>,
    pub quality: Option<QualityTier>,
    pub overwrite: bool,
    /// Relay synthetic samples shaped like the input into an in-memory
    /// encoder instead of transcoding.
    pub simulate: bool,
}

#[derive(Debug, Clone)]
pub struct CompressSummary {
    pub destination: PathBuf,
    pub quality: QualityTier,
    pub outcome: TranscodeOutcome,
    pub estimated_size_bytes: i64,
    pub output_size_bytes: Option<u64>,
    pub last_progress: Option<ProgressReport>,
}

/// Open `path` with the probing backend this build carries.
pub fn open_source(path: &Path) -> Result<Arc<dyn MediaSource>> {
    if !path.exists() {
        anyhow::bail!("File does not exist: {:?}", path);
    }
    open_backend_source(path)
}

#[cfg(feature = "native-ffmpeg")]
fn open_backend_source(path: &Path) -> Result<Arc<dyn MediaSource>> {
    let source = clipshrink_av::media::ffmpeg::FfmpegSource::open(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "native-ffmpeg"))]
fn open_backend_source(path: &Path) -> Result<Arc<dyn MediaSource>> {
    let source = clipshrink_av::media::mp4::Mp4Source::open(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    Ok(Arc::new(source))
}

/// Probe `path` into a track descriptor.
pub fn describe(path: &Path) -> Result<TrackDescriptor> {
    let source = open_source(path)?;
    TrackDescriptor::from_source(source.as_ref())
        .with_context(|| format!("Failed to probe {:?}", path))
}

/// Default output location for `input`.
pub fn output_path(input: &Path, config: &Config) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let name = format!("{}{}.mp4", stem, config.transcode.output_suffix);
    match &config.output.directory {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Make sure `destination` can be created. Writers never replace a file, so
/// stale output is removed here when `overwrite` is set.
pub fn prepare_destination(input: &Path, destination: &Path, overwrite: bool) -> Result<()> {
    if destination == input {
        anyhow::bail!("Output would overwrite the input file: {:?}", input);
    }
    if destination.exists() {
        if !overwrite {
            anyhow::bail!(
                "Output file already exists: {:?} (use --overwrite to replace it)",
                destination
            );
        }
        std::fs::remove_file(destination)
            .with_context(|| format!("Failed to remove existing output: {:?}", destination))?;
        tracing::info!("Removed existing output {:?}", destination);
    }
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            anyhow::bail!("Output directory does not exist: {:?}", parent);
        }
    }
    Ok(())
}

fn pipeline(
    input: &Path,
    simulate: bool,
    config: &Config,
) -> Result<(Arc<dyn MediaSource>, Arc<dyn WriterFactory>)> {
    if simulate {
        let probed = open_source(input)?;
        let tracks = probed
            .tracks()
            .with_context(|| format!("Failed to probe {:?}", input))?;
        tracing::debug!("Simulating relay of {:?}", input);
        return Ok((
            Arc::new(SyntheticSource::mirroring(&tracks)),
            Arc::new(RecordingWriterFactory::new()),
        ));
    }
    native_pipeline(input, config)
}

#[cfg(feature = "native-ffmpeg")]
fn native_pipeline(
    input: &Path,
    config: &Config,
) -> Result<(Arc<dyn MediaSource>, Arc<dyn WriterFactory>)> {
    use clipshrink_av::media::ffmpeg::{FfmpegSource, FfmpegWriterFactory};

    let source = FfmpegSource::open(input).with_context(|| format!("Failed to open {:?}", input))?;
    let writers =
        FfmpegWriterFactory::for_source(&source).preset(config.transcode.encoder_preset.clone());
    Ok((Arc::new(source), Arc::new(writers)))
}

#[cfg(not(feature = "native-ffmpeg"))]
fn native_pipeline(
    _input: &Path,
    _config: &Config,
) -> Result<(Arc<dyn MediaSource>, Arc<dyn WriterFactory>)> {
    anyhow::bail!(
        "clipshrink was built without the native-ffmpeg feature; \
         use --simulate or rebuild with --features native-ffmpeg"
    )
}

/// Logs progress once per `step` percent.
#[derive(Debug)]
pub struct ProgressMeter {
    step: u64,
    next: u64,
}

impl ProgressMeter {
    pub fn new(step: u64) -> Self {
        Self {
            step: step.max(1),
            next: 0,
        }
    }

    /// The whole percentage reached, if it crossed the next step.
    pub fn observe(&mut self, report: ProgressReport) -> Option<u64> {
        let percent = (report.fraction() * 100.0).floor() as u64;
        if percent < self.next {
            return None;
        }
        self.next = (percent / self.step + 1) * self.step;
        Some(percent)
    }
}

/// Compress `input`. Ctrl-C requests cancellation and waits for the session
/// to wind down.
pub async fn compress(
    input: &Path,
    options: &CompressOptions,
    config: &Config,
) -> Result<CompressSummary> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let destination = options
        .output
        .clone()
        .unwrap_or_else(|| output_path(input, config));
    let quality = options.quality.unwrap_or(config.transcode.quality);
    prepare_destination(input, &destination, options.overwrite || config.output.overwrite)?;

    let (source, writers) = pipeline(input, options.simulate, config)?;
    let mut session = TranscodeSession::builder(source, writers)
        .destination(&destination)
        .quality(quality)
        .options(config.transcode.relay_options())
        .build()
        .with_context(|| format!("Failed to prepare {:?}", input))?;

    let estimated_size_bytes = session.estimated_output_size();
    tracing::info!(
        "Target {} ({:.0} bps), estimated output {} bytes",
        quality,
        session.target_bitrate(),
        estimated_size_bytes
    );

    let (handle, mut events) = session.start_with_events();
    let mut meter = ProgressMeter::new(10);
    let mut last_progress = None;
    let mut interrupted = false;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TranscodeEvent::Started) => {
                    tracing::info!("Compressing {:?} -> {:?}", input, destination);
                }
                Some(TranscodeEvent::Progress(report)) => {
                    if let Some(percent) = meter.observe(report) {
                        tracing::info!(
                            "{}% ({}/{} frames)",
                            percent,
                            report.completed_units,
                            report.total_units
                        );
                    }
                    last_progress = Some(report);
                }
                Some(TranscodeEvent::Finished(outcome)) => break outcome,
                None => anyhow::bail!("Transcode session ended without a result"),
            },
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::warn!("Interrupted, cancelling compression");
                handle.request_cancel();
                interrupted = true;
            }
        }
    };

    let output_size_bytes = match &outcome {
        TranscodeOutcome::Success(path) => std::fs::metadata(path).ok().map(|m| m.len()),
        _ => None,
    };

    Ok(CompressSummary {
        destination,
        quality,
        outcome,
        estimated_size_bytes,
        output_size_bytes,
        last_progress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_output_path_next_to_input() {
        let config = Config::default();
        assert_eq!(
            output_path(Path::new("/videos/clip.mov"), &config),
            PathBuf::from("/videos/clip-compressed.mp4")
        );
    }

    #[test]
    fn test_output_path_in_configured_directory() {
        let mut config = Config::default();
        config.output.directory = Some(PathBuf::from("/out"));
        config.transcode.output_suffix = "_small".to_string();
        assert_eq!(
            output_path(Path::new("/videos/clip.mp4"), &config),
            PathBuf::from("/out/clip_small.mp4")
        );
    }

    #[test]
    fn test_prepare_destination() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("out.mp4");
        std::fs::write(&input, b"in").unwrap();

        assert!(prepare_destination(&input, &input, true).is_err());
        assert!(prepare_destination(&input, &output, false).is_ok());

        std::fs::write(&output, b"stale").unwrap();
        let err = prepare_destination(&input, &output, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(output.exists());

        prepare_destination(&input, &output, true).unwrap();
        assert!(!output.exists());

        let nested = dir.path().join("missing").join("out.mp4");
        assert!(prepare_destination(&input, &nested, false).is_err());
    }

    #[test]
    fn test_progress_meter_steps() {
        let mut meter = ProgressMeter::new(10);
        let seen: Vec<u64> = (1..=300)
            .filter_map(|i| meter.observe(ProgressReport::new(i, 300)))
            .collect();
        assert_eq!(seen, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn test_progress_meter_handles_empty_total() {
        let mut meter = ProgressMeter::new(25);
        assert_eq!(meter.observe(ProgressReport::new(0, 0)), Some(0));
        assert_eq!(meter.observe(ProgressReport::new(0, 0)), None);
    }
}

use clipshrink_av::{PrimingCorrection, QualityTier, RelayOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transcode: TranscodeConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Quality tier used when none is given on the command line (default: "medium")
    #[serde(default)]
    pub quality: QualityTier,

    /// How long a relay loop waits for the encoder before polling for
    /// cancellation, in milliseconds (default: 50)
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Trim one AAC priming frame from the start of the audio track (default: true)
    #[serde(default = "default_audio_priming_correction")]
    pub audio_priming_correction: bool,

    /// Appended to the input file stem to name the output (default: "-compressed")
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,

    /// x264 preset used by the native encoder (default: "medium")
    #[serde(default = "default_encoder_preset")]
    pub encoder_preset: String,
}

fn default_readiness_timeout_ms() -> u64 {
    50
}

fn default_audio_priming_correction() -> bool {
    true
}

fn default_output_suffix() -> String {
    "-compressed".to_string()
}

fn default_encoder_preset() -> String {
    "medium".to_string()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            quality: QualityTier::default(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            audio_priming_correction: default_audio_priming_correction(),
            output_suffix: default_output_suffix(),
            encoder_preset: default_encoder_preset(),
        }
    }
}

impl TranscodeConfig {
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            readiness_timeout: Duration::from_millis(self.readiness_timeout_ms),
            audio_priming: PrimingCorrection::from(self.audio_priming_correction),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory for compressed files; next to the input when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Replace an existing output file instead of failing
    #[serde(default)]
    pub overwrite: bool,
}

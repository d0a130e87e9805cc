//! Task descriptors: the immutable configuration for one cleaning job.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Noise reduction intensity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseReductionLevel {
    Light,
    Medium,
    Strong,
}

impl NoiseReductionLevel {
    /// Fraction of estimated noise energy to remove.
    ///
    /// Policy constants, not user-tunable beyond level selection.
    pub fn strength(self) -> f32 {
        match self {
            NoiseReductionLevel::Light => 0.5,
            NoiseReductionLevel::Medium => 0.7,
            NoiseReductionLevel::Strong => 0.9,
        }
    }
}

/// Speech enhancement intensity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEnhancementLevel {
    Light,
    Medium,
    Strong,
}

/// Background noise suppression levels for the enhancement stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundNoiseLevel {
    /// Preserve some background noise for natural sound
    Minimal,
    /// Balance between noise reduction and natural sound
    Moderate,
    /// Maximum noise reduction
    Aggressive,
}

/// Output container/codec, derived from the input extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
    M4a,
    Aac,
    Ogg,
    Flac,
}

impl OutputFormat {
    /// Map an input extension to the output format.
    ///
    /// Recognized extensions keep their format; anything else falls back to
    /// WAV (lossless).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "wav" => OutputFormat::Wav,
            "mp3" => OutputFormat::Mp3,
            "m4a" => OutputFormat::M4a,
            "aac" => OutputFormat::Aac,
            "ogg" => OutputFormat::Ogg,
            "flac" => OutputFormat::Flac,
            _ => OutputFormat::Wav,
        }
    }

    /// File extension for this format
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Wav => "wav",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::M4a => "m4a",
            OutputFormat::Aac => "aac",
            OutputFormat::Ogg => "ogg",
            OutputFormat::Flac => "flac",
        }
    }
}

/// Immutable configuration for one audio-cleaning job.
///
/// Construct with [`TaskDescriptor::new`] and the `with_*` builders; the
/// output location and format are derived from the input path and never
/// cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    /// Source recording path
    pub input_path: PathBuf,
    /// Human-readable identifier; defaults to the input file stem
    pub name: String,
    #[serde(default = "default_noise_level")]
    pub noise_reduction_level: NoiseReductionLevel,
    #[serde(default = "default_true")]
    pub enable_speech_enhancement: bool,
    #[serde(default = "default_speech_level")]
    pub speech_enhancement_level: SpeechEnhancementLevel,
    #[serde(default = "default_true")]
    pub voice_clarity_boost: bool,
    #[serde(default = "default_background_level")]
    pub background_noise_level: BackgroundNoiseLevel,
}

fn default_true() -> bool {
    true
}

fn default_noise_level() -> NoiseReductionLevel {
    NoiseReductionLevel::Medium
}

fn default_speech_level() -> SpeechEnhancementLevel {
    SpeechEnhancementLevel::Medium
}

fn default_background_level() -> BackgroundNoiseLevel {
    BackgroundNoiseLevel::Moderate
}

impl TaskDescriptor {
    /// Create a descriptor with default processing options.
    ///
    /// Returns `None` for an empty input path. The name defaults to the
    /// input's file stem.
    pub fn new(input_path: impl Into<PathBuf>) -> Option<Self> {
        let input_path = input_path.into();
        if input_path.as_os_str().is_empty() {
            return None;
        }
        let name = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Some(Self {
            input_path,
            name,
            noise_reduction_level: default_noise_level(),
            enable_speech_enhancement: true,
            speech_enhancement_level: default_speech_level(),
            voice_clarity_boost: true,
            background_noise_level: default_background_level(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_noise_reduction(mut self, level: NoiseReductionLevel) -> Self {
        self.noise_reduction_level = level;
        self
    }

    pub fn with_speech_enhancement(mut self, enabled: bool) -> Self {
        self.enable_speech_enhancement = enabled;
        self
    }

    pub fn with_speech_enhancement_level(mut self, level: SpeechEnhancementLevel) -> Self {
        self.speech_enhancement_level = level;
        self
    }

    pub fn with_voice_clarity_boost(mut self, enabled: bool) -> Self {
        self.voice_clarity_boost = enabled;
        self
    }

    pub fn with_background_noise_level(mut self, level: BackgroundNoiseLevel) -> Self {
        self.background_noise_level = level;
        self
    }

    /// Output format, derived from the input extension
    pub fn output_format(&self) -> OutputFormat {
        let ext = self
            .input_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        OutputFormat::from_extension(ext)
    }

    /// Output path: `<input_dir>/<input_stem>_cleaned.<ext>`.
    ///
    /// The extension follows [`output_format`](Self::output_format), so an
    /// unrecognized input extension yields a `.wav` output matching the WAV
    /// fallback content. The output never overwrites the source.
    pub fn output_path(&self) -> PathBuf {
        let stem = self
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = format!("{}_cleaned.{}", stem, self.output_format().extension());
        match self.input_path.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

//! Pluggable speech-enhancement stage.
//!
//! The pipeline's stage sequencing is fixed regardless of which enhancer is
//! wired in: [`IdentityEnhancer`] is the minimal passthrough default, and
//! [`ClarityEnhancer`] is a filter-based implementation that gives the
//! descriptor's enhancement sub-options their effect. Every implementation
//! must preserve the buffer's length, channel count and sample rate exactly.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F32};

use crate::task::{BackgroundNoiseLevel, SpeechEnhancementLevel, TaskDescriptor};

/// One speech-enhancement implementation.
pub trait SpeechEnhancer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Enhance the interleaved buffer in-place.
    fn enhance(
        &self,
        samples: &mut [f32],
        sample_rate: u32,
        channels: u16,
        task: &TaskDescriptor,
    ) -> Result<(), String>;
}

/// Passthrough enhancer, the engine default.
pub struct IdentityEnhancer;

impl SpeechEnhancer for IdentityEnhancer {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn enhance(
        &self,
        _samples: &mut [f32],
        _sample_rate: u32,
        _channels: u16,
        _task: &TaskDescriptor,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Rumble high-pass, optional presence boost, and a downward expander tuned
/// by the descriptor's background-noise setting.
pub struct ClarityEnhancer;

const HIGHPASS_FREQ: f32 = 80.0;
const PRESENCE_FREQ: f32 = 3000.0;

impl SpeechEnhancementLevel {
    fn presence_gain_db(self) -> f32 {
        match self {
            SpeechEnhancementLevel::Light => 2.0,
            SpeechEnhancementLevel::Medium => 4.0,
            SpeechEnhancementLevel::Strong => 6.0,
        }
    }
}

impl BackgroundNoiseLevel {
    /// (threshold dB, ratio) for the downward expander
    fn expander_params(self) -> (f32, f32) {
        match self {
            BackgroundNoiseLevel::Minimal => (-50.0, 1.5),
            BackgroundNoiseLevel::Moderate => (-40.0, 2.0),
            BackgroundNoiseLevel::Aggressive => (-30.0, 3.0),
        }
    }
}

impl SpeechEnhancer for ClarityEnhancer {
    fn name(&self) -> &'static str {
        "clarity"
    }

    fn enhance(
        &self,
        samples: &mut [f32],
        sample_rate: u32,
        channels: u16,
        task: &TaskDescriptor,
    ) -> Result<(), String> {
        let ch_count = channels.max(1) as usize;
        let frames = samples.len() / ch_count;
        let fs = sample_rate as f32;

        let (threshold_db, ratio) = task.background_noise_level.expander_params();

        for ch in 0..ch_count {
            let mut channel: Vec<f32> = (0..frames).map(|i| samples[i * ch_count + ch]).collect();

            let mut highpass = cascade(fs, Type::HighPass, HIGHPASS_FREQ, Q_BUTTERWORTH_F32)?;
            for filter in highpass.iter_mut() {
                for sample in channel.iter_mut() {
                    *sample = filter.run(*sample);
                }
            }

            // Presence peak around the consonant range; skip when the sample
            // rate cannot represent it
            if task.voice_clarity_boost && PRESENCE_FREQ < fs / 2.0 {
                let gain = task.speech_enhancement_level.presence_gain_db();
                let coeffs = Coefficients::<f32>::from_params(
                    Type::PeakingEQ(gain),
                    fs.hz(),
                    PRESENCE_FREQ.hz(),
                    1.0,
                )
                .map_err(|e| format!("Failed to create presence coefficients: {:?}", e))?;
                let mut peak = DirectForm1::<f32>::new(coeffs);
                for sample in channel.iter_mut() {
                    *sample = peak.run(*sample);
                }
            }

            let mut expander = DownwardExpander::new(fs, threshold_db, ratio, 5.0, 50.0);
            expander.process(&mut channel);

            for (i, s) in channel.iter().enumerate() {
                samples[i * ch_count + ch] = *s;
            }
        }

        Ok(())
    }
}

/// Two cascaded 2nd-order sections for a 4th-order (24 dB/octave) slope
fn cascade(
    fs: f32,
    filter_type: Type<f32>,
    freq: f32,
    q: f32,
) -> Result<[DirectForm1<f32>; 2], String> {
    let coeffs = Coefficients::<f32>::from_params(filter_type, fs.hz(), freq.hz(), q)
        .map_err(|e| format!("Failed to create filter coefficients: {:?}", e))?;
    Ok([
        DirectForm1::<f32>::new(coeffs),
        DirectForm1::<f32>::new(coeffs),
    ])
}

/// Downward expander with envelope following.
///
/// Unlike a hard gate, gain is reduced gradually below the threshold.
struct DownwardExpander {
    threshold_linear: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl DownwardExpander {
    fn new(sample_rate: f32, threshold_db: f32, ratio: f32, attack_ms: f32, release_ms: f32) -> Self {
        let threshold_linear = 10.0_f32.powf(threshold_db / 20.0);

        let attack_samples = attack_ms * sample_rate / 1000.0;
        let release_samples = release_ms * sample_rate / 1000.0;

        Self {
            threshold_linear,
            ratio,
            attack_coeff: (-2.2 / attack_samples).exp(),
            release_coeff: (-2.2 / release_samples).exp(),
            envelope: 0.0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let input_abs = sample.abs();

            let coeff = if input_abs > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = self.envelope * coeff + input_abs * (1.0 - coeff);

            let gain = if self.envelope < self.threshold_linear && self.envelope > 0.0 {
                let db_below = 20.0 * (self.envelope / self.threshold_linear).log10();
                let db_reduction = db_below * (1.0 - 1.0 / self.ratio);
                10.0_f32.powf(db_reduction / 20.0)
            } else {
                1.0
            };

            *sample *= gain;
        }
    }
}

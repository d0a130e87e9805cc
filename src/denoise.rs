//! Stationary spectral noise reduction.
//!
//! The noise profile is estimated from a reference clip (the opening second
//! of the recording, assumed to be room tone before speech starts) and the
//! whole signal is gated against it: frequency bins whose magnitude stays
//! within the profile's statistics are attenuated, bins that rise above it
//! pass through. The reference heuristic can be wrong (speech in the first
//! second degrades the profile) but never makes the run fail.

use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::PipelineError;
use crate::task::NoiseReductionLevel;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = FFT_SIZE / 4; // 75% overlap

/// Outlier threshold for the stationary noise-gate decision, in standard
/// deviations above the profile mean.
const NOISE_GATE_STD_THRESH: f32 = 1.5;

/// The noise reference clip: the first second of the signal, or the whole
/// signal when it is shorter than one second.
pub fn noise_reference(channel: &[f32], sample_rate: u32) -> &[f32] {
    &channel[..channel.len().min(sample_rate as usize)]
}

/// Per-bin magnitude statistics of the reference clip, in dB.
struct NoiseProfile {
    /// mean + NOISE_GATE_STD_THRESH * std per bin
    threshold_db: Vec<f32>,
}

/// FFT-based stationary noise gate.
pub struct SpectralGate {
    strength: f32,
    forward_fft: Arc<dyn RealToComplex<f32>>,
    inverse_fft: Arc<dyn ComplexToReal<f32>>,
    window: Vec<f32>,
}

impl SpectralGate {
    /// `strength` is the fraction of gated energy to remove (0.0 to 1.0).
    pub fn new(strength: f32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward_fft = planner.plan_fft_forward(FFT_SIZE);
        let inverse_fft = planner.plan_fft_inverse(FFT_SIZE);

        // Hann window
        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();

        Self {
            strength,
            forward_fft,
            inverse_fft,
            window,
        }
    }

    /// Magnitude spectrum of one windowed frame, in dB.
    fn frame_magnitudes_db(&self, frame: &[f32]) -> Option<Vec<f32>> {
        let mut buffer: Vec<f32> = frame
            .iter()
            .zip(&self.window)
            .map(|(s, w)| s * w)
            .collect();
        buffer.resize(FFT_SIZE, 0.0);

        let mut spectrum = self.forward_fft.make_output_vec();
        self.forward_fft.process(&mut buffer, &mut spectrum).ok()?;

        Some(
            spectrum
                .iter()
                .map(|c| 20.0 * (c.norm() + 1e-10).log10())
                .collect(),
        )
    }

    /// Estimate the stationary noise profile from the reference clip.
    fn estimate_profile(&self, reference: &[f32]) -> NoiseProfile {
        let bins = FFT_SIZE / 2 + 1;
        let mut sum = vec![0.0f64; bins];
        let mut sum_sq = vec![0.0f64; bins];
        let mut frame_count = 0usize;

        let mut pos = 0;
        loop {
            let end = (pos + FFT_SIZE).min(reference.len());
            if end <= pos {
                break;
            }
            if let Some(mags) = self.frame_magnitudes_db(&reference[pos..end]) {
                for (i, m) in mags.iter().enumerate() {
                    sum[i] += *m as f64;
                    sum_sq[i] += (*m as f64) * (*m as f64);
                }
                frame_count += 1;
            }
            if end == reference.len() {
                break;
            }
            pos += HOP_SIZE;
        }

        let n = frame_count.max(1) as f64;
        let threshold_db = (0..bins)
            .map(|i| {
                let mean = sum[i] / n;
                let var = (sum_sq[i] / n - mean * mean).max(0.0);
                (mean + NOISE_GATE_STD_THRESH as f64 * var.sqrt()) as f32
            })
            .collect();

        NoiseProfile { threshold_db }
    }

    /// Gate one channel in-place against the profile from `reference`.
    ///
    /// Output length always equals input length; signals shorter than one
    /// FFT frame pass through unchanged.
    pub fn process(&self, samples: &mut [f32], reference: &[f32]) {
        if samples.len() < FFT_SIZE {
            return;
        }

        let profile = self.estimate_profile(reference);

        let mut output = vec![0.0f32; samples.len()];
        let mut window_sum = vec![0.0f32; samples.len()];

        let mut pos = 0;
        while pos + FFT_SIZE <= samples.len() {
            let mut buffer: Vec<f32> = samples[pos..pos + FFT_SIZE]
                .iter()
                .zip(&self.window)
                .map(|(s, w)| s * w)
                .collect();

            let mut spectrum = self.forward_fft.make_output_vec();

            if self.forward_fft.process(&mut buffer, &mut spectrum).is_ok() {
                for (i, c) in spectrum.iter_mut().enumerate() {
                    let mag_db = 20.0 * (c.norm() + 1e-10).log10();
                    // Stationary gate: bins at or below the noise threshold
                    // are attenuated by the configured strength
                    if mag_db <= profile.threshold_db[i] {
                        *c = *c * (1.0 - self.strength);
                    }
                }

                let mut time_buffer = self.inverse_fft.make_output_vec();
                if self
                    .inverse_fft
                    .process(&mut spectrum, &mut time_buffer)
                    .is_ok()
                {
                    let norm = 1.0 / FFT_SIZE as f32;
                    for (i, sample) in time_buffer.iter().enumerate() {
                        output[pos + i] += sample * norm * self.window[i];
                        window_sum[pos + i] += self.window[i] * self.window[i];
                    }
                }
            }

            pos += HOP_SIZE;
        }

        // Overlap-add normalization; edges without full window coverage keep
        // the original sample
        for (i, sample) in samples.iter_mut().enumerate() {
            if window_sum[i] > 0.001 {
                *sample = output[i] / window_sum[i];
            }
        }
    }
}

/// Apply stationary noise reduction to an interleaved buffer, per channel.
///
/// Each channel gets its own reference clip and gate; the output has exactly
/// the input's sample count and channel count.
pub fn reduce_noise(
    samples: &mut [f32],
    sample_rate: u32,
    channels: u16,
    level: NoiseReductionLevel,
) -> Result<(), PipelineError> {
    if samples.is_empty() {
        return Err(PipelineError::NoiseReduction("Empty signal".to_string()));
    }
    if channels == 0 {
        return Err(PipelineError::NoiseReduction(
            "Zero channel count".to_string(),
        ));
    }

    let gate = SpectralGate::new(level.strength());
    let ch_count = channels as usize;
    let frames = samples.len() / ch_count;

    for ch in 0..ch_count {
        let mut channel: Vec<f32> = (0..frames).map(|i| samples[i * ch_count + ch]).collect();
        let reference = noise_reference(&channel, sample_rate).to_vec();

        log::debug!(
            "Noise reduction ch {}: {} reference frames, strength {}",
            ch,
            reference.len(),
            level.strength()
        );

        gate.process(&mut channel, &reference);

        for (i, s) in channel.iter().enumerate() {
            samples[i * ch_count + ch] = *s;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy_tone(frames: usize, sample_rate: f32) -> Vec<f32> {
        // Deterministic pseudo-noise plus a tone that starts after 1 second
        (0..frames)
            .map(|i| {
                let t = i as f32 / sample_rate;
                let noise = 0.02 * ((i as f32 * 12.9898).sin() * 43758.547).fract();
                let tone = if t > 1.0 {
                    0.4 * (440.0 * 2.0 * std::f32::consts::PI * t).sin()
                } else {
                    0.0
                };
                noise + tone
            })
            .collect()
    }

    #[test]
    fn test_reference_is_first_second() {
        let signal = vec![0.1f32; 44100 * 3];
        assert_eq!(noise_reference(&signal, 44100).len(), 44100);
    }

    #[test]
    fn test_reference_short_signal() {
        // Inputs under one second use the whole signal, no out-of-bounds
        let signal = vec![0.1f32; 1000];
        assert_eq!(noise_reference(&signal, 44100).len(), 1000);
    }

    #[test]
    fn test_shape_preserved_all_levels() {
        for level in [
            NoiseReductionLevel::Light,
            NoiseReductionLevel::Medium,
            NoiseReductionLevel::Strong,
        ] {
            let mut samples = noisy_tone(44100 * 2, 22050.0)
                .into_iter()
                .flat_map(|s| [s, s])
                .collect::<Vec<f32>>();
            let len = samples.len();
            reduce_noise(&mut samples, 22050, 2, level).unwrap();
            assert_eq!(samples.len(), len);
        }
    }

    #[test]
    fn test_noise_floor_reduced() {
        let sample_rate = 22050u32;
        let mut samples = noisy_tone(sample_rate as usize * 3, sample_rate as f32);
        // Energy of the noise-only opening second, before and after
        let before: f32 = samples[..sample_rate as usize].iter().map(|s| s * s).sum();
        reduce_noise(&mut samples, sample_rate, 1, NoiseReductionLevel::Strong).unwrap();
        let after: f32 = samples[..sample_rate as usize].iter().map(|s| s * s).sum();
        assert!(after < before, "noise energy not reduced: {after} >= {before}");
    }

    #[test]
    fn test_empty_signal_is_error() {
        let mut samples: Vec<f32> = vec![];
        let err = reduce_noise(&mut samples, 44100, 1, NoiseReductionLevel::Medium).unwrap_err();
        assert!(matches!(err, PipelineError::NoiseReduction(_)));
    }

    #[test]
    fn test_sub_frame_signal_passes_through() {
        let mut samples = vec![0.2f32; 512];
        let original = samples.clone();
        reduce_noise(&mut samples, 44100, 1, NoiseReductionLevel::Medium).unwrap();
        assert_eq!(samples, original);
    }
}

//! Encoding processed audio into the target container/codec.
//!
//! WAV is written directly (float PCM). MP3 and OGG Vorbis are encoded from
//! an in-memory buffer. FLAC, M4A and AAC have no native encoder in our
//! stack, so they go through a lossless temp-WAV intermediate transcoded by
//! an ffmpeg subprocess. All paths write to a temp file beside the
//! destination and rename into place, so a failed encode never leaves a
//! partial output.

use std::fs::File;
use std::io::BufWriter;
use std::num::{NonZeroU32, NonZeroU8};
use std::path::{Path, PathBuf};

use hound::{WavSpec, WavWriter};
use mp3lame_encoder::{Builder, FlushNoGap, InterleavedPcm};
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoderBuilder};

use crate::error::PipelineError;
use crate::task::OutputFormat;

/// Encode interleaved f32 samples to `path` in `format`.
pub fn encode(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
    path: &Path,
    format: OutputFormat,
) -> Result<(), PipelineError> {
    if samples.is_empty() {
        return Err(PipelineError::Encode("No samples to encode".to_string()));
    }

    // The encode stage must not silently clip; report and carry on.
    let clipped = samples.iter().filter(|s| s.abs() > 1.0).count();
    if clipped > 0 {
        log::warn!(
            "{} of {} samples exceed full scale and will clip in {}",
            clipped,
            samples.len(),
            path.display()
        );
    }

    let temp = temp_path(path, format.extension());

    let result = match format {
        OutputFormat::Wav => write_wav(samples, sample_rate, channels, &temp),
        OutputFormat::Mp3 => write_mp3(samples, sample_rate, channels, &temp),
        OutputFormat::Ogg => write_ogg(samples, sample_rate, channels, &temp),
        OutputFormat::Flac | OutputFormat::M4a | OutputFormat::Aac => {
            transcode_via_wav(samples, sample_rate, channels, &temp, format)
        }
    };

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp);
        return Err(PipelineError::Encode(e));
    }

    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        PipelineError::Encode(format!("Failed to move output into place: {}", e))
    })?;

    log::info!("Encoded {} ({:?})", path.display(), format);
    Ok(())
}

/// Temp file next to the destination so the final rename stays on one
/// filesystem.
fn temp_path(path: &Path, ext: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let file_name = format!("{}.tmp-{}.{}", stem, uuid::Uuid::new_v4(), ext);
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_name),
        _ => PathBuf::from(file_name),
    }
}

fn write_wav(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
    path: &Path,
) -> Result<(), String> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer =
        WavWriter::create(path, spec).map_err(|e| format!("Failed to create WAV file: {}", e))?;

    for sample in samples {
        writer
            .write_sample(*sample)
            .map_err(|e| format!("Failed to write sample: {}", e))?;
    }

    writer
        .finalize()
        .map_err(|e| format!("Failed to finalize WAV: {}", e))
}

fn write_mp3(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
    path: &Path,
) -> Result<(), String> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect();

    // InterleavedPcm uses lame_encode_buffer_interleaved which always expects
    // stereo interleaved data (divides sample count by 2). For mono audio,
    // we must duplicate samples to stereo to avoid double-speed encoding.
    let (encode_samples, encode_channels) = if channels == 1 {
        let stereo: Vec<i16> = pcm.iter().flat_map(|&s| [s, s]).collect();
        (stereo, 2u16)
    } else {
        (pcm, channels)
    };

    let mut encoder = Builder::new().ok_or("Failed to create MP3 encoder")?;
    encoder
        .set_num_channels(encode_channels as u8)
        .map_err(|e| format!("Failed to set channels: {:?}", e))?;
    encoder
        .set_sample_rate(sample_rate)
        .map_err(|e| format!("Failed to set sample rate: {:?}", e))?;
    encoder
        .set_brate(mp3lame_encoder::Bitrate::Kbps192)
        .map_err(|e| format!("Failed to set bitrate: {:?}", e))?;
    encoder
        .set_quality(mp3lame_encoder::Quality::Best)
        .map_err(|e| format!("Failed to set quality: {:?}", e))?;

    let mut encoder = encoder
        .build()
        .map_err(|e| format!("Failed to build encoder: {:?}", e))?;

    // LAME needs roughly 1.25x input + 7200 bytes of headroom
    let input = InterleavedPcm(&encode_samples);
    let estimated_size = (encode_samples.len() * 5 / 4) + 7200;
    let mut mp3_out: Vec<u8> = Vec::with_capacity(estimated_size);

    let encoded_size = encoder
        .encode(input, mp3_out.spare_capacity_mut())
        .map_err(|e| format!("Failed to encode MP3: {:?}", e))?;
    unsafe {
        mp3_out.set_len(encoded_size);
    }

    mp3_out.reserve(7200);
    let flush_size = encoder
        .flush::<FlushNoGap>(mp3_out.spare_capacity_mut())
        .map_err(|e| format!("Failed to flush encoder: {:?}", e))?;
    unsafe {
        mp3_out.set_len(mp3_out.len() + flush_size);
    }

    std::fs::write(path, &mp3_out).map_err(|e| format!("Failed to write MP3 file: {}", e))
}

fn write_ogg(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
    path: &Path,
) -> Result<(), String> {
    let output_file =
        BufWriter::new(File::create(path).map_err(|e| format!("Create output: {}", e))?);

    let sr = NonZeroU32::new(sample_rate).ok_or("Sample rate must be non-zero")?;
    let ch = NonZeroU8::new(channels as u8).ok_or("Channels must be non-zero")?;

    let mut encoder = VorbisEncoderBuilder::new(sr, ch, output_file)
        .map_err(|e| format!("Vorbis builder error: {}", e))?
        .bitrate_management_strategy(VorbisBitrateManagementStrategy::QualityVbr {
            target_quality: 0.4,
        })
        .build()
        .map_err(|e| format!("Vorbis build error: {}", e))?;

    let ch_count = channels as usize;
    // Deinterleave to planar f32 in chunks for Vorbis
    const CHUNK_FRAMES: usize = 65536;
    let total_frames = samples.len() / ch_count;
    let mut frame = 0;

    while frame < total_frames {
        let chunk = CHUNK_FRAMES.min(total_frames - frame);
        let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(chunk); ch_count];
        for i in 0..chunk {
            let base = (frame + i) * ch_count;
            for (c, plane) in planar.iter_mut().enumerate() {
                plane.push(samples[base + c].clamp(-1.0, 1.0));
            }
        }
        encoder
            .encode_audio_block(&planar)
            .map_err(|e| format!("Vorbis encode error: {}", e))?;
        frame += chunk;
    }

    encoder
        .finish()
        .map_err(|e| format!("Vorbis finish error: {}", e))?;
    Ok(())
}

/// Write a lossless WAV intermediate and transcode it with ffmpeg.
///
/// Used for formats our stack has no native encoder for. ffmpeg output is
/// universally compatible where pure-Rust FLAC encoders are not.
fn transcode_via_wav(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
    target: &Path,
    format: OutputFormat,
) -> Result<(), String> {
    let wav_temp = target.with_extension("wav");
    write_wav(samples, sample_rate, channels, &wav_temp)?;

    let codec = match format {
        OutputFormat::Flac => "flac",
        OutputFormat::M4a | OutputFormat::Aac => "aac",
        _ => unreachable!("native formats never transcode"),
    };

    let result = std::process::Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(&wav_temp)
        .args(["-c:a", codec])
        .arg(target)
        .output();

    let _ = std::fs::remove_file(&wav_temp);

    let output = result.map_err(|e| format!("Failed to run ffmpeg (is it installed?): {}", e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("ffmpeg {} conversion failed: {}", codec, stderr));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize, channels: usize) -> Vec<f32> {
        (0..frames * channels)
            .map(|i| 0.25 * ((i / channels) as f32 * 0.05).sin())
            .collect()
    }

    #[test]
    fn test_wav_output_created_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let samples = tone(4410, 1);

        encode(&samples, 44100, 1, &path, OutputFormat::Wav).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 44100);
        assert_eq!(reader.len() as usize, samples.len());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        encode(&tone(1000, 2), 44100, 2, &path, OutputFormat::Wav).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out.wav".to_string()]);
    }

    #[test]
    fn test_unwritable_destination_fails() {
        let err = encode(
            &tone(100, 1),
            44100,
            1,
            Path::new("/nonexistent-dir/out.wav"),
            OutputFormat::Wav,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let err = encode(&[], 44100, 1, Path::new("/tmp/x.wav"), OutputFormat::Wav).unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
    }
}

//! Sample rate and channel count conversion of PCM16 audio
//!
//! Rate conversion runs a rubato sinc resampler in `f32`; everything
//! observable stays in PCM16.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::AudioRecord;

const CHUNK_FRAMES: usize = 1024;

/// Outcome of a conversion that may be a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resample {
    /// Input already matched the target; samples and record untouched
    Unchanged,
    /// Samples were replaced and the record updated
    Changed,
}

/// Convert interleaved PCM16 `samples` to `target_rate`.
///
/// On [`Resample::Changed`] the record describes the new PCM16 buffer, even
/// when it described a compressed stream before.
pub fn resample_sample_rate(
    record: &mut AudioRecord,
    samples: &mut Vec<i16>,
    target_rate: u32,
) -> Result<Resample> {
    if target_rate == 0 || record.sample_rate == 0 {
        return Err(Error::ResampleFailed(format!(
            "cannot convert {} Hz to {target_rate} Hz",
            record.sample_rate
        )));
    }
    if record.sample_rate == target_rate {
        return Ok(Resample::Unchanged);
    }
    let channels = usize::from(record.channels);
    if channels == 0 || samples.len() % channels != 0 {
        return Err(Error::ResampleFailed(format!(
            "{} samples do not form whole {channels}-channel frames",
            samples.len()
        )));
    }

    let frames = samples.len() / channels;
    let ratio = f64::from(target_rate) / f64::from(record.sample_rate);
    let expected = (frames as f64 * ratio).round() as usize;
    debug!(
        "Resampling {} frames from {}Hz to {}Hz ({} channels)",
        frames, record.sample_rate, target_rate, channels
    );

    let planar = deinterleave(samples, channels);
    let resampled = run_sinc(&planar, ratio, expected)?;
    *samples = interleave(&resampled);

    record.sample_rate = target_rate;
    update_pcm_sizes(record, expected);
    Ok(Resample::Changed)
}

fn run_sinc(planar: &[Vec<f32>], ratio: f64, expected: usize) -> Result<Vec<Vec<f32>>> {
    let channels = planar.len();
    let frames = planar.first().map_or(0, Vec::len);

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, channels)
        .map_err(|e| Error::ResampleFailed(format!("failed to create resampler: {e}")))?;
    let delay = resampler.output_delay();
    let wanted = expected + delay;

    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channels];
    let mut pos = 0;
    while pos + CHUNK_FRAMES <= frames {
        let input: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + CHUNK_FRAMES]).collect();
        let chunk = resampler
            .process(&input, None)
            .map_err(|e| Error::ResampleFailed(e.to_string()))?;
        append(&mut output, chunk);
        pos += CHUNK_FRAMES;
    }
    if pos < frames {
        let input: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        let chunk = resampler
            .process_partial(Some(input.as_slice()), None)
            .map_err(|e| Error::ResampleFailed(e.to_string()))?;
        append(&mut output, chunk);
    }

    // Flush the filter tail until the delayed signal is complete
    let mut flushes = 0;
    while output.first().map_or(0, Vec::len) < wanted && flushes < 64 {
        let chunk = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| Error::ResampleFailed(e.to_string()))?;
        append(&mut output, chunk);
        flushes += 1;
    }

    for out in &mut output {
        out.resize(wanted.max(out.len()), 0.0);
        out.drain(..delay);
        out.truncate(expected);
    }
    Ok(output)
}

fn append(output: &mut [Vec<f32>], chunk: Vec<Vec<f32>>) {
    for (out, part) in output.iter_mut().zip(chunk) {
        out.extend(part);
    }
}

/// Convert between mono and stereo.
///
/// Mono to stereo duplicates every sample; stereo to mono averages each pair,
/// truncating toward zero.
pub fn resample_channels(
    record: &mut AudioRecord,
    samples: &mut Vec<i16>,
    target_channels: u16,
) -> Result<Resample> {
    match (record.channels, target_channels) {
        (from, to) if from == to && (1..=2).contains(&from) => Ok(Resample::Unchanged),
        (1, 2) => {
            *samples = samples.iter().flat_map(|&s| [s, s]).collect();
            record.channels = 2;
            update_pcm_sizes(record, samples.len() / 2);
            Ok(Resample::Changed)
        }
        (2, 1) => {
            *samples = samples
                .chunks_exact(2)
                .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16)
                .collect();
            record.channels = 1;
            update_pcm_sizes(record, samples.len());
            Ok(Resample::Changed)
        }
        (from, to) => Err(Error::UnsupportedChannelConversion { from, to }),
    }
}

/// Make `record` describe `frames` frames of PCM16, whatever it was decoded from.
///
/// The hash is cleared since it covered the previous content.
fn update_pcm_sizes(record: &mut AudioRecord, frames: usize) {
    *record = AudioRecord::pcm16(record.sample_rate, record.channels, frames);
}

/// Interleaved PCM16 to planar `f32` in `[-1, 1)`
fn deinterleave(samples: &[i16], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (c, &s) in frame.iter().enumerate() {
            planar[c].push(f32::from(s) / 32768.0);
        }
    }
    planar
}

/// Planar `f32` back to interleaved, rounded and clamped PCM16
fn interleave(planar: &[Vec<f32>]) -> Vec<i16> {
    let Some(first) = planar.first() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(first.len() * planar.len());
    for f in 0..first.len() {
        for channel in planar {
            let v = (channel[f] * 32768.0).round();
            out.push(v.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AudioFormat;

    #[test]
    fn test_mono_to_stereo() {
        let mut record = AudioRecord::pcm16(22050, 1, 3);
        let mut samples = vec![1, -2, 3];
        let result = resample_channels(&mut record, &mut samples, 2).unwrap();
        assert_eq!(result, Resample::Changed);
        assert_eq!(samples, vec![1, 1, -2, -2, 3, 3]);
        assert_eq!(record.channels, 2);
        assert_eq!(record.data_size, 12);
        assert_eq!(record.byte_rate, 22050 * 4);
    }

    #[test]
    fn test_stereo_to_mono_truncates() {
        let mut record = AudioRecord::pcm16(22050, 2, 3);
        let mut samples = vec![1, 2, -1, -2, i16::MAX, i16::MAX];
        resample_channels(&mut record, &mut samples, 1).unwrap();
        // (1 + 2) / 2 = 1 and (-1 - 2) / 2 = -1 in integer arithmetic
        assert_eq!(samples, vec![1, -1, i16::MAX]);
        assert_eq!(record.data_size_uncompressed, 6);
    }

    #[test]
    fn test_channel_conversion_limits() {
        let mut record = AudioRecord::pcm16(22050, 2, 1);
        let mut samples = vec![0, 0];
        assert_eq!(
            resample_channels(&mut record, &mut samples, 2).unwrap(),
            Resample::Unchanged
        );
        assert!(resample_channels(&mut record, &mut samples, 6).is_err());
    }

    #[test]
    fn test_resample_same_rate() {
        let mut record = AudioRecord::pcm16(44100, 1, 4);
        let mut samples = vec![1, 2, 3, 4];
        assert_eq!(
            resample_sample_rate(&mut record, &mut samples, 44100).unwrap(),
            Resample::Unchanged
        );
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_resample_frame_count() {
        let frames = 5000;
        let mut samples: Vec<i16> = (0..frames * 2)
            .map(|i| (((i / 2) as f32 * 0.02).sin() * 8000.0) as i16)
            .collect();
        let mut record = AudioRecord::pcm16(22050, 2, frames);
        let result = resample_sample_rate(&mut record, &mut samples, 44100).unwrap();
        assert_eq!(result, Resample::Changed);
        assert_eq!(samples.len(), frames * 2 * 2);
        assert_eq!(record.sample_rate, 44100);
        assert_eq!(record.data_size, (frames * 2 * 2 * 2) as u32);

        // A slow sine survives the conversion
        let mid = samples[2 * 4000];
        let expected = ((2000.0f32) * 0.02).sin() * 8000.0;
        assert!((f32::from(mid) - expected).abs() < 400.0);
    }

    #[test]
    fn test_resampled_adpcm_record_describes_pcm16() {
        let frames = 2000;
        let mut samples: Vec<i16> = (0..frames).map(|i| ((i % 64) * 100) as i16).collect();
        let mut record = AudioRecord {
            format: AudioFormat::ImaAdpcm,
            sample_rate: 22050,
            channels: 1,
            bits_per_sample: 4,
            block_align: 512,
            samples_per_block: 1017,
            byte_rate: 11100,
            data_size: 1024,
            data_size_uncompressed: (frames * 2) as u32,
            hash: 0x1234,
        };
        resample_sample_rate(&mut record, &mut samples, 44100).unwrap();
        assert_eq!(record, AudioRecord::pcm16(44100, 1, frames * 2));
        assert_eq!(samples.len(), frames * 2);

        let mut record = AudioRecord {
            format: AudioFormat::Vorbis,
            ..AudioRecord::pcm16(44100, 2, 4)
        };
        record.data_size = 99;
        let mut samples = vec![4, 6, -4, -6, 0, 2, 10, 10];
        resample_channels(&mut record, &mut samples, 1).unwrap();
        assert_eq!(record, AudioRecord::pcm16(44100, 1, 4));
        assert_eq!(record.data_size, 8);
        assert_eq!(record.byte_rate, 88200);
    }
}

//! Codec bridge between archive streams and canonical PCM16
//!
//! Every transcode goes through interleaved signed 16-bit PCM:
//!
//! ```text
//! stored bytes --decode_to_pcm16--> Vec<i16> --encode_from_pcm16--> stored bytes
//!                                      |
//!                     resample_sample_rate / resample_channels
//! ```
//!
//! For PCM16 and IMA ADPCM the stored bytes are the bare sample payload (the
//! archive record carries the format). Vorbis and other decodable streams are
//! stored as complete files.

pub mod adpcm;
pub mod header;
pub mod probe;
pub mod resample;
pub mod vorbis;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{AudioFormat, AudioRecord};

pub use adpcm::{AdpcmSettings, NoiseShaping};
pub use header::{StreamHeader, detect_header, wrap_container};
pub use resample::{Resample, resample_channels, resample_sample_rate};

/// A freshly encoded stream and its descriptor (hash not yet computed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStream {
    pub record: AudioRecord,
    pub payload: Vec<u8>,
}

/// Decode a stored payload to interleaved PCM16.
///
/// Fails when the codec cannot decode the bytes, when `data_size` exceeds the
/// payload, or when no frames come out.
pub fn decode_to_pcm16(record: &AudioRecord, payload: &[u8]) -> Result<Vec<i16>> {
    let data_size = record.data_size as usize;
    if data_size > payload.len() {
        return Err(Error::DecodeFailed(format!(
            "record declares {data_size} bytes, only {} present",
            payload.len()
        )));
    }
    let channels = usize::from(record.channels);
    if !(1..=2).contains(&channels) {
        return Err(Error::DecodeFailed(format!("{channels} channels")));
    }

    let mut samples = match record.format {
        AudioFormat::Pcm16 => {
            let usable = data_size - data_size % (channels * 2);
            bytes_to_pcm16(&payload[..usable])
        }
        AudioFormat::ImaAdpcm => {
            adpcm::decode(&payload[..data_size], record.channels, record.block_align)?
        }
        AudioFormat::Vorbis | AudioFormat::UnknownDecodable => {
            let decoded = if record.format == AudioFormat::Vorbis {
                vorbis::decode(&payload[..data_size])?
            } else {
                probe::decode_all(&payload[..data_size], None)?
            };
            if decoded.channels != record.channels {
                return Err(Error::DecodeFailed(format!(
                    "stream has {} channels, record declares {}",
                    decoded.channels, record.channels
                )));
            }
            decoded.samples
        }
    };

    if record.format == AudioFormat::ImaAdpcm && record.data_size_uncompressed > 0 {
        samples.truncate(record.data_size_uncompressed as usize / 2);
    }
    samples.truncate(samples.len() - samples.len() % channels);

    if samples.is_empty() {
        return Err(Error::DecodeFailed("stream holds no frames".to_string()));
    }
    Ok(samples)
}

/// Encode interleaved PCM16 to `target`, taking rate and channels from `template`.
///
/// PCM16 output is the bare sample payload; use [`wrap_container`] for a WAV file.
/// `UnknownDecodable` cannot be produced.
pub fn encode_from_pcm16(
    target: AudioFormat,
    template: &AudioRecord,
    samples: &[i16],
    settings: &AdpcmSettings,
) -> Result<EncodedStream> {
    let channels = template.channels;
    let width = usize::from(channels);
    if !(1..=2).contains(&width) || samples.is_empty() || samples.len() % width != 0 {
        return Err(Error::EncodeFailed(format!(
            "{} samples cannot form {channels}-channel frames",
            samples.len()
        )));
    }
    let frames = samples.len() / width;
    let uncompressed = (samples.len() * 2) as u32;

    let stream = match target {
        AudioFormat::Pcm16 => EncodedStream {
            record: AudioRecord::pcm16(template.sample_rate, channels, frames),
            payload: pcm16_to_bytes(samples),
        },
        AudioFormat::ImaAdpcm => {
            let encoded = adpcm::encode(samples, channels, template.sample_rate, settings)?;
            let byte_rate = (u64::from(template.sample_rate) * u64::from(encoded.block_align)
                / u64::from(encoded.samples_per_block)) as u32;
            EncodedStream {
                record: AudioRecord {
                    format: AudioFormat::ImaAdpcm,
                    sample_rate: template.sample_rate,
                    channels,
                    bits_per_sample: 4,
                    block_align: encoded.block_align,
                    samples_per_block: encoded.samples_per_block,
                    byte_rate,
                    data_size: encoded.data.len() as u32,
                    data_size_uncompressed: uncompressed,
                    hash: 0,
                },
                payload: encoded.data,
            }
        }
        AudioFormat::Vorbis => {
            let payload = vorbis::encode(samples, channels, template.sample_rate)?;
            let byte_rate = (payload.len() as u64 * u64::from(template.sample_rate)
                / frames as u64) as u32;
            EncodedStream {
                record: AudioRecord {
                    format: AudioFormat::Vorbis,
                    sample_rate: template.sample_rate,
                    channels,
                    bits_per_sample: 16,
                    block_align: channels * 2,
                    samples_per_block: 1,
                    byte_rate,
                    data_size: payload.len() as u32,
                    data_size_uncompressed: uncompressed,
                    hash: 0,
                },
                payload,
            }
        }
        AudioFormat::UnknownDecodable => {
            return Err(Error::UnsupportedFormat(
                "streams of unknown codecs can only be decoded".to_string(),
            ));
        }
    };

    debug!(
        "Encoded {} frames as {} ({} bytes)",
        frames,
        target.as_str(),
        stream.payload.len()
    );
    Ok(stream)
}

/// Little-endian bytes to samples; a trailing odd byte is ignored
#[must_use]
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[must_use]
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

//! Ogg-Vorbis encode and decode

use std::num::{NonZeroU32, NonZeroU8};

use tracing::debug;
use vorbis_rs::VorbisEncoderBuilder;

use super::probe::{self, DecodedPcm};
use crate::error::{Error, Result};

/// Ogg stream serial used for every encoded stream so output is reproducible
const STREAM_SERIAL: i32 = 0x5350_4B31;

const BLOCK_FRAMES: usize = 4096;

/// Decode a complete Ogg-Vorbis file to interleaved PCM16
pub fn decode(bytes: &[u8]) -> Result<DecodedPcm> {
    probe::decode_all(bytes, Some("ogg"))
}

/// Encode interleaved PCM16 into a complete Ogg-Vorbis file
pub fn encode(samples: &[i16], channels: u16, sample_rate: u32) -> Result<Vec<u8>> {
    let rate = NonZeroU32::new(sample_rate)
        .ok_or_else(|| Error::EncodeFailed("sample rate of 0 Hz".to_string()))?;
    let ch = u8::try_from(channels)
        .ok()
        .and_then(NonZeroU8::new)
        .ok_or_else(|| Error::EncodeFailed(format!("{channels} channels")))?;
    let width = usize::from(channels);
    if samples.len() % width != 0 {
        return Err(Error::EncodeFailed(format!(
            "{} samples do not form whole {width}-channel frames",
            samples.len()
        )));
    }

    let mut out = Vec::new();
    let mut builder = VorbisEncoderBuilder::new_with_serial(rate, ch, &mut out, STREAM_SERIAL);
    let mut encoder = builder
        .build()
        .map_err(|e| Error::EncodeFailed(e.to_string()))?;

    for block in samples.chunks(BLOCK_FRAMES * width) {
        let mut planar = vec![Vec::with_capacity(block.len() / width); width];
        for frame in block.chunks_exact(width) {
            for (c, &s) in frame.iter().enumerate() {
                planar[c].push(f32::from(s) / 32768.0);
            }
        }
        encoder
            .encode_audio_block(&planar)
            .map_err(|e| Error::EncodeFailed(e.to_string()))?;
    }
    encoder
        .finish()
        .map_err(|e| Error::EncodeFailed(e.to_string()))?;

    debug!(
        "Encoded {} frames to {} bytes of Vorbis",
        samples.len() / width,
        out.len()
    );
    Ok(out)
}

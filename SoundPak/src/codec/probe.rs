//! General decoder probe through the symphonia registry
//!
//! Used for Vorbis decoding and for anything that is neither a PCM16 nor an
//! IMA ADPCM RIFF file.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Interleaved PCM16 produced by the general decoder
#[derive(Debug, Clone, Default)]
pub struct DecodedPcm {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedPcm {
    #[must_use]
    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            ch => self.samples.len() / usize::from(ch),
        }
    }
}

/// Stream parameters reported by the container, without decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedStream {
    pub sample_rate: u32,
    pub channels: u16,
}

fn open_reader(bytes: &[u8], extension: Option<&str>) -> Result<Box<dyn FormatReader>> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::DecodeFailed(format!("failed to probe format: {e}")))?;

    Ok(probed.format)
}

/// Ask the format registry whether `bytes` hold a decodable audio stream
#[must_use]
pub fn probe_stream(bytes: &[u8]) -> Option<ProbedStream> {
    let reader = open_reader(bytes, None).ok()?;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)?;

    let sample_rate = track.codec_params.sample_rate?;
    let channels = track.codec_params.channels.map(|c| c.count() as u16)?;
    Some(ProbedStream {
        sample_rate,
        channels,
    })
}

/// Decode an entire stream to interleaved PCM16
pub fn decode_all(bytes: &[u8], extension: Option<&str>) -> Result<DecodedPcm> {
    let mut reader = open_reader(bytes, extension)?;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::DecodeFailed("no audio track found".to_string()))?;

    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| Error::DecodeFailed("sample rate not found".to_string()))?;
    let channels = params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| Error::DecodeFailed("channel count not found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| Error::DecodeFailed(format!("failed to create decoder: {e}")))?;

    let mut samples = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(Error::DecodeFailed(e.to_string())),
        }
    }

    debug!(
        "Decoded {} frames at {} Hz, {} channel(s)",
        samples.len() / usize::from(channels.max(1)),
        sample_rate,
        channels
    );

    Ok(DecodedPcm {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_rejects_noise() {
        let noise: Vec<u8> = (0..512u32).map(|i| (i * 31 % 251) as u8).collect();
        assert!(probe_stream(&noise).is_none());
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert!(decode_all(&[], None).is_err());
    }
}

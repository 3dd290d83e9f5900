//! Stream sniffing and WAV container synthesis

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::adpcm;
use super::probe;
use crate::error::{Error, Result};
use crate::model::{AudioFormat, AudioRecord, pcm16_byte_rate};

const RIFF_MAGIC: &[u8; 4] = b"RIFF";
const WAVE_MAGIC: &[u8; 4] = b"WAVE";
const OGG_MAGIC: &[u8; 4] = b"OggS";

pub const WAVE_FORMAT_PCM: u16 = 0x0001;
pub const WAVE_FORMAT_IMA_ADPCM: u16 = 0x0011;
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Size of the canonical PCM16 header written by [`wrap_container`]
pub const PCM_HEADER_SIZE: usize = 44;
/// Size of the IMA ADPCM header written by [`wrap_container`]
pub const ADPCM_HEADER_SIZE: usize = 60;

/// A detected stream: its descriptor plus where the payload sits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub record: AudioRecord,
    /// Payload byte range inside the inspected buffer
    pub data: Range<usize>,
}

impl StreamHeader {
    /// Borrow the payload out of the buffer the header was detected in
    #[must_use]
    pub fn payload<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.data.clone()]
    }
}

/// Classify a buffer as PCM16 WAV, IMA ADPCM WAV, Ogg-Vorbis or any other decodable stream.
///
/// Returns `None` when nothing in the buffer resembles an audio stream.
#[must_use]
pub fn detect_header(bytes: &[u8]) -> Option<StreamHeader> {
    let header = if bytes.starts_with(RIFF_MAGIC) {
        match parse_riff(bytes) {
            Ok(header) => header,
            Err(e) => {
                debug!("Rejected RIFF header: {}", e);
                return None;
            }
        }
    } else if bytes.starts_with(OGG_MAGIC) {
        parse_ogg(bytes)
    } else {
        None
    };

    header
        .or_else(|| probe_general(bytes))
        .filter(|h| {
            (1..=2).contains(&h.record.channels)
                && h.record.sample_rate > 0
                && pcm16_byte_rate(h.record.sample_rate, h.record.channels).is_some()
        })
}

/// Walk RIFF chunks; `Ok(None)` for RIFF files whose codec is not handled natively
fn parse_riff(bytes: &[u8]) -> Result<Option<StreamHeader>> {
    let mut reader = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    let _riff_size = reader.read_u32::<LittleEndian>()?;
    reader.read_exact(&mut magic)?;
    if &magic != WAVE_MAGIC {
        return Ok(None);
    }

    let mut format_tag = 0u16;
    let mut channels = 0u16;
    let mut sample_rate = 0u32;
    let mut byte_rate = 0u32;
    let mut block_align = 0u16;
    let mut bits_per_sample = 0u16;
    let mut samples_per_block = 0u32;
    let mut fact_frames: Option<u32> = None;
    let mut found_fmt = false;
    let mut data: Option<Range<usize>> = None;

    while data.is_none() {
        let mut chunk_id = [0u8; 4];
        if reader.read_exact(&mut chunk_id).is_err() {
            break;
        }
        let chunk_size = reader.read_u32::<LittleEndian>()?;
        let chunk_start = reader.stream_position()?;

        match &chunk_id {
            b"fmt " => {
                format_tag = reader.read_u16::<LittleEndian>()?;
                channels = reader.read_u16::<LittleEndian>()?;
                sample_rate = reader.read_u32::<LittleEndian>()?;
                byte_rate = reader.read_u32::<LittleEndian>()?;
                block_align = reader.read_u16::<LittleEndian>()?;
                bits_per_sample = reader.read_u16::<LittleEndian>()?;
                if chunk_size >= 20 {
                    let cb_size = reader.read_u16::<LittleEndian>()?;
                    if format_tag == WAVE_FORMAT_IMA_ADPCM && cb_size >= 2 {
                        samples_per_block = u32::from(reader.read_u16::<LittleEndian>()?);
                    } else if format_tag == WAVE_FORMAT_EXTENSIBLE && cb_size >= 22 {
                        let _valid_bits = reader.read_u16::<LittleEndian>()?;
                        let _channel_mask = reader.read_u32::<LittleEndian>()?;
                        // First two bytes of the sub-format GUID carry the real tag
                        format_tag = reader.read_u16::<LittleEndian>()?;
                    }
                }
                found_fmt = true;
            }
            b"fact" if chunk_size >= 4 => {
                fact_frames = Some(reader.read_u32::<LittleEndian>()?);
            }
            b"data" => {
                let start = chunk_start as usize;
                let end = start.saturating_add(chunk_size as usize).min(bytes.len());
                data = Some(start..end);
            }
            _ => {}
        }

        // Chunks are word aligned
        let next_pos = chunk_start + u64::from(chunk_size);
        reader.seek(SeekFrom::Start((next_pos + 1) & !1))?;
    }

    let Some(data) = data else {
        return Ok(None);
    };
    if !found_fmt || channels == 0 {
        return Ok(None);
    }
    if channels > 2 {
        return Err(Error::UnsupportedFormat(format!("{channels} channel WAV")));
    }
    let data_size = data.len() as u32;

    let record = match (format_tag, bits_per_sample) {
        (WAVE_FORMAT_PCM, 16) => {
            let frame = u32::from(channels) * 2;
            let byte_rate = pcm16_byte_rate(sample_rate, channels).ok_or_else(|| {
                Error::UnsupportedFormat(format!("sample rate {sample_rate} Hz"))
            })?;
            AudioRecord {
                format: AudioFormat::Pcm16,
                sample_rate,
                channels,
                bits_per_sample: 16,
                block_align: channels * 2,
                samples_per_block: 1,
                byte_rate,
                data_size,
                data_size_uncompressed: data_size - data_size % frame,
                hash: 0,
            }
        }
        (WAVE_FORMAT_IMA_ADPCM, 4) => {
            if samples_per_block == 0 {
                samples_per_block = adpcm::samples_per_block(block_align, channels);
            }
            let frames = fact_frames.unwrap_or_else(|| {
                adpcm::frames_in(data_size as usize, block_align, channels) as u32
            });
            let data_size_uncompressed = frames
                .checked_mul(u32::from(channels) * 2)
                .ok_or_else(|| Error::UnsupportedFormat(format!("{frames} ADPCM frames")))?;
            AudioRecord {
                format: AudioFormat::ImaAdpcm,
                sample_rate,
                channels,
                bits_per_sample: 4,
                block_align,
                samples_per_block,
                byte_rate,
                data_size,
                data_size_uncompressed,
                hash: 0,
            }
        }
        _ => return Ok(None),
    };

    Ok(Some(StreamHeader { record, data }))
}

/// Read rate and channels from the Vorbis identification header on the first Ogg page
fn parse_ogg(bytes: &[u8]) -> Option<StreamHeader> {
    let segment_count = usize::from(*bytes.get(26)?);
    let packet_start = 27 + segment_count;
    let ident = bytes.get(packet_start..packet_start + 30)?;
    if ident[0] != 0x01 || &ident[1..7] != b"vorbis" {
        return None;
    }

    let mut reader = Cursor::new(&ident[7..]);
    let _version = reader.read_u32::<LittleEndian>().ok()?;
    let channels = u16::from(reader.read_u8().ok()?);
    let sample_rate = reader.read_u32::<LittleEndian>().ok()?;
    let _bitrate_max = reader.read_i32::<LittleEndian>().ok()?;
    let bitrate_nominal = reader.read_i32::<LittleEndian>().ok()?;

    let byte_rate = if bitrate_nominal > 0 {
        bitrate_nominal as u32 / 8
    } else {
        0
    };

    Some(StreamHeader {
        record: AudioRecord {
            format: AudioFormat::Vorbis,
            sample_rate,
            channels,
            bits_per_sample: 16,
            block_align: channels * 2,
            samples_per_block: 1,
            byte_rate,
            data_size: bytes.len() as u32,
            data_size_uncompressed: 0,
            hash: 0,
        },
        data: 0..bytes.len(),
    })
}

fn probe_general(bytes: &[u8]) -> Option<StreamHeader> {
    let probed = probe::probe_stream(bytes)?;
    Some(StreamHeader {
        record: AudioRecord {
            format: AudioFormat::UnknownDecodable,
            sample_rate: probed.sample_rate,
            channels: probed.channels,
            bits_per_sample: 16,
            block_align: probed.channels * 2,
            samples_per_block: 1,
            byte_rate: 0,
            data_size: bytes.len() as u32,
            data_size_uncompressed: 0,
            hash: 0,
        },
        data: 0..bytes.len(),
    })
}

/// Build a self-contained file for `payload` described by `record`.
///
/// PCM16 and IMA ADPCM get a WAV header; Vorbis and other streams are already
/// complete files and are returned unchanged.
pub fn wrap_container(record: &AudioRecord, payload: &[u8]) -> Result<Vec<u8>> {
    match record.format {
        AudioFormat::Pcm16 => {
            let byte_rate = pcm16_byte_rate(record.sample_rate, record.channels)
                .filter(|_| (1..=2).contains(&record.channels))
                .ok_or_else(|| {
                    Error::EncodeFailed(format!(
                        "{} channels at {} Hz do not fit a WAV header",
                        record.channels, record.sample_rate
                    ))
                })?;
            let mut out = Vec::with_capacity(PCM_HEADER_SIZE + payload.len() + 1);
            let padded = payload.len() + payload.len() % 2;
            out.extend_from_slice(RIFF_MAGIC);
            out.write_u32::<LittleEndian>((36 + padded) as u32)?;
            out.extend_from_slice(WAVE_MAGIC);
            out.extend_from_slice(b"fmt ");
            out.write_u32::<LittleEndian>(16)?;
            out.write_u16::<LittleEndian>(WAVE_FORMAT_PCM)?;
            out.write_u16::<LittleEndian>(record.channels)?;
            out.write_u32::<LittleEndian>(record.sample_rate)?;
            out.write_u32::<LittleEndian>(byte_rate)?;
            out.write_u16::<LittleEndian>(record.channels * 2)?;
            out.write_u16::<LittleEndian>(16)?;
            out.extend_from_slice(b"data");
            out.write_u32::<LittleEndian>(payload.len() as u32)?;
            out.extend_from_slice(payload);
            if padded != payload.len() {
                out.push(0);
            }
            Ok(out)
        }
        AudioFormat::ImaAdpcm => {
            let mut out = Vec::with_capacity(ADPCM_HEADER_SIZE + payload.len() + 1);
            let padded = payload.len() + payload.len() % 2;
            let samples_per_block = u16::try_from(record.samples_per_block).map_err(|_| {
                Error::EncodeFailed(format!(
                    "{} samples per block does not fit a WAV header",
                    record.samples_per_block
                ))
            })?;
            out.extend_from_slice(RIFF_MAGIC);
            out.write_u32::<LittleEndian>((ADPCM_HEADER_SIZE - 8 + padded) as u32)?;
            out.extend_from_slice(WAVE_MAGIC);
            out.extend_from_slice(b"fmt ");
            out.write_u32::<LittleEndian>(20)?;
            out.write_u16::<LittleEndian>(WAVE_FORMAT_IMA_ADPCM)?;
            out.write_u16::<LittleEndian>(record.channels)?;
            out.write_u32::<LittleEndian>(record.sample_rate)?;
            out.write_u32::<LittleEndian>(record.byte_rate)?;
            out.write_u16::<LittleEndian>(record.block_align)?;
            out.write_u16::<LittleEndian>(4)?;
            out.write_u16::<LittleEndian>(2)?;
            out.write_u16::<LittleEndian>(samples_per_block)?;
            out.extend_from_slice(b"fact");
            out.write_u32::<LittleEndian>(4)?;
            out.write_u32::<LittleEndian>(record.frame_count())?;
            out.extend_from_slice(b"data");
            out.write_u32::<LittleEndian>(payload.len() as u32)?;
            out.extend_from_slice(payload);
            if padded != payload.len() {
                out.push(0);
            }
            Ok(out)
        }
        AudioFormat::Vorbis | AudioFormat::UnknownDecodable => Ok(payload.to_vec()),
    }
}

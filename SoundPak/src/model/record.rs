//! Canonical audio stream descriptor

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of one persisted [`AudioRecord`] snapshot in bytes
pub const SNAPSHOT_SIZE: usize = 44;

/// Codec of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    /// Signed 16-bit little-endian PCM
    #[default]
    Pcm16,
    /// IMA ADPCM, 4 bits per sample, block based
    ImaAdpcm,
    /// Ogg-Vorbis
    Vorbis,
    /// Any other stream the general decoder can read
    UnknownDecodable,
}

impl AudioFormat {
    /// Format tag used by WAV headers and archive records
    #[must_use]
    pub fn tag(self) -> u16 {
        match self {
            AudioFormat::Pcm16 => 0x0001,
            AudioFormat::ImaAdpcm => 0x0011,
            AudioFormat::Vorbis => 0x1000,
            AudioFormat::UnknownDecodable => 0x0000,
        }
    }

    /// Parse an archive format tag
    #[must_use]
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            0x0001 => Some(AudioFormat::Pcm16),
            0x0011 => Some(AudioFormat::ImaAdpcm),
            0x1000 => Some(AudioFormat::Vorbis),
            0x0000 => Some(AudioFormat::UnknownDecodable),
            _ => None,
        }
    }

    /// Bits per sample as declared in headers
    #[must_use]
    pub fn bits_per_sample(self) -> u16 {
        match self {
            AudioFormat::ImaAdpcm => 4,
            _ => 16,
        }
    }

    /// Preferred file extension when the stream is written out on its own
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Vorbis => "ogg",
            _ => "wav",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Pcm16 => "PCM16",
            AudioFormat::ImaAdpcm => "IMA-ADPCM",
            AudioFormat::Vorbis => "Vorbis",
            AudioFormat::UnknownDecodable => "Other",
        }
    }
}

/// Descriptor of one audio stream plus its content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioRecord {
    pub format: AudioFormat,
    pub sample_rate: u32,
    /// 1 or 2
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,
    /// ADPCM compression granularity; 1 for PCM and Vorbis
    pub samples_per_block: u32,
    /// Average bytes per second of the stored stream
    pub byte_rate: u32,
    /// Stored (compressed) byte length
    pub data_size: u32,
    /// Decoded PCM16 byte length, always a multiple of `channels * 2`
    pub data_size_uncompressed: u32,
    /// XXH3-64 content hash
    pub hash: u64,
}

/// Average bytes per second of PCM16 audio; `None` when it overflows a header field
#[must_use]
pub fn pcm16_byte_rate(sample_rate: u32, channels: u16) -> Option<u32> {
    sample_rate.checked_mul(u32::from(channels) * 2)
}

impl AudioRecord {
    /// Describe `frames` frames of PCM16 audio
    #[must_use]
    pub fn pcm16(sample_rate: u32, channels: u16, frames: usize) -> Self {
        let block_align = channels.saturating_mul(2);
        let size = (frames * usize::from(block_align)) as u32;
        Self {
            format: AudioFormat::Pcm16,
            sample_rate,
            channels,
            bits_per_sample: 16,
            block_align,
            samples_per_block: 1,
            byte_rate: sample_rate.saturating_mul(u32::from(block_align)),
            data_size: size,
            data_size_uncompressed: size,
            hash: 0,
        }
    }

    /// Bytes per decoded PCM16 frame
    #[must_use]
    pub fn pcm_frame_size(&self) -> u32 {
        u32::from(self.channels) * 2
    }

    /// Number of decoded frames, when known
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        match self.pcm_frame_size() {
            0 => 0,
            frame => self.data_size_uncompressed / frame,
        }
    }

    /// Duration in seconds (0 when unknown)
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        f64::from(self.frame_count()) / f64::from(self.sample_rate)
    }

    /// True when the record describes something this crate can process
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (1..=2).contains(&self.channels)
            && self.sample_rate > 0
            && self.data_size_uncompressed % self.pcm_frame_size() == 0
    }

    /// Compare everything except the content hash
    #[must_use]
    pub fn same_layout(&self, other: &AudioRecord) -> bool {
        AudioRecord { hash: 0, ..*self } == AudioRecord { hash: 0, ..*other }
    }

    /// Write the fixed 44-byte snapshot form
    pub fn write_snapshot<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(u32::from(self.format.tag()))?;
        writer.write_u32::<LittleEndian>(self.sample_rate)?;
        writer.write_u16::<LittleEndian>(self.channels)?;
        writer.write_u16::<LittleEndian>(self.bits_per_sample)?;
        writer.write_u16::<LittleEndian>(self.block_align)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.samples_per_block)?;
        writer.write_u32::<LittleEndian>(self.byte_rate)?;
        writer.write_u32::<LittleEndian>(self.data_size)?;
        writer.write_u32::<LittleEndian>(self.data_size_uncompressed)?;
        writer.write_u64::<LittleEndian>(self.hash)?;
        writer.write_u32::<LittleEndian>(0)?;
        Ok(())
    }

    /// Read the fixed 44-byte snapshot form
    pub fn read_snapshot<R: Read>(reader: &mut R) -> Result<Self> {
        let tag = reader.read_u32::<LittleEndian>()?;
        let format = u16::try_from(tag)
            .ok()
            .and_then(AudioFormat::from_tag)
            .ok_or_else(|| Error::CacheCorrupt(format!("unknown format tag {tag:#x}")))?;
        let sample_rate = reader.read_u32::<LittleEndian>()?;
        let channels = reader.read_u16::<LittleEndian>()?;
        let bits_per_sample = reader.read_u16::<LittleEndian>()?;
        let block_align = reader.read_u16::<LittleEndian>()?;
        let _reserved = reader.read_u16::<LittleEndian>()?;
        let samples_per_block = reader.read_u32::<LittleEndian>()?;
        let byte_rate = reader.read_u32::<LittleEndian>()?;
        let data_size = reader.read_u32::<LittleEndian>()?;
        let data_size_uncompressed = reader.read_u32::<LittleEndian>()?;
        let hash = reader.read_u64::<LittleEndian>()?;
        let _reserved = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            format,
            sample_rate,
            channels,
            bits_per_sample,
            block_align,
            samples_per_block,
            byte_rate,
            data_size,
            data_size_uncompressed,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_pcm16_record() {
        let record = AudioRecord::pcm16(22050, 2, 100);
        assert_eq!(record.data_size, 400);
        assert_eq!(record.byte_rate, 88200);
        assert_eq!(record.frame_count(), 100);
        assert!(record.is_valid());
    }

    #[test]
    fn test_snapshot_layout() {
        let record = AudioRecord {
            hash: 0xDEAD_BEEF_0123_4567,
            ..AudioRecord::pcm16(44100, 1, 10)
        };
        let mut bytes = Vec::new();
        record.write_snapshot(&mut bytes).unwrap();
        assert_eq!(bytes.len(), SNAPSHOT_SIZE);

        let read = AudioRecord::read_snapshot(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn test_same_layout_ignores_hash() {
        let a = AudioRecord { hash: 1, ..AudioRecord::pcm16(8000, 1, 4) };
        let b = AudioRecord { hash: 2, ..a };
        assert!(a.same_layout(&b));
        assert_ne!(a, b);
    }
}

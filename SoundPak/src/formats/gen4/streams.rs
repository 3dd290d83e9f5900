//! `streams.str` container
//!
//! ```text
//! header   24 bytes   "STR4", version, table offset, entry count, flags
//! data                payload regions addressed by absolute offset
//! table    48 bytes   one StrEntry per stream
//! strings             paths, offsets relative to the table end
//! ```

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::formats::common::{read_cstr, slice_at};
use crate::model::{AudioFormat, AudioRecord, pcm16_byte_rate};
use crate::utils::has_extension;

pub const MAGIC: [u8; 4] = *b"STR4";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 24;
pub const ENTRY_SIZE: usize = 48;

/// One entry of the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrEntry {
    pub id: u64,
    pub data_offset: u64,
    pub data_size: u32,
    pub region_size: u32,
    pub path_offset: u32,
    pub format: AudioFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub block_align: u16,
    pub alias_order: u16,
    pub samples_per_block: u32,
    pub data_size_uncompressed: u32,
    /// Path resolved from the string table
    pub path: String,
}

impl StrEntry {
    /// Alias masters are placeholders named without an extension
    #[must_use]
    pub fn has_extension(&self) -> bool {
        has_extension(&self.path.replace('\\', "/"))
    }

    #[must_use]
    pub fn audio_record(&self) -> AudioRecord {
        let bits_per_sample = self.format.bits_per_sample();
        let byte_rate = match self.format {
            AudioFormat::Pcm16 => pcm16_byte_rate(self.sample_rate, self.channels).unwrap_or(0),
            AudioFormat::ImaAdpcm if self.samples_per_block > 0 => {
                (u64::from(self.sample_rate) * u64::from(self.block_align)
                    / u64::from(self.samples_per_block)) as u32
            }
            _ => 0,
        };
        AudioRecord {
            format: self.format,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample,
            block_align: self.block_align,
            samples_per_block: self.samples_per_block,
            byte_rate,
            data_size: self.data_size,
            data_size_uncompressed: self.data_size_uncompressed,
            hash: 0,
        }
    }

    pub fn apply(&mut self, record: &AudioRecord) {
        self.format = record.format;
        self.channels = record.channels;
        self.sample_rate = record.sample_rate;
        self.block_align = record.block_align;
        self.samples_per_block = record.samples_per_block;
        self.data_size = record.data_size;
        self.data_size_uncompressed = record.data_size_uncompressed;
    }
}

/// A parsed streams container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamsFile {
    pub flags: u32,
    pub entries: Vec<StrEntry>,
    /// Bytes between the header and the entry table
    pub data: Vec<u8>,
    /// String table, kept verbatim
    pub strings: Vec<u8>,
}

impl StreamsFile {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = slice_at(bytes, 0, HEADER_SIZE as u64, "streams header")?;
        let mut reader = Cursor::new(header);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic {
                expected: MAGIC,
                found: magic,
            });
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion { version });
        }
        let table_offset = reader.read_u64::<LittleEndian>()?;
        let count = reader.read_u32::<LittleEndian>()?;
        let flags = reader.read_u32::<LittleEndian>()?;

        if table_offset < HEADER_SIZE as u64 {
            return Err(Error::out_of_bounds(
                "streams entry table",
                table_offset,
                0,
                bytes.len(),
            ));
        }
        let table_len = u64::from(count) * ENTRY_SIZE as u64;
        let table = slice_at(bytes, table_offset, table_len, "streams entry table")?;
        let strings_start = (table_offset + table_len) as usize;
        let strings = &bytes[strings_start..];

        let mut reader = Cursor::new(table);
        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let id = reader.read_u64::<LittleEndian>()?;
            let data_offset = reader.read_u64::<LittleEndian>()?;
            let data_size = reader.read_u32::<LittleEndian>()?;
            let region_size = reader.read_u32::<LittleEndian>()?;
            let path_offset = reader.read_u32::<LittleEndian>()?;
            let format_tag = reader.read_u16::<LittleEndian>()?;
            let channels = reader.read_u16::<LittleEndian>()?;
            let sample_rate = reader.read_u32::<LittleEndian>()?;
            let block_align = reader.read_u16::<LittleEndian>()?;
            let alias_order = reader.read_u16::<LittleEndian>()?;
            let samples_per_block = reader.read_u32::<LittleEndian>()?;
            let data_size_uncompressed = reader.read_u32::<LittleEndian>()?;

            let path = read_cstr(strings, u64::from(path_offset), "streams path")?;
            let malformed = |reason: String| Error::MalformedRecord {
                path: path.clone(),
                reason,
            };
            let format = AudioFormat::from_tag(format_tag).ok_or_else(|| {
                malformed(format!("entry {i}: unknown format tag {format_tag:#06x}"))
            })?;
            if alias_order > 2 {
                return Err(malformed(format!("entry {i}: alias order {alias_order}")));
            }
            // Alias masters carry no stream fields of their own
            if has_extension(&path.replace('\\', "/")) {
                if !(1..=2).contains(&channels) {
                    return Err(malformed(format!("entry {i}: {channels} channels")));
                }
                if pcm16_byte_rate(sample_rate, channels).is_none() {
                    return Err(malformed(format!("entry {i}: sample rate {sample_rate} Hz")));
                }
            }
            if data_offset < HEADER_SIZE as u64
                || data_offset
                    .checked_add(u64::from(region_size))
                    .is_none_or(|end| end > table_offset)
            {
                return Err(Error::out_of_bounds(
                    "streams data region",
                    data_offset,
                    u64::from(region_size),
                    table_offset as usize,
                ));
            }

            entries.push(StrEntry {
                id,
                data_offset,
                data_size,
                region_size,
                path_offset,
                format,
                channels,
                sample_rate,
                block_align,
                alias_order,
                samples_per_block,
                data_size_uncompressed,
                path,
            });
        }

        Ok(Self {
            flags,
            entries,
            data: bytes[HEADER_SIZE..table_offset as usize].to_vec(),
            strings: strings.to_vec(),
        })
    }

    /// The stored region of an entry
    pub fn region(&self, entry: &StrEntry) -> Result<&[u8]> {
        slice_at(
            &self.data,
            entry.data_offset - HEADER_SIZE as u64,
            u64::from(entry.region_size),
            "streams entry region",
        )
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let table_offset = (HEADER_SIZE + self.data.len()) as u64;
        let mut out = Vec::with_capacity(
            table_offset as usize + self.entries.len() * ENTRY_SIZE + self.strings.len(),
        );
        out.write_all(&MAGIC)?;
        out.write_u32::<LittleEndian>(VERSION)?;
        out.write_u64::<LittleEndian>(table_offset)?;
        out.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        out.write_u32::<LittleEndian>(self.flags)?;
        out.write_all(&self.data)?;
        for entry in &self.entries {
            out.write_u64::<LittleEndian>(entry.id)?;
            out.write_u64::<LittleEndian>(entry.data_offset)?;
            out.write_u32::<LittleEndian>(entry.data_size)?;
            out.write_u32::<LittleEndian>(entry.region_size)?;
            out.write_u32::<LittleEndian>(entry.path_offset)?;
            out.write_u16::<LittleEndian>(entry.format.tag())?;
            out.write_u16::<LittleEndian>(entry.channels)?;
            out.write_u32::<LittleEndian>(entry.sample_rate)?;
            out.write_u16::<LittleEndian>(entry.block_align)?;
            out.write_u16::<LittleEndian>(entry.alias_order)?;
            out.write_u32::<LittleEndian>(entry.samples_per_block)?;
            out.write_u32::<LittleEndian>(entry.data_size_uncompressed)?;
        }
        out.write_all(&self.strings)?;
        Ok(out)
    }
}

/// Assemble a container from entries and their regions, laying out data and strings
///
/// Entries sharing a region (alias groups) pass the same region index.
#[must_use]
pub fn build_streams(entries: Vec<StrEntry>, regions: &[Vec<u8>], region_of: &[usize]) -> StreamsFile {
    let mut data = Vec::new();
    let mut offsets = Vec::with_capacity(regions.len());
    for region in regions {
        offsets.push((HEADER_SIZE + data.len()) as u64);
        data.extend_from_slice(region);
    }

    let mut strings = Vec::new();
    let mut out = Vec::with_capacity(entries.len());
    for (mut entry, &region) in entries.into_iter().zip(region_of) {
        entry.data_offset = offsets[region];
        entry.region_size = regions[region].len() as u32;
        entry.path_offset = strings.len() as u32;
        strings.extend_from_slice(entry.path.as_bytes());
        strings.push(0);
        out.push(entry);
    }

    StreamsFile {
        flags: 0,
        entries: out,
        data,
        strings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, data_size: u32, alias_order: u16) -> StrEntry {
        StrEntry {
            id: 0x1234,
            data_offset: 0,
            data_size,
            region_size: 0,
            path_offset: 0,
            format: AudioFormat::Pcm16,
            channels: 1,
            sample_rate: 22050,
            block_align: 2,
            alias_order,
            samples_per_block: 1,
            data_size_uncompressed: data_size,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let file = build_streams(
            vec![entry("vo/a.wav", 4, 0), entry("vo/b.wav", 2, 0)],
            &[vec![1, 2, 3, 4], vec![5, 6]],
            &[0, 1],
        );
        let bytes = file.to_bytes().unwrap();
        let parsed = StreamsFile::parse(&bytes).unwrap();
        assert_eq!(parsed, file);
        assert_eq!(parsed.entries[1].data_offset, 28);
        assert_eq!(parsed.region(&parsed.entries[1]).unwrap(), &[5, 6]);
    }

    #[test]
    fn test_bad_magic_and_version() {
        let file = build_streams(vec![], &[], &[]);
        let mut bytes = file.to_bytes().unwrap();
        bytes[4] = 9;
        assert!(matches!(
            StreamsFile::parse(&bytes),
            Err(Error::UnsupportedVersion { version: 9 })
        ));
        bytes[0] = b'X';
        assert!(matches!(StreamsFile::parse(&bytes), Err(Error::InvalidMagic { .. })));
    }

    #[test]
    fn test_region_past_table_fails() {
        let file = build_streams(vec![entry("a.wav", 4, 0)], &[vec![1, 2, 3, 4]], &[0]);
        let mut bytes = file.to_bytes().unwrap();
        // region_size of entry 0
        bytes[28 + 20] = 0xFF;
        assert!(matches!(
            StreamsFile::parse(&bytes),
            Err(Error::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_master_has_no_extension() {
        assert!(!entry("vo/line01", 0, 0).has_extension());
        assert!(entry("vo/line01.wav", 0, 1).has_extension());
    }

    #[test]
    fn test_invalid_stream_fields_rejected() {
        let mut wide = entry("vo/wide.wav", 4, 0);
        wide.channels = 0xFFFF;
        wide.sample_rate = 44100;
        let file = build_streams(vec![wide], &[vec![1, 2, 3, 4]], &[0]);
        assert!(matches!(
            StreamsFile::parse(&file.to_bytes().unwrap()),
            Err(Error::MalformedRecord { .. })
        ));

        let mut fast = entry("vo/fast.wav", 4, 0);
        fast.channels = 2;
        fast.sample_rate = 0xF000_0000;
        let file = build_streams(vec![fast], &[vec![1, 2, 3, 4]], &[0]);
        assert!(matches!(
            StreamsFile::parse(&file.to_bytes().unwrap()),
            Err(Error::MalformedRecord { .. })
        ));

        // Masters keep their zeroed stream fields
        let mut master = entry("vo/group", 0, 0);
        master.channels = 0;
        master.sample_rate = 0;
        let file = build_streams(vec![master], &[vec![]], &[0]);
        assert!(StreamsFile::parse(&file.to_bytes().unwrap()).is_ok());
    }
}

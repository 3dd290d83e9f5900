//! Content hashing of audio streams

use serde::{Deserialize, Serialize};
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use super::AudioRecord;
use crate::codec;
use crate::error::Result;
use crate::model::AudioFormat;

/// What the content hash is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    /// Decoded PCM16, so equal audio in different containers compares equal
    #[default]
    Canonical,
    /// Stored bytes as-is, for bit-exact direct imports
    Direct,
}

impl HashMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HashMode::Canonical => "canonical",
            HashMode::Direct => "direct",
        }
    }
}

/// Hash a stored payload under `mode`
pub fn content_hash(record: &AudioRecord, payload: &[u8], mode: HashMode) -> Result<u64> {
    match mode {
        HashMode::Canonical => {
            let samples = codec::decode_to_pcm16(record, payload)?;
            Ok(xxh3_64(&codec::pcm16_to_bytes(&samples)))
        }
        HashMode::Direct => Ok(xxh3_64(payload)),
    }
}

/// Fill in the hash (and the decoded size when only decoding reveals it).
///
/// A stream that cannot be decoded falls back to a hash of its stored bytes.
#[must_use]
pub fn analyze(mut record: AudioRecord, payload: &[u8], mode: HashMode) -> AudioRecord {
    if mode == HashMode::Direct {
        record.hash = xxh3_64(payload);
        return record;
    }

    match codec::decode_to_pcm16(&record, payload) {
        Ok(samples) => {
            if matches!(record.format, AudioFormat::Vorbis | AudioFormat::UnknownDecodable) {
                record.data_size_uncompressed = (samples.len() * 2) as u32;
            }
            record.hash = xxh3_64(&codec::pcm16_to_bytes(&samples));
        }
        Err(e) => {
            warn!("Hashing stored bytes of undecodable stream: {}", e);
            record.hash = xxh3_64(payload);
        }
    }
    record
}

/// Hash of a whole blob, used to key originality snapshots
#[must_use]
pub fn blob_hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

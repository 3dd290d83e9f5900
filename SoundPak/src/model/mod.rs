//! Canonical in-memory model of archive audio

pub mod file;
pub mod hash;
pub mod record;
pub mod tree;

pub use file::AudioFile;
pub use hash::{HashMode, analyze, blob_hash, content_hash};
pub use record::{AudioFormat, AudioRecord, SNAPSHOT_SIZE, pcm16_byte_rate};
pub use tree::{ArchiveDirectory, FileFlags};

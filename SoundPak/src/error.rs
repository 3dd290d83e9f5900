//! Error types for `SoundPak`

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of an [`Error`], used by callers to decide recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A structural invariant of a container was violated; the load is aborted.
    MalformedContainer,
    /// Decoding or encoding a single stream failed.
    CodecFailure,
    /// The originality cache is stale or corrupt; regenerated locally.
    CacheMismatch,
    /// An import file has no matching archive entry.
    MissingCounterpart,
    /// Operating system I/O failure.
    Io,
    /// The session rejected the request (busy, nothing loaded, ...).
    Session,
}

/// The error type for `SoundPak` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error.
    #[error("directory walk error: {0}")]
    WalkDirError(String),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ==================== Container Errors ====================
    /// The container does not start with the expected magic bytes.
    #[error("invalid magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic bytes.
        expected: [u8; 4],
        /// Magic bytes actually present.
        found: [u8; 4],
    },

    /// Unsupported container version.
    #[error("unsupported container version {version}")]
    UnsupportedVersion {
        /// The version number found in the header.
        version: u32,
    },

    /// A byte range referenced by the container lies outside the buffer.
    #[error("{what}: range {offset}+{len} exceeds {available} bytes")]
    RangeOutOfBounds {
        /// Which structure was being read.
        what: &'static str,
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        len: u64,
        /// Size of the buffer the range points into.
        available: u64,
    },

    /// Summed entry sizes do not cover the blob exactly.
    #[error("blob size mismatch: index declares {declared} bytes, blob holds {actual}")]
    BlobSizeMismatch {
        /// Bytes declared by the index.
        declared: u64,
        /// Bytes present in the blob.
        actual: u64,
    },

    /// A line of a text index could not be parsed.
    #[error("invalid index line {line}: {reason}")]
    InvalidIndexLine {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A record table is inconsistent with itself or its header.
    #[error("malformed record table in {path}: {reason}")]
    MalformedRecord {
        /// The index file or entry the record belongs to.
        path: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Two records claim the same archive path with different content.
    #[error("conflicting records for {path}")]
    ConflictingRecords {
        /// The normalized archive path.
        path: String,
    },

    /// An aliased distance-based group is incomplete or inconsistent.
    #[error("invalid alias group at offset {offset:#x}: {reason}")]
    InvalidAliasGroup {
        /// Data offset shared by the group.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// No consistent lip segment layout could be discovered.
    #[error("no consistent lip segment layout for {path}")]
    LipLayoutNotFound {
        /// The entry carrying the lip data.
        path: String,
    },

    /// The discovered lip layout does not account for the stored bytes.
    #[error("lip layout for {path} does not account for {region_size} bytes")]
    LipLayoutMismatch {
        /// The entry carrying the lip data.
        path: String,
        /// Stored region size.
        region_size: u64,
    },

    /// A sibling file required by the archive is missing.
    #[error("missing sibling file: {path}")]
    MissingSibling {
        /// Expected path of the sibling.
        path: PathBuf,
    },

    // ==================== Codec Errors ====================
    /// The bytes are not a detectable audio stream.
    #[error("undetected audio stream: {0}")]
    UndetectedStream(String),

    /// The declared codec is not supported for this operation.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Decoding a stream failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// Encoding a stream failed.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// Sample rate conversion failed.
    #[error("resample failed: {0}")]
    ResampleFailed(String),

    /// Channel conversion other than 1 <-> 2 was requested.
    #[error("unsupported channel conversion: {from} -> {to}")]
    UnsupportedChannelConversion {
        /// Source channel count.
        from: u16,
        /// Requested channel count.
        to: u16,
    },

    // ==================== Originality Cache Errors ====================
    /// The cache holds a different number of entries than the live archive.
    #[error("originality cache mismatch: cache has {cached} entries, archive has {live}")]
    CacheMismatch {
        /// Entries in the cache.
        cached: u64,
        /// Entries in the live archive.
        live: u64,
    },

    /// The cache file is truncated, cyclic or otherwise unreadable.
    #[error("originality cache corrupt: {0}")]
    CacheCorrupt(String),

    /// No cache exists for the requested blob hash.
    #[error("no originality cache for blob {blob_hash:016x}")]
    CacheMissing {
        /// The blob hash that was looked up.
        blob_hash: u64,
    },

    // ==================== Import/Export Errors ====================
    /// An import file has no archive counterpart, even after extension fallback.
    #[error("no archive entry matches {path}")]
    MissingCounterpart {
        /// The external file.
        path: PathBuf,
    },

    /// An archive path is not present in the loaded archive.
    #[error("file not found in archive: {0}")]
    FileNotFoundInArchive(String),

    /// Invalid file path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    // ==================== Session Errors ====================
    /// A background operation is already running.
    #[error("another operation is already in progress")]
    OperationInProgress,

    /// The session has no archive loaded.
    #[error("no archive loaded")]
    NotLoaded,

    /// There is no background operation to wait for.
    #[error("no operation in progress")]
    NoOperation,

    /// The background worker disappeared without reporting.
    #[error("background worker terminated unexpectedly")]
    WorkerLost,
}

impl Error {
    /// Classify the error for recovery decisions.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::WalkDirError(_) | Error::JsonError(_) => ErrorKind::Io,
            Error::InvalidMagic { .. }
            | Error::UnsupportedVersion { .. }
            | Error::RangeOutOfBounds { .. }
            | Error::BlobSizeMismatch { .. }
            | Error::InvalidIndexLine { .. }
            | Error::MalformedRecord { .. }
            | Error::ConflictingRecords { .. }
            | Error::InvalidAliasGroup { .. }
            | Error::LipLayoutNotFound { .. }
            | Error::LipLayoutMismatch { .. }
            | Error::MissingSibling { .. } => ErrorKind::MalformedContainer,
            Error::UndetectedStream(_)
            | Error::UnsupportedFormat(_)
            | Error::DecodeFailed(_)
            | Error::EncodeFailed(_)
            | Error::ResampleFailed(_)
            | Error::UnsupportedChannelConversion { .. } => ErrorKind::CodecFailure,
            Error::CacheMismatch { .. } | Error::CacheCorrupt(_) | Error::CacheMissing { .. } => {
                ErrorKind::CacheMismatch
            }
            Error::MissingCounterpart { .. }
            | Error::FileNotFoundInArchive(_)
            | Error::InvalidPath(_) => ErrorKind::MissingCounterpart,
            Error::OperationInProgress
            | Error::NotLoaded
            | Error::NoOperation
            | Error::WorkerLost => ErrorKind::Session,
        }
    }

    /// Shorthand for a range check failure.
    pub(crate) fn out_of_bounds(what: &'static str, offset: u64, len: u64, available: usize) -> Self {
        Error::RangeOutOfBounds {
            what,
            offset,
            len,
            available: available as u64,
        }
    }
}

// Add conversion from walkdir::Error
impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::WalkDirError(err.to_string())
    }
}

/// A specialized Result type for `SoundPak` operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::BlobSizeMismatch { declared: 150, actual: 140 }.kind(),
            ErrorKind::MalformedContainer
        );
        assert_eq!(Error::DecodeFailed("x".into()).kind(), ErrorKind::CodecFailure);
        assert_eq!(Error::CacheMismatch { cached: 1, live: 2 }.kind(), ErrorKind::CacheMismatch);
        assert_eq!(
            Error::MissingCounterpart { path: PathBuf::from("a.wav") }.kind(),
            ErrorKind::MissingCounterpart
        );
        assert_eq!(Error::OperationInProgress.kind(), ErrorKind::Session);
    }
}

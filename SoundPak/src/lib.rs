//! # SoundPak
//!
//! A pure-Rust library for reading, patching and rewriting the audio
//! archives of three generations of a game series.
//!
//! ## Supported Archives
//!
//! - **Generation 1** - `.idx` text index over a concatenated `.dat` blob
//! - **Generation 2/3** - per-scene `.whd` indices, scene blobs and a shared `streams.wav`
//! - **Generation 4** - `.whd` indices over a `streams.str` container with
//!   distance-based alias groups and interleaved lip-sync data
//!
//! Streams are PCM16, IMA ADPCM or Ogg-Vorbis. Every entry is hashed over its
//! decoded audio, and an on-disk originality cache remembers which entries
//! still match the shipped content.
//!
//! ## Quick Start
//!
//! ```no_run
//! use soundpak::prelude::*;
//!
//! let mut session = ArchiveSession::new(ToolConfig::load());
//! session.begin_load("Sound/".as_ref(), Generation::Gen23, UnsavedChanges::Cancel)?;
//! session.wait()?;
//!
//! session.begin_import(vec!["door.wav".into()], None, ImportPolicy::Transcode)?;
//! session.wait()?;
//!
//! session.begin_save("Patched/".as_ref())?;
//! session.wait()?;
//! # Ok::<(), soundpak::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` - Enables the `soundpak` command-line binary

pub mod codec;
pub mod config;
pub mod error;
pub mod formats;
pub mod model;
pub mod originality;
pub mod progress;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use config::ToolConfig;
pub use error::{Error, ErrorKind, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::codec::{
        AdpcmSettings, NoiseShaping, Resample, StreamHeader, decode_to_pcm16, detect_header,
        encode_from_pcm16, resample_channels, resample_sample_rate, wrap_container,
    };
    pub use crate::config::ToolConfig;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::formats::{
        ArchiveParser, Generation, LipData, LoadedArchive, detect_generation,
    };
    pub use crate::model::{
        ArchiveDirectory, AudioFile, AudioFormat, AudioRecord, FileFlags, HashMode,
    };
    pub use crate::originality::{BaselineOutcome, OriginalityCache};
    pub use crate::progress::{ArchivePhase, ArchiveProgress, ProgressCallback, no_progress};
    pub use crate::session::{
        ArchiveSession, ArchiveState, BatchReport, Begin, ExportPolicy, ImportPolicy,
        OperationOutcome, UnsavedChanges,
    };
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;

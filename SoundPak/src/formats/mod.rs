//! Archive formats of the three game generations
//!
//! | Generation | Index                     | Blob(s)                                  |
//! |------------|---------------------------|------------------------------------------|
//! | 1          | `<name>.idx` text table   | `<name>.dat`, whole files concatenated   |
//! | 2/3        | per-scene `.whd`          | `<scene>.wav` + shared `streams.wav`     |
//! | 4          | per-scene `.whd`          | `<scene>.wav` + `streams.str` container  |
//!
//! Each generation implements [`ArchiveParser`]. A load either produces a
//! complete [`LoadedArchive`] or fails without leaving anything behind.

pub mod common;
pub mod gen1;
pub mod gen23;
pub mod gen4;
pub mod layout;
pub mod whd;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{AudioFile, HashMode};
use crate::progress::ProgressCallback;

pub use gen1::{Gen1Layout, Gen1Parser};
pub use gen23::{Gen23Parser, WhdArchive};
pub use gen4::{Gen4Layout, Gen4Parser, LipData};

/// Archive generation, the tag every format-specific operation dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    Gen1,
    Gen23,
    Gen4,
}

impl Generation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Generation::Gen1 => "gen1",
            Generation::Gen23 => "gen23",
            Generation::Gen4 => "gen4",
        }
    }

    /// The parser implementing this generation
    #[must_use]
    pub fn parser(self) -> &'static dyn ArchiveParser {
        match self {
            Generation::Gen1 => &Gen1Parser,
            Generation::Gen23 => &Gen23Parser,
            Generation::Gen4 => &Gen4Parser,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Generation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gen1" | "1" => Ok(Generation::Gen1),
            "gen23" | "gen2" | "gen3" | "2" | "3" => Ok(Generation::Gen23),
            "gen4" | "4" => Ok(Generation::Gen4),
            other => Err(Error::InvalidPath(format!("unknown archive generation '{other}'"))),
        }
    }
}

/// Format-specific state needed to write an archive back
#[derive(Debug, Clone)]
pub enum ArchiveLayout {
    Gen1(Gen1Layout),
    Gen23(WhdArchive),
    Gen4(Gen4Layout),
}

impl ArchiveLayout {
    #[must_use]
    pub fn generation(&self) -> Generation {
        match self {
            ArchiveLayout::Gen1(_) => Generation::Gen1,
            ArchiveLayout::Gen23(_) => Generation::Gen23,
            ArchiveLayout::Gen4(_) => Generation::Gen4,
        }
    }
}

/// Everything a successful load produces
#[derive(Debug, Clone)]
pub struct LoadedArchive {
    /// Audio files keyed by normalized path
    pub files: BTreeMap<String, AudioFile>,
    pub layout: ArchiveLayout,
    /// Hash of the source blob(s), keys the originality cache
    pub blob_hash: u64,
    /// Recoverable oddities met while parsing
    pub warnings: Vec<String>,
}

/// Shared interface of the generation parsers
pub trait ArchiveParser: Send + Sync {
    fn generation(&self) -> Generation;

    /// Parse the archive at `source`, hashing entries under `mode`
    fn load(&self, source: &Path, mode: HashMode, progress: ProgressCallback) -> Result<LoadedArchive>;

    /// Write `archive` (with its current file contents) to `dest`, returning the new blob hash
    fn save(&self, archive: &LoadedArchive, dest: &Path, progress: ProgressCallback) -> Result<u64>;

    /// Sub-directory of the originality cache used by this generation
    fn cache_prefix(&self) -> &'static str {
        self.generation().as_str()
    }

    /// Lip-sync data carried alongside an entry
    fn lip_data<'a>(&self, _layout: &'a ArchiveLayout, _path: &str) -> Option<&'a LipData> {
        None
    }
}

/// Guess the generation of the archive at `source`.
///
/// `.idx`/`.dat` files are generation 1; a directory (or a file inside one)
/// holding `streams.str` is generation 4; any other directory with scene
/// indices is generation 2/3.
#[must_use]
pub fn detect_generation(source: &Path) -> Option<Generation> {
    let extension = source
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    if matches!(extension.as_deref(), Some("idx" | "dat")) {
        return Some(Generation::Gen1);
    }

    let root = whd::archive_root(source);
    if root.join(gen4::STREAMS_CONTAINER).is_file() {
        return Some(Generation::Gen4);
    }
    whd::find_whd_files(&root)
        .ok()
        .filter(|found| !found.is_empty())
        .map(|_| Generation::Gen23)
}

pub(crate) fn layout_mismatch(expected: Generation, layout: &ArchiveLayout) -> Error {
    Error::MalformedRecord {
        path: expected.as_str().to_string(),
        reason: format!("cannot save a {} layout", layout.generation()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_parse() {
        assert_eq!("gen1".parse::<Generation>().unwrap(), Generation::Gen1);
        assert_eq!("GEN3".parse::<Generation>().unwrap(), Generation::Gen23);
        assert_eq!("4".parse::<Generation>().unwrap(), Generation::Gen4);
        assert!("gen5".parse::<Generation>().is_err());
    }

    #[test]
    fn test_detect_generation() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_generation(&dir.path().join("sfx.IDX")), Some(Generation::Gen1));
        assert_eq!(detect_generation(dir.path()), None);

        std::fs::write(dir.path().join("a.whd"), b"").unwrap();
        assert_eq!(detect_generation(dir.path()), Some(Generation::Gen23));

        std::fs::write(dir.path().join("streams.str"), b"").unwrap();
        assert_eq!(detect_generation(dir.path()), Some(Generation::Gen4));
    }

    #[test]
    fn test_parser_dispatch() {
        for generation in [Generation::Gen1, Generation::Gen23, Generation::Gen4] {
            assert_eq!(generation.parser().generation(), generation);
            assert_eq!(generation.parser().cache_prefix(), generation.as_str());
        }
    }
}

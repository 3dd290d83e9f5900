//! Bounds-checked access into archive buffers

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Borrow `len` bytes at `offset`, failing instead of panicking on overrun
pub fn slice_at<'a>(bytes: &'a [u8], offset: u64, len: u64, what: &'static str) -> Result<&'a [u8]> {
    let start = usize::try_from(offset).map_err(|_| Error::out_of_bounds(what, offset, len, bytes.len()))?;
    let size = usize::try_from(len).map_err(|_| Error::out_of_bounds(what, offset, len, bytes.len()))?;
    start
        .checked_add(size)
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| Error::out_of_bounds(what, offset, len, bytes.len()))
}

/// Read a NUL-terminated string starting at `offset`
pub fn read_cstr(bytes: &[u8], offset: u64, what: &'static str) -> Result<String> {
    let tail = slice_at(bytes, offset, bytes.len() as u64 - offset.min(bytes.len() as u64), what)?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::out_of_bounds(what, offset, tail.len() as u64 + 1, bytes.len()))?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Read a sibling file that must exist
pub fn read_sibling(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(Error::MissingSibling {
            path: path.to_path_buf(),
        });
    }
    Ok(std::fs::read(path)?)
}

/// `dir/name` with `name`'s archive separators mapped to the platform
#[must_use]
pub fn join_archive_path(dir: &Path, name: &str) -> PathBuf {
    name.split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .fold(dir.to_path_buf(), |acc, part| acc.join(part))
}

/// Write `bytes` to `path`, creating parent directories
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

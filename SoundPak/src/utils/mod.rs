//! Utility functions

pub mod path;

pub use path::{has_extension, normalize_archive_path, normalize_path, swap_audio_extension};

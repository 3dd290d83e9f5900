//! Path utilities

use std::path::Path;

/// Normalize an archive path: forward slashes, lowercase, no leading separator.
///
/// Archive lookups are case-insensitive, so every key in a session goes through this.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> String {
    normalize_archive_path(&path.as_ref().to_string_lossy())
}

/// Normalize a path string taken from an index record
pub fn normalize_archive_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches('/')
        .to_lowercase()
}

/// Swap `.wav` for `.ogg` (and back) on a normalized archive path
pub fn swap_audio_extension(path: &str) -> Option<String> {
    if let Some(stem) = path.strip_suffix(".wav") {
        Some(format!("{stem}.ogg"))
    } else {
        path.strip_suffix(".ogg").map(|stem| format!("{stem}.wav"))
    }
}

/// True when the last path segment carries an extension
pub fn has_extension(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_archive_path("\\Sounds\\Voice\\HELLO.wav"), "sounds/voice/hello.wav");
        assert_eq!(normalize_path(Path::new("a/B.OGG")), "a/b.ogg");
    }

    #[test]
    fn test_swap_audio_extension() {
        assert_eq!(swap_audio_extension("a/b.wav").as_deref(), Some("a/b.ogg"));
        assert_eq!(swap_audio_extension("a/b.ogg").as_deref(), Some("a/b.wav"));
        assert_eq!(swap_audio_extension("a/b.lip"), None);
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("dir.x/file.wav"));
        assert!(!has_extension("dir.x/master"));
    }
}

//! Directory view over the files of a loaded archive

use std::collections::BTreeMap;

use serde::Serialize;

/// Change state of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FileFlags {
    /// Modified at some point since the last save
    pub dirty: bool,
    /// Current content matches the baseline
    pub original: bool,
}

/// One directory level, keyed by lowercase path segment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveDirectory {
    pub directories: BTreeMap<String, ArchiveDirectory>,
    pub files: BTreeMap<String, FileFlags>,
}

impl ArchiveDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(normalized path, flags)` pairs
    pub fn from_files<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, FileFlags)>,
    {
        let mut root = Self::new();
        for (path, flags) in files {
            root.insert(path, flags);
        }
        root
    }

    /// Insert or update a file, creating intermediate directories
    pub fn insert(&mut self, path: &str, flags: FileFlags) {
        let mut node = self;
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                node.files.insert(segment.to_string(), flags);
                return;
            }
            node = node.directories.entry(segment.to_string()).or_default();
        }
    }

    /// Look up a file's flags
    #[must_use]
    pub fn file(&self, path: &str) -> Option<FileFlags> {
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (self.directory(dir)?, name),
            None => (self, path),
        };
        dir.files.get(name).copied()
    }

    /// Look up a subdirectory; the empty path is this directory
    #[must_use]
    pub fn directory(&self, path: &str) -> Option<&ArchiveDirectory> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| node.directories.get(segment))
    }

    /// True if any file below this directory is dirty
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.files.values().any(|f| f.dirty) || self.directories.values().any(Self::is_dirty)
    }

    /// True if every file below this directory is original
    #[must_use]
    pub fn is_original(&self) -> bool {
        self.files.values().all(|f| f.original) && self.directories.values().all(Self::is_original)
    }

    /// Flags of this directory as a whole
    #[must_use]
    pub fn flags(&self) -> FileFlags {
        FileFlags {
            dirty: self.is_dirty(),
            original: self.is_original(),
        }
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len() + self.directories.values().map(Self::file_count).sum::<usize>()
    }

    /// Paths of all files below this directory, in order
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, dir) in &self.directories {
            dir.collect_paths(&format!("{prefix}{name}/"), out);
        }
        for name in self.files.keys() {
            out.push(format!("{prefix}{name}"));
        }
    }
}

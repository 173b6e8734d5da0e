//! Project scanning
//!
//! Lists every file in the project (relative to its root), skipping hidden
//! entries and the generated test tree. The listing doubles as the
//! project-structure context handed to the reasoning service.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file path relative to the project root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectPath(PathBuf);

impl ProjectPath {
    pub fn new(relative: impl Into<PathBuf>) -> Self {
        Self(relative.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Absolute location under `root`
    pub fn resolve(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.0
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(ext))
            .unwrap_or(false)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Stable, depth-first listing of a project
#[derive(Debug, Clone, Default)]
pub struct ProjectListing {
    pub files: Vec<ProjectPath>,
}

impl ProjectListing {
    /// One `./`-prefixed path per line, in scan order
    pub fn structure(&self) -> String {
        self.files
            .iter()
            .map(|p| format!("./{}", p.as_path().to_string_lossy().replace('\\', "/")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Walks a project directory
pub struct ProjectScanner {
    root: PathBuf,
    excluded: Option<PathBuf>,
}

impl ProjectScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: None,
        }
    }

    /// Skip a subtree given relative to the root (the generated test tree)
    pub fn exclude(mut self, relative: impl AsRef<Path>) -> Self {
        self.excluded = Some(self.root.join(relative.as_ref()));
        self
    }

    /// Scan the project. Any unreadable entry fails the whole scan.
    pub fn scan(&self) -> io::Result<ProjectListing> {
        let meta = std::fs::metadata(&self.root)?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", self.root.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.should_ignore(e))
        {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(ProjectPath(relative));
        }

        tracing::debug!("Scanned {} files under {}", files.len(), self.root.display());
        Ok(ProjectListing { files })
    }

    fn should_ignore(&self, entry: &walkdir::DirEntry) -> bool {
        // The root itself may legitimately be "." or a dot-directory
        if entry.depth() == 0 {
            return false;
        }
        if self.excluded.as_deref() == Some(entry.path()) {
            return true;
        }
        entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
    }
}

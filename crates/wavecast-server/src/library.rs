//! On-disk song library.
//!
//! A flat directory of opaque audio files. The server never inspects the
//! bytes; names arrive from clients and are used verbatim under the root.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct LibraryStore {
    root: PathBuf,
}

impl LibraryStore {
    /// Open the library rooted at `root`, creating the directory if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create library root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a library-relative name to its path under the root.
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Names of the immediate directory entries, in filesystem order.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("read library root {}", self.root.display()))?;
        for entry in entries {
            let entry = entry.context("read library entry")?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => tracing::warn!(?raw, "skipping non-utf8 library entry"),
            }
        }
        Ok(names)
    }

    /// Open a truncated writable file at `root/name`.
    ///
    /// Used by the upload handler to stream a body to disk piecewise.
    pub fn create(&self, name: &str) -> Result<File> {
        let path = self.path_of(name);
        File::create(&path).with_context(|| format!("create library file {}", path.display()))
    }

    /// Create or replace `root/name` with exactly `bytes`.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut file = self.create(name)?;
        file.write_all(bytes)
            .with_context(|| format!("write library file {name}"))?;
        Ok(())
    }
}

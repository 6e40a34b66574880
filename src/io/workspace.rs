//! Scoped ownership of every temporary file a run creates.
//!
//! A [`Workspace`] is a private temporary directory plus a registry of the
//! files created in it. Files are removed either explicitly through
//! [`Workspace::release`] or when the workspace is dropped, which happens on
//! every exit path including early returns with an error. Removal failures
//! are logged and otherwise ignored, so cleanup can never replace an error
//! that is already propagating nor fail a successful run.

use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Private scratch directory with tracked temporary resources.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    tracked: Vec<PathBuf>,
    counter: usize,
}

impl Workspace {
    /// Create a new workspace inside `parent`, or the system temp directory.
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("varcall_");
            b
        };
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        tracing::debug!("Created workspace {}", dir.path().display());

        Ok(Self {
            dir: Some(dir),
            tracked: Vec::new(),
            counter: 0,
        })
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Resources not yet released.
    pub fn tracked(&self) -> &[PathBuf] {
        &self.tracked
    }

    /// Register a path (which may not exist yet) for removal.
    pub fn track(&mut self, path: impl Into<PathBuf>) -> PathBuf {
        let path = path.into();
        if !self.tracked.contains(&path) {
            self.tracked.push(path.clone());
        }
        path
    }

    /// Reserve a fresh, tracked file name `<prefix><n><suffix>`.
    ///
    /// The name is unique within this workspace. The file is not created.
    pub fn reserve(&mut self, prefix: &str, suffix: &str) -> PathBuf {
        self.counter += 1;
        let name = format!("{}{}{}", sanitize(prefix), self.counter, suffix);
        let path = self.path().join(name);
        self.track(path)
    }

    /// Create a tracked working copy of `source`, hard-linked when possible.
    ///
    /// Falls back to copying when the link fails (e.g. across file systems).
    pub fn link_copy(&mut self, source: &Path, prefix: &str, suffix: &str) -> Result<PathBuf> {
        let target = self.reserve(prefix, suffix);
        self.link_copy_to(source, target)
    }

    /// Like [`Workspace::link_copy`], but to a caller-chosen tracked path.
    pub fn link_copy_to(&mut self, source: &Path, target: impl Into<PathBuf>) -> Result<PathBuf> {
        let target = self.track(target);
        if let Err(e) = fs::hard_link(source, &target) {
            tracing::debug!(
                "Hard link {} -> {} failed ({}), copying instead",
                source.display(),
                target.display(),
                e
            );
            fs::copy(source, &target)?;
        }
        tracing::debug!("Working copy {} of {}", target.display(), source.display());
        Ok(target)
    }

    /// Remove a tracked resource now.
    pub fn release(&mut self, path: &Path) {
        if let Some(pos) = self.tracked.iter().position(|p| p == path) {
            let path = self.tracked.remove(pos);
            remove_quietly(&path);
        }
    }

    /// Remove every remaining resource and the workspace directory.
    pub fn close(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        for path in self.tracked.drain(..).rev() {
            remove_quietly(&path);
        }
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!("Could not remove workspace {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::trace!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove temporary file {}: {}", path.display(), e),
    }
}

/// Turn an arbitrary label (e.g. a contig name) into a file-name-safe prefix.
pub fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

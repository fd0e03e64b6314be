//! Media library path resolution.
//!
//! Resolves user-supplied relative paths against the configured media root
//! and rejects anything that would escape it. Validation happens on the
//! lexical path, so a request is rejected before the filesystem is touched.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// The configured on-disk root of the media library.
#[derive(Debug, Clone)]
pub struct MediaRoot {
    root: PathBuf,
}

impl MediaRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-relative path to an absolute on-disk path.
    ///
    /// Rejects absolute paths and any `..` traversal.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(Error::PathOutsideRoot(relative.to_string()));
        }
        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(Error::PathOutsideRoot(relative.to_string())),
            }
        }
        Ok(resolved)
    }

    /// Resolve a path that must already exist.
    pub fn resolve_existing(&self, relative: &str) -> Result<PathBuf> {
        let resolved = self.resolve(relative)?;
        if !resolved.exists() {
            return Err(Error::not_found(relative.to_string()));
        }
        Ok(resolved)
    }
}

//! Copied and rendered file resource.
use anyhow::{Context as _, Result};
use std::path::PathBuf;

use super::{Resource, ResourceChange, ResourceState};
use crate::hash;

/// What a content resource writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Exact bytes (a copied file or rendered template).
    Bytes(Vec<u8>),
    /// A source directory copied recursively.
    Tree(PathBuf),
}

/// A destination holding a copy of some content rather than a link.
#[derive(Debug, Clone)]
pub struct ContentResource {
    /// Destination path.
    pub target: PathBuf,
    /// Content to place there.
    pub payload: Payload,
}

impl ContentResource {
    /// Create a resource writing `bytes` to `target`.
    #[must_use]
    pub const fn bytes(target: PathBuf, bytes: Vec<u8>) -> Self {
        Self {
            target,
            payload: Payload::Bytes(bytes),
        }
    }

    /// Create a resource copying the directory `source` to `target`.
    #[must_use]
    pub const fn tree(target: PathBuf, source: PathBuf) -> Self {
        Self {
            target,
            payload: Payload::Tree(source),
        }
    }

    /// Hash of the content this resource writes, comparable with
    /// [`hash::path_hash`] of the destination.
    ///
    /// # Errors
    ///
    /// Returns an error if a source tree cannot be read.
    pub fn content_hash(&self) -> std::io::Result<String> {
        match &self.payload {
            Payload::Bytes(bytes) => Ok(hash::bytes_hash(bytes)),
            Payload::Tree(source) => hash::path_hash(source),
        }
    }
}

impl Resource for ContentResource {
    fn description(&self) -> String {
        match &self.payload {
            Payload::Bytes(bytes) => format!("{} ({} bytes)", self.target.display(), bytes.len()),
            Payload::Tree(source) => {
                format!("{} <- {}", self.target.display(), source.display())
            }
        }
    }

    fn apply(&self) -> Result<ResourceChange> {
        if let Some(parent) = self.target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create parent: {}", parent.display()))?;
        }

        match &self.payload {
            Payload::Bytes(bytes) => {
                // A symlink or directory would otherwise survive the rename.
                if self.target.symlink_metadata().is_ok_and(|m| !m.is_file()) {
                    super::fs::remove_existing(&self.target)
                        .with_context(|| format!("remove existing: {}", self.target.display()))?;
                }
                super::fs::write_atomic(&self.target, bytes)
                    .with_context(|| format!("write {}", self.target.display()))?;
            }
            Payload::Tree(source) => {
                super::fs::remove_existing(&self.target)
                    .with_context(|| format!("remove existing: {}", self.target.display()))?;
                super::fs::copy_dir_recursive(source, &self.target).with_context(|| {
                    format!("copy {} to {}", source.display(), self.target.display())
                })?;
            }
        }
        Ok(ResourceChange::Applied)
    }

    fn current_state(&self) -> Result<ResourceState> {
        if let Payload::Tree(source) = &self.payload
            && !source.is_dir()
        {
            return Ok(ResourceState::Invalid {
                reason: format!("source does not exist: {}", source.display()),
            });
        }
        let Ok(meta) = self.target.symlink_metadata() else {
            return Ok(ResourceState::Missing);
        };
        if meta.is_symlink() {
            return Ok(ResourceState::Incorrect {
                current: "target is a symlink".to_string(),
            });
        }
        let current = hash::path_hash(&self.target)
            .with_context(|| format!("hashing {}", self.target.display()))?;
        if current == self.content_hash()? {
            Ok(ResourceState::Correct)
        } else {
            Ok(ResourceState::Incorrect {
                current: "content differs".to_string(),
            })
        }
    }
}

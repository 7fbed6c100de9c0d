//! Symlinked module files.
use anyhow::{Context as _, Result};
use std::path::PathBuf;

use super::{Resource, ResourceChange, ResourceState, fs};

/// A destination that should be a link to a file inside a module.
#[derive(Debug, Clone)]
pub struct SymlinkResource {
    /// Link target, normally a canonical path inside the module directory.
    pub source: PathBuf,
    /// Where the link lives.
    pub dest: PathBuf,
}

impl SymlinkResource {
    /// Link `dest` to `source`.
    #[must_use]
    pub const fn new(source: PathBuf, dest: PathBuf) -> Self {
        Self { source, dest }
    }

    /// A real directory at the destination is never replaced by a link.
    fn dest_is_real_dir(&self) -> bool {
        self.dest
            .symlink_metadata()
            .is_ok_and(|m| m.is_dir() && !m.is_symlink())
    }
}

impl Resource for SymlinkResource {
    fn description(&self) -> String {
        format!("{} -> {}", self.dest.display(), self.source.display())
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.source.exists() {
            return Ok(ResourceState::Invalid {
                reason: format!("source does not exist: {}", self.source.display()),
            });
        }
        if self.dest_is_real_dir() {
            return Ok(ResourceState::Invalid {
                reason: "destination is a real directory".to_string(),
            });
        }
        let Ok(meta) = self.dest.symlink_metadata() else {
            return Ok(ResourceState::Missing);
        };
        if !meta.is_symlink() {
            return Ok(ResourceState::Incorrect {
                current: "destination is a regular file".to_string(),
            });
        }
        let linked = std::fs::read_link(&self.dest)
            .with_context(|| format!("reading link {}", self.dest.display()))?;
        if dunce::simplified(&linked) == dunce::simplified(&self.source) {
            Ok(ResourceState::Correct)
        } else {
            Ok(ResourceState::Incorrect {
                current: format!("points to {}", linked.display()),
            })
        }
    }

    fn apply(&self) -> Result<ResourceChange> {
        if self.dest_is_real_dir() {
            return Ok(ResourceChange::Skipped {
                reason: format!("{} is a real directory", self.dest.display()),
            });
        }
        if let Some(parent) = self.dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create parent: {}", parent.display()))?;
        }
        fs::remove_existing(&self.dest)
            .with_context(|| format!("remove existing: {}", self.dest.display()))?;
        fs::symlink(&self.source, &self.dest)
            .with_context(|| format!("creating symlink {}", self.description()))?;
        Ok(ResourceChange::Applied)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn linked_pair() -> (tempfile::TempDir, SymlinkResource) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("module/gitconfig");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, "[core]").unwrap();
        let resource = SymlinkResource::new(source, dir.path().join("home/.gitconfig"));
        (dir, resource)
    }

    #[test]
    fn description_names_both_ends() {
        let resource = SymlinkResource::new("/m/git/gitconfig".into(), "/home/u/.gitconfig".into());
        assert_eq!(resource.description(), "/home/u/.gitconfig -> /m/git/gitconfig");
    }

    #[test]
    fn missing_source_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let resource = SymlinkResource::new(dir.path().join("absent"), dir.path().join("dest"));
        assert!(matches!(
            resource.current_state().unwrap(),
            ResourceState::Invalid { .. }
        ));
    }

    #[test]
    fn missing_destination() {
        let (_dir, resource) = linked_pair();
        assert_eq!(resource.current_state().unwrap(), ResourceState::Missing);
    }

    #[test]
    fn real_directory_is_never_replaced() {
        let (_dir, resource) = linked_pair();
        std::fs::create_dir_all(&resource.dest).unwrap();

        assert!(matches!(
            resource.current_state().unwrap(),
            ResourceState::Invalid { .. }
        ));
        assert!(matches!(
            resource.apply().unwrap(),
            ResourceChange::Skipped { .. }
        ));
        assert!(resource.dest.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn apply_creates_parents_and_link() {
        let (_dir, resource) = linked_pair();
        assert_eq!(resource.apply().unwrap(), ResourceChange::Applied);
        assert_eq!(std::fs::read_link(&resource.dest).unwrap(), resource.source);
        assert_eq!(resource.current_state().unwrap(), ResourceState::Correct);
    }

    #[cfg(unix)]
    #[test]
    fn apply_replaces_regular_file() {
        let (_dir, resource) = linked_pair();
        std::fs::create_dir_all(resource.dest.parent().unwrap()).unwrap();
        std::fs::write(&resource.dest, "mine").unwrap();
        assert_eq!(
            resource.current_state().unwrap().summary(),
            "destination is a regular file"
        );

        resource.apply().unwrap();
        assert_eq!(resource.current_state().unwrap(), ResourceState::Correct);
    }

    #[cfg(unix)]
    #[test]
    fn link_to_elsewhere_is_incorrect() {
        let (dir, resource) = linked_pair();
        let other = dir.path().join("other");
        std::fs::write(&other, "x").unwrap();
        std::fs::create_dir_all(resource.dest.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&other, &resource.dest).unwrap();

        let state = resource.current_state().unwrap();
        assert_eq!(state.summary(), format!("points to {}", other.display()));
    }
}

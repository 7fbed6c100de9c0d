//! Deployment primitives for module files.
//!
//! A [`Resource`] is one destination path plus the content a module wants
//! there.  The runner decides *whether* to deploy from recorded state; a
//! resource only knows how to inspect the destination and how to replace it.
pub mod content;
pub mod fs;
pub mod symlink;

use anyhow::Result;

/// What currently sits at a resource's destination.
///
/// ```
/// use modkit_cli::resources::ResourceState;
///
/// let stale = ResourceState::Incorrect { current: "points to /old".into() };
/// assert!(!stale.is_satisfied());
/// assert_eq!(stale.summary(), "points to /old");
/// assert!(ResourceState::Correct.is_satisfied());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Nothing at the destination.
    Missing,
    /// The destination already holds the desired content.
    Correct,
    /// Something else is at the destination.
    Incorrect {
        /// What was found instead.
        current: String,
    },
    /// The resource cannot be deployed at all.
    Invalid {
        /// Why deployment is impossible.
        reason: String,
    },
}

impl ResourceState {
    /// Whether the destination already matches.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Correct)
    }

    /// Short human-readable description of the destination.
    #[must_use]
    pub fn summary(&self) -> &str {
        match self {
            Self::Missing => "destination missing",
            Self::Correct => "destination already matches",
            Self::Incorrect { current } => current,
            Self::Invalid { reason } => reason,
        }
    }
}

/// Result of [`Resource::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceChange {
    /// The destination now holds the desired content.
    Applied,
    /// The destination was left alone.
    Skipped {
        /// Why it was left alone.
        reason: String,
    },
}

/// A file, link or directory a module deploys.
pub trait Resource {
    /// `dest <- source` style description for logs.
    fn description(&self) -> String;

    /// Inspect the destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination exists but cannot be read.
    fn current_state(&self) -> Result<ResourceState>;

    /// Replace whatever is at the destination, creating parents as needed.
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O failure.
    fn apply(&self) -> Result<ResourceChange>;
}

//! Host operating system detection.
use std::fmt;

/// Detected operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    /// Linux (any distribution).
    Linux,
    /// macOS.
    MacOs,
    /// Windows.
    Windows,
}

impl Os {
    /// Canonical lowercase identifier used in manifests, script names and
    /// the `MODKIT_OS` environment variable.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::Windows => "windows",
        }
    }

    /// Parse a manifest OS identifier, accepting common aliases.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "macos" | "darwin" | "osx" => Some(Self::MacOs),
            "windows" | "win" => Some(Self::Windows),
            _ => None,
        }
    }

    /// Whether this OS satisfies a manifest compatibility list.
    ///
    /// An empty list means every OS.  Entries are matched case-insensitively
    /// against [`Os::id`] and its aliases; unknown identifiers never match.
    #[must_use]
    pub fn matches_any(self, os_list: &[String]) -> bool {
        os_list.is_empty()
            || os_list
                .iter()
                .any(|id| Self::from_id(id).is_some_and(|os| os == self))
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Platform information for the current system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Operating system family.
    pub os: Os,
    /// CPU architecture as reported by the Rust target (`x86_64`, `aarch64`, ...).
    pub arch: String,
}

impl Platform {
    /// Detect the current platform.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            os: Self::detect_os(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Create a platform with explicit values.
    #[must_use]
    pub fn new(os: Os, arch: &str) -> Self {
        Self {
            os,
            arch: arch.to_string(),
        }
    }

    /// Whether a module declaring `os_list` may run here.
    #[must_use]
    pub fn supports(&self, os_list: &[String]) -> bool {
        self.os.matches_any(os_list)
    }

    const fn detect_os() -> Os {
        if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            // Other Unix-like systems follow the Linux conventions
            Os::Linux
        }
    }
}

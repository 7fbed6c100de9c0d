//! Command: print version information.

/// Version string: the build-time `MODKIT_VERSION` or the crate version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("MODKIT_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Print the modkit version to stdout.
#[allow(clippy::print_stdout)]
pub fn run() {
    println!("modkit {}", version());
}

//! Log file location, ANSI stripping, terminal width and timestamps.
use std::ffi::OsString;
use std::path::PathBuf;

/// `HH:MM:SS`, prefixed to every log file line.
pub(super) const CLOCK_FORMAT: &str = "%H:%M:%S";
/// `YYYY-MM-DD HH:MM:SS`, used in the log file header.
pub(super) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time rendered with `format`.
pub(super) fn now(format: &str) -> String {
    chrono::Utc::now().format(format).to_string()
}

/// Remove CSI escape sequences (colours, cursor movement, erase) from `s`.
///
/// A lone `ESC` swallows the following character.
pub(super) fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        if chars.next() == Some('[') {
            // parameters run until the final byte in '@'..='~'
            chars.by_ref().find(|inner| ('@'..='~').contains(inner));
        }
    }
    out
}

/// Terminal width: `COLUMNS` when set, else the attached terminal, else 80.
pub(super) fn terminal_columns() -> usize {
    let from_env = std::env::var("COLUMNS").ok().and_then(|v| v.parse().ok());
    columns_from(from_env, || {
        terminal_size::terminal_size().map(|(terminal_size::Width(w), _)| usize::from(w))
    })
}

fn columns_from(from_env: Option<usize>, query: impl FnOnce() -> Option<usize>) -> usize {
    from_env
        .filter(|&n| n > 0)
        .or_else(|| query().filter(|&n| n > 0))
        .unwrap_or(80)
}

/// `<cache>/modkit/<command>.log`, creating the directory.  `<cache>` is
/// `$XDG_CACHE_HOME`, else `~/.cache`.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"));
    let dir = log_dir(std::env::var_os("XDG_CACHE_HOME"), home);
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join(format!("{command}.log")))
}

fn log_dir(xdg_cache: Option<OsString>, home: Option<OsString>) -> PathBuf {
    let cache = xdg_cache.filter(|v| !v.is_empty()).map_or_else(
        || {
            home.map_or_else(|| PathBuf::from("."), PathBuf::from)
                .join(".cache")
        },
        PathBuf::from,
    );
    cache.join("modkit")
}

//! TOML file loading shared by manifests and settings.
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Deserialize a TOML file into `T`.
///
/// A missing file deserializes as an empty document, so every field of `T`
/// must carry a `#[serde(default)]` for optional configuration files.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file exists but cannot be read and
/// [`ConfigError::InvalidManifest`] if it cannot be parsed.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return parse_str(path, "");
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_str(path, &content)
}

/// Deserialize TOML `content` that was read from `path`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidManifest`] if the content cannot be parsed.
pub fn parse_str<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::InvalidManifest {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })
}

/// Parse a duration string such as `90`, `30s`, `5m`, `1h` or `1h30m`.
///
/// A bare number is a count of seconds.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDuration`] for empty input, unknown units or
/// a zero total.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        value: raw.to_string(),
    };
    let s = raw.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return if secs == 0 {
            Err(invalid())
        } else {
            Ok(Duration::from_secs(secs))
        };
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(invalid()),
        };
        total = value
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(invalid)?;
        digits.clear();
    }
    if !digits.is_empty() || total == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

//! Deterministic content hashing for idempotence tracking.
//!
//! Every digest is lowercase hex SHA-256.  Inputs that come from unordered
//! structures (settings maps, directory listings) are sorted before they are
//! fed to the hasher, so the same content always hashes the same way.
use std::fmt::Write as _;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::config::settings::Settings;
use crate::module::Module;

fn to_hex(digest: &[u8]) -> String {
    let mut hex = String::with_capacity(64);
    for b in digest {
        // write! to a String is infallible; unwrap_or(()) makes that explicit.
        write!(hex, "{b:02x}").unwrap_or(());
    }
    hex
}

/// Hash raw bytes.
#[must_use]
pub fn bytes_hash(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// Hash a file's bytes.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn file_hash(path: &Path) -> io::Result<String> {
    Ok(bytes_hash(&std::fs::read(path)?))
}

/// Hash a file or, for directories, every regular file beneath it.
///
/// Directory entries are visited in sorted order and each file contributes
/// its relative path before its content.
///
/// # Errors
///
/// Returns an error if any entry cannot be read.
pub fn path_hash(path: &Path) -> io::Result<String> {
    if !path.is_dir() {
        return file_hash(path);
    }

    let mut hasher = Sha256::new();
    for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(path)
            .unwrap_or_else(|_| entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\n");
        hasher.update(std::fs::read(entry.path())?);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Checksum of a module definition: its manifest plus every script.
///
/// Files are sorted by basename and each one's content is prefixed with its
/// basename, so two identical scripts under different names still change the
/// digest.  Files that do not exist are left out.
///
/// # Errors
///
/// Returns an error if an existing file cannot be read.
pub fn module_checksum(module: &Module) -> io::Result<String> {
    let mut files: Vec<&Path> = std::iter::once(module.manifest_path.as_path())
        .chain(module.scripts.all())
        .collect();
    files.sort_by_key(|p| p.file_name().map(std::ffi::OsStr::to_os_string));
    files.dedup();

    let mut hasher = Sha256::new();
    for path in files {
        let content = match std::fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
        hasher.update(&content);
    }
    Ok(to_hex(&hasher.finalize()))
}

/// Hash of the live configuration a module can observe: the global user
/// identity fields plus the module's own subtree.
#[must_use]
pub fn config_hash(settings: &Settings, module: &str) -> String {
    let mut out = String::from("user=");
    let mut user: Vec<(&String, &toml::Value)> = settings.user.iter().collect();
    user.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (key, value) in user {
        write!(out, "{key:?}=").unwrap_or(());
        canonical(value, &mut out);
        out.push(',');
    }
    out.push('}');

    out.push_str(";module=");
    match settings.module_config(module) {
        Some(value) => canonical(value, &mut out),
        None => out.push_str("none"),
    }
    bytes_hash(out.as_bytes())
}

/// Append a key-sorted textual encoding of `value` to `out`.
fn canonical(value: &toml::Value, out: &mut String) {
    match value {
        toml::Value::String(s) => write!(out, "{s:?}").unwrap_or(()),
        toml::Value::Integer(i) => write!(out, "i{i}").unwrap_or(()),
        toml::Value::Float(f) => write!(out, "f{f}").unwrap_or(()),
        toml::Value::Boolean(b) => write!(out, "b{b}").unwrap_or(()),
        toml::Value::Datetime(d) => write!(out, "d{d}").unwrap_or(()),
        toml::Value::Array(items) => {
            out.push('[');
            for item in items {
                canonical(item, out);
                out.push(',');
            }
            out.push(']');
        }
        toml::Value::Table(table) => {
            let mut entries: Vec<(&String, &toml::Value)> = table.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (key, item) in entries {
                write!(out, "{key:?}=").unwrap_or(());
                canonical(item, out);
                out.push(',');
            }
            out.push('}');
        }
    }
}

//! Filesystem primitives behind the bridge's `fs*` operations.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{HostError, HostResult};

pub fn read_text(path: &str) -> HostResult<String> {
    fs::read_to_string(path).map_err(|e| HostError::io("read", path, e))
}

/// Write `content`, creating missing parent directories.
pub fn write_text(path: &str, content: &str) -> HostResult<()> {
    ensure_parent(path)?;
    fs::write(path, content).map_err(|e| HostError::io("write", path, e))
}

/// Append `content`, creating the file and its parents when missing.
pub fn append_text(path: &str, content: &str) -> HostResult<()> {
    ensure_parent(path)?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| HostError::io("append", path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| HostError::io("append", path, e))
}

fn ensure_parent(path: &str) -> HostResult<()> {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| HostError::io("create directory", parent, e))
        }
        _ => Ok(()),
    }
}

pub fn exists(path: &str) -> bool {
    Path::new(path).exists()
}

/// Create a directory. Without `recursive` the parent must already exist.
pub fn mkdir(path: &str, recursive: bool) -> HostResult<()> {
    if recursive {
        return fs::create_dir_all(path).map_err(|e| HostError::io("create directory", path, e));
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(HostError::ParentMissing(parent.to_path_buf()));
        }
    }
    if Path::new(path).is_dir() {
        return Ok(());
    }
    fs::create_dir(path).map_err(|e| HostError::io("create directory", path, e))
}

/// Full paths of a directory's entries, sorted. A missing directory lists
/// as empty.
pub fn read_dir(path: &str) -> HostResult<Vec<String>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HostError::io("read directory", path, e)),
    };
    let mut listing = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HostError::io("read directory", path, e))?;
        listing.push(entry.path().to_string_lossy().into_owned());
    }
    listing.sort();
    Ok(listing)
}

/// Remove a file or directory. Missing paths are not an error; a non-empty
/// directory needs `recursive`.
pub fn remove(path: &str, recursive: bool) -> HostResult<()> {
    let target = Path::new(path);
    let metadata = match fs::symlink_metadata(target) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(HostError::io("remove", path, e)),
    };
    let result = if metadata.is_dir() {
        if recursive {
            fs::remove_dir_all(target)
        } else {
            fs::remove_dir(target)
        }
    } else {
        fs::remove_file(target)
    };
    result.map_err(|e| HostError::io("remove", path, e))
}

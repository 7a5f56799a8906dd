//! Path helpers behind the bridge's `path*` operations.

use std::env;
use std::path::{Component, Path, PathBuf};

use crate::error::{HostError, HostResult};

/// Join parts left to right; an absolute part restarts the path. No parts
/// joins to an empty string.
pub fn join(parts: &[String]) -> String {
    if parts.is_empty() {
        return String::new();
    }
    let mut path = PathBuf::new();
    for part in parts {
        path.push(part);
    }
    path.to_string_lossy().into_owned()
}

/// Join parts and make the result absolute against the current directory,
/// folding `.` and `..` lexically. No parts resolves to the current
/// directory.
pub fn resolve(parts: &[String]) -> HostResult<String> {
    let cwd = env::current_dir().map_err(|e| HostError::io("resolve", ".", e))?;
    let mut path = cwd;
    for part in parts {
        path.push(part);
    }
    Ok(normalize(&path).to_string_lossy().into_owned())
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn known_dir(dir: Option<PathBuf>, name: &'static str) -> HostResult<String> {
    dir.map(|p| p.to_string_lossy().into_owned())
        .ok_or_else(|| HostError::native(name, "directory is not available"))
}

/// Per-user roaming application data.
pub fn user_data() -> HostResult<String> {
    known_dir(dirs::config_dir(), "user data directory")
}

/// Per-user machine-local application data.
pub fn local_data() -> HostResult<String> {
    known_dir(dirs::data_local_dir(), "local data directory")
}

pub fn temp() -> String {
    env::temp_dir().to_string_lossy().into_owned()
}

pub fn cwd() -> HostResult<String> {
    env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| HostError::io("current directory", ".", e))
}

/// Directory holding the running executable.
pub fn base_exe_dir() -> HostResult<String> {
    let exe = env::current_exe().map_err(|e| HostError::io("locate executable", ".", e))?;
    known_dir(exe.parent().map(Path::to_path_buf), "executable directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn join_of_nothing_is_empty() {
        assert_eq!(join(&[]), "");
    }

    #[test]
    fn join_uses_platform_separator() {
        let joined = join(&parts(&["a", "b", "c.txt"]));
        assert_eq!(PathBuf::from(&joined), Path::new("a").join("b").join("c.txt"));
    }

    #[test]
    fn resolve_of_nothing_is_the_current_directory() {
        let cwd = env::current_dir().unwrap();
        assert_eq!(PathBuf::from(resolve(&[]).unwrap()), normalize(&cwd));
    }

    #[test]
    fn resolve_folds_dot_segments() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve(&parts(&["x", "..", "y", ".", "z"])).unwrap();
        assert_eq!(PathBuf::from(resolved), normalize(&cwd.join("y").join("z")));
    }

    #[test]
    fn well_known_directories_are_absolute() {
        assert!(Path::new(&temp()).is_absolute());
        assert!(Path::new(&cwd().unwrap()).is_absolute());
        assert!(Path::new(&base_exe_dir().unwrap()).is_absolute());
    }
}

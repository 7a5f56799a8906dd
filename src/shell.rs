//! Hand-offs to the desktop shell: default browser, default application,
//! file manager and recycle bin.

use std::path::Path;
use std::process::{Command, Stdio};

use url::Url;

use crate::error::{HostError, HostResult};

/// Open a URL with the default handler for its scheme.
pub fn open_external(url: &str) -> HostResult<()> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| HostError::InvalidArgument(format!("'{url}' is not a valid URL: {e}")))?;
    tracing::debug!(scheme = parsed.scheme(), "opening external url");
    open_with_shell(parsed.as_str())
}

/// Open a file or folder with its default application.
pub fn open_path(path: &str) -> HostResult<()> {
    if path.trim().is_empty() {
        return Err(HostError::InvalidArgument("path is empty".into()));
    }
    open_with_shell(path)
}

/// Show a path in the platform file manager, selecting it when it is a file.
pub fn reveal_path(path: &str) -> HostResult<()> {
    if path.trim().is_empty() {
        return Err(HostError::InvalidArgument("path is empty".into()));
    }
    let target = Path::new(path);
    if !target.is_file() {
        return open_with_shell(path);
    }
    let (program, args) = reveal_command(target);
    launch(program, &args)
}

/// Move a path to the recycle bin.
pub fn trash_path(path: &str) -> HostResult<()> {
    if !Path::new(path).exists() {
        return Err(HostError::io(
            "trash",
            path,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }
    trash::move_to_trash(path)
}

#[cfg(target_os = "windows")]
fn reveal_command(target: &Path) -> (&'static str, Vec<String>) {
    ("explorer.exe", vec![format!("/select,\"{}\"", target.display())])
}

#[cfg(target_os = "macos")]
fn reveal_command(target: &Path) -> (&'static str, Vec<String>) {
    ("open", vec!["-R".into(), target.to_string_lossy().into_owned()])
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn reveal_command(target: &Path) -> (&'static str, Vec<String>) {
    let folder = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    ("xdg-open", vec![folder.to_string_lossy().into_owned()])
}

#[cfg(target_os = "windows")]
fn open_with_shell(target: &str) -> HostResult<()> {
    use windows::core::{w, HSTRING, PCWSTR};
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Shell::ShellExecuteW;
    use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    let file = HSTRING::from(target);
    let instance = unsafe {
        ShellExecuteW(
            HWND::default(),
            w!("open"),
            &file,
            PCWSTR::null(),
            PCWSTR::null(),
            SW_SHOWNORMAL,
        )
    };
    // Values above 32 signal success.
    if instance.0 as isize > 32 {
        Ok(())
    } else {
        Err(HostError::native(
            "ShellExecuteW",
            format!("code {} for '{target}'", instance.0 as isize),
        ))
    }
}

#[cfg(not(target_os = "windows"))]
fn open_with_shell(target: &str) -> HostResult<()> {
    let program = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
    launch(program, &[target.to_string()])
}

/// Start a helper program without waiting on it.
fn launch(program: &str, args: &[String]) -> HostResult<()> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| HostError::native("shell launch", format!("{program}: {e}")))?;
    tracing::debug!(program, pid = child.id(), "shell helper started");
    Ok(())
}

#[cfg(target_os = "windows")]
mod trash {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Shell::{
        SHFileOperationW, FOF_ALLOWUNDO, FOF_NOCONFIRMATION, FOF_NOERRORUI, FOF_SILENT,
        FO_DELETE, SHFILEOPSTRUCTW,
    };

    use crate::error::{HostError, HostResult};

    pub(super) fn move_to_trash(path: &str) -> HostResult<()> {
        // pFrom is a list of NUL-terminated paths ending with an extra NUL.
        let mut from: Vec<u16> = path.encode_utf16().collect();
        from.extend([0, 0]);

        let mut operation = SHFILEOPSTRUCTW {
            hwnd: HWND::default(),
            wFunc: FO_DELETE,
            pFrom: windows::core::PCWSTR(from.as_ptr()),
            fFlags: (FOF_ALLOWUNDO.0 | FOF_NOCONFIRMATION.0 | FOF_SILENT.0 | FOF_NOERRORUI.0)
                as u16,
            ..Default::default()
        };
        let code = unsafe { SHFileOperationW(&mut operation) };
        if code != 0 {
            return Err(HostError::native("SHFileOperationW", format!("code {code:#x}")));
        }
        if operation.fAnyOperationsAborted.as_bool() {
            return Err(HostError::native("SHFileOperationW", "operation was aborted"));
        }
        Ok(())
    }
}

#[cfg(not(target_os = "windows"))]
mod trash {
    use crate::error::{HostError, HostResult};

    pub(super) fn move_to_trash(_path: &str) -> HostResult<()> {
        Err(HostError::Unsupported("Moving files to the trash"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_urls_are_rejected_before_launching() {
        let err = open_external("not a url").unwrap_err();
        assert!(matches!(err, HostError::InvalidArgument(_)));
    }

    #[test]
    fn blank_paths_are_rejected() {
        assert!(matches!(open_path(" "), Err(HostError::InvalidArgument(_))));
        assert!(matches!(reveal_path(""), Err(HostError::InvalidArgument(_))));
    }

    #[test]
    fn trashing_a_missing_path_reports_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("gone.txt");
        let err = trash_path(&missing.to_string_lossy()).unwrap_err();
        assert!(matches!(err, HostError::Io { .. }));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn trash_is_unsupported_off_windows() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = trash_path(&file.path().to_string_lossy()).unwrap_err();
        assert!(matches!(err, HostError::Unsupported(_)));
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    #[test]
    fn reveal_opens_the_containing_folder() {
        let (program, args) = reveal_command(Path::new("/srv/data/report.csv"));
        assert_eq!(program, "xdg-open");
        assert_eq!(args, vec!["/srv/data".to_string()]);
    }
}

//! Detection of the OS page renderer runtime.

#[cfg(target_os = "windows")]
use windows::core::PWSTR;

#[cfg(target_os = "windows")]
use webview2_com::Microsoft::Web::WebView2::Win32::GetAvailableCoreWebView2BrowserVersionString;

use serde::Serialize;

/// Information about the renderer runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    /// Whether a native renderer can be created.
    pub available: bool,
    /// Runtime version string, if one was reported.
    pub version: Option<String>,
    /// "windows" or "unsupported".
    pub platform: String,
}

/// Probe for a usable renderer runtime. On Windows this asks WebView2 for
/// its installed version; elsewhere nothing is available and the host runs
/// on the headless backend.
pub fn check_runtime() -> RuntimeInfo {
    let platform = if cfg!(target_os = "windows") {
        "windows"
    } else {
        "unsupported"
    };
    let version = installed_version().filter(|v| is_usable_version(v));
    RuntimeInfo {
        available: version.is_some(),
        version,
        platform: platform.to_string(),
    }
}

/// WebView2 reports `0.0.0.0` (or nothing) when only a stub is installed.
fn is_usable_version(version: &str) -> bool {
    !version.trim().is_empty() && version != "0.0.0.0"
}

#[cfg(target_os = "windows")]
fn installed_version() -> Option<String> {
    let mut raw = PWSTR::null();
    let probed = unsafe { GetAvailableCoreWebView2BrowserVersionString(None, &mut raw) };
    if let Err(e) = probed {
        tracing::debug!(error = %e, "WebView2 runtime probe failed");
        return None;
    }
    if raw.is_null() {
        return None;
    }
    let version = unsafe { raw.to_string() }.ok();
    unsafe { windows::Win32::System::Com::CoTaskMemFree(Some(raw.0 as *const _)) };
    version
}

#[cfg(not(target_os = "windows"))]
fn installed_version() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn non_windows_hosts_report_no_renderer() {
        let info = check_runtime();
        assert!(!info.available);
        assert_eq!(info.platform, "unsupported");
        assert_eq!(info.version, None);
    }

    #[test]
    fn stub_versions_are_not_usable() {
        assert!(!is_usable_version("0.0.0.0"));
        assert!(!is_usable_version(" "));
        assert!(is_usable_version("120.0.2210.91"));
    }

    #[test]
    fn serializes_for_diagnostics() {
        let json = serde_json::to_value(RuntimeInfo {
            available: true,
            version: Some("120.0.2210.91".into()),
            platform: "windows".into(),
        })
        .unwrap();
        assert_eq!(json["available"], true);
        assert_eq!(json["version"], "120.0.2210.91");
    }
}

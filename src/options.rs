use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Options for creating a new native window.
///
/// Arrives from script as a JSON object with camelCase keys; every field is
/// optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowOptions {
    /// Window title. Default: "Native Host"
    pub title: Option<String>,
    /// Outer width in pixels. Default: 1024
    pub width: Option<i32>,
    /// Outer height in pixels. Default: 768
    pub height: Option<i32>,
    /// X position in screen coordinates; only used together with `y`.
    pub x: Option<i32>,
    /// Y position in screen coordinates; only used together with `x`.
    pub y: Option<i32>,
    /// Initially visible. Default: true
    pub show: Option<bool>,
    /// Borderless window with a page-drawn title bar. Default: false
    pub frameless: Option<bool>,
    /// Location the renderer navigates to once initialized.
    pub url: Option<String>,
    /// Enable renderer devtools. Default: false
    pub dev_tools: Option<bool>,
    /// Enable the renderer's default context menus. Default: true
    pub context_menu: Option<bool>,
    /// RPC namespace exposed to the page.
    pub rpc_namespace: Option<String>,
    /// Names of the script methods the page may invoke.
    pub rpc_methods: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayMenuItem {
    pub id: String,
    pub label: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrayOptions {
    pub tooltip: Option<String>,
    /// Path to an `.ico` file; the platform default icon is used otherwise.
    pub icon: Option<String>,
    pub menu: Vec<TrayMenuItem>,
}

/// File-type filter shown in open/save dialogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogFilter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenDialogOptions {
    pub title: Option<String>,
    pub default_path: Option<String>,
    pub filters: Vec<DialogFilter>,
    pub allow_multiple: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveDialogOptions {
    pub title: Option<String>,
    pub default_path: Option<String>,
    pub filters: Vec<DialogFilter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageBoxOptions {
    pub title: Option<String>,
    pub message: String,
    /// Secondary text shown under the message.
    pub detail: Option<String>,
    /// Button labels; one to three are meaningful natively.
    pub buttons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBoxResult {
    /// Index of the chosen button.
    pub response: u32,
}

/// Process to run: a program plus literal arguments, never a shell line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecOptions {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    /// Exit code, or -1 when the process could not be started or timed out.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchOptions {
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: Option<u64>,
}

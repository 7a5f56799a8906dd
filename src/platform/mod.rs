//! Platform capability contract and backend selection.
//!
//! [`HostPlatform`] is the complete set of native operations the bridge can
//! reach. Window, tray and dialog operations are backend specific; the
//! shell, path, filesystem and process groups have shared default
//! implementations that a backend may override.

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, HostResult};
use crate::events::{RpcInvokeSink, TrayEventSink};
use crate::options::{
    ExecOptions, ExecResult, MessageBoxOptions, MessageBoxResult, OpenDialogOptions,
    SaveDialogOptions, TrayMenuItem, TrayOptions, WindowOptions,
};
use crate::window::{Point, Size, WindowId};
use crate::window_manager::ClosePolicy;
use crate::{fs_ops, paths, process, runtime, shell};

pub mod desktop;
pub mod headless;

#[cfg(target_os = "windows")]
pub mod windows;

/// Every native operation the host exposes. Implementations are shared
/// across threads; UI-affine work is marshaled internally.
pub trait HostPlatform: Send + Sync {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    fn dispatcher(&self) -> &Dispatcher;

    /// Run the UI loop on the calling thread until quit. `tick` runs once per
    /// loop turn after queued work.
    fn run(&self, tick: &mut dyn FnMut()) -> Result<i32, DispatchError> {
        self.dispatcher().run_with(tick)
    }

    fn quit(&self, code: i32) {
        self.dispatcher().quit(code);
    }

    // Windows.
    fn create_window(&self, options: WindowOptions) -> HostResult<WindowId>;
    fn load_url(&self, id: WindowId, url: &str);
    fn show_window(&self, id: WindowId);
    fn hide_window(&self, id: WindowId);
    fn close_window(&self, id: WindowId);
    fn set_window_title(&self, id: WindowId, title: &str);
    fn window_size(&self, id: WindowId) -> Size;
    fn window_position(&self, id: WindowId) -> Point;
    fn focus_window(&self, id: WindowId);
    fn center_window(&self, id: WindowId);
    fn minimize_window(&self, id: WindowId);
    fn unminimize_window(&self, id: WindowId);
    fn is_window_minimized(&self, id: WindowId) -> bool;
    fn maximize_window(&self, id: WindowId);
    fn unmaximize_window(&self, id: WindowId);
    fn is_window_maximized(&self, id: WindowId) -> bool;
    fn set_rpc_manifest(&self, id: WindowId, namespace: Option<String>, methods: Vec<String>);
    fn rpc_resolve(&self, id: WindowId, request_id: &str, result_json: &str) -> bool;
    fn rpc_reject(&self, id: WindowId, request_id: &str, message: &str) -> bool;
    fn set_rpc_invoke_sink(&self, sink: Option<RpcInvokeSink>);

    // Tray.
    fn create_tray(&self, options: TrayOptions) -> HostResult<u32>;
    fn set_tray_tooltip(&self, id: u32, tooltip: &str) -> HostResult<()>;
    fn set_tray_menu(&self, id: u32, menu: Vec<TrayMenuItem>) -> HostResult<()>;
    fn set_tray_event_sink(&self, sink: Option<TrayEventSink>);

    // Dialogs.
    fn open_file_dialog(
        &self,
        owner: Option<WindowId>,
        options: OpenDialogOptions,
    ) -> HostResult<Vec<String>>;
    fn save_file_dialog(
        &self,
        owner: Option<WindowId>,
        options: SaveDialogOptions,
    ) -> HostResult<Option<String>>;
    fn message_box(
        &self,
        owner: Option<WindowId>,
        options: MessageBoxOptions,
    ) -> HostResult<MessageBoxResult>;

    // Shell.
    fn open_external(&self, url: &str) -> HostResult<()> {
        shell::open_external(url)
    }

    fn open_path(&self, path: &str) -> HostResult<()> {
        shell::open_path(path)
    }

    fn reveal_path(&self, path: &str) -> HostResult<()> {
        shell::reveal_path(path)
    }

    fn trash_path(&self, path: &str) -> HostResult<()> {
        shell::trash_path(path)
    }

    // Paths.
    fn join_path(&self, parts: &[String]) -> String {
        paths::join(parts)
    }

    fn resolve_path(&self, parts: &[String]) -> HostResult<String> {
        paths::resolve(parts)
    }

    fn user_data_path(&self) -> HostResult<String> {
        paths::user_data()
    }

    fn local_data_path(&self) -> HostResult<String> {
        paths::local_data()
    }

    fn temp_path(&self) -> String {
        paths::temp()
    }

    fn current_dir(&self) -> HostResult<String> {
        paths::cwd()
    }

    fn base_exe_dir(&self) -> HostResult<String> {
        paths::base_exe_dir()
    }

    // Filesystem.
    fn read_text(&self, path: &str) -> HostResult<String> {
        fs_ops::read_text(path)
    }

    fn write_text(&self, path: &str, content: &str) -> HostResult<()> {
        fs_ops::write_text(path, content)
    }

    fn append_text(&self, path: &str, content: &str) -> HostResult<()> {
        fs_ops::append_text(path, content)
    }

    fn path_exists(&self, path: &str) -> bool {
        fs_ops::exists(path)
    }

    fn create_dir(&self, path: &str, recursive: bool) -> HostResult<()> {
        fs_ops::mkdir(path, recursive)
    }

    fn read_dir(&self, path: &str) -> HostResult<Vec<String>> {
        fs_ops::read_dir(path)
    }

    fn remove_path(&self, path: &str, recursive: bool) -> HostResult<()> {
        fs_ops::remove(path, recursive)
    }

    // Processes.
    fn exec(&self, options: &ExecOptions) -> ExecResult {
        process::exec(options)
    }
}

/// Backend selection inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformOptions {
    /// Use the in-memory backend even when a native one is available.
    pub headless: bool,
    pub close_policy: ClosePolicy,
}

/// Build the backend for this OS, falling back to the headless backend when
/// asked to or when no native renderer runtime is installed. Must be called
/// on the thread that will run the UI loop.
pub fn create_platform(options: PlatformOptions) -> HostResult<Arc<dyn HostPlatform>> {
    if options.headless {
        tracing::info!("using headless platform (requested)");
        return Ok(Arc::new(headless::HeadlessPlatform::headless(options.close_policy)));
    }

    let info = runtime::check_runtime();
    if !info.available {
        tracing::warn!(
            platform = %info.platform,
            "no native renderer runtime available; falling back to headless platform"
        );
        return Ok(Arc::new(headless::HeadlessPlatform::headless(options.close_policy)));
    }

    native_platform(options, info)
}

#[cfg(target_os = "windows")]
fn native_platform(
    options: PlatformOptions,
    info: runtime::RuntimeInfo,
) -> HostResult<Arc<dyn HostPlatform>> {
    tracing::info!(version = ?info.version, "using Win32 platform with WebView2");
    Ok(Arc::new(windows::create(options.close_policy)?))
}

#[cfg(not(target_os = "windows"))]
fn native_platform(
    options: PlatformOptions,
    info: runtime::RuntimeInfo,
) -> HostResult<Arc<dyn HostPlatform>> {
    tracing::warn!(platform = %info.platform, "no native backend for this OS; using headless platform");
    Ok(Arc::new(headless::HeadlessPlatform::headless(options.close_policy)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_is_used_when_requested() {
        let platform = create_platform(PlatformOptions {
            headless: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(platform.name(), "headless");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn missing_runtime_falls_back_to_headless() {
        let platform = create_platform(PlatformOptions::default()).unwrap();
        assert_eq!(platform.name(), "headless");
    }

    #[test]
    fn shared_path_helpers_are_reachable_through_the_contract() {
        let platform = create_platform(PlatformOptions {
            headless: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(platform.join_path(&[]), "");
        assert!(!platform.temp_path().is_empty());
    }
}

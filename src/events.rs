use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::window::{NativeHandle, Point, Size, WindowId};

/// Tray interaction delivered to script: (trayId, event, menuItemId).
///
/// `event` is one of `click`, `right-click`, `double-click`, `menu-item-click`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrayEvent {
    pub tray_id: u32,
    pub event: String,
    pub menu_item_id: Option<String>,
}

/// RPC invoke request forwarded to the script's registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcCall {
    pub window_id: u32,
    pub request_id: String,
    pub method: String,
    /// Arguments, always a JSON array after decoding.
    pub args_json: String,
}

/// Receives tray events. Called on the UI thread.
pub type TrayEventSink = Arc<dyn Fn(TrayEvent) + Send + Sync>;

/// Receives RPC invocations for windows without a native handler set.
/// Called on the UI thread.
pub type RpcInvokeSink = Arc<dyn Fn(RpcCall) + Send + Sync>;

/// Notification from a native window. The native layer never handles these
/// inline; they are posted to the dispatcher and processed as ordinary work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    Resized { handle: NativeHandle, client: Size },
    Moved { handle: NativeHandle, position: Point },
    Minimized { handle: NativeHandle },
    Maximized { handle: NativeHandle },
    Restored { handle: NativeHandle },
    Destroyed { handle: NativeHandle },
}

/// Notification from a renderer controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendererEvent {
    WebMessage { window: WindowId, message: String },
    NavigationCompleted { window: WindowId, success: bool },
}

/// Callback the window system uses to report native window events.
pub type WindowEventSink = Arc<dyn Fn(WindowEvent) + Send + Sync>;

/// Callback a renderer backend uses to report controller events.
pub type RendererEventSink = Arc<dyn Fn(RendererEvent) + Send + Sync>;

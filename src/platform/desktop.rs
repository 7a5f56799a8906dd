//! [`HostPlatform`] on top of the dispatcher, window manager, renderer host
//! and RPC bridge. Native backends only supply a [`WindowSystem`] and a
//! [`RendererBackend`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatcher::{lock, Dispatcher};
use crate::error::{HostError, HostResult};
use crate::events::{RendererEvent, RpcInvokeSink, TrayEvent, TrayEventSink};
use crate::options::{
    MessageBoxOptions, MessageBoxResult, OpenDialogOptions, SaveDialogOptions, TrayMenuItem,
    TrayOptions, WindowOptions,
};
use crate::platform::HostPlatform;
use crate::renderer::{RendererBackend, RendererStatus};
use crate::rpc::RpcBridge;
use crate::window::{Point, Size, WindowId};
use crate::window_manager::{ClosePolicy, WindowManager, WindowSystem};

pub struct DesktopPlatform<S: WindowSystem, B: RendererBackend> {
    name: &'static str,
    manager: WindowManager<S, B>,
    tray_sink: Arc<Mutex<Option<TrayEventSink>>>,
    next_tray_id: AtomicU32,
}

impl<S: WindowSystem, B: RendererBackend> DesktopPlatform<S, B> {
    /// Must be called on the thread that will run the dispatcher.
    pub fn new(
        name: &'static str,
        system: S,
        backend: B,
        dispatcher: Dispatcher,
        policy: ClosePolicy,
    ) -> Self {
        let manager = WindowManager::new(system, backend, dispatcher, RpcBridge::new(), policy);
        Self {
            name,
            manager,
            tray_sink: Arc::new(Mutex::new(None)),
            next_tray_id: AtomicU32::new(1),
        }
    }

    pub fn manager(&self) -> &WindowManager<S, B> {
        &self.manager
    }

    pub fn rpc(&self) -> &RpcBridge {
        self.manager.rpc()
    }

    pub fn renderer_status(&self, id: WindowId) -> Option<RendererStatus> {
        self.manager.renderer_status(id)
    }

    /// Deliver a page message as if the renderer had received it.
    pub fn inject_web_message(&self, id: WindowId, message: &str) {
        let renderer = self.manager.renderer().clone();
        let event = RendererEvent::WebMessage {
            window: id,
            message: message.to_string(),
        };
        self.manager
            .dispatcher()
            .post(move || renderer.handle_event(event));
    }

    /// Close a window the way the user would, through the native layer.
    pub fn simulate_user_close(&self, id: WindowId) -> HostResult<()> {
        let handle = self.manager.handle(id).ok_or(HostError::WindowNotFound(id))?;
        self.manager
            .invoke_system(move |system| system.request_close(handle))
    }

    /// Forwards tray events to whatever sink is current at delivery time.
    fn tray_forwarder(&self) -> TrayEventSink {
        let current = Arc::clone(&self.tray_sink);
        Arc::new(move |event: TrayEvent| {
            let sink = lock(&current).clone();
            match sink {
                Some(sink) => sink(event),
                None => tracing::debug!(tray_id = event.tray_id, event = %event.event, "tray event without listener"),
            }
        })
    }

    fn owner_handle(&self, owner: Option<WindowId>) -> Option<crate::window::NativeHandle> {
        owner.and_then(|id| self.manager.handle(id))
    }
}

impl<S: WindowSystem, B: RendererBackend> HostPlatform for DesktopPlatform<S, B> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dispatcher(&self) -> &Dispatcher {
        self.manager.dispatcher()
    }

    fn create_window(&self, options: WindowOptions) -> HostResult<WindowId> {
        self.manager.create(options)
    }

    fn load_url(&self, id: WindowId, url: &str) {
        self.manager.load_url(id, url)
    }

    fn show_window(&self, id: WindowId) {
        self.manager.show(id)
    }

    fn hide_window(&self, id: WindowId) {
        self.manager.hide(id)
    }

    fn close_window(&self, id: WindowId) {
        self.manager.close(id)
    }

    fn set_window_title(&self, id: WindowId, title: &str) {
        self.manager.set_title(id, title)
    }

    fn window_size(&self, id: WindowId) -> Size {
        self.manager.size(id)
    }

    fn window_position(&self, id: WindowId) -> Point {
        self.manager.position(id)
    }

    fn focus_window(&self, id: WindowId) {
        self.manager.focus(id)
    }

    fn center_window(&self, id: WindowId) {
        self.manager.center(id)
    }

    fn minimize_window(&self, id: WindowId) {
        self.manager.minimize(id)
    }

    fn unminimize_window(&self, id: WindowId) {
        self.manager.unminimize(id)
    }

    fn is_window_minimized(&self, id: WindowId) -> bool {
        self.manager.is_minimized(id)
    }

    fn maximize_window(&self, id: WindowId) {
        self.manager.maximize(id)
    }

    fn unmaximize_window(&self, id: WindowId) {
        self.manager.unmaximize(id)
    }

    fn is_window_maximized(&self, id: WindowId) -> bool {
        self.manager.is_maximized(id)
    }

    fn set_rpc_manifest(&self, id: WindowId, namespace: Option<String>, methods: Vec<String>) {
        self.manager.set_rpc_manifest(id, namespace, methods)
    }

    fn rpc_resolve(&self, id: WindowId, request_id: &str, result_json: &str) -> bool {
        self.rpc().resolve(id, request_id, result_json)
    }

    fn rpc_reject(&self, id: WindowId, request_id: &str, message: &str) -> bool {
        self.rpc().reject(id, request_id, message)
    }

    fn set_rpc_invoke_sink(&self, sink: Option<RpcInvokeSink>) {
        self.rpc().set_invoke_sink(sink)
    }

    fn create_tray(&self, options: TrayOptions) -> HostResult<u32> {
        let id = self
            .next_tray_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| HostError::IdSpaceExhausted)?;
        let events = self.tray_forwarder();
        self.manager
            .invoke_system(move |system| system.create_tray(id, &options, events))
            .and_then(|created| created)?;
        tracing::info!(tray_id = id, "tray created");
        Ok(id)
    }

    fn set_tray_tooltip(&self, id: u32, tooltip: &str) -> HostResult<()> {
        let tooltip = tooltip.to_string();
        self.manager
            .invoke_system(move |system| system.set_tray_tooltip(id, &tooltip))
            .and_then(|result| result)
    }

    fn set_tray_menu(&self, id: u32, menu: Vec<TrayMenuItem>) -> HostResult<()> {
        self.manager
            .invoke_system(move |system| system.set_tray_menu(id, &menu))
            .and_then(|result| result)
    }

    fn set_tray_event_sink(&self, sink: Option<TrayEventSink>) {
        *lock(&self.tray_sink) = sink;
    }

    fn open_file_dialog(
        &self,
        owner: Option<WindowId>,
        options: OpenDialogOptions,
    ) -> HostResult<Vec<String>> {
        let owner = self.owner_handle(owner);
        self.manager
            .invoke_system(move |system| system.open_file(owner, &options))
            .and_then(|result| result)
    }

    fn save_file_dialog(
        &self,
        owner: Option<WindowId>,
        options: SaveDialogOptions,
    ) -> HostResult<Option<String>> {
        let owner = self.owner_handle(owner);
        self.manager
            .invoke_system(move |system| system.save_file(owner, &options))
            .and_then(|result| result)
    }

    fn message_box(
        &self,
        owner: Option<WindowId>,
        options: MessageBoxOptions,
    ) -> HostResult<MessageBoxResult> {
        let owner = self.owner_handle(owner);
        self.manager
            .invoke_system(move |system| system.message_box(owner, &options))
            .and_then(|result| result)
    }
}

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::dispatcher::{lock, Dispatcher};
use crate::error::{HostError, HostResult};
use crate::events::{TrayEventSink, WindowEvent, WindowEventSink};
use crate::options::{
    MessageBoxOptions, MessageBoxResult, OpenDialogOptions, SaveDialogOptions, TrayMenuItem,
    TrayOptions, WindowOptions,
};
use crate::renderer::{RendererBackend, RendererHost, RendererSettings, RendererStatus};
use crate::rpc::RpcBridge;
use crate::ui_cell::UiCell;
use crate::window::{NativeHandle, Point, Rect, ShowState, Size, WindowId, WindowPhase, WindowRecord};

/// Native window system. Every method runs on the UI thread and must not
/// pump messages; native notifications go through the installed sink.
pub trait WindowSystem: 'static {
    fn install_event_sink(&mut self, sink: WindowEventSink);

    fn create_window(&mut self, record: &WindowRecord) -> HostResult<NativeHandle>;

    /// Ask the window to close. Destruction is reported through the sink.
    fn request_close(&mut self, handle: NativeHandle);

    /// Drop any bookkeeping for a destroyed window.
    fn release(&mut self, handle: NativeHandle);

    fn set_visible(&mut self, handle: NativeHandle, visible: bool);
    fn set_title(&mut self, handle: NativeHandle, title: &str);
    fn set_position(&mut self, handle: NativeHandle, position: Point);
    fn focus(&mut self, handle: NativeHandle);
    fn set_show_state(&mut self, handle: NativeHandle, state: ShowState);

    fn outer_rect(&self, handle: NativeHandle) -> Option<Rect>;
    fn client_size(&self, handle: NativeHandle) -> Size;

    /// Working area of the primary display.
    fn work_area(&self) -> Rect;

    fn open_file(
        &mut self,
        owner: Option<NativeHandle>,
        options: &OpenDialogOptions,
    ) -> HostResult<Vec<String>>;
    fn save_file(
        &mut self,
        owner: Option<NativeHandle>,
        options: &SaveDialogOptions,
    ) -> HostResult<Option<String>>;
    fn message_box(
        &mut self,
        owner: Option<NativeHandle>,
        options: &MessageBoxOptions,
    ) -> HostResult<MessageBoxResult>;

    fn create_tray(&mut self, id: u32, options: &TrayOptions, events: TrayEventSink) -> HostResult<()>;
    fn set_tray_tooltip(&mut self, id: u32, tooltip: &str) -> HostResult<()>;
    fn set_tray_menu(&mut self, id: u32, menu: &[TrayMenuItem]) -> HostResult<()>;
}

/// What happens when the last window is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    #[default]
    QuitWhenLastWindowCloses,
    KeepRunning,
}

#[derive(Default)]
struct Registry {
    records: HashMap<WindowId, WindowRecord>,
    by_handle: HashMap<NativeHandle, WindowId>,
}

struct Shared<S: WindowSystem, B: RendererBackend> {
    dispatcher: Dispatcher,
    /// Coarse lock over every record; held only for bookkeeping, never
    /// across native calls.
    registry: Mutex<Registry>,
    system: UiCell<RefCell<S>>,
    renderer: RendererHost<B>,
    rpc: RpcBridge,
    next_id: AtomicU32,
    policy: ClosePolicy,
}

/// Creates and tracks native windows. Cloneable and callable from any
/// thread; native work is marshaled to the UI thread.
pub struct WindowManager<S: WindowSystem, B: RendererBackend> {
    shared: Arc<Shared<S, B>>,
}

impl<S: WindowSystem, B: RendererBackend> Clone for WindowManager<S, B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: WindowSystem, B: RendererBackend> WindowManager<S, B> {
    /// Must be called on the thread that will run the dispatcher.
    pub fn new(
        mut system: S,
        backend: B,
        dispatcher: Dispatcher,
        rpc: RpcBridge,
        policy: ClosePolicy,
    ) -> Self {
        let renderer = RendererHost::new(backend, dispatcher.clone(), rpc.clone());
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<S, B>>| {
            system.install_event_sink(event_sink(weak.clone(), dispatcher.clone()));
            Shared {
                dispatcher,
                registry: Mutex::new(Registry::default()),
                system: UiCell::new(RefCell::new(system)),
                renderer,
                rpc,
                next_id: AtomicU32::new(1),
                policy,
            }
        });
        Self { shared }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn rpc(&self) -> &RpcBridge {
        &self.shared.rpc
    }

    fn allocate_id(&self) -> HostResult<WindowId> {
        self.shared
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map(WindowId)
            .map_err(|_| HostError::IdSpaceExhausted)
    }

    /// Create a window and block until the native window exists.
    pub fn create(&self, options: WindowOptions) -> HostResult<WindowId> {
        let id = self.allocate_id()?;
        let record = WindowRecord::from_options(id, &options);
        lock(&self.shared.registry).records.insert(id, record);

        let shared = Arc::clone(&self.shared);
        let show = options.show.unwrap_or(true);
        let created = self
            .shared
            .dispatcher
            .invoke(move || shared.create_native(id, show))
            .map_err(HostError::from)
            .and_then(|result| result);

        if let Err(err) = &created {
            tracing::error!(window_id = %id, error = %err, "window creation failed");
            lock(&self.shared.registry).records.remove(&id);
        }
        created.map(|()| id)
    }

    /// Run `f` with the native handle on the UI thread. Unknown or closed
    /// windows yield `default` without touching native state.
    fn with_window<R, F>(&self, id: WindowId, default: R, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&Shared<S, B>, NativeHandle) -> R + Send + 'static,
    {
        let Some(handle) = self.live_handle(id) else {
            return default;
        };
        let shared = Arc::clone(&self.shared);
        match self.shared.dispatcher.invoke(move || f(&shared, handle)) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(window_id = %id, error = %err, "window operation was not executed");
                default
            }
        }
    }

    fn live_handle(&self, id: WindowId) -> Option<NativeHandle> {
        let registry = lock(&self.shared.registry);
        registry
            .records
            .get(&id)
            .filter(|record| record.is_alive())
            .and_then(|record| record.handle)
    }

    pub fn show(&self, id: WindowId) {
        self.with_window(id, (), move |shared, handle| {
            shared.with_system(|system| system.set_visible(handle, true));
            shared.update(id, |record| record.phase = WindowPhase::Visible);
        })
    }

    pub fn hide(&self, id: WindowId) {
        self.with_window(id, (), move |shared, handle| {
            shared.with_system(|system| system.set_visible(handle, false));
            shared.update(id, |record| record.phase = WindowPhase::Hidden);
        })
    }

    /// Close a window. The record is retired now; resources are released
    /// when the native layer reports the destruction.
    pub fn close(&self, id: WindowId) {
        self.with_window(id, (), move |shared, handle| {
            shared.update(id, |record| record.phase = WindowPhase::Destroyed);
            shared.with_system(|system| system.request_close(handle));
        })
    }

    pub fn set_title(&self, id: WindowId, title: &str) {
        let title = title.to_string();
        self.with_window(id, (), move |shared, handle| {
            shared.with_system(|system| system.set_title(handle, &title));
            shared.update(id, |record| record.title = title);
        })
    }

    /// Outer size; `[0, 0]` for unknown or closed windows.
    pub fn size(&self, id: WindowId) -> Size {
        self.with_window(id, Size::default(), move |shared, handle| {
            shared
                .with_system(|system| system.outer_rect(handle))
                .flatten()
                .map(|rect| rect.size())
                .or_else(|| shared.record(id).map(|record| record.size))
                .unwrap_or_default()
        })
    }

    /// Outer position; `[0, 0]` for unknown or closed windows.
    pub fn position(&self, id: WindowId) -> Point {
        self.with_window(id, Point::default(), move |shared, handle| {
            shared
                .with_system(|system| system.outer_rect(handle))
                .flatten()
                .map(|rect| rect.origin())
                .unwrap_or_default()
        })
    }

    pub fn focus(&self, id: WindowId) {
        self.with_window(id, (), move |shared, handle| {
            shared.with_system(|system| system.focus(handle));
        })
    }

    /// Center on the primary display's working area.
    pub fn center(&self, id: WindowId) {
        self.with_window(id, (), move |shared, handle| {
            let target = shared.with_system(|system| {
                let area = system.work_area();
                let size = system
                    .outer_rect(handle)
                    .map(|rect| rect.size())
                    .unwrap_or_default();
                let target = area.center(size);
                system.set_position(handle, target);
                target
            });
            if let Some(target) = target {
                shared.update(id, |record| record.position = Some(target));
            }
        })
    }

    pub fn minimize(&self, id: WindowId) {
        self.set_show_state(id, ShowState::Minimized, None);
    }

    pub fn unminimize(&self, id: WindowId) {
        self.set_show_state(id, ShowState::Normal, Some(ShowState::Minimized));
    }

    pub fn maximize(&self, id: WindowId) {
        self.set_show_state(id, ShowState::Maximized, None);
    }

    pub fn unmaximize(&self, id: WindowId) {
        self.set_show_state(id, ShowState::Normal, Some(ShowState::Maximized));
    }

    /// Move to `target`, optionally only when currently in `only_from`.
    fn set_show_state(&self, id: WindowId, target: ShowState, only_from: Option<ShowState>) {
        self.with_window(id, (), move |shared, handle| {
            let current = shared.record(id).map(|record| record.show_state);
            if only_from.is_some() && current != only_from {
                return;
            }
            shared.with_system(|system| system.set_show_state(handle, target));
            shared.update(id, |record| record.show_state = target);
        })
    }

    pub fn is_minimized(&self, id: WindowId) -> bool {
        self.show_state(id) == Some(ShowState::Minimized)
    }

    pub fn is_maximized(&self, id: WindowId) -> bool {
        self.show_state(id) == Some(ShowState::Maximized)
    }

    fn show_state(&self, id: WindowId) -> Option<ShowState> {
        lock(&self.shared.registry)
            .records
            .get(&id)
            .filter(|record| record.is_alive())
            .map(|record| record.show_state)
    }

    /// Navigate the window's renderer, or remember the location until it is
    /// ready.
    pub fn load_url(&self, id: WindowId, url: &str) {
        let url = url.to_string();
        self.with_window(id, (), move |shared, _handle| {
            shared.update(id, |record| record.location = Some(url.clone()));
            if let Err(err) = shared.renderer.navigate(id, &url) {
                tracing::warn!(window_id = %id, error = %err, "navigation failed");
            }
        })
    }

    /// Register the window's RPC manifest. Only the first registration
    /// takes effect.
    pub fn set_rpc_manifest(&self, id: WindowId, namespace: Option<String>, methods: Vec<String>) {
        if self.live_handle(id).is_none() {
            return;
        }
        if self
            .shared
            .rpc
            .register_manifest(id, namespace.clone(), methods.iter().cloned())
        {
            self.shared.update(id, |record| {
                record.rpc_namespace = namespace;
                record.rpc_methods = methods.into_iter().collect();
            });
        }
    }

    pub fn record(&self, id: WindowId) -> Option<WindowRecord> {
        self.shared.record(id)
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        let mut ids: Vec<_> = lock(&self.shared.registry)
            .records
            .values()
            .filter(|record| record.is_alive())
            .map(|record| record.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn window_count(&self) -> usize {
        self.window_ids().len()
    }

    pub fn renderer_status(&self, id: WindowId) -> Option<RendererStatus> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .dispatcher
            .invoke(move || shared.renderer.status(id))
            .ok()
            .flatten()
    }

    pub fn renderer(&self) -> &RendererHost<B> {
        &self.shared.renderer
    }

    /// Run `f` against the window system on the UI thread.
    pub fn invoke_system<R, F>(&self, f: F) -> HostResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared
            .dispatcher
            .invoke(move || {
                shared
                    .with_system(f)
                    .ok_or(HostError::Unsupported("window system access off the UI thread"))
            })
            .map_err(HostError::from)
            .and_then(|result| result)
    }

    /// Native handle of a live window, for parenting dialogs.
    pub fn handle(&self, id: WindowId) -> Option<NativeHandle> {
        self.live_handle(id)
    }

    /// Feed a native event through the same path the window system uses.
    pub fn dispatch_event(&self, event: WindowEvent) {
        let shared = Arc::clone(&self.shared);
        self.shared
            .dispatcher
            .post(move || shared.handle_event(event));
    }
}

impl<S: WindowSystem, B: RendererBackend> Shared<S, B> {
    /// Borrow the window system. `None` off the UI thread or during a
    /// re-entrant call.
    fn with_system<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let cell = match self.system.get() {
            Ok(cell) => cell,
            Err(err) => {
                tracing::error!(error = %err, "window system used off the UI thread");
                return None;
            }
        };
        match cell.try_borrow_mut() {
            Ok(mut system) => Some(f(&mut system)),
            Err(_) => {
                tracing::error!("window system is already borrowed; dropping re-entrant call");
                None
            }
        }
    }

    fn record(&self, id: WindowId) -> Option<WindowRecord> {
        lock(&self.registry).records.get(&id).cloned()
    }

    fn update(&self, id: WindowId, f: impl FnOnce(&mut WindowRecord)) {
        if let Some(record) = lock(&self.registry).records.get_mut(&id) {
            f(record);
        }
    }

    /// Runs on the UI thread.
    fn create_native(&self, id: WindowId, show: bool) -> HostResult<()> {
        let record = self.record(id).ok_or(HostError::WindowNotFound(id))?;
        let created = self
            .with_system(|system| -> HostResult<(NativeHandle, Size)> {
                let handle = system.create_window(&record)?;
                if record.position.is_none() {
                    let area = system.work_area();
                    let size = system
                        .outer_rect(handle)
                        .map(|rect| rect.size())
                        .unwrap_or(record.size);
                    system.set_position(handle, area.center(size));
                }
                if show {
                    system.set_visible(handle, true);
                }
                Ok((handle, system.client_size(handle)))
            })
            .ok_or(HostError::Unsupported("window creation off the UI thread"))?;
        let (handle, client) = created?;

        {
            let mut registry = lock(&self.registry);
            registry.by_handle.insert(handle, id);
            if let Some(record) = registry.records.get_mut(&id) {
                record.handle = Some(handle);
                record.phase = if show {
                    WindowPhase::Visible
                } else {
                    WindowPhase::Created
                };
            }
        }
        tracing::info!(window_id = %id, handle = handle.0, "window created");

        if record.has_rpc_manifest() {
            self.rpc.register_manifest(
                id,
                record.rpc_namespace.clone(),
                record.rpc_methods.iter().cloned(),
            );
        }

        let settings = RendererSettings {
            dev_tools: record.dev_tools,
            context_menu: record.context_menu,
            frameless: record.frameless,
            title: record.title.clone(),
        };
        // The window stays usable without a renderer.
        if let Err(err) = self
            .renderer
            .attach(id, handle, client, settings, record.location.clone())
        {
            tracing::error!(window_id = %id, error = %err, "renderer could not start");
        }
        Ok(())
    }

    /// Apply a native notification. Runs as a dispatcher work item, never
    /// inside the native callback that produced it.
    fn handle_event(&self, event: WindowEvent) {
        match event {
            WindowEvent::Resized { handle, client } => {
                let Some(id) = self.id_for(handle) else { return };
                let outer = self.with_system(|system| system.outer_rect(handle)).flatten();
                if let Some(rect) = outer {
                    self.update(id, |record| record.size = rect.size());
                }
                if let Err(err) = self.renderer.resize(id, client) {
                    tracing::warn!(window_id = %id, error = %err, "renderer resize failed");
                }
            }
            WindowEvent::Moved { handle, position } => {
                if let Some(id) = self.id_for(handle) {
                    self.update(id, |record| record.position = Some(position));
                }
            }
            WindowEvent::Minimized { handle } => self.set_state_from_native(handle, ShowState::Minimized),
            WindowEvent::Maximized { handle } => self.set_state_from_native(handle, ShowState::Maximized),
            WindowEvent::Restored { handle } => self.set_state_from_native(handle, ShowState::Normal),
            WindowEvent::Destroyed { handle } => self.on_destroyed(handle),
        }
    }

    fn id_for(&self, handle: NativeHandle) -> Option<WindowId> {
        lock(&self.registry).by_handle.get(&handle).copied()
    }

    fn set_state_from_native(&self, handle: NativeHandle, state: ShowState) {
        if let Some(id) = self.id_for(handle) {
            self.update(id, |record| record.show_state = state);
        }
    }

    fn on_destroyed(&self, handle: NativeHandle) {
        let (id, remaining) = {
            let mut registry = lock(&self.registry);
            let Some(id) = registry.by_handle.remove(&handle) else {
                return;
            };
            registry.records.remove(&id);
            let remaining = registry
                .records
                .values()
                .filter(|record| record.phase != WindowPhase::Requested)
                .count();
            (id, remaining)
        };
        self.renderer.dispose(id);
        self.rpc.forget_window(id);
        self.with_system(|system| system.release(handle));
        tracing::info!(window_id = %id, remaining, "window destroyed");

        if remaining == 0 && self.policy == ClosePolicy::QuitWhenLastWindowCloses {
            tracing::info!("last window closed; quitting");
            self.dispatcher.quit(0);
        }
    }
}

/// Sink handed to the window system: every notification becomes a posted
/// work item.
fn event_sink<S: WindowSystem, B: RendererBackend>(
    weak: Weak<Shared<S, B>>,
    dispatcher: Dispatcher,
) -> WindowEventSink {
    Arc::new(move |event: WindowEvent| {
        let weak = weak.clone();
        dispatcher.post(move || {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(event);
            }
        });
    })
}

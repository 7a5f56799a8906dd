//! In-memory backend used when no native window system or renderer runtime
//! is available, and by the test suite.
//!
//! Windows are plain geometry records on a 1920x1080 work area. The renderer
//! completes its asynchronous steps through the dispatcher exactly like a
//! native one would, and records everything it is asked to do in a
//! [`HeadlessJournal`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dialog::message_title;
use crate::dispatcher::{lock, Dispatcher};
use crate::error::{HostError, HostResult, RendererError};
use crate::events::{
    RendererEvent, RendererEventSink, TrayEvent, TrayEventSink, WindowEvent, WindowEventSink,
};
use crate::options::{
    MessageBoxOptions, MessageBoxResult, OpenDialogOptions, SaveDialogOptions, TrayMenuItem,
    TrayOptions,
};
use crate::platform::desktop::DesktopPlatform;
use crate::renderer::{Completion, RendererBackend, RendererSettings};
use crate::window::{NativeHandle, Point, Rect, ShowState, Size, WindowId, WindowRecord};
use crate::window_manager::{ClosePolicy, WindowSystem};

pub const WORK_AREA: Rect = Rect {
    x: 0,
    y: 0,
    width: 1920,
    height: 1080,
};

/// The headless host: the shared desktop platform over in-memory parts.
pub type HeadlessPlatform = DesktopPlatform<VirtualWindowSystem, VirtualRenderer>;

struct VirtualWindow {
    rect: Rect,
    restore: Option<Rect>,
    visible: bool,
    title: String,
    closing: bool,
}

struct VirtualTray {
    tooltip: Option<String>,
    icon: Option<String>,
    menu: Vec<TrayMenuItem>,
    events: TrayEventSink,
}

/// In-memory window system.
#[derive(Default)]
pub struct VirtualWindowSystem {
    windows: HashMap<NativeHandle, VirtualWindow>,
    trays: HashMap<u32, VirtualTray>,
    next_handle: isize,
    sink: Option<WindowEventSink>,
}

impl VirtualWindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, event: WindowEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    pub fn title(&self, handle: NativeHandle) -> Option<&str> {
        self.windows.get(&handle).map(|w| w.title.as_str())
    }

    pub fn is_visible(&self, handle: NativeHandle) -> bool {
        self.windows.get(&handle).is_some_and(|w| w.visible)
    }

    pub fn tray_tooltip(&self, id: u32) -> Option<String> {
        self.trays.get(&id).and_then(|t| t.tooltip.clone())
    }

    pub fn tray_icon(&self, id: u32) -> Option<String> {
        self.trays.get(&id).and_then(|t| t.icon.clone())
    }

    pub fn tray_menu(&self, id: u32) -> Option<Vec<TrayMenuItem>> {
        self.trays.get(&id).map(|t| t.menu.clone())
    }

    /// Report a tray interaction as the OS would.
    pub fn fire_tray_event(
        &self,
        id: u32,
        event: &str,
        menu_item_id: Option<String>,
    ) -> HostResult<()> {
        let tray = self.trays.get(&id).ok_or_else(|| tray_not_found(id))?;
        (tray.events)(TrayEvent {
            tray_id: id,
            event: event.to_string(),
            menu_item_id,
        });
        Ok(())
    }

    fn tray_mut(&mut self, id: u32) -> HostResult<&mut VirtualTray> {
        self.trays.get_mut(&id).ok_or_else(|| tray_not_found(id))
    }
}

fn tray_not_found(id: u32) -> HostError {
    HostError::InvalidArgument(format!("Tray {id} not found"))
}

impl WindowSystem for VirtualWindowSystem {
    fn install_event_sink(&mut self, sink: WindowEventSink) {
        self.sink = Some(sink);
    }

    fn create_window(&mut self, record: &WindowRecord) -> HostResult<NativeHandle> {
        self.next_handle += 1;
        let handle = NativeHandle(self.next_handle);
        let origin = record.position.unwrap_or_default();
        self.windows.insert(
            handle,
            VirtualWindow {
                rect: Rect {
                    x: origin.x,
                    y: origin.y,
                    width: record.size.width,
                    height: record.size.height,
                },
                restore: None,
                visible: false,
                title: record.title.clone(),
                closing: false,
            },
        );
        tracing::debug!(window_id = %record.id, handle = handle.0, "virtual window created");
        Ok(handle)
    }

    fn request_close(&mut self, handle: NativeHandle) {
        let Some(window) = self.windows.get_mut(&handle) else {
            return;
        };
        if window.closing {
            return;
        }
        window.closing = true;
        window.visible = false;
        self.emit(WindowEvent::Destroyed { handle });
    }

    fn release(&mut self, handle: NativeHandle) {
        self.windows.remove(&handle);
    }

    fn set_visible(&mut self, handle: NativeHandle, visible: bool) {
        if let Some(window) = self.windows.get_mut(&handle) {
            window.visible = visible;
        }
    }

    fn set_title(&mut self, handle: NativeHandle, title: &str) {
        if let Some(window) = self.windows.get_mut(&handle) {
            window.title = title.to_string();
        }
    }

    fn set_position(&mut self, handle: NativeHandle, position: Point) {
        if let Some(window) = self.windows.get_mut(&handle) {
            window.rect.x = position.x;
            window.rect.y = position.y;
            self.emit(WindowEvent::Moved { handle, position });
        }
    }

    fn focus(&mut self, handle: NativeHandle) {
        tracing::trace!(handle = handle.0, "virtual focus");
    }

    fn set_show_state(&mut self, handle: NativeHandle, state: ShowState) {
        let Some(window) = self.windows.get_mut(&handle) else {
            return;
        };
        let event = match state {
            ShowState::Maximized => {
                window.restore.get_or_insert(window.rect);
                window.rect = WORK_AREA;
                WindowEvent::Maximized { handle }
            }
            ShowState::Minimized => WindowEvent::Minimized { handle },
            ShowState::Normal => {
                if let Some(rect) = window.restore.take() {
                    window.rect = rect;
                }
                WindowEvent::Restored { handle }
            }
        };
        let client = window.rect.size();
        self.emit(event);
        self.emit(WindowEvent::Resized { handle, client });
    }

    fn outer_rect(&self, handle: NativeHandle) -> Option<Rect> {
        self.windows.get(&handle).map(|w| w.rect)
    }

    fn client_size(&self, handle: NativeHandle) -> Size {
        self.windows
            .get(&handle)
            .map(|w| w.rect.size())
            .unwrap_or_default()
    }

    fn work_area(&self) -> Rect {
        WORK_AREA
    }

    fn open_file(
        &mut self,
        _owner: Option<NativeHandle>,
        options: &OpenDialogOptions,
    ) -> HostResult<Vec<String>> {
        tracing::info!(title = ?options.title, "open dialog requested without a display; returning no selection");
        Ok(Vec::new())
    }

    fn save_file(
        &mut self,
        _owner: Option<NativeHandle>,
        options: &SaveDialogOptions,
    ) -> HostResult<Option<String>> {
        tracing::info!(title = ?options.title, "save dialog requested without a display; returning no selection");
        Ok(None)
    }

    fn message_box(
        &mut self,
        _owner: Option<NativeHandle>,
        options: &MessageBoxOptions,
    ) -> HostResult<MessageBoxResult> {
        tracing::info!(
            title = message_title(options.title.as_deref()),
            message = %options.message,
            "message box"
        );
        Ok(MessageBoxResult { response: 0 })
    }

    fn create_tray(
        &mut self,
        id: u32,
        options: &TrayOptions,
        events: TrayEventSink,
    ) -> HostResult<()> {
        self.trays.insert(
            id,
            VirtualTray {
                tooltip: options.tooltip.clone(),
                icon: options.icon.clone(),
                menu: options.menu.clone(),
                events,
            },
        );
        Ok(())
    }

    fn set_tray_tooltip(&mut self, id: u32, tooltip: &str) -> HostResult<()> {
        self.tray_mut(id)?.tooltip = Some(tooltip.to_string());
        Ok(())
    }

    fn set_tray_menu(&mut self, id: u32, menu: &[TrayMenuItem]) -> HostResult<()> {
        self.tray_mut(id)?.menu = menu.to_vec();
        Ok(())
    }
}

/// Everything the virtual renderer was asked to do, per window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalEntry {
    pub settings: Option<RendererSettings>,
    pub init_scripts: Vec<String>,
    pub bounds: Vec<Rect>,
    pub navigations: Vec<String>,
    pub posted: Vec<String>,
    pub closed: bool,
}

/// Shared, cloneable record of renderer traffic.
#[derive(Clone, Default)]
pub struct HeadlessJournal {
    entries: Arc<Mutex<HashMap<WindowId, JournalEntry>>>,
}

impl HeadlessJournal {
    pub fn entry(&self, window: WindowId) -> JournalEntry {
        lock(&self.entries).get(&window).cloned().unwrap_or_default()
    }

    /// Messages posted to the window's page, oldest first.
    pub fn posted(&self, window: WindowId) -> Vec<String> {
        self.entry(window).posted
    }

    pub fn navigations(&self, window: WindowId) -> Vec<String> {
        self.entry(window).navigations
    }

    fn record(&self, window: WindowId, f: impl FnOnce(&mut JournalEntry)) {
        f(lock(&self.entries).entry(window).or_default());
    }
}

/// Native failure codes to report instead of succeeding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererFailures {
    pub environment: Option<i32>,
    pub controller: Option<i32>,
}

pub struct VirtualEnvironment;

pub struct VirtualController {
    serial: u64,
}

struct Subscription {
    window: WindowId,
    events: RendererEventSink,
}

/// Renderer that completes through the dispatcher and records into a
/// [`HeadlessJournal`].
pub struct VirtualRenderer {
    dispatcher: Dispatcher,
    journal: HeadlessJournal,
    failures: RendererFailures,
    next_serial: u64,
    subscriptions: HashMap<u64, Subscription>,
    pending: HashMap<u64, (Option<RendererSettings>, Option<Rect>, Vec<String>)>,
}

impl VirtualRenderer {
    pub fn new(dispatcher: Dispatcher, journal: HeadlessJournal, failures: RendererFailures) -> Self {
        Self {
            dispatcher,
            journal,
            failures,
            next_serial: 0,
            subscriptions: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn journal(&self) -> &HeadlessJournal {
        &self.journal
    }

    fn window(&self, controller: &VirtualController) -> Result<WindowId, RendererError> {
        self.subscriptions
            .get(&controller.serial)
            .map(|s| s.window)
            .ok_or(RendererError::NotReady)
    }
}

impl RendererBackend for VirtualRenderer {
    type Environment = VirtualEnvironment;
    type Controller = VirtualController;

    fn create_environment(
        &mut self,
        done: Completion<Self::Environment>,
    ) -> Result<(), RendererError> {
        let failure = self.failures.environment;
        self.dispatcher.post(move || match failure {
            Some(code) => done(Err(code)),
            None => done(Ok(VirtualEnvironment)),
        });
        Ok(())
    }

    fn create_controller(
        &mut self,
        _environment: &Self::Environment,
        _window: NativeHandle,
        done: Completion<Self::Controller>,
    ) -> Result<(), RendererError> {
        self.next_serial += 1;
        let serial = self.next_serial;
        let failure = self.failures.controller;
        self.dispatcher.post(move || match failure {
            Some(code) => done(Err(code)),
            None => done(Ok(VirtualController { serial })),
        });
        Ok(())
    }

    fn apply_settings(
        &mut self,
        controller: &Self::Controller,
        settings: &RendererSettings,
    ) -> Result<(), RendererError> {
        // Settings arrive before the window id is known.
        self.pending.entry(controller.serial).or_default().0 = Some(settings.clone());
        Ok(())
    }

    fn subscribe(
        &mut self,
        controller: &Self::Controller,
        window: WindowId,
        events: RendererEventSink,
    ) -> Result<(), RendererError> {
        self.subscriptions
            .insert(controller.serial, Subscription { window, events });
        if let Some((settings, _, _)) = self.pending.remove(&controller.serial) {
            self.journal.record(window, |entry| entry.settings = settings);
        }
        Ok(())
    }

    fn add_init_script(
        &mut self,
        controller: &Self::Controller,
        script: &str,
    ) -> Result<(), RendererError> {
        let window = self.window(controller)?;
        self.journal
            .record(window, |entry| entry.init_scripts.push(script.to_string()));
        Ok(())
    }

    fn set_bounds(&mut self, controller: &Self::Controller, bounds: Rect) -> Result<(), RendererError> {
        let window = self.window(controller)?;
        self.journal.record(window, |entry| entry.bounds.push(bounds));
        Ok(())
    }

    fn navigate(&mut self, controller: &Self::Controller, url: &str) -> Result<(), RendererError> {
        let subscription = self
            .subscriptions
            .get(&controller.serial)
            .ok_or(RendererError::NotReady)?;
        let window = subscription.window;
        self.journal
            .record(window, |entry| entry.navigations.push(url.to_string()));
        (subscription.events)(RendererEvent::NavigationCompleted {
            window,
            success: true,
        });
        Ok(())
    }

    fn post_message(
        &mut self,
        controller: &Self::Controller,
        message: &str,
    ) -> Result<(), RendererError> {
        let window = self.window(controller)?;
        self.journal
            .record(window, |entry| entry.posted.push(message.to_string()));
        Ok(())
    }

    fn close(&mut self, controller: Self::Controller) {
        self.pending.remove(&controller.serial);
        if let Some(subscription) = self.subscriptions.remove(&controller.serial) {
            self.journal
                .record(subscription.window, |entry| entry.closed = true);
        }
    }
}

impl DesktopPlatform<VirtualWindowSystem, VirtualRenderer> {
    /// Headless platform bound to the current thread.
    pub fn headless(policy: ClosePolicy) -> Self {
        Self::with_failures(policy, RendererFailures::default())
    }

    /// Headless platform whose renderer fails as configured.
    pub fn with_failures(policy: ClosePolicy, failures: RendererFailures) -> Self {
        let dispatcher = Dispatcher::headless();
        let renderer = VirtualRenderer::new(dispatcher.clone(), HeadlessJournal::default(), failures);
        DesktopPlatform::new(
            "headless",
            VirtualWindowSystem::new(),
            renderer,
            dispatcher,
            policy,
        )
    }

    /// The renderer journal. Callable from any thread.
    pub fn journal(&self) -> HostResult<HeadlessJournal> {
        let renderer = self.manager().renderer().clone();
        self.manager()
            .dispatcher()
            .invoke(move || renderer.with_backend(|backend| backend.journal().clone()))?
            .map_err(HostError::from)
    }

    /// Report a tray click or menu choice as the OS would.
    pub fn simulate_tray_event(
        &self,
        tray_id: u32,
        event: &str,
        menu_item_id: Option<&str>,
    ) -> HostResult<()> {
        let event = event.to_string();
        let menu_item_id = menu_item_id.map(str::to_string);
        self.manager()
            .invoke_system(move |system| system.fire_tray_event(tray_id, &event, menu_item_id))
            .and_then(|result| result)
    }

    /// Read-only access to the in-memory window system.
    pub fn inspect<R, F>(&self, f: F) -> HostResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&VirtualWindowSystem) -> R + Send + 'static,
    {
        self.manager().invoke_system(move |system| f(&*system))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WindowOptions;
    use crate::platform::HostPlatform;
    use crate::renderer::{RendererPhase, READY_MESSAGE};
    use std::sync::mpsc;

    fn settle(platform: &HeadlessPlatform) {
        platform.dispatcher().run_until_idle().unwrap();
    }

    fn options(json: &str) -> WindowOptions {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn window_is_centered_on_the_work_area_when_no_position_is_given() {
        let platform = HeadlessPlatform::headless(ClosePolicy::KeepRunning);
        let id = platform
            .create_window(options(r#"{"width":800,"height":600}"#))
            .unwrap();
        assert_eq!(platform.window_position(id), Point { x: 560, y: 240 });
        assert_eq!(platform.window_size(id), Size::new(800, 600));
    }

    #[test]
    fn renderer_initializes_navigates_and_announces_readiness() {
        let platform = HeadlessPlatform::headless(ClosePolicy::KeepRunning);
        let id = platform
            .create_window(options(r#"{"url":"https://example.test/","title":"Demo"}"#))
            .unwrap();
        settle(&platform);

        let status = platform.renderer_status(id).unwrap();
        assert_eq!(status.phase, RendererPhase::Ready);
        let journal = platform.journal().unwrap();
        let entry = journal.entry(id);
        assert_eq!(entry.navigations, vec!["https://example.test/".to_string()]);
        assert_eq!(entry.posted, vec![READY_MESSAGE.to_string()]);
        assert_eq!(entry.init_scripts.len(), 1);
        assert_eq!(entry.settings.map(|s| s.title), Some("Demo".to_string()));
    }

    #[test]
    fn environment_failure_leaves_the_window_usable() {
        let platform = HeadlessPlatform::with_failures(
            ClosePolicy::KeepRunning,
            RendererFailures {
                environment: Some(0x8007_0002_u32 as i32),
                controller: None,
            },
        );
        let id = platform.create_window(WindowOptions::default()).unwrap();
        settle(&platform);

        let status = platform.renderer_status(id).unwrap();
        assert_eq!(status.phase, RendererPhase::Failed);
        assert!(matches!(
            status.error,
            Some(RendererError::EnvironmentFailed { .. })
        ));
        platform.set_window_title(id, "Still here");
        let title = platform
            .inspect(|system| system.title(NativeHandle(1)).map(str::to_string))
            .unwrap();
        assert_eq!(title.as_deref(), Some("Still here"));
    }

    #[test]
    fn controller_failure_is_reported() {
        let platform = HeadlessPlatform::with_failures(
            ClosePolicy::KeepRunning,
            RendererFailures {
                environment: None,
                controller: Some(-1),
            },
        );
        let id = platform.create_window(WindowOptions::default()).unwrap();
        settle(&platform);
        let status = platform.renderer_status(id).unwrap();
        assert_eq!(status.error, Some(RendererError::ControllerFailed { code: -1 }));
    }

    #[test]
    fn maximize_fills_the_work_area_and_restore_brings_it_back() {
        let platform = HeadlessPlatform::headless(ClosePolicy::KeepRunning);
        let id = platform
            .create_window(options(r#"{"width":640,"height":480,"x":10,"y":20}"#))
            .unwrap();
        platform.maximize_window(id);
        assert!(platform.is_window_maximized(id));
        assert_eq!(platform.window_size(id), Size::new(1920, 1080));
        platform.unmaximize_window(id);
        assert!(!platform.is_window_maximized(id));
        assert_eq!(platform.window_size(id), Size::new(640, 480));
        assert_eq!(platform.window_position(id), Point { x: 10, y: 20 });
    }

    #[test]
    fn renderer_resize_skips_repeats_and_clamps_to_one_pixel() {
        let platform = HeadlessPlatform::headless(ClosePolicy::KeepRunning);
        let id = platform.create_window(WindowOptions::default()).unwrap();
        settle(&platform);

        let renderer = platform.manager().renderer();
        renderer.resize(id, Size::new(300, 200)).unwrap();
        renderer.resize(id, Size::new(300, 200)).unwrap();
        renderer.resize(id, Size::new(0, -5)).unwrap();

        let bounds = platform.journal().unwrap().entry(id).bounds;
        let small = Rect { x: 0, y: 0, width: 300, height: 200 };
        assert_eq!(
            bounds[bounds.len() - 2..],
            [small, Rect { x: 0, y: 0, width: 1, height: 1 }]
        );
        assert_eq!(bounds.iter().filter(|b| **b == small).count(), 1);
    }

    #[test]
    fn tray_events_reach_the_current_sink() {
        let platform = HeadlessPlatform::headless(ClosePolicy::KeepRunning);
        let tray = platform
            .create_tray(TrayOptions {
                tooltip: Some("Idle".into()),
                ..Default::default()
            })
            .unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        platform.set_tray_event_sink(Some(Arc::new(move |event| {
            let _ = lock(&tx).send(event);
        })));

        platform
            .simulate_tray_event(tray, "menu-item-click", Some("quit"))
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.tray_id, tray);
        assert_eq!(event.menu_item_id.as_deref(), Some("quit"));

        platform.set_tray_tooltip(tray, "Busy").unwrap();
        let tooltip = platform.inspect(move |s| s.tray_tooltip(tray)).unwrap();
        assert_eq!(tooltip.as_deref(), Some("Busy"));
        assert!(platform.set_tray_menu(tray + 1, Vec::new()).is_err());
    }

    #[test]
    fn dialogs_return_empty_selections() {
        let platform = HeadlessPlatform::headless(ClosePolicy::KeepRunning);
        assert!(platform
            .open_file_dialog(None, OpenDialogOptions::default())
            .unwrap()
            .is_empty());
        assert_eq!(
            platform
                .save_file_dialog(None, SaveDialogOptions::default())
                .unwrap(),
            None
        );
        assert_eq!(
            platform
                .message_box(None, MessageBoxOptions::default())
                .unwrap()
                .response,
            0
        );
    }
}

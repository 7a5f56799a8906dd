//! Win32 + WebView2 backend.
//!
//! [`Win32Pump`] drives the dispatcher from the thread's message queue,
//! [`Win32System`] owns top-level windows, tray icons and common dialogs,
//! and [`WebView2Renderer`] hosts one WebView2 controller per window. The
//! window procedures never touch host state directly: they report through
//! the installed sinks, which post to the dispatcher.

use std::cell::RefCell;
use std::collections::HashMap;

use windows::core::{w, Error, PCWSTR, PWSTR};
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Gdi::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::{CreateEventW, SetEvent, INFINITE};
use windows::Win32::UI::Controls::Dialogs::*;
use windows::Win32::UI::Input::KeyboardAndMouse::SetFocus;
use windows::Win32::UI::Shell::{
    Shell_NotifyIconW, NIF_ICON, NIF_MESSAGE, NIF_TIP, NIM_ADD, NIM_DELETE, NIM_MODIFY,
    NOTIFYICONDATAW,
};
use windows::Win32::UI::WindowsAndMessaging::*;

use webview2_com::Microsoft::Web::WebView2::Win32::*;
use webview2_com::{
    CreateCoreWebView2ControllerCompletedHandler, CreateCoreWebView2EnvironmentCompletedHandler,
    NavigationCompletedEventHandler, WebMessageReceivedEventHandler,
};

use crate::dialog::{
    build_native_filter, message_text, message_title, parse_open_file_buffer, response_index,
    ButtonLayout, PressedButton,
};
use crate::dispatcher::{Dispatcher, MessagePump};
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

/// Maximum page message size in bytes (10 MB). Larger messages are dropped.
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// UTF-16 capacity of the open/save dialog result buffer.
const FILE_BUFFER_LEN: usize = 32 * 1024;

const WINDOW_CLASS: PCWSTR = w!("NativeHostWindow");
const TRAY_CLASS: PCWSTR = w!("NativeHostTray");

/// Callback message tray icons send to the tray window.
const WM_TRAY_CALLBACK: u32 = WM_APP + 1;

pub type Win32Platform = DesktopPlatform<Win32System, WebView2Renderer>;

/// Build the Win32 platform. Must be called on the thread that will run the
/// UI loop; COM is initialised there as a single-threaded apartment.
pub fn create(policy: ClosePolicy) -> HostResult<Win32Platform> {
    unsafe {
        CoInitializeEx(None, COINIT_APARTMENTTHREADED)
            .ok()
            .map_err(|e| HostError::native("CoInitializeEx", e))?;
    }
    let dispatcher = Dispatcher::new(Box::new(Win32Pump::new()?));
    let system = Win32System::new()?;
    Ok(DesktopPlatform::new(
        "win32",
        system,
        WebView2Renderer,
        dispatcher,
        policy,
    ))
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

fn hwnd(handle: NativeHandle) -> HWND {
    HWND(handle.0 as *mut _)
}

fn native_handle(hwnd: HWND) -> NativeHandle {
    NativeHandle(hwnd.0 as isize)
}

fn rect_from(rect: RECT) -> Rect {
    Rect {
        x: rect.left,
        y: rect.top,
        width: rect.right - rect.left,
        height: rect.bottom - rect.top,
    }
}

// ── Message pump ────────────────────────────────────────────────

/// Pumps the thread's Win32 queue; wakes through an auto-reset event.
pub struct Win32Pump {
    // Raw event handle; HANDLE itself is not Send.
    wake_event: isize,
}

impl Win32Pump {
    pub fn new() -> HostResult<Self> {
        let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(|e| HostError::native("CreateEventW", e))?;
        Ok(Self {
            wake_event: event.0 as isize,
        })
    }

    fn event(&self) -> HANDLE {
        HANDLE(self.wake_event as *mut _)
    }
}

impl MessagePump for Win32Pump {
    fn pump_pending(&self) -> Option<i32> {
        let mut quit = None;
        unsafe {
            let mut msg = MSG::default();
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    quit = Some(msg.wParam.0 as i32);
                    continue;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        quit
    }

    fn wait(&self) {
        unsafe {
            let _ = MsgWaitForMultipleObjectsEx(
                Some(&[self.event()]),
                INFINITE,
                QS_ALLINPUT,
                MWMO_INPUTAVAILABLE,
            );
        }
    }

    fn wake(&self) {
        unsafe {
            let _ = SetEvent(self.event());
        }
    }
}

impl Drop for Win32Pump {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event());
        }
    }
}

// ── Window system ───────────────────────────────────────────────

struct TrayEntry {
    events: TrayEventSink,
    menu: Vec<TrayMenuItem>,
}

// The window procedures only run on the UI thread, which is the thread that
// owns these.
thread_local! {
    static WINDOW_SINK: RefCell<Option<WindowEventSink>> = const { RefCell::new(None) };
    static TRAYS: RefCell<HashMap<u32, TrayEntry>> = RefCell::new(HashMap::new());
}

fn emit(event: WindowEvent) {
    let sink = WINDOW_SINK.with(|sink| sink.borrow().clone());
    if let Some(sink) = sink {
        sink(event);
    }
}

struct TrayIcon {
    icon: HICON,
    owns_icon: bool,
    tooltip: String,
}

pub struct Win32System {
    instance: HINSTANCE,
    tray_window: Option<HWND>,
    trays: HashMap<u32, TrayIcon>,
}

impl Win32System {
    pub fn new() -> HostResult<Self> {
        let module =
            unsafe { GetModuleHandleW(None) }.map_err(|e| HostError::native("GetModuleHandleW", e))?;
        let instance: HINSTANCE = module.into();
        unsafe {
            let cursor = LoadCursorW(None, IDC_ARROW).unwrap_or_default();
            let window_class = WNDCLASSEXW {
                cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(window_proc),
                hInstance: instance,
                hCursor: cursor,
                hbrBackground: HBRUSH((COLOR_WINDOW.0 + 1) as isize as *mut _),
                lpszClassName: WINDOW_CLASS,
                ..Default::default()
            };
            register_class(&window_class)?;
            let tray_class = WNDCLASSEXW {
                cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
                lpfnWndProc: Some(tray_proc),
                hInstance: instance,
                lpszClassName: TRAY_CLASS,
                ..Default::default()
            };
            register_class(&tray_class)?;
        }
        Ok(Self {
            instance,
            tray_window: None,
            trays: HashMap::new(),
        })
    }

    /// Hidden message-only window that receives tray callbacks.
    fn tray_window(&mut self) -> HostResult<HWND> {
        if let Some(window) = self.tray_window {
            return Ok(window);
        }
        let window = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                TRAY_CLASS,
                w!(""),
                WINDOW_STYLE::default(),
                0,
                0,
                0,
                0,
                HWND_MESSAGE,
                None,
                self.instance,
                None,
            )
        }
        .map_err(|e| HostError::native("CreateWindowExW", e))?;
        self.tray_window = Some(window);
        Ok(window)
    }

    fn notify_data(&self, window: HWND, id: u32, tray: &TrayIcon) -> NOTIFYICONDATAW {
        let mut data = NOTIFYICONDATAW {
            cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
            hWnd: window,
            uID: id,
            uFlags: NIF_MESSAGE | NIF_ICON | NIF_TIP,
            uCallbackMessage: WM_TRAY_CALLBACK,
            hIcon: tray.icon,
            ..Default::default()
        };
        let capacity = data.szTip.len() - 1;
        for (slot, unit) in data
            .szTip
            .iter_mut()
            .zip(tray.tooltip.encode_utf16().take(capacity))
        {
            *slot = unit;
        }
        data
    }

    fn load_tray_icon(&self, path: Option<&str>) -> (HICON, bool) {
        if let Some(path) = path.filter(|p| !p.trim().is_empty()) {
            let file = wide(path);
            let loaded = unsafe {
                LoadImageW(
                    None,
                    PCWSTR(file.as_ptr()),
                    IMAGE_ICON,
                    0,
                    0,
                    LR_LOADFROMFILE | LR_DEFAULTSIZE,
                )
            };
            match loaded {
                Ok(handle) => return (HICON(handle.0), true),
                Err(e) => tracing::warn!(path, error = %e, "tray icon could not be loaded; using default"),
            }
        }
        let fallback = unsafe { LoadIconW(None, IDI_APPLICATION) }.unwrap_or_default();
        (fallback, false)
    }
}

impl Drop for Win32System {
    fn drop(&mut self) {
        let Some(window) = self.tray_window else { return };
        for (id, tray) in self.trays.drain() {
            let data = NOTIFYICONDATAW {
                cbSize: std::mem::size_of::<NOTIFYICONDATAW>() as u32,
                hWnd: window,
                uID: id,
                ..Default::default()
            };
            unsafe {
                let _ = Shell_NotifyIconW(NIM_DELETE, &data);
                if tray.owns_icon {
                    let _ = DestroyIcon(tray.icon);
                }
            }
        }
        TRAYS.with(|trays| trays.borrow_mut().clear());
        unsafe {
            let _ = DestroyWindow(window);
        }
    }
}

impl WindowSystem for Win32System {
    fn install_event_sink(&mut self, sink: WindowEventSink) {
        WINDOW_SINK.with(|slot| *slot.borrow_mut() = Some(sink));
    }

    fn create_window(&mut self, record: &WindowRecord) -> HostResult<NativeHandle> {
        let style = if record.frameless {
            WS_POPUP | WS_THICKFRAME | WS_SYSMENU | WS_MINIMIZEBOX | WS_MAXIMIZEBOX
        } else {
            WS_OVERLAPPEDWINDOW
        };
        let (x, y) = record
            .position
            .map(|p| (p.x, p.y))
            .unwrap_or((CW_USEDEFAULT, CW_USEDEFAULT));
        let title = wide(&record.title);

        let window = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                WINDOW_CLASS,
                PCWSTR(title.as_ptr()),
                style,
                x,
                y,
                record.size.width,
                record.size.height,
                None,
                None,
                self.instance,
                None,
            )
        }
        .map_err(|e| HostError::native("CreateWindowExW", e))?;
        Ok(native_handle(window))
    }

    fn request_close(&mut self, handle: NativeHandle) {
        // Destruction comes back through WM_DESTROY, never inline.
        unsafe {
            let _ = PostMessageW(hwnd(handle), WM_CLOSE, WPARAM(0), LPARAM(0));
        }
    }

    fn release(&mut self, _handle: NativeHandle) {}

    fn set_visible(&mut self, handle: NativeHandle, visible: bool) {
        unsafe {
            let _ = ShowWindow(hwnd(handle), if visible { SW_SHOW } else { SW_HIDE });
        }
    }

    fn set_title(&mut self, handle: NativeHandle, title: &str) {
        let title = wide(title);
        unsafe {
            let _ = SetWindowTextW(hwnd(handle), PCWSTR(title.as_ptr()));
        }
    }

    fn set_position(&mut self, handle: NativeHandle, position: Point) {
        unsafe {
            let _ = SetWindowPos(
                hwnd(handle),
                None,
                position.x,
                position.y,
                0,
                0,
                SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
            );
        }
    }

    fn focus(&mut self, handle: NativeHandle) {
        unsafe {
            let _ = SetForegroundWindow(hwnd(handle));
            let _ = SetFocus(hwnd(handle));
        }
    }

    fn set_show_state(&mut self, handle: NativeHandle, state: ShowState) {
        let command = match state {
            ShowState::Normal => SW_RESTORE,
            ShowState::Minimized => SW_MINIMIZE,
            ShowState::Maximized => SW_MAXIMIZE,
        };
        unsafe {
            let _ = ShowWindow(hwnd(handle), command);
        }
    }

    fn outer_rect(&self, handle: NativeHandle) -> Option<Rect> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd(handle), &mut rect) }.ok()?;
        Some(rect_from(rect))
    }

    fn client_size(&self, handle: NativeHandle) -> Size {
        let mut rect = RECT::default();
        match unsafe { GetClientRect(hwnd(handle), &mut rect) } {
            Ok(()) => rect_from(rect).size(),
            Err(_) => Size::default(),
        }
    }

    fn work_area(&self) -> Rect {
        let mut rect = RECT::default();
        let found = unsafe {
            SystemParametersInfoW(
                SPI_GETWORKAREA,
                0,
                Some(&mut rect as *mut RECT as *mut _),
                SYSTEM_PARAMETERS_INFO_UPDATE_FLAGS(0),
            )
        };
        match found {
            Ok(()) => rect_from(rect),
            Err(e) => {
                tracing::warn!(error = %e, "work area unavailable; using screen size");
                let (width, height) =
                    unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
                Rect {
                    x: 0,
                    y: 0,
                    width,
                    height,
                }
            }
        }
    }

    fn open_file(
        &mut self,
        owner: Option<NativeHandle>,
        options: &OpenDialogOptions,
    ) -> HostResult<Vec<String>> {
        let filter = build_native_filter(&options.filters);
        let filter: Vec<u16> = filter.encode_utf16().collect();
        let title = options.title.as_deref().map(wide);
        let mut buffer = file_buffer(options.default_path.as_deref());

        let mut flags = OFN_EXPLORER | OFN_FILEMUSTEXIST | OFN_PATHMUSTEXIST | OFN_NOCHANGEDIR;
        if options.allow_multiple {
            flags |= OFN_ALLOWMULTISELECT;
        }
        let mut dialog = OPENFILENAMEW {
            lStructSize: std::mem::size_of::<OPENFILENAMEW>() as u32,
            hwndOwner: owner.map(hwnd).unwrap_or_default(),
            lpstrFilter: PCWSTR(filter.as_ptr()),
            lpstrFile: PWSTR(buffer.as_mut_ptr()),
            nMaxFile: buffer.len() as u32,
            lpstrTitle: title
                .as_ref()
                .map(|t| PCWSTR(t.as_ptr()))
                .unwrap_or(PCWSTR::null()),
            Flags: flags,
            ..Default::default()
        };

        if !unsafe { GetOpenFileNameW(&mut dialog) }.as_bool() {
            return dialog_cancelled_or_failed("GetOpenFileNameW").map(|()| Vec::new());
        }
        Ok(parse_open_file_buffer(&String::from_utf16_lossy(&buffer)))
    }

    fn save_file(
        &mut self,
        owner: Option<NativeHandle>,
        options: &SaveDialogOptions,
    ) -> HostResult<Option<String>> {
        let filter = build_native_filter(&options.filters);
        let filter: Vec<u16> = filter.encode_utf16().collect();
        let title = options.title.as_deref().map(wide);
        let mut buffer = file_buffer(options.default_path.as_deref());

        let mut dialog = OPENFILENAMEW {
            lStructSize: std::mem::size_of::<OPENFILENAMEW>() as u32,
            hwndOwner: owner.map(hwnd).unwrap_or_default(),
            lpstrFilter: PCWSTR(filter.as_ptr()),
            lpstrFile: PWSTR(buffer.as_mut_ptr()),
            nMaxFile: buffer.len() as u32,
            lpstrTitle: title
                .as_ref()
                .map(|t| PCWSTR(t.as_ptr()))
                .unwrap_or(PCWSTR::null()),
            Flags: OFN_EXPLORER | OFN_OVERWRITEPROMPT | OFN_PATHMUSTEXIST | OFN_NOCHANGEDIR,
            ..Default::default()
        };

        if !unsafe { GetSaveFileNameW(&mut dialog) }.as_bool() {
            return dialog_cancelled_or_failed("GetSaveFileNameW").map(|()| None);
        }
        let end = buffer.iter().position(|&unit| unit == 0).unwrap_or(buffer.len());
        let path = String::from_utf16_lossy(&buffer[..end]);
        Ok(Some(path).filter(|p| !p.is_empty()))
    }

    fn message_box(
        &mut self,
        owner: Option<NativeHandle>,
        options: &MessageBoxOptions,
    ) -> HostResult<MessageBoxResult> {
        let text = wide(&message_text(&options.message, options.detail.as_deref()));
        let caption = wide(message_title(options.title.as_deref()));
        let buttons = match ButtonLayout::for_count(options.buttons.len()) {
            ButtonLayout::Ok => MB_OK,
            ButtonLayout::OkCancel => MB_OKCANCEL,
            ButtonLayout::YesNoCancel => MB_YESNOCANCEL,
        };
        let style = buttons | MB_ICONINFORMATION;

        let pressed = unsafe {
            MessageBoxW(
                owner.map(hwnd).unwrap_or_default(),
                PCWSTR(text.as_ptr()),
                PCWSTR(caption.as_ptr()),
                style,
            )
        };
        let pressed = match pressed {
            IDOK => PressedButton::Ok,
            IDYES => PressedButton::Yes,
            IDNO => PressedButton::No,
            IDCANCEL => PressedButton::Cancel,
            MESSAGEBOX_RESULT(0) => {
                return Err(HostError::native("MessageBoxW", Error::from_win32()));
            }
            _ => PressedButton::Other,
        };
        Ok(MessageBoxResult {
            response: response_index(pressed, options.buttons.len()),
        })
    }

    fn create_tray(&mut self, id: u32, options: &TrayOptions, events: TrayEventSink) -> HostResult<()> {
        let window = self.tray_window()?;
        let (icon, owns_icon) = self.load_tray_icon(options.icon.as_deref());
        let tray = TrayIcon {
            icon,
            owns_icon,
            tooltip: options.tooltip.clone().unwrap_or_default(),
        };
        let data = self.notify_data(window, id, &tray);
        if !unsafe { Shell_NotifyIconW(NIM_ADD, &data) }.as_bool() {
            if owns_icon {
                unsafe {
                    let _ = DestroyIcon(icon);
                }
            }
            return Err(HostError::native("Shell_NotifyIconW", "could not add tray icon"));
        }
        self.trays.insert(id, tray);
        TRAYS.with(|trays| {
            trays.borrow_mut().insert(
                id,
                TrayEntry {
                    events,
                    menu: options.menu.clone(),
                },
            )
        });
        Ok(())
    }

    fn set_tray_tooltip(&mut self, id: u32, tooltip: &str) -> HostResult<()> {
        let window = self.tray_window()?;
        let tray = self
            .trays
            .get_mut(&id)
            .ok_or_else(|| HostError::InvalidArgument(format!("Tray {id} not found")))?;
        tray.tooltip = tooltip.to_string();
        let tray = &self.trays[&id];
        let data = self.notify_data(window, id, tray);
        if !unsafe { Shell_NotifyIconW(NIM_MODIFY, &data) }.as_bool() {
            return Err(HostError::native("Shell_NotifyIconW", "could not update tray tooltip"));
        }
        Ok(())
    }

    fn set_tray_menu(&mut self, id: u32, menu: &[TrayMenuItem]) -> HostResult<()> {
        TRAYS.with(|trays| match trays.borrow_mut().get_mut(&id) {
            Some(entry) => {
                entry.menu = menu.to_vec();
                Ok(())
            }
            None => Err(HostError::InvalidArgument(format!("Tray {id} not found"))),
        })
    }
}

/// Register a window class; a class left over from an earlier platform on
/// this process is reused.
unsafe fn register_class(class: &WNDCLASSEXW) -> HostResult<()> {
    if RegisterClassExW(class) != 0 {
        return Ok(());
    }
    let error = Error::from_win32();
    if error.code() == ERROR_CLASS_ALREADY_EXISTS.to_hresult() {
        return Ok(());
    }
    Err(HostError::native("RegisterClassExW", error))
}

/// Result buffer for a file dialog, pre-filled with the default path.
fn file_buffer(default_path: Option<&str>) -> Vec<u16> {
    let mut buffer = vec![0u16; FILE_BUFFER_LEN];
    if let Some(path) = default_path {
        for (slot, unit) in buffer
            .iter_mut()
            .zip(path.encode_utf16().take(FILE_BUFFER_LEN - 1))
        {
            *slot = unit;
        }
    }
    buffer
}

/// A false return from a common dialog is either a cancel or an error.
fn dialog_cancelled_or_failed(operation: &'static str) -> HostResult<()> {
    let code = unsafe { CommDlgExtendedError() };
    if code.0 == 0 {
        Ok(())
    } else {
        Err(HostError::native(operation, format!("dialog error {:#x}", code.0)))
    }
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let handle = native_handle(hwnd);
    match msg {
        WM_CLOSE => {
            let _ = DestroyWindow(hwnd);
            LRESULT(0)
        }
        WM_DESTROY => {
            emit(WindowEvent::Destroyed { handle });
            LRESULT(0)
        }
        WM_SIZE => {
            let client = Size::new(
                (lparam.0 & 0xFFFF) as i32,
                ((lparam.0 >> 16) & 0xFFFF) as i32,
            );
            match wparam.0 as u32 {
                SIZE_MINIMIZED => emit(WindowEvent::Minimized { handle }),
                SIZE_MAXIMIZED => {
                    emit(WindowEvent::Maximized { handle });
                    emit(WindowEvent::Resized { handle, client });
                }
                _ => {
                    emit(WindowEvent::Restored { handle });
                    emit(WindowEvent::Resized { handle, client });
                }
            }
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
        WM_MOVE => {
            let mut rect = RECT::default();
            if GetWindowRect(hwnd, &mut rect).is_ok() {
                emit(WindowEvent::Moved {
                    handle,
                    position: Point {
                        x: rect.left,
                        y: rect.top,
                    },
                });
            }
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

unsafe extern "system" fn tray_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if msg != WM_TRAY_CALLBACK {
        return DefWindowProcW(hwnd, msg, wparam, lparam);
    }
    let tray_id = wparam.0 as u32;
    let event = match (lparam.0 & 0xFFFF) as u32 {
        WM_LBUTTONUP => "click",
        WM_RBUTTONUP => "right-click",
        WM_LBUTTONDBLCLK => "double-click",
        _ => return LRESULT(0),
    };

    // Clone out so no borrow is held while the menu's modal loop runs.
    let entry = TRAYS.with(|trays| {
        trays
            .borrow()
            .get(&tray_id)
            .map(|entry| (entry.events.clone(), entry.menu.clone()))
    });
    let Some((events, menu)) = entry else {
        return LRESULT(0);
    };

    events(TrayEvent {
        tray_id,
        event: event.to_string(),
        menu_item_id: None,
    });

    if event == "right-click" && !menu.is_empty() {
        if let Some(item) = show_tray_menu(hwnd, &menu) {
            events(TrayEvent {
                tray_id,
                event: "menu-item-click".to_string(),
                menu_item_id: Some(item),
            });
        }
    }
    LRESULT(0)
}

/// Show a tray context menu at the cursor. Returns the chosen item's id.
unsafe fn show_tray_menu(owner: HWND, items: &[TrayMenuItem]) -> Option<String> {
    let menu = CreatePopupMenu().ok()?;
    for (index, item) in items.iter().enumerate() {
        let label = wide(&item.label);
        let flags = if item.enabled { MF_STRING } else { MF_STRING | MF_GRAYED };
        let _ = AppendMenuW(menu, flags, index + 1, PCWSTR(label.as_ptr()));
    }

    let mut cursor = POINT::default();
    let _ = GetCursorPos(&mut cursor);
    let _ = SetForegroundWindow(owner);
    let chosen = TrackPopupMenu(
        menu,
        TPM_RETURNCMD | TPM_RIGHTBUTTON,
        cursor.x,
        cursor.y,
        0,
        owner,
        None,
    );
    let _ = DestroyMenu(menu);

    let command = chosen.0 as usize;
    if command == 0 {
        return None;
    }
    items.get(command - 1).map(|item| item.id.clone())
}

// ── Renderer ────────────────────────────────────────────────────

/// A window's WebView2 controller and its page.
pub struct WebView2Controller {
    controller: ICoreWebView2Controller,
    webview: ICoreWebView2,
}

/// WebView2 as the page renderer. Environment and controller creation are
/// asynchronous; WebView2 delivers both completions on the UI thread.
pub struct WebView2Renderer;

fn hresult_code(error: &Error) -> i32 {
    error.code().0
}

fn configure_error(step: &'static str) -> impl Fn(Error) -> RendererError {
    move |e| RendererError::Configure {
        step,
        message: e.to_string(),
    }
}

impl RendererBackend for WebView2Renderer {
    type Environment = ICoreWebView2Environment;
    type Controller = WebView2Controller;

    fn create_environment(
        &mut self,
        done: Completion<Self::Environment>,
    ) -> Result<(), RendererError> {
        let handler = CreateCoreWebView2EnvironmentCompletedHandler::create(Box::new(
            move |result, environment| {
                let outcome = match (result, environment) {
                    (Ok(()), Some(environment)) => Ok(environment),
                    (Ok(()), None) => Err(E_POINTER.0),
                    (Err(e), _) => Err(hresult_code(&e)),
                };
                done(outcome);
                Ok(())
            },
        ));
        unsafe { CreateCoreWebView2Environment(&handler) }.map_err(|e| {
            RendererError::EnvironmentFailed {
                code: hresult_code(&e),
            }
        })
    }

    fn create_controller(
        &mut self,
        environment: &Self::Environment,
        window: NativeHandle,
        done: Completion<Self::Controller>,
    ) -> Result<(), RendererError> {
        let handler = CreateCoreWebView2ControllerCompletedHandler::create(Box::new(
            move |result, controller: Option<ICoreWebView2Controller>| {
                let outcome = match (result, controller) {
                    (Ok(()), Some(controller)) => match unsafe { controller.CoreWebView2() } {
                        Ok(webview) => Ok(WebView2Controller {
                            controller,
                            webview,
                        }),
                        Err(e) => Err(hresult_code(&e)),
                    },
                    (Ok(()), None) => Err(E_POINTER.0),
                    (Err(e), _) => Err(hresult_code(&e)),
                };
                done(outcome);
                Ok(())
            },
        ));
        unsafe { environment.CreateCoreWebView2Controller(hwnd(window), &handler) }.map_err(|e| {
            RendererError::ControllerFailed {
                code: hresult_code(&e),
            }
        })
    }

    fn apply_settings(
        &mut self,
        controller: &Self::Controller,
        settings: &RendererSettings,
    ) -> Result<(), RendererError> {
        unsafe {
            let native = controller
                .webview
                .Settings()
                .map_err(configure_error("settings"))?;
            native
                .SetAreDevToolsEnabled(settings.dev_tools)
                .map_err(configure_error("dev tools"))?;
            native
                .SetAreDefaultContextMenusEnabled(settings.context_menu)
                .map_err(configure_error("context menus"))?;
            let _ = native.SetIsStatusBarEnabled(false);
        }
        Ok(())
    }

    fn subscribe(
        &mut self,
        controller: &Self::Controller,
        window: WindowId,
        events: RendererEventSink,
    ) -> Result<(), RendererError> {
        let messages = events.clone();
        unsafe {
            let mut token = std::mem::zeroed();
            controller
                .webview
                .add_WebMessageReceived(
                    &WebMessageReceivedEventHandler::create(Box::new(move |_webview, args| {
                        let Some(args) = args else { return Ok(()) };
                        let mut message = PWSTR::null();
                        // Non-string messages are not part of the channel.
                        if args.TryGetWebMessageAsString(&mut message).is_err() {
                            return Ok(());
                        }
                        let text = message.to_string().unwrap_or_default();
                        CoTaskMemFree(Some(message.0 as *const _));
                        if text.len() > MAX_MESSAGE_SIZE {
                            tracing::warn!(window_id = %window, len = text.len(), "dropping oversized page message");
                            return Ok(());
                        }
                        messages(RendererEvent::WebMessage {
                            window,
                            message: text,
                        });
                        Ok(())
                    })),
                    &mut token,
                )
                .map_err(configure_error("web message subscription"))?;

            let mut token = std::mem::zeroed();
            controller
                .webview
                .add_NavigationCompleted(
                    &NavigationCompletedEventHandler::create(Box::new(move |_webview, args| {
                        let mut success = BOOL::default();
                        if let Some(args) = args {
                            let _ = args.IsSuccess(&mut success);
                        }
                        events(RendererEvent::NavigationCompleted {
                            window,
                            success: success.as_bool(),
                        });
                        Ok(())
                    })),
                    &mut token,
                )
                .map_err(configure_error("navigation subscription"))?;
        }
        Ok(())
    }

    fn add_init_script(
        &mut self,
        controller: &Self::Controller,
        script: &str,
    ) -> Result<(), RendererError> {
        let script = wide(script);
        unsafe {
            controller
                .webview
                .AddScriptToExecuteOnDocumentCreated(PCWSTR(script.as_ptr()), None)
        }
        .map_err(configure_error("bootstrap script"))
    }

    fn set_bounds(&mut self, controller: &Self::Controller, bounds: Rect) -> Result<(), RendererError> {
        let rect = RECT {
            left: bounds.x,
            top: bounds.y,
            right: bounds.x + bounds.width,
            bottom: bounds.y + bounds.height,
        };
        unsafe {
            controller
                .controller
                .SetBounds(rect)
                .map_err(configure_error("bounds"))?;
            controller
                .controller
                .SetIsVisible(true)
                .map_err(configure_error("visibility"))
        }
    }

    fn navigate(&mut self, controller: &Self::Controller, url: &str) -> Result<(), RendererError> {
        let url = wide(url);
        unsafe { controller.webview.Navigate(PCWSTR(url.as_ptr())) }.map_err(|e| {
            RendererError::Backend {
                message: format!("Navigate failed: {e}"),
            }
        })
    }

    fn post_message(
        &mut self,
        controller: &Self::Controller,
        message: &str,
    ) -> Result<(), RendererError> {
        let message = wide(message);
        unsafe {
            controller
                .webview
                .PostWebMessageAsString(PCWSTR(message.as_ptr()))
        }
        .map_err(|e| RendererError::Backend {
            message: format!("PostWebMessageAsString failed: {e}"),
        })
    }

    fn close(&mut self, controller: Self::Controller) {
        unsafe {
            let _ = controller.controller.Close();
        }
    }
}

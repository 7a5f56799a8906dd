//! Embedded renderer host.
//!
//! Each window gets a [`Session`] that walks the renderer's asynchronous
//! initialization: environment, then controller, then settings, event
//! subscriptions, bootstrap script, bounds and the first navigation. Every
//! completion is re-marshaled onto the UI thread through the dispatcher and
//! handled by exactly one transition function.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, RendererError};
use crate::events::{RendererEvent, RendererEventSink};
use crate::rpc::{RpcBridge, RpcOutcome};
use crate::ui_cell::UiCell;
use crate::window::{NativeHandle, Rect, Size, WindowId};

pub const READY_MESSAGE: &str = "host:ready";

/// Completion callback handed to a backend: the created object or the
/// native failure code.
pub type Completion<T> = Box<dyn FnOnce(Result<T, i32>) + Send>;

/// Per-window renderer settings, fixed at window creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererSettings {
    pub dev_tools: bool,
    pub context_menu: bool,
    pub frameless: bool,
    pub title: String,
}

/// The OS browser component. All methods run on the UI thread.
pub trait RendererBackend: 'static {
    type Environment: 'static;
    type Controller: 'static;

    /// Begin creating the shared browser environment.
    fn create_environment(
        &mut self,
        done: Completion<Self::Environment>,
    ) -> Result<(), RendererError>;

    /// Begin creating a controller that renders into `window`.
    fn create_controller(
        &mut self,
        environment: &Self::Environment,
        window: NativeHandle,
        done: Completion<Self::Controller>,
    ) -> Result<(), RendererError>;

    fn apply_settings(
        &mut self,
        controller: &Self::Controller,
        settings: &RendererSettings,
    ) -> Result<(), RendererError>;

    /// Route page messages and navigation completions to `events`.
    fn subscribe(
        &mut self,
        controller: &Self::Controller,
        window: WindowId,
        events: RendererEventSink,
    ) -> Result<(), RendererError>;

    fn add_init_script(
        &mut self,
        controller: &Self::Controller,
        script: &str,
    ) -> Result<(), RendererError>;

    fn set_bounds(&mut self, controller: &Self::Controller, bounds: Rect)
        -> Result<(), RendererError>;

    fn navigate(&mut self, controller: &Self::Controller, url: &str) -> Result<(), RendererError>;

    fn post_message(
        &mut self,
        controller: &Self::Controller,
        message: &str,
    ) -> Result<(), RendererError>;

    fn close(&mut self, controller: Self::Controller);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererPhase {
    Uninitialized,
    EnvironmentPending,
    ControllerPending,
    Configuring,
    Ready,
    Navigating,
    Failed,
    Disposed,
}

/// Diagnostic view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererStatus {
    pub phase: RendererPhase,
    pub error: Option<RendererError>,
    pub bounds: Option<Rect>,
    pub location: Option<String>,
}

struct Session<B: RendererBackend> {
    handle: NativeHandle,
    settings: RendererSettings,
    phase: RendererPhase,
    environment: Option<B::Environment>,
    controller: Option<B::Controller>,
    client: Size,
    bounds: Option<Rect>,
    location: Option<String>,
    error: Option<RendererError>,
}

impl<B: RendererBackend> Session<B> {
    fn status(&self) -> RendererStatus {
        RendererStatus {
            phase: self.phase,
            error: self.error.clone(),
            bounds: self.bounds,
            location: self.location.clone(),
        }
    }
}

struct HostState<B: RendererBackend> {
    backend: B,
    sessions: HashMap<WindowId, Session<B>>,
}

struct Shared<B: RendererBackend> {
    dispatcher: Dispatcher,
    rpc: RpcBridge,
    state: UiCell<RefCell<HostState<B>>>,
}

/// Owns every renderer session. Cloneable; all methods must be called on
/// the UI thread.
pub struct RendererHost<B: RendererBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: RendererBackend> Clone for RendererHost<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: RendererBackend> RendererHost<B> {
    /// Must be called on the UI thread.
    pub fn new(backend: B, dispatcher: Dispatcher, rpc: RpcBridge) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                rpc,
                state: UiCell::new(RefCell::new(HostState {
                    backend,
                    sessions: HashMap::new(),
                })),
            }),
        }
    }

    fn state(&self) -> Result<&RefCell<HostState<B>>, RendererError> {
        self.shared.state.get().map_err(ui_thread_error)
    }

    /// Run `f` against the backend, e.g. to inspect a test double.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> Result<R, RendererError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        Ok(f(&mut state.backend))
    }

    pub fn status(&self, window: WindowId) -> Option<RendererStatus> {
        let state = self.state().ok()?;
        let state = state.borrow();
        state.sessions.get(&window).map(Session::status)
    }

    /// Start initialization for a freshly created window.
    pub fn attach(
        &self,
        window: WindowId,
        handle: NativeHandle,
        client: Size,
        settings: RendererSettings,
        location: Option<String>,
    ) -> Result<(), RendererError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        state.sessions.insert(
            window,
            Session {
                handle,
                settings,
                phase: RendererPhase::Uninitialized,
                environment: None,
                controller: None,
                client,
                bounds: None,
                location,
                error: None,
            },
        );

        let weak = Arc::downgrade(&self.shared);
        let done: Completion<B::Environment> = Box::new(move |result| {
            Self::marshal(weak, result, move |host, result| {
                host.on_environment_created(window, result)
            })
        });
        let started = state.backend.create_environment(done);
        let session = session_mut(&mut state.sessions, window)?;
        match started {
            Ok(()) => {
                session.phase = RendererPhase::EnvironmentPending;
                tracing::debug!(window_id = %window, "renderer environment requested");
                Ok(())
            }
            Err(err) => {
                fail(session, window, err.clone());
                Err(err)
            }
        }
    }

    /// Wrap a completion result for the trip to the UI thread and post the
    /// transition there.
    fn marshal<T, F>(weak: Weak<Shared<B>>, result: Result<T, i32>, transition: F)
    where
        T: 'static,
        F: FnOnce(RendererHost<B>, Result<UiCell<T>, i32>) + Send + 'static,
    {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let result = result.map(UiCell::new);
        let dispatcher = shared.dispatcher.clone();
        drop(shared);
        dispatcher.post(move || {
            if let Some(shared) = weak.upgrade() {
                transition(RendererHost { shared }, result);
            }
        });
    }

    /// Environment completion: request the controller or fail.
    pub fn on_environment_created(&self, window: WindowId, result: Result<UiCell<B::Environment>, i32>) {
        let Ok(state) = self.state() else { return };
        let mut state = state.borrow_mut();
        let state = &mut *state;
        let Some(session) = state.sessions.get_mut(&window) else {
            tracing::debug!(window_id = %window, "environment completed for a disposed renderer");
            return;
        };
        if session.phase != RendererPhase::EnvironmentPending {
            return;
        }
        let environment = match result.map(UiCell::into_inner) {
            Ok(Ok(environment)) => environment,
            Ok(Err(_)) => {
                fail(session, window, RendererError::Backend {
                    message: "environment delivered off the UI thread".into(),
                });
                return;
            }
            Err(code) => {
                fail(session, window, RendererError::EnvironmentFailed { code });
                return;
            }
        };

        let weak = Arc::downgrade(&self.shared);
        let done: Completion<B::Controller> = Box::new(move |result| {
            Self::marshal(weak, result, move |host, result| {
                host.on_controller_created(window, result)
            })
        });
        let started = state
            .backend
            .create_controller(&environment, session.handle, done);
        session.environment = Some(environment);
        match started {
            Ok(()) => {
                session.phase = RendererPhase::ControllerPending;
                tracing::debug!(window_id = %window, "renderer controller requested");
            }
            Err(err) => fail(session, window, err),
        }
    }

    /// Controller completion: configure, size and navigate.
    pub fn on_controller_created(&self, window: WindowId, result: Result<UiCell<B::Controller>, i32>) {
        let Ok(state) = self.state() else { return };
        let mut state = state.borrow_mut();
        let state = &mut *state;
        let controller = match result.map(UiCell::into_inner) {
            Ok(Ok(controller)) => Some(controller),
            Ok(Err(_)) => None,
            Err(code) => {
                if let Some(session) = state.sessions.get_mut(&window) {
                    if session.phase == RendererPhase::ControllerPending {
                        fail(session, window, RendererError::ControllerFailed { code });
                    }
                }
                return;
            }
        };
        let Some(controller) = controller else {
            if let Some(session) = state.sessions.get_mut(&window) {
                fail(session, window, RendererError::Backend {
                    message: "controller delivered off the UI thread".into(),
                });
            }
            return;
        };

        let session = match state.sessions.get_mut(&window) {
            Some(session) if session.phase == RendererPhase::ControllerPending => session,
            _ => {
                tracing::debug!(window_id = %window, "controller completed for a disposed renderer");
                state.backend.close(controller);
                return;
            }
        };

        session.phase = RendererPhase::Configuring;
        let events = self.event_sink();
        let script = bootstrap_script(&session.settings);
        let bounds = Rect {
            x: 0,
            y: 0,
            width: session.client.clamped().width,
            height: session.client.clamped().height,
        };
        let configured = state
            .backend
            .apply_settings(&controller, &session.settings)
            .and_then(|()| state.backend.subscribe(&controller, window, events))
            .and_then(|()| state.backend.add_init_script(&controller, &script))
            .and_then(|()| state.backend.set_bounds(&controller, bounds));
        if let Err(err) = configured {
            session.controller = Some(controller);
            fail(session, window, err);
            return;
        }
        session.bounds = Some(bounds);

        session.phase = match session.location.clone() {
            Some(url) => match state.backend.navigate(&controller, &url) {
                Ok(()) => RendererPhase::Navigating,
                Err(err) => {
                    session.controller = Some(controller);
                    fail(session, window, err);
                    return;
                }
            },
            None => RendererPhase::Ready,
        };
        session.controller = Some(controller);
        tracing::info!(window_id = %window, phase = ?session.phase, "renderer initialized");
    }

    fn event_sink(&self) -> RendererEventSink {
        let weak = Arc::downgrade(&self.shared);
        Arc::new(move |event: RendererEvent| {
            let Some(shared) = weak.upgrade() else { return };
            let dispatcher = shared.dispatcher.clone();
            drop(shared);
            let weak = weak.clone();
            dispatcher.post(move || {
                if let Some(shared) = weak.upgrade() {
                    RendererHost { shared }.handle_event(event);
                }
            });
        })
    }

    /// Process a renderer notification. Runs as a dispatcher work item.
    pub fn handle_event(&self, event: RendererEvent) {
        match event {
            RendererEvent::NavigationCompleted { window, success } => {
                if let Ok(state) = self.state() {
                    let mut state = state.borrow_mut();
                    if let Some(session) = state.sessions.get_mut(&window) {
                        if session.phase == RendererPhase::Navigating {
                            session.phase = RendererPhase::Ready;
                        }
                    }
                }
                tracing::debug!(window_id = %window, success, "navigation completed");
                self.send(window, READY_MESSAGE);
            }
            RendererEvent::WebMessage { window, message } => self.on_web_message(window, &message),
        }
    }

    fn on_web_message(&self, window: WindowId, message: &str) {
        if message.trim().is_empty() {
            return;
        }
        if message == "ping" {
            self.send(window, "pong");
            return;
        }
        if let Some(invoke) = parse_rpc_envelope(message) {
            self.route_rpc(window, invoke);
            return;
        }
        self.send(window, &format!("echo:{message}"));
    }

    fn route_rpc(&self, window: WindowId, invoke: RpcEnvelope) {
        let args_json = match &invoke.args {
            Value::String(raw) => raw.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let weak = Arc::downgrade(&self.shared);
        let request_id = invoke.request_id.clone();
        let reply = Box::new(move |outcome: RpcOutcome| {
            let Some(shared) = weak.upgrade() else { return };
            let dispatcher = shared.dispatcher.clone();
            drop(shared);
            let payload = rpc_result_message(&request_id, &outcome);
            let weak = weak.clone();
            dispatcher.post(move || {
                if let Some(shared) = weak.upgrade() {
                    RendererHost { shared }.send(window, &payload);
                }
            });
        });
        self.shared
            .rpc
            .invoke(window, &invoke.request_id, &invoke.method, &args_json, reply);
    }

    /// Post a text message to the page, logging instead of failing when the
    /// renderer is not ready.
    fn send(&self, window: WindowId, message: &str) {
        if let Err(err) = self.post_message(window, message) {
            tracing::debug!(window_id = %window, error = %err, "message not delivered to page");
        }
    }

    pub fn post_message(&self, window: WindowId, message: &str) -> Result<(), RendererError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        let state = &mut *state;
        let controller = state
            .sessions
            .get(&window)
            .and_then(|s| s.controller.as_ref())
            .ok_or(RendererError::NotReady)?;
        state.backend.post_message(controller, message)
    }

    /// Fit the renderer to a new client size. Repeating the same size is a
    /// no-op.
    pub fn resize(&self, window: WindowId, client: Size) -> Result<(), RendererError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        let state = &mut *state;
        let Some(session) = state.sessions.get_mut(&window) else {
            return Ok(());
        };
        session.client = client;
        let Some(controller) = session.controller.as_ref() else {
            return Ok(());
        };
        let clamped = client.clamped();
        let bounds = Rect {
            x: 0,
            y: 0,
            width: clamped.width,
            height: clamped.height,
        };
        if session.bounds == Some(bounds) {
            return Ok(());
        }
        state.backend.set_bounds(controller, bounds)?;
        session.bounds = Some(bounds);
        Ok(())
    }

    /// Record a new location, navigating now if the renderer is up.
    pub fn navigate(&self, window: WindowId, url: &str) -> Result<(), RendererError> {
        let state = self.state()?;
        let mut state = state.borrow_mut();
        let state = &mut *state;
        let Some(session) = state.sessions.get_mut(&window) else {
            return Ok(());
        };
        session.location = Some(url.to_string());
        match (session.phase, session.controller.as_ref()) {
            (RendererPhase::Ready | RendererPhase::Navigating, Some(controller)) => {
                state.backend.navigate(controller, url)?;
                session.phase = RendererPhase::Navigating;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Tear down a window's renderer. Late completions for it are ignored.
    pub fn dispose(&self, window: WindowId) {
        let Ok(state) = self.state() else { return };
        let mut state = state.borrow_mut();
        if let Some(mut session) = state.sessions.remove(&window) {
            session.phase = RendererPhase::Disposed;
            drop(session.environment.take());
            if let Some(controller) = session.controller.take() {
                state.backend.close(controller);
            }
            tracing::debug!(window_id = %window, "renderer disposed");
        }
    }
}

fn session_mut<B: RendererBackend>(
    sessions: &mut HashMap<WindowId, Session<B>>,
    window: WindowId,
) -> Result<&mut Session<B>, RendererError> {
    sessions.get_mut(&window).ok_or(RendererError::NotReady)
}

fn fail<B: RendererBackend>(session: &mut Session<B>, window: WindowId, err: RendererError) {
    tracing::error!(window_id = %window, error = %err, "renderer initialization failed");
    session.phase = RendererPhase::Failed;
    session.error = Some(err);
}

fn ui_thread_error(err: DispatchError) -> RendererError {
    RendererError::Backend {
        message: err.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcEnvelope {
    #[serde(rename = "type")]
    kind: String,
    request_id: String,
    method: String,
    #[serde(default)]
    args: Value,
}

fn parse_rpc_envelope(message: &str) -> Option<RpcEnvelope> {
    if !message.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str::<RpcEnvelope>(message)
        .ok()
        .filter(|envelope| envelope.kind == "rpc:invoke")
}

/// Page-bound envelope carrying an RPC outcome.
pub fn rpc_result_message(request_id: &str, outcome: &RpcOutcome) -> String {
    let payload = match outcome {
        RpcOutcome::Resolved { result_json } => {
            let result: Value = serde_json::from_str(result_json).unwrap_or(Value::Null);
            json!({ "type": "rpc:result", "requestId": request_id, "ok": true, "result": result })
        }
        RpcOutcome::Rejected { message } => {
            json!({ "type": "rpc:result", "requestId": request_id, "ok": false, "error": message })
        }
    };
    payload.to_string()
}

const BOOTSTRAP_SCRIPT: &str = r#"(function(){
  if (window.nativeHost) { return; }
  var post = window.chrome && window.chrome.webview
    ? window.chrome.webview.postMessage.bind(window.chrome.webview)
    : function(){};
  var listeners = [];
  var pending = {};
  var nextId = 1;
  if (window.chrome && window.chrome.webview) {
    window.chrome.webview.addEventListener('message', function(event){
      var data = event.data;
      if (typeof data === 'string' && data.charAt(0) === '{') {
        try {
          var envelope = JSON.parse(data);
          if (envelope && envelope.type === 'rpc:result' && pending[envelope.requestId]) {
            var entry = pending[envelope.requestId];
            delete pending[envelope.requestId];
            if (envelope.ok) { entry.resolve(envelope.result); } else { entry.reject(new Error(envelope.error)); }
            return;
          }
        } catch (e) {}
      }
      listeners.slice().forEach(function(cb){ try { cb(data); } catch (e) {} });
    });
  }
  Object.defineProperty(window, 'nativeHost', {
    value: Object.freeze({
      send: function(message){ post(String(message)); },
      onMessage: function(cb){ listeners.push(cb); },
      invoke: function(method){
        var args = Array.prototype.slice.call(arguments, 1);
        var requestId = 'r' + (nextId++);
        return new Promise(function(resolve, reject){
          pending[requestId] = { resolve: resolve, reject: reject };
          post(JSON.stringify({ type: 'rpc:invoke', requestId: requestId, method: method, args: args }));
        });
      }
    }),
    writable: false,
    configurable: false
  });
  if (__FRAMELESS__) {
    var install = function(){
      var style = document.createElement('style');
      style.textContent = '#native-host-titlebar{position:fixed;top:0;left:0;right:0;height:32px;background:#111;color:#fff;display:flex;align-items:center;padding:0 12px;z-index:999999;-webkit-app-region:drag;pointer-events:none;font:12px/32px "Segoe UI",sans-serif;}body{padding-top:32px !important;}';
      document.documentElement.appendChild(style);
      var bar = document.createElement('div');
      bar.id = 'native-host-titlebar';
      bar.textContent = __TITLE__;
      document.body.appendChild(bar);
    };
    if (document.body) { install(); } else { document.addEventListener('DOMContentLoaded', install, { once: true }); }
  }
})();"#;

/// Script injected into every document before page scripts run.
pub fn bootstrap_script(settings: &RendererSettings) -> String {
    let title = Value::String(settings.title.clone()).to_string();
    BOOTSTRAP_SCRIPT
        .replace("__FRAMELESS__", if settings.frameless { "true" } else { "false" })
        .replace("__TITLE__", &title)
}

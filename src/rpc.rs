//! Window-scoped RPC correlation.
//!
//! Every invoke is keyed by `(window, requestId)` and parked in a pending
//! table before any handler runs. All outcomes go through
//! [`RpcBridge::complete`], which removes the entry, so each call is
//! answered exactly once and late answers for closed windows fall through
//! as no-ops.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::dispatcher::lock;
use crate::events::{RpcCall, RpcInvokeSink};
use crate::window::WindowId;

pub const INVALID_ARGUMENTS: &str = "Invalid RPC arguments payload";
pub const HANDLER_NOT_REGISTERED: &str = "Window RPC handler is not registered";
pub const DUPLICATE_REQUEST_ID: &str = "Duplicate RPC request id";
const ABANDONED: &str = "RPC call was abandoned without a result";

pub fn method_not_found(method: &str) -> String {
    format!("RPC method not found: {method}")
}

/// Terminal result of one RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcOutcome {
    Resolved { result_json: String },
    Rejected { message: String },
}

impl RpcOutcome {
    pub fn rejected(message: impl Into<String>) -> Self {
        RpcOutcome::Rejected {
            message: message.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, RpcOutcome::Resolved { .. })
    }
}

/// Where an outcome is delivered once the call completes.
pub type RpcReply = Box<dyn FnOnce(RpcOutcome) + Send>;

/// Native handlers for one window's RPC methods.
pub trait RpcHandlerSet: Send + Sync {
    fn has_method(&self, method: &str) -> bool;

    /// Run `method`. The responder may be completed now or moved elsewhere
    /// and completed later.
    fn call(&self, method: &str, args: Vec<Value>, responder: RpcResponder);
}

type MethodFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, String> + Send + Sync>;

/// Closure-backed handler set.
#[derive(Default, Clone)]
pub struct RpcMethods {
    methods: HashMap<String, MethodFn>,
}

impl RpcMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }
}

impl RpcHandlerSet for RpcMethods {
    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn call(&self, method: &str, args: Vec<Value>, responder: RpcResponder) {
        match self.methods.get(method) {
            Some(f) => match f(args) {
                Ok(value) => responder.resolve(&value),
                Err(message) => responder.reject(message),
            },
            None => responder.reject(method_not_found(method)),
        };
    }
}

/// One-shot completion handle for a pending call. Dropping it without
/// answering rejects the call.
pub struct RpcResponder {
    bridge: RpcBridge,
    window: WindowId,
    request_id: String,
    done: bool,
}

impl RpcResponder {
    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Resolve with the JSON encoding of `value` (`null` when absent).
    pub fn resolve(mut self, value: &Value) -> bool {
        self.done = true;
        let result_json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
        self.bridge
            .complete(self.window, &self.request_id, RpcOutcome::Resolved { result_json })
    }

    pub fn reject(mut self, message: impl Into<String>) -> bool {
        self.done = true;
        self.bridge
            .complete(self.window, &self.request_id, RpcOutcome::rejected(message))
    }
}

impl Drop for RpcResponder {
    fn drop(&mut self) {
        if !self.done {
            tracing::warn!(
                window_id = %self.window,
                request_id = %self.request_id,
                "RPC responder dropped without an answer"
            );
            self.bridge
                .complete(self.window, &self.request_id, RpcOutcome::rejected(ABANDONED));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Manifest {
    namespace: Option<String>,
    methods: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    manifests: HashMap<WindowId, Manifest>,
    handlers: HashMap<WindowId, Arc<dyn RpcHandlerSet>>,
    pending: HashMap<(WindowId, String), RpcReply>,
    sink: Option<RpcInvokeSink>,
}

enum Route {
    Native(Arc<dyn RpcHandlerSet>),
    Script(RpcInvokeSink),
}

/// RPC correlation table shared by the renderer host and the bridge.
#[derive(Clone, Default)]
pub struct RpcBridge {
    state: Arc<Mutex<State>>,
}

impl RpcBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a window's manifest. Manifests are immutable: a second
    /// registration for the same window is ignored.
    pub fn register_manifest<I, S>(&self, window: WindowId, namespace: Option<String>, methods: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = lock(&self.state);
        if state.manifests.contains_key(&window) {
            tracing::warn!(window_id = %window, "RPC manifest already registered; ignoring");
            return false;
        }
        let methods: BTreeSet<String> = methods.into_iter().map(Into::into).collect();
        tracing::debug!(window_id = %window, methods = methods.len(), "registered RPC manifest");
        state.manifests.insert(window, Manifest { namespace, methods });
        true
    }

    pub fn has_manifest(&self, window: WindowId) -> bool {
        lock(&self.state).manifests.contains_key(&window)
    }

    pub fn namespace(&self, window: WindowId) -> Option<String> {
        lock(&self.state)
            .manifests
            .get(&window)
            .and_then(|m| m.namespace.clone())
    }

    /// Attach native handlers for a window. They take precedence over the
    /// script sink.
    pub fn set_handlers(&self, window: WindowId, handlers: Arc<dyn RpcHandlerSet>) {
        lock(&self.state).handlers.insert(window, handlers);
    }

    /// Install the sink that forwards calls to script for windows that
    /// carry a manifest.
    pub fn set_invoke_sink(&self, sink: Option<RpcInvokeSink>) {
        lock(&self.state).sink = sink;
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_pending(&self, window: WindowId, request_id: &str) -> bool {
        lock(&self.state)
            .pending
            .contains_key(&(window, request_id.to_string()))
    }

    /// Start a call. `reply` receives exactly one outcome, unless the window
    /// closes first.
    pub fn invoke(
        &self,
        window: WindowId,
        request_id: &str,
        method: &str,
        args_json: &str,
        reply: RpcReply,
    ) {
        let key = (window, request_id.to_string());
        let claimed = {
            let mut state = lock(&self.state);
            if state.pending.contains_key(&key) {
                Err(reply)
            } else {
                state.pending.insert(key, reply);
                Ok(Self::route(&state, window, method))
            }
        };
        // The first call keeps its slot; the repeat is answered on its own reply.
        let route = match claimed {
            Ok(route) => route,
            Err(reply) => {
                tracing::warn!(
                    window_id = %window,
                    request_id,
                    "duplicate in-flight RPC request id; rejecting"
                );
                reply(RpcOutcome::rejected(DUPLICATE_REQUEST_ID));
                return;
            }
        };

        let route = match route {
            Ok(route) => route,
            Err(message) => {
                tracing::debug!(window_id = %window, request_id, method, "{message}");
                self.complete(window, request_id, RpcOutcome::Rejected { message });
                return;
            }
        };

        let args = match decode_args(args_json) {
            Some(args) => args,
            None => {
                self.complete(window, request_id, RpcOutcome::rejected(INVALID_ARGUMENTS));
                return;
            }
        };

        match route {
            Route::Native(handlers) => {
                let responder = RpcResponder {
                    bridge: self.clone(),
                    window,
                    request_id: request_id.to_string(),
                    done: false,
                };
                handlers.call(method, args, responder);
            }
            Route::Script(sink) => {
                let args_json = Value::Array(args).to_string();
                sink(RpcCall {
                    window_id: window.0,
                    request_id: request_id.to_string(),
                    method: method.to_string(),
                    args_json,
                });
            }
        }
    }

    fn route(state: &State, window: WindowId, method: &str) -> Result<Route, String> {
        if let Some(handlers) = state.handlers.get(&window) {
            return if handlers.has_method(method) {
                Ok(Route::Native(Arc::clone(handlers)))
            } else {
                Err(method_not_found(method))
            };
        }
        match state.manifests.get(&window) {
            Some(manifest) if manifest.methods.contains(method) => match &state.sink {
                Some(sink) => Ok(Route::Script(Arc::clone(sink))),
                None => Err(HANDLER_NOT_REGISTERED.to_string()),
            },
            _ => Err(method_not_found(method)),
        }
    }

    /// Finish a call. Returns false when no such call is pending, which
    /// covers double completion and windows that already closed.
    pub fn complete(&self, window: WindowId, request_id: &str, outcome: RpcOutcome) -> bool {
        let reply = lock(&self.state)
            .pending
            .remove(&(window, request_id.to_string()));
        match reply {
            Some(reply) => {
                reply(outcome);
                true
            }
            None => {
                tracing::debug!(window_id = %window, request_id, "no pending RPC call; ignoring");
                false
            }
        }
    }

    pub fn resolve(&self, window: WindowId, request_id: &str, result_json: &str) -> bool {
        let result_json = if result_json.trim().is_empty() {
            "null".to_string()
        } else {
            result_json.to_string()
        };
        self.complete(window, request_id, RpcOutcome::Resolved { result_json })
    }

    pub fn reject(&self, window: WindowId, request_id: &str, message: &str) -> bool {
        self.complete(window, request_id, RpcOutcome::rejected(message))
    }

    /// Drop all state for a closed window. Its pending calls are abandoned.
    pub fn forget_window(&self, window: WindowId) {
        let abandoned: Vec<RpcReply> = {
            let mut state = lock(&self.state);
            state.manifests.remove(&window);
            state.handlers.remove(&window);
            let keys: Vec<_> = state
                .pending
                .keys()
                .filter(|(w, _)| *w == window)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| state.pending.remove(&key))
                .collect()
        };
        if !abandoned.is_empty() {
            tracing::warn!(
                window_id = %window,
                count = abandoned.len(),
                "window closed with RPC calls in flight; abandoning them"
            );
        }
    }
}

/// Decode an argument payload into a list. Blank means no arguments and a
/// single non-array value becomes a one-element list.
pub fn decode_args(args_json: &str) -> Option<Vec<Value>> {
    if args_json.trim().is_empty() {
        return Some(Vec::new());
    }
    match serde_json::from_str::<Value>(args_json) {
        Ok(Value::Array(args)) => Some(args),
        Ok(single) => Some(vec![single]),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<RpcOutcome>>>, impl Fn() -> RpcReply) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move || {
            let sink = Arc::clone(&sink);
            Box::new(move |outcome| sink.lock().unwrap().push(outcome)) as RpcReply
        })
    }

    #[test]
    fn ping_resolves_with_json_encoded_result() {
        let bridge = RpcBridge::new();
        let window = WindowId(1);
        bridge.set_handlers(
            window,
            Arc::new(RpcMethods::new().method("ping", |_| Ok(json!("pong")))),
        );
        let (seen, reply) = recorder();
        bridge.invoke(window, "req-1", "ping", "[]", reply());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RpcOutcome::Resolved {
                result_json: "\"pong\"".into()
            }]
        );
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn unknown_method_rejects_without_calling_handlers() {
        let bridge = RpcBridge::new();
        let window = WindowId(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bridge.set_handlers(
            window,
            Arc::new(RpcMethods::new().method("ping", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })),
        );
        let (seen, reply) = recorder();
        bridge.invoke(window, "r", "missing", "[]", reply());
        bridge.invoke(WindowId(9), "r", "missing", "[]", reply());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        for outcome in seen.iter() {
            match outcome {
                RpcOutcome::Rejected { message } => assert!(message.contains("not found")),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_arguments_reject_before_the_handler_runs() {
        let bridge = RpcBridge::new();
        let window = WindowId(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bridge.set_handlers(
            window,
            Arc::new(RpcMethods::new().method("sum", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            })),
        );
        let (seen, reply) = recorder();
        bridge.invoke(window, "r", "sum", "[1,", reply());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RpcOutcome::rejected(INVALID_ARGUMENTS)]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn single_value_arguments_become_a_list() {
        assert_eq!(decode_args("5"), Some(vec![json!(5)]));
        assert_eq!(decode_args("[1,2]"), Some(vec![json!(1), json!(2)]));
        assert_eq!(decode_args("  "), Some(vec![]));
        assert_eq!(decode_args("{bad"), None);
    }

    #[test]
    fn completion_is_exactly_once() {
        let bridge = RpcBridge::new();
        let window = WindowId(2);
        let parked = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&parked);
        struct Deferred(Arc<Mutex<Option<RpcResponder>>>);
        impl RpcHandlerSet for Deferred {
            fn has_method(&self, _: &str) -> bool {
                true
            }
            fn call(&self, _: &str, _: Vec<Value>, responder: RpcResponder) {
                *self.0.lock().unwrap() = Some(responder);
            }
        }
        bridge.set_handlers(window, Arc::new(Deferred(slot)));
        let (seen, reply) = recorder();
        bridge.invoke(window, "later", "work", "[]", reply());
        assert!(bridge.is_pending(window, "later"));

        assert!(bridge.reject(window, "later", "cancelled"));
        assert!(!bridge.resolve(window, "later", "1"));
        // The parked responder drops after the call already finished.
        drop(parked.lock().unwrap().take());
        assert_eq!(*seen.lock().unwrap(), vec![RpcOutcome::rejected("cancelled")]);
    }

    #[test]
    fn dropped_responder_rejects() {
        let bridge = RpcBridge::new();
        let window = WindowId(4);
        struct Forgetful;
        impl RpcHandlerSet for Forgetful {
            fn has_method(&self, _: &str) -> bool {
                true
            }
            fn call(&self, _: &str, _: Vec<Value>, _responder: RpcResponder) {}
        }
        bridge.set_handlers(window, Arc::new(Forgetful));
        let (seen, reply) = recorder();
        bridge.invoke(window, "r", "any", "[]", reply());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].is_resolved());
    }

    #[test]
    fn manifest_routes_to_script_sink_and_is_immutable() {
        let bridge = RpcBridge::new();
        let window = WindowId(5);
        assert!(bridge.register_manifest(window, Some("app".into()), ["greet"]));
        assert!(!bridge.register_manifest(window, None, ["other"]));
        assert_eq!(bridge.namespace(window).as_deref(), Some("app"));

        let (seen, reply) = recorder();
        bridge.invoke(window, "a", "greet", "[]", reply());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![RpcOutcome::rejected(HANDLER_NOT_REGISTERED)]
        );

        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink_calls = Arc::clone(&calls);
        bridge.set_invoke_sink(Some(Arc::new(move |call: RpcCall| {
            sink_calls.lock().unwrap().push(call)
        })));
        bridge.invoke(window, "b", "greet", "\"bob\"", reply());
        bridge.invoke(window, "c", "other", "[]", reply());
        {
            let calls = calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].args_json, "[\"bob\"]");
        }
        assert!(bridge.resolve(window, "b", ""));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[1].is_rejected_with("not found"));
        assert_eq!(
            seen[2],
            RpcOutcome::Resolved {
                result_json: "null".into()
            }
        );
    }

    #[test]
    fn closing_a_window_turns_late_answers_into_no_ops() {
        let bridge = RpcBridge::new();
        let window = WindowId(6);
        bridge.register_manifest(window, None, ["slow"]);
        bridge.set_invoke_sink(Some(Arc::new(|_call: RpcCall| {})));
        let (seen, reply) = recorder();
        bridge.invoke(window, "x", "slow", "[]", reply());
        assert_eq!(bridge.pending_count(), 1);

        bridge.forget_window(window);
        assert!(!bridge.resolve(window, "x", "1"));
        assert!(seen.lock().unwrap().is_empty());
        assert!(!bridge.has_manifest(window));
    }

    #[test]
    fn repeated_request_id_is_rejected_on_its_own_reply() {
        let bridge = RpcBridge::new();
        let window = WindowId(7);
        bridge.register_manifest(window, None, ["slow"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        bridge.set_invoke_sink(Some(Arc::new(move |_call: RpcCall| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        let (first, first_reply) = recorder();
        let (second, second_reply) = recorder();
        bridge.invoke(window, "x", "slow", "[]", first_reply());
        bridge.invoke(window, "x", "slow", "[]", second_reply());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *second.lock().unwrap(),
            vec![RpcOutcome::rejected(DUPLICATE_REQUEST_ID)]
        );
        assert!(first.lock().unwrap().is_empty());
        assert!(bridge.is_pending(window, "x"));

        assert!(bridge.resolve(window, "x", "1"));
        assert_eq!(
            *first.lock().unwrap(),
            vec![RpcOutcome::Resolved {
                result_json: "1".into()
            }]
        );
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn native_method_errors_reject_the_call() {
        let bridge = RpcBridge::new();
        let window = WindowId(8);
        bridge.set_handlers(
            window,
            Arc::new(RpcMethods::new().method("divide", |args| {
                match (args.first().and_then(Value::as_f64), args.get(1).and_then(Value::as_f64)) {
                    (Some(_), Some(d)) if d == 0.0 => Err("division by zero".to_string()),
                    (Some(n), Some(d)) => Ok(json!(n / d)),
                    _ => Err("expected two numbers".to_string()),
                }
            })),
        );
        let (seen, reply) = recorder();
        bridge.invoke(window, "ok", "divide", "[6,3]", reply());
        bridge.invoke(window, "zero", "divide", "[1,0]", reply());
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            RpcOutcome::Resolved {
                result_json: "2.0".into()
            }
        );
        assert_eq!(seen[1], RpcOutcome::rejected("division by zero"));
        assert_eq!(bridge.pending_count(), 0);
    }

    impl RpcOutcome {
        fn is_rejected_with(&self, needle: &str) -> bool {
            matches!(self, RpcOutcome::Rejected { message } if message.contains(needle))
        }
    }
}

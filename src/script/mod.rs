//! QuickJS host for the application's main script.
//!
//! The script runs on the UI thread. Bridge calls made from it run inline
//! through the dispatcher. Events travelling the other way (tray clicks, RPC
//! invocations, finished fetches) are queued on a channel and delivered by
//! [`ScriptHost::drain`], which the UI loop calls once per turn.

mod bindings;
mod engine;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use anyhow::Result;
use rquickjs::{Function, Object};

use crate::bridge::NativeBridge;
use crate::events::{RpcCall, TrayEvent};
use crate::window::WindowId;

use self::bindings::{Notifier, ScriptContext, ScriptEvent};
pub use self::engine::ScriptEngine;

pub struct ScriptHost {
    engine: ScriptEngine,
    context: ScriptContext,
    events: Receiver<ScriptEvent>,
}

impl ScriptHost {
    /// Create the engine, install the globals and register the native event
    /// sinks. Must be called on the UI thread.
    pub fn new(bridge: NativeBridge) -> Result<Self> {
        let engine = ScriptEngine::new()?;
        let (tx, events) = mpsc::channel();
        let dispatcher = bridge.platform().dispatcher().clone();
        let notify: Notifier = Arc::new(move |event| {
            if tx.send(event).is_ok() {
                dispatcher.wake();
            }
        });

        let context = ScriptContext {
            bridge,
            notify,
            pending_fetches: Rc::new(Cell::new(0)),
        };
        bindings::install(&engine, &context)?;

        let tray_notify = Arc::clone(&context.notify);
        context.bridge.tray_on_event(Some(Arc::new(move |event: TrayEvent| {
            tray_notify(ScriptEvent::Tray(event))
        })));
        let rpc_notify = Arc::clone(&context.notify);
        context.bridge.window_on_rpc_invoke(Some(Arc::new(move |call: RpcCall| {
            rpc_notify(ScriptEvent::Rpc(call))
        })));

        tracing::debug!(target: "quickjs", "script host ready");
        Ok(Self {
            engine,
            context,
            events,
        })
    }

    pub fn bridge(&self) -> &NativeBridge {
        &self.context.bridge
    }

    /// Run a script to completion, including the promise jobs it queued.
    pub fn execute(&self, source: &str, filename: &str) -> Result<()> {
        tracing::info!(target: "quickjs", filename, "running script");
        self.engine.eval(source, filename)
    }

    /// Evaluate an expression and convert its value.
    pub fn eval<V>(&self, source: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        self.engine.eval_with(source, "<eval>")
    }

    /// Deliver queued events to the script, then run promise jobs.
    ///
    /// Returns `true` while a fetch is still in flight; its completion wakes
    /// the UI loop.
    pub fn drain(&self) -> bool {
        while let Ok(event) = self.events.try_recv() {
            self.deliver(event);
        }
        self.engine.execute_pending_jobs();
        self.context.pending_fetches.get() > 0
    }

    fn deliver(&self, event: ScriptEvent) {
        match event {
            ScriptEvent::Tray(event) => {
                let outcome = self.call_host::<Option<String>, _>(
                    "tray",
                    (event.tray_id, event.event.clone(), event.menu_item_id.clone()),
                );
                match outcome {
                    Ok(None) => {}
                    Ok(Some(message)) => tracing::error!(
                        target: "quickjs",
                        tray_id = event.tray_id,
                        event = %event.event,
                        %message,
                        "tray event handler failed"
                    ),
                    Err(e) => tracing::error!(
                        target: "quickjs",
                        tray_id = event.tray_id,
                        error = %e,
                        "tray event dispatch failed"
                    ),
                }
            }
            ScriptEvent::Rpc(call) => {
                let outcome = self.call_host::<Option<String>, _>(
                    "rpc",
                    (
                        call.window_id,
                        call.request_id.clone(),
                        call.method.clone(),
                        call.args_json.clone(),
                    ),
                );
                let failure = match outcome {
                    Ok(None) => return,
                    Ok(Some(message)) => message,
                    Err(e) => e.to_string(),
                };
                tracing::warn!(
                    target: "quickjs",
                    window_id = call.window_id,
                    request_id = %call.request_id,
                    method = %call.method,
                    message = %failure,
                    "rejecting RPC call"
                );
                self.context.bridge.platform().rpc_reject(
                    WindowId(call.window_id),
                    &call.request_id,
                    &failure,
                );
            }
            ScriptEvent::FetchSettled { id, body } => {
                let pending = &self.context.pending_fetches;
                pending.set(pending.get().saturating_sub(1));
                if let Err(e) = self.call_host::<Option<String>, _>("settleFetch", (id, body)) {
                    tracing::error!(target: "quickjs", fetch_id = id, error = %e, "could not settle fetch");
                }
            }
        }
    }

    fn call_host<V, A>(&self, entry: &str, args: A) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
        A: for<'js> rquickjs::function::IntoArgs<'js>,
    {
        self.engine.with_exceptions(|ctx| {
            let host: Object = ctx.globals().get("__nativeHost")?;
            let function: Function = host.get(entry)?;
            function.call(args)
        })
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        // Without the sinks, RPC calls fall back to "method not found"
        // instead of waiting on a script that is gone.
        self.context.bridge.tray_on_event(None);
        self.context.bridge.window_on_rpc_invoke(None);
    }
}

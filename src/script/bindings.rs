//! Globals the main script sees: `__native`, `console` and `fetch`.
//!
//! Rust installs three raw entry points and a prelude builds the public
//! objects on top of them. Structured values cross the boundary as JSON
//! text, so the bridge only ever sees `serde_json::Value`s.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use rquickjs::Function;
use serde_json::{json, Value};

use crate::bridge::{NativeBridge, OPERATIONS};
use crate::error::HostError;
use crate::events::{RpcCall, TrayEvent};
use crate::fetch;
use crate::options::FetchOptions;

use super::engine::ScriptEngine;

/// Work for the script that originated outside it.
#[derive(Debug)]
pub(crate) enum ScriptEvent {
    Tray(TrayEvent),
    Rpc(RpcCall),
    FetchSettled { id: u32, body: String },
}

/// Hands an event to the script thread and wakes the UI loop.
pub(crate) type Notifier = Arc<dyn Fn(ScriptEvent) + Send + Sync>;

/// State shared between the bindings and the host that owns them.
pub(crate) struct ScriptContext {
    pub bridge: NativeBridge,
    pub notify: Notifier,
    pub pending_fetches: Rc<Cell<usize>>,
}

pub(crate) fn install(engine: &ScriptEngine, context: &ScriptContext) -> Result<()> {
    let prelude = PRELUDE.replace("__OPERATIONS__", &serde_json::to_string(OPERATIONS)?);

    let bridge = context.bridge.clone();
    let notify = Arc::clone(&context.notify);
    let pending = Rc::clone(&context.pending_fetches);

    engine.with_exceptions(move |ctx| {
        let global = ctx.globals();

        let call = Function::new(
            ctx.clone(),
            move |operation: String, args_json: String| -> rquickjs::Result<String> {
                Ok(call_bridge(&bridge, &operation, &args_json))
            },
        )?
        .with_name("__native_call")?;
        global.set("__native_call", call)?;

        let start_fetch = Function::new(
            ctx.clone(),
            move |id: u32, url: String, init_json: String| -> rquickjs::Result<()> {
                let options = serde_json::from_str::<FetchOptions>(&init_json).unwrap_or_else(|e| {
                    tracing::warn!(target: "quickjs", error = %e, "ignoring malformed fetch options");
                    FetchOptions::default()
                });
                pending.set(pending.get() + 1);
                let notify = Arc::clone(&notify);
                fetch::fetch_in_background(url, options, move |body| {
                    notify(ScriptEvent::FetchSettled { id, body })
                });
                Ok(())
            },
        )?
        .with_name("__native_fetch")?;
        global.set("__native_fetch", start_fetch)?;

        let console = Function::new(ctx.clone(), write_console)?.with_name("__native_console")?;
        global.set("__native_console", console)?;

        ctx.eval::<(), _>(prelude.into_bytes())
    })
}

/// Run one bridge operation and wrap the outcome as
/// `{"ok":true,"value":..}` or `{"ok":false,"error":".."}`. The prelude turns
/// the latter into a thrown `Error`.
fn call_bridge(bridge: &NativeBridge, operation: &str, args_json: &str) -> String {
    let outcome = serde_json::from_str::<Vec<Value>>(args_json)
        .map_err(HostError::from)
        .and_then(|args| bridge.call(operation, &args));
    let envelope = match outcome {
        Ok(value) => json!({ "ok": true, "value": value }),
        Err(e) => {
            tracing::debug!(target: "quickjs", operation, error = %e, "bridge call failed");
            json!({ "ok": false, "error": e.to_string() })
        }
    };
    envelope.to_string()
}

fn write_console(level: String, line: String) -> rquickjs::Result<()> {
    match level.as_str() {
        "warn" => {
            tracing::warn!(target: "script", "{line}");
            eprintln!("{line}");
        }
        "error" => {
            tracing::error!(target: "script", "{line}");
            eprintln!("{line}");
        }
        _ => {
            tracing::info!(target: "script", "{line}");
            println!("{line}");
        }
    }
    Ok(())
}

const PRELUDE: &str = r#"
(() => {
    const global = globalThis;
    const nativeCall = global.__native_call;
    const nativeFetch = global.__native_fetch;
    const nativeConsole = global.__native_console;

    const describe = (error) => {
        if (error instanceof Error) {
            return error.message;
        }
        return String(error);
    };

    const invoke = (operation, args) => {
        const reply = JSON.parse(nativeCall(operation, JSON.stringify(args)));
        if (!reply.ok) {
            throw new Error(reply.error);
        }
        return reply.value;
    };

    const native = {};
    for (const operation of __OPERATIONS__) {
        native[operation] = (...args) => invoke(operation, args);
    }

    let trayListener = null;
    let rpcListener = null;
    native.trayOnEvent = (listener) => {
        trayListener = typeof listener === 'function' ? listener : null;
    };
    native.windowOnRpcInvoke = (listener) => {
        rpcListener = typeof listener === 'function' ? listener : null;
    };

    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            if (value instanceof Error) {
                return value.stack ? `${value.name}: ${value.message}\n${value.stack}` : String(value);
            }
            if (typeof value === 'object') {
                return JSON.stringify(value);
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const writer = (level) => (...args) => {
        try {
            nativeConsole(level, args.map(stringify).join(' '));
        } catch (err) {
            // console must never throw
        }
    };

    global.console = {
        log: writer('log'),
        info: writer('log'),
        debug: writer('log'),
        warn: writer('warn'),
        error: writer('error'),
    };

    const pendingFetches = new Map();
    let nextFetchId = 1;

    const fetchInit = (init) => {
        const options = {};
        if (!init || typeof init !== 'object') {
            return options;
        }
        if (init.method != null) {
            options.method = String(init.method);
        }
        if (init.body != null) {
            options.body = String(init.body);
        }
        const timeout = Number(init.timeoutMs);
        if (init.timeoutMs != null && Number.isFinite(timeout)) {
            options.timeoutMs = Math.max(0, Math.floor(timeout));
        }
        if (init.headers && typeof init.headers === 'object') {
            options.headers = {};
            for (const [name, value] of Object.entries(init.headers)) {
                options.headers[name] = String(value);
            }
        }
        return options;
    };

    global.fetch = (url, init) => new Promise((resolve) => {
        const id = nextFetchId++;
        pendingFetches.set(id, resolve);
        try {
            nativeFetch(id, String(url), JSON.stringify(fetchInit(init)));
        } catch (err) {
            pendingFetches.delete(id);
            resolve('');
        }
    });

    // Entry points for native events. Each returns null when the event was
    // handled, or a message describing why it was not.
    const host = {
        tray(trayId, event, menuItemId) {
            if (!trayListener) {
                return null;
            }
            try {
                trayListener(trayId, event, menuItemId);
                return null;
            } catch (error) {
                return describe(error);
            }
        },
        rpc(windowId, requestId, method, argsJson) {
            if (!rpcListener) {
                return 'Window RPC handler is not registered';
            }
            try {
                rpcListener(windowId, requestId, method, argsJson);
                return null;
            } catch (error) {
                return describe(error);
            }
        },
        settleFetch(id, body) {
            const resolve = pendingFetches.get(id);
            if (resolve) {
                pendingFetches.delete(id);
                resolve(body);
            }
            return null;
        },
    };

    Object.defineProperty(global, '__nativeHost', { value: host });
    Object.defineProperty(global, '__native', { value: native, enumerable: true });
})();
"#;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use native_host::bridge::NativeBridge;
use native_host::dialog::build_native_filter;
use native_host::options::DialogFilter;
use native_host::platform::headless::{HeadlessPlatform, RendererFailures};
use native_host::platform::HostPlatform;
use native_host::renderer::{RendererPhase, READY_MESSAGE};
use native_host::rpc::{RpcMethods, RpcOutcome};
use native_host::window::WindowId;
use native_host::window_manager::ClosePolicy;
use serde_json::{json, Value};

fn platform() -> Arc<HeadlessPlatform> {
    Arc::new(HeadlessPlatform::headless(ClosePolicy::KeepRunning))
}

fn invoke(platform: &HeadlessPlatform, window: WindowId, request_id: &str, method: &str, args: &str) -> RpcOutcome {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    platform.rpc().invoke(
        window,
        request_id,
        method,
        args,
        Box::new(move |outcome| {
            let _ = tx.lock().unwrap().send(outcome);
        }),
    );
    rx.try_recv().expect("call answered synchronously")
}

#[test]
fn window_size_is_reported_until_close_then_defaults() {
    let platform = platform();
    let bridge = NativeBridge::new(platform.clone());
    let id = bridge
        .call("windowCreate", &[json!({"width": 800, "height": 600, "show": true})])
        .unwrap();

    assert_eq!(bridge.call("windowGetSize", &[id.clone()]).unwrap(), json!([800, 600]));
    bridge.call("windowClose", &[id.clone()]).unwrap();
    platform.dispatcher().run_until_idle().unwrap();
    assert_eq!(bridge.call("windowGetSize", &[id.clone()]).unwrap(), json!([0, 0]));
    assert_eq!(bridge.call("windowGetPosition", &[id]).unwrap(), json!([0, 0]));
}

#[test]
fn window_ids_are_not_reused_after_close() {
    let platform = platform();
    let first = platform.create_window(Default::default()).unwrap();
    platform.close_window(first);
    platform.dispatcher().run_until_idle().unwrap();
    let second = platform.create_window(Default::default()).unwrap();
    assert_ne!(first, second);
}

#[test]
fn registered_native_method_resolves_with_its_json_result() {
    let platform = platform();
    let window = platform.create_window(Default::default()).unwrap();
    platform
        .rpc()
        .set_handlers(window, Arc::new(RpcMethods::new().method("ping", |_| Ok(json!("pong")))));

    let outcome = invoke(&platform, window, "req-1", "ping", "[]");
    assert_eq!(
        outcome,
        RpcOutcome::Resolved {
            result_json: "\"pong\"".to_string()
        }
    );
    assert_eq!(platform.rpc().pending_count(), 0);
}

#[test]
fn unknown_method_rejects_without_calling_any_handler() {
    let platform = platform();
    let window = platform.create_window(Default::default()).unwrap();

    let RpcOutcome::Rejected { message } = invoke(&platform, window, "req-2", "missing", "[]") else {
        panic!("expected a rejection");
    };
    assert!(message.contains("not found"), "{message}");

    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    platform.rpc().set_handlers(
        window,
        Arc::new(RpcMethods::new().method("ping", move |_| {
            *counter.lock().unwrap() += 1;
            Ok(Value::Null)
        })),
    );
    let outcome = invoke(&platform, window, "req-3", "missing", "[]");
    assert!(!outcome.is_resolved());
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn exec_of_a_missing_command_fails_softly() {
    let bridge = NativeBridge::new(platform());
    let result = bridge
        .call(
            "processExec",
            &[json!({"command": "native-host-no-such-command-7f3a"})],
        )
        .unwrap();
    assert_eq!(result["exitCode"], json!(-1));
    assert_eq!(result["stdout"], json!(""));
    assert!(!result["stderr"].as_str().unwrap().is_empty());
}

#[test]
fn dialog_filters_are_deduplicated_case_insensitively() {
    let filter = build_native_filter(&[DialogFilter {
        name: "Images".into(),
        extensions: vec!["png".into(), ".PNG".into(), "jpg".into()],
    }]);
    let parts: Vec<&str> = filter.split('\0').collect();
    assert_eq!(parts[0], "Images");
    assert_eq!(parts[1], "*.png;*.jpg");
}

#[test]
fn page_messages_get_pong_echo_and_rpc_replies() {
    let platform = platform();
    let window = platform
        .create_window(serde_json::from_value(json!({"url": "https://app.test/"})).unwrap())
        .unwrap();
    platform
        .rpc()
        .set_handlers(window, Arc::new(RpcMethods::new().method("sum", |args| {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        })));
    platform.dispatcher().run_until_idle().unwrap();

    platform.inject_web_message(window, "ping");
    platform.inject_web_message(window, "hello");
    platform.inject_web_message(
        window,
        r#"{"type":"rpc:invoke","requestId":"r1","method":"sum","args":[2,3]}"#,
    );
    platform.dispatcher().run_until_idle().unwrap();

    let posted = platform.journal().unwrap().posted(window);
    assert_eq!(posted[0], READY_MESSAGE);
    assert_eq!(posted[1], "pong");
    assert_eq!(posted[2], "echo:hello");
    let reply: Value = serde_json::from_str(&posted[3]).unwrap();
    assert_eq!(
        reply,
        json!({"type": "rpc:result", "requestId": "r1", "ok": true, "result": 5})
    );
}

#[test]
fn renderer_failure_keeps_window_operations_working() {
    let platform = HeadlessPlatform::with_failures(
        ClosePolicy::KeepRunning,
        RendererFailures {
            environment: None,
            controller: Some(-2147467259),
        },
    );
    let window = platform
        .create_window(serde_json::from_value(json!({"width": 300, "height": 200})).unwrap())
        .unwrap();
    platform.dispatcher().run_until_idle().unwrap();

    assert_eq!(
        platform.renderer_status(window).map(|s| s.phase),
        Some(RendererPhase::Failed)
    );
    platform.maximize_window(window);
    assert!(platform.is_window_maximized(window));
}

#[test]
fn closing_the_last_window_ends_the_loop_only_under_the_quit_policy() {
    let quitting = HeadlessPlatform::headless(ClosePolicy::QuitWhenLastWindowCloses);
    let window = quitting.create_window(Default::default()).unwrap();
    quitting.simulate_user_close(window).unwrap();
    assert_eq!(quitting.run(&mut || {}).unwrap(), 0);

    let staying = HeadlessPlatform::headless(ClosePolicy::KeepRunning);
    let window = staying.create_window(Default::default()).unwrap();
    staying.simulate_user_close(window).unwrap();
    staying.dispatcher().run_until_idle().unwrap();
    // Still usable: new windows can be created after the last one closed.
    assert!(staying.create_window(Default::default()).is_ok());
}

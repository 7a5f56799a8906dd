use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use native_host::app::AppHost;
use native_host::platform::headless::HeadlessPlatform;
use native_host::window::WindowId;
use native_host::window_manager::ClosePolicy;
use serde_json::{json, Value};

fn host() -> (AppHost, Arc<HeadlessPlatform>) {
    let platform = Arc::new(HeadlessPlatform::headless(ClosePolicy::KeepRunning));
    let host = AppHost::with_platform(platform.clone()).unwrap();
    (host, platform)
}

#[test]
fn page_rpc_reaches_the_script_handler_and_back() {
    let (host, platform) = host();
    host.start(
        r#"
        const id = __native.windowCreate({ url: 'https://app.test/', rpcMethods: ['add'] });
        __native.windowOnRpcInvoke((windowId, requestId, method, argsJson) => {
            const [a, b] = JSON.parse(argsJson);
            __native.windowRpcResolve(windowId, requestId, JSON.stringify({ method, total: a + b }));
        });
        globalThis.windowId = id;
        "#,
        "main.js",
    );
    host.run_until_idle().unwrap();
    let window = WindowId(host.script().eval::<u32>("windowId").unwrap());

    platform.inject_web_message(
        window,
        r#"{"type":"rpc:invoke","requestId":"r7","method":"add","args":[4,5]}"#,
    );
    host.run_until_idle().unwrap();

    let posted = platform.journal().unwrap().posted(window);
    let reply: Value = serde_json::from_str(posted.last().unwrap()).unwrap();
    assert_eq!(reply["requestId"], json!("r7"));
    assert_eq!(reply["ok"], json!(true));
    assert_eq!(reply["result"], json!({"method": "add", "total": 9}));
    assert_eq!(platform.rpc().pending_count(), 0);
}

#[test]
fn throwing_rpc_handler_rejects_the_page_call() {
    let (host, platform) = host();
    host.start(
        r#"
        globalThis.windowId = __native.windowCreate({ url: 'https://app.test/', rpcMethods: ['explode'] });
        __native.windowOnRpcInvoke(() => { throw new Error('handler blew up'); });
        "#,
        "main.js",
    );
    host.run_until_idle().unwrap();
    let window = WindowId(host.script().eval::<u32>("windowId").unwrap());

    platform.inject_web_message(
        window,
        r#"{"type":"rpc:invoke","requestId":"r1","method":"explode","args":[]}"#,
    );
    host.run_until_idle().unwrap();

    let posted = platform.journal().unwrap().posted(window);
    let reply: Value = serde_json::from_str(posted.last().unwrap()).unwrap();
    assert_eq!(reply["ok"], json!(false));
    assert!(reply["error"].as_str().unwrap().contains("handler blew up"));
}

#[test]
fn tray_clicks_are_delivered_to_the_script() {
    let (host, platform) = host();
    host.start(
        r#"
        globalThis.seen = [];
        globalThis.trayId = __native.trayCreate({ tooltip: 'Idle', menu: [{ id: 'quit', label: 'Quit' }] });
        __native.trayOnEvent((trayId, event, itemId) => {
            seen.push(`${trayId}:${event}:${itemId}`);
            if (itemId === 'quit') { __native.appQuit(); }
        });
        "#,
        "main.js",
    );
    let tray: u32 = host.script().eval("trayId").unwrap();
    platform.simulate_tray_event(tray, "click", None).unwrap();
    platform
        .simulate_tray_event(tray, "menu-item-click", Some("quit"))
        .unwrap();

    assert_eq!(host.run().unwrap(), 0);
    let seen: String = host.script().eval("seen.join(',')").unwrap();
    assert_eq!(seen, format!("{tray}:click:undefined,{tray}:menu-item-click:quit"));
}

#[test]
fn fetch_resolves_with_the_response_body() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 4096];
        let read = stream.read(&mut request).unwrap();
        let request = String::from_utf8_lossy(&request[..read]).to_string();
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
            .unwrap();
        request
    });

    let (host, _platform) = host();
    host.start(
        &format!(
            "fetch('http://127.0.0.1:{port}/status', {{ method: 'post', body: 'ping' }}).then(body => {{ globalThis.body = body; }});"
        ),
        "fetch.js",
    );
    host.run_until_idle().unwrap();

    let body: String = host.script().eval("body").unwrap();
    assert_eq!(body, "hello");
    let request = server.join().unwrap();
    assert!(request.starts_with("POST /status"), "{request}");
}

#[test]
fn fetch_of_an_unreachable_host_resolves_empty() {
    // Bind then drop to get a port with nothing listening.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let (host, _platform) = host();
    host.start(
        &format!("fetch('http://127.0.0.1:{port}/').then(body => {{ globalThis.body = body; }});"),
        "fetch.js",
    );
    host.run_until_idle().unwrap();
    let body: String = host.script().eval("body").unwrap();
    assert_eq!(body, "");
}

#[test]
fn filesystem_errors_surface_as_script_exceptions() {
    let dir = tempfile::TempDir::new().unwrap();
    let nested = dir.path().join("missing").join("child");
    let (host, _platform) = host();
    host.start(
        &format!(
            r#"
            try {{
                __native.fsMkdir({path}, false);
                globalThis.outcome = 'created';
            }} catch (error) {{
                globalThis.outcome = error.message;
            }}
            "#,
            path = serde_json::to_string(&nested.to_string_lossy()).unwrap()
        ),
        "fs.js",
    );
    let outcome: String = host.script().eval("outcome").unwrap();
    assert!(outcome.contains("Parent directory does not exist"), "{outcome}");
    assert!(!nested.exists());
}

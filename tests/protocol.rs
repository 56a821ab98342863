//! End-to-end protocol tests over the in-memory transport.
//!
//! The live-browser tests at the bottom require Chrome; point REMORA_CHROME
//! at a binary and run with: cargo test --test protocol -- --ignored

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use remora::{
    Browser, BrowserConfig, Connection, ConnectionConfig, Error, EventKind, MockTransport, Session,
    SocketTransport,
};

fn connection(strict: bool) -> (Arc<MockTransport>, Arc<Connection>) {
    let mock = Arc::new(MockTransport::new());
    let conn = Arc::new(Connection::with_config(
        Arc::clone(&mock) as Arc<dyn SocketTransport>,
        ConnectionConfig {
            strict,
            ..Default::default()
        },
    ));
    (mock, conn)
}

#[tokio::test]
async fn connection_round_trip() {
    let (mock, conn) = connection(false);
    assert!(conn.connect().await);
    assert!(conn.is_connected().await);

    let msg = conn.message("Browser.getVersion", json!({}));
    mock.stage(
        json!({"id": msg.id(), "result": {"product": "Chrome/126.0"}}).to_string(),
    )
    .await;

    let reply = conn.send_message_sync(&msg, None).await.expect("round trip");
    assert!(reply.is_successful());
    assert_eq!(reply.result_field("product"), Some(&json!("Chrome/126.0")));

    // The outbound frame matched the wire shape.
    let sent = mock.sent().await;
    let frame: Value = serde_json::from_str(&sent[0]).expect("outbound frame");
    assert_eq!(frame["id"], json!(msg.id()));
    assert_eq!(frame["method"], json!("Browser.getVersion"));

    assert!(conn.disconnect("test over").await);
}

#[tokio::test]
async fn protocol_error_reply_is_data_not_an_error() {
    let (mock, conn) = connection(false);
    conn.connect().await;

    let msg = conn.message("Page.navigate", json!({"url": "nope://"}));
    mock.stage(
        json!({"id": msg.id(), "error": {"code": -32602, "message": "Invalid URL"}}).to_string(),
    )
    .await;

    let reply = conn.send_message_sync(&msg, None).await.expect("delivered");
    assert!(!reply.is_successful());
    assert_eq!(reply.error_message(true), "-32602 - Invalid URL");
}

#[tokio::test]
async fn session_round_trip_via_wrapped_event() {
    let (mock, conn) = connection(false);
    conn.connect().await;
    let session = Session::new(Arc::clone(&conn), "T1", "S1");

    let inner = conn.message("Runtime.evaluate", json!({"expression": "1 + 2"}));
    let envelope_ack = |id: u64| json!({"id": id, "result": {}}).to_string();

    // The envelope ack arrives as a plain reply; the inner reply arrives the
    // way live Chrome delivers it, wrapped in receivedMessageFromTarget.
    mock.stage(envelope_ack(inner.id() + 1)).await;
    mock.stage(
        json!({
            "method": "Target.receivedMessageFromTarget",
            "params": {
                "sessionId": "S1",
                "message": json!({"id": inner.id(), "result": {"result": {"value": 3}}}).to_string(),
            },
        })
        .to_string(),
    )
    .await;

    let reply = session
        .send_message_sync(&inner, Some(Duration::from_millis(500)))
        .await
        .expect("session round trip");
    assert!(reply.is_successful());
    assert_eq!(
        reply.result_field("result").and_then(|r| r.get("value")),
        Some(&json!(3))
    );
}

#[tokio::test]
async fn session_reader_holds_until_envelope_drains() {
    let (mock, conn) = connection(false);
    conn.connect().await;
    let session = Session::new(Arc::clone(&conn), "T1", "S1");

    let inner = conn.message("Page.enable", json!({}));
    let mut reader = session.send_message(&inner).await.expect("send");
    let envelope_id = inner.id() + 1;

    // Inner reply first, as a bare top-level frame.
    mock.stage(json!({"id": inner.id(), "result": {}}).to_string())
        .await;
    assert!(!reader.check_for_response().await.expect("probe"));

    mock.stage(json!({"id": envelope_id, "result": {}}).to_string())
        .await;
    assert!(reader.check_for_response().await.expect("probe"));
    assert!(reader.get_response().expect("resolved").is_successful());
}

#[tokio::test]
async fn session_evaluate_convenience() {
    let (mock, conn) = connection(false);
    conn.connect().await;
    let session = Session::new(Arc::clone(&conn), "T1", "S1");

    // evaluate() allocates the inner message first, then the envelope; on a
    // fresh connection that is ids 1 and 2.
    mock.stage(json!({"id": 2, "result": {}}).to_string()).await;
    mock.stage(
        json!({"id": 1, "result": {"result": {"type": "string", "value": "hi"}}}).to_string(),
    )
    .await;

    let value = session.evaluate("'h' + 'i'").await.expect("evaluate");
    assert_eq!(value, json!("hi"));
}

#[tokio::test]
async fn target_lifecycle_events_reach_listeners() {
    let (mock, conn) = connection(false);
    conn.connect().await;

    let created = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&created);
    conn.on(EventKind::TargetCreated, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .await;
    let counter = Arc::clone(&destroyed);
    conn.on(EventKind::TargetDestroyed, move |params| {
        assert_eq!(params["targetId"], json!("T9"));
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .await;

    mock.stage(
        json!({"method": "Target.targetCreated", "params": {"targetInfo": {"targetId": "T9"}}})
            .to_string(),
    )
    .await;
    mock.stage(json!({"method": "Target.targetDestroyed", "params": {"targetId": "T9"}}).to_string())
        .await;

    conn.read_data().await.expect("drain");
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(conn.buffered_response_count().await, 0);
}

#[tokio::test]
async fn sync_send_times_out_when_nothing_answers() {
    let (_mock, conn) = connection(false);
    conn.connect().await;

    let timeout = Duration::from_millis(80);
    let msg = conn.message("Page.enable", json!({}));
    let started = Instant::now();
    let err = conn
        .send_message_sync(&msg, Some(timeout))
        .await
        .expect_err("no reply staged");

    assert!(err.is_timeout());
    assert!(started.elapsed() >= timeout);
}

#[tokio::test]
async fn strict_connection_rejects_garbage_mid_conversation() {
    let (mock, conn) = connection(true);
    conn.connect().await;

    let msg = conn.message("Page.enable", json!({}));
    mock.stage("not json at all").await;
    mock.stage(json!({"id": msg.id(), "result": {}}).to_string())
        .await;

    let err = conn
        .send_message_sync(&msg, Some(Duration::from_millis(100)))
        .await
        .expect_err("strict mode is fatal on the garbage frame");
    assert!(matches!(err, Error::MalformedResponse(_)));
}

// --- Live-browser tests ---

fn chrome_path() -> Option<std::path::PathBuf> {
    let path = std::path::PathBuf::from(std::env::var_os("REMORA_CHROME")?);
    path.exists().then_some(path)
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn live_launch_and_version() {
    let Some(path) = chrome_path() else {
        eprintln!("REMORA_CHROME not set, skipping");
        return;
    };

    let browser = Browser::launch(BrowserConfig::new(path))
        .await
        .expect("launch");
    let version = browser.version().await.expect("version");
    assert!(!version.is_empty());
    browser.close().await.expect("close");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn live_open_navigate_evaluate() {
    let Some(path) = chrome_path() else {
        eprintln!("REMORA_CHROME not set, skipping");
        return;
    };

    let browser = Browser::launch(BrowserConfig::new(path))
        .await
        .expect("launch");

    let mut target = browser.open("about:blank").await.expect("open");
    {
        let session = target.session().expect("live session");
        session
            .navigate("data:text/html,<title>remora</title>")
            .await
            .expect("navigate");

        let title = session.evaluate("document.title").await.expect("evaluate");
        assert_eq!(title, json!("remora"));
    }

    let target_id = target.target_id().to_string();
    target.destroy().expect("destroy");
    browser.close_target(&target_id).await.expect("close target");
    browser.close().await.expect("close");
}

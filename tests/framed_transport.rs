//! End-to-end tests for the framed TCP transport against an in-process hub.
//!
//! The mock hub accepts one connection, pushes `Ready`, and answers a small
//! fixed set of methods over Content-Length framed JSON-RPC 2.0.
//!
//! # Running
//!
//! ```bash
//! cargo test --test framed_transport -- --nocapture
//! ```

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use questhub_client::hub::{
    read_message, write_message, CallContext, ClientConfig, ConnectionState, ErrorKind, HubClient,
    HubError,
};

/// Test timeout to prevent hanging tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

struct MockHub {
    address: String,
    /// Every request the hub received, in order.
    requests: mpsc::UnboundedReceiver<Value>,
    /// Cancel to make the hub drop the connection.
    hangup: CancellationToken,
    /// Fires when the client closes its side.
    peer_closed: oneshot::Receiver<()>,
}

fn answer(request: &Value) -> Option<Value> {
    let id = request["id"].clone();
    let result = |result: Value| json!({"jsonrpc": "2.0", "id": id, "result": result});
    let error = |code: i64, message: &str| {
        json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
    };

    match request["method"].as_str()? {
        "GetServiceStatus" => Some(result(json!({
            "initialized": true,
            "version": "3.1.0",
            "timestamp": "2024-05-01T00:00:00Z"
        }))),
        "GetDailyQuest" if request["params"][0] == json!("q1") => Some(result(json!({
            "objectives": {"kill": 1},
            "rewards": {"xp": 5},
            "count": 1
        }))),
        "GetDailyQuest" => Some(error(-32000, "Quest not found")),
        "RefreshCache" => Some(result(Value::Null)),
        "Stall" => None,
        _ => Some(error(-32601, "Method not found")),
    }
}

async fn spawn_hub() -> MockHub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("tcp://{}", listener.local_addr().unwrap());

    let (requests_tx, requests) = mpsc::unbounded_channel();
    let (closed_tx, peer_closed) = oneshot::channel();
    let hangup = CancellationToken::new();
    let hub_hangup = hangup.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let ready = json!({
            "jsonrpc": "2.0",
            "method": "Ready",
            "params": [{"initialized": true, "version": "3.1.0"}]
        });
        write_message(&mut write_half, &ready.to_string())
            .await
            .unwrap();

        loop {
            let body = tokio::select! {
                _ = hub_hangup.cancelled() => return,
                body = read_message(&mut reader) => body,
            };
            let Ok(body) = body else {
                let _ = closed_tx.send(());
                return;
            };

            let request: Value = serde_json::from_str(&body).unwrap();
            let _ = requests_tx.send(request.clone());
            if let Some(response) = answer(&request) {
                write_message(&mut write_half, &response.to_string())
                    .await
                    .unwrap();
            }
        }
    });

    MockHub {
        address,
        requests,
        hangup,
        peer_closed,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < TEST_TIMEOUT, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn client_for(hub: &MockHub) -> HubClient {
    HubClient::with_config(ClientConfig::new(hub.address.clone()).with_timeout(TEST_TIMEOUT))
}

#[tokio::test]
async fn test_ready_push_and_queries() {
    let mut hub = spawn_hub().await;
    let client = client_for(&hub);

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    client.on_ready(move |status| {
        let _ = ready_tx.send(status);
    });

    client.connect().await.expect("connect failed");

    let ready = tokio::time::timeout(TEST_TIMEOUT, ready_rx.recv())
        .await
        .expect("Ready was not delivered")
        .expect("channel open");
    assert!(ready.initialized);
    assert_eq!(ready.version, "3.1.0");
    assert!(!ready.refreshed);

    wait_until(|| client.is_connected()).await;
    assert_eq!(client.state(), ConnectionState::Connected);

    let ctx = CallContext::background();
    let status = client.get_service_status(&ctx).await.unwrap();
    assert!(status.initialized);
    assert_eq!(status.version, "3.1.0");

    let quest = client.get_daily_quest(&ctx, "q1").await.unwrap();
    assert_eq!(quest.count, 1);
    assert_eq!(quest.rewards["xp"], json!(5));

    let first = hub.requests.recv().await.unwrap();
    assert_eq!(first["jsonrpc"], json!("2.0"));
    assert_eq!(first["method"], json!("GetServiceStatus"));
    assert_eq!(first["params"], json!([]));

    let second = hub.requests.recv().await.unwrap();
    assert_eq!(second["method"], json!("GetDailyQuest"));
    assert_eq!(second["params"], json!(["q1"]));
    assert_ne!(first["id"], second["id"]);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_error_response_and_null_result() {
    let hub = spawn_hub().await;
    let client = client_for(&hub);
    client.connect().await.unwrap();
    wait_until(|| client.is_connected()).await;

    let ctx = CallContext::background();
    let err = client.get_daily_quest(&ctx, "q404").await.unwrap_err();
    assert!(matches!(err, HubError::InvokeFailed { .. }));
    assert!(err.is_not_found());

    let err = client.invoke(&ctx, "NoSuchMethod", Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvokeFailed);
    assert!(err.to_string().contains("Method not found"));

    client.refresh_cache(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_hub_hangup_notifies_disconnect() {
    let mut hub = spawn_hub().await;
    let client = client_for(&hub);

    let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
    client.on_disconnect(move |err| {
        let _ = lost_tx.send(err.kind());
    });

    client.connect().await.unwrap();
    wait_until(|| client.is_connected()).await;

    // A call the hub never answers fails as soon as the connection drops.
    let ctx = CallContext::background();
    let pending = client.invoke(&ctx, "Stall", Vec::new());
    let hangup = async {
        let stalled = hub.requests.recv().await.unwrap();
        assert_eq!(stalled["method"], json!("Stall"));
        hub.hangup.cancel();
    };
    let (outcome, ()) = tokio::time::timeout(TEST_TIMEOUT, async { tokio::join!(pending, hangup) })
        .await
        .expect("pending call was not failed");
    let err = outcome.unwrap_err();
    assert!(matches!(err, HubError::InvokeFailed { .. }));
    assert!(err.to_string().contains("connection closed"));

    let kind = tokio::time::timeout(TEST_TIMEOUT, lost_rx.recv())
        .await
        .expect("disconnect handler did not run")
        .expect("channel open");
    assert_eq!(kind, ErrorKind::Connection);

    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(matches!(
        client.get_service_status(&CallContext::background()).await,
        Err(HubError::NotConnected)
    ));
}

#[tokio::test]
async fn test_disconnect_closes_socket() {
    let hub = spawn_hub().await;
    let client = client_for(&hub);
    client.connect().await.unwrap();
    wait_until(|| client.is_connected()).await;

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::timeout(TEST_TIMEOUT, hub.peer_closed)
        .await
        .expect("hub did not see the socket close")
        .expect("hub task ended early");
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a local port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HubClient::with_config(
        ClientConfig::new(format!("tcp://{}", addr)).with_timeout(TEST_TIMEOUT),
    );
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_invalid_address() {
    let client = HubClient::new("tcp://localhost");
    let err = client.connect().await.unwrap_err();
    assert!(err.to_string().contains("missing port"));
}

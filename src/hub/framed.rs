//! Default transport: JSON-RPC 2.0 over a Content-Length framed TCP stream.
//!
//! ```text
//! ┌─────────────────┐           TCP stream           ┌─────────────┐
//! │    HubClient    │  ◄───────────────────────────► │     hub     │
//! │ (FramedTransport│   JSON-RPC 2.0 + framing       │             │
//! └─────────────────┘                                └─────────────┘
//! ```
//!
//! One writer task drains an outgoing queue, one reader task routes
//! responses to pending calls by `id` and hands `Ready` pushes to the
//! [`HubReceiver`]. Any read or write failure closes the transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};
use url::Url;

use super::decode::decode_result;
use super::framing::{read_message, write_message};
use super::protocol::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, READY_NOTIFICATION};
use super::transport::{
    CallResult, ConnectionState, Connector, HubReceiver, RemoteError, StateStream, Transport,
    TransportError, Unsubscribe,
};
use crate::models::ReadyStatus;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolve a hub address into `host:port`.
///
/// Accepts URLs (`tcp://host:port`, `http://host:port/hub`) and bare `host:port`.
/// URLs with a well-known scheme may omit the port.
pub fn resolve_address(address: &str) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("tcp://{}", address)
    };

    let url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".to_string()))?;

    Ok(format!("{}:{}", host, port))
}

/// Creates [`FramedTransport`]s over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramedConnector;

#[async_trait]
impl Connector for FramedConnector {
    async fn connect(
        &self,
        address: &str,
        receiver: Arc<dyn HubReceiver>,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let target = resolve_address(address)?;
        let stream = TcpStream::connect(&target)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                address: target.clone(),
                source: Arc::new(e),
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", target, e);
        }

        debug!("TCP connection to {} established", target);
        Ok(Arc::new(FramedTransport::new(stream, receiver)))
    }
}

/// JSON-RPC transport over one TCP connection.
///
/// A transport is single-use: once closed it stays closed.
pub struct FramedTransport {
    inner: Arc<Inner>,
}

struct Inner {
    receiver: Arc<dyn HubReceiver>,
    /// Taken by `start()`.
    stream: Mutex<Option<TcpStream>>,
    outgoing_tx: mpsc::UnboundedSender<String>,
    /// Taken by `start()`.
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<CallResult>>>,
    /// Monotonically increasing request ID counter.
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<ConnectionState>)>>,
    next_subscriber: AtomicU64,
    last_error: Mutex<Option<TransportError>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl FramedTransport {
    pub fn new(stream: TcpStream, receiver: Arc<dyn HubReceiver>) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                receiver,
                stream: Mutex::new(Some(stream)),
                outgoing_tx,
                outgoing_rx: Mutex::new(Some(outgoing_rx)),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
                last_error: Mutex::new(None),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

impl Transport for FramedTransport {
    fn start(&self) {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let Some(stream) = lock(&inner.stream).take() else {
            debug!("Transport already started");
            return;
        };
        let Some(outgoing) = lock(&inner.outgoing_rx).take() else {
            return;
        };

        inner.emit(ConnectionState::Connecting);

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(
            Arc::clone(inner)
                .write_loop(write_half, outgoing)
                .with_current_subscriber(),
        );
        tokio::spawn(
            Arc::clone(inner)
                .read_loop(BufReader::new(read_half))
                .with_current_subscriber(),
        );

        inner.emit(ConnectionState::Connected);
    }

    fn stop(&self) {
        self.inner.close(None);
    }

    fn invoke(&self, method: &str, args: Vec<serde_json::Value>) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        let inner = &self.inner;

        if inner.closed.load(Ordering::SeqCst) {
            let _ = tx.send(Err(RemoteError::new("connection closed")));
            return rx;
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let body = match serde_json::to_string(&JsonRpcRequest::new(method, args, id)) {
            Ok(body) => body,
            Err(e) => {
                let _ = tx.send(Err(RemoteError::new(format!(
                    "Failed to serialize request: {}",
                    e
                ))));
                return rx;
            }
        };

        {
            let mut pending = lock(&inner.pending);
            // Drop calls whose caller gave up (timeout, cancellation).
            pending.retain(|_, waiting| !waiting.is_closed());
            pending.insert(id, tx);
        }

        // close() may have drained `pending` between the check and the insert.
        if inner.closed.load(Ordering::SeqCst) || inner.outgoing_tx.send(body).is_err() {
            inner.fail_pending(id, "connection closed");
        }

        rx
    }

    fn observe_state_changes(&self) -> (StateStream, Unsubscribe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).push((id, tx));

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let unsubscribe = Unsubscribe::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.subscribers).retain(|(subscriber, _)| *subscriber != id);
            }
        });
        (rx, unsubscribe)
    }

    fn last_error(&self) -> Option<TransportError> {
        lock(&self.inner.last_error).clone()
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.inner.close(None);
    }
}

impl Inner {
    fn emit(&self, state: ConnectionState) {
        lock(&self.subscribers).retain(|(_, tx)| tx.send(state).is_ok());
    }

    /// Close once: record the cause, stop both tasks, fail pending calls.
    fn close(&self, cause: Option<TransportError>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(cause) = cause {
            warn!("Hub connection lost: {}", cause);
            *lock(&self.last_error) = Some(cause);
        } else {
            debug!("Hub transport stopped");
        }

        self.shutdown.cancel();
        lock(&self.stream).take();

        let pending: Vec<_> = lock(&self.pending).drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(RemoteError::new("connection closed")));
        }

        self.emit(ConnectionState::Closed);
    }

    fn fail_pending(&self, id: u64, message: &str) {
        if let Some(tx) = lock(&self.pending).remove(&id) {
            let _ = tx.send(Err(RemoteError::new(message)));
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outgoing: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            let body = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                body = outgoing.recv() => match body {
                    Some(body) => body,
                    None => break,
                },
            };

            if let Err(e) = write_message(&mut writer, &body).await {
                self.close(Some(TransportError::Closed(format!("{:#}", e))));
                break;
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: BufReader<OwnedReadHalf>) {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = read_message(&mut reader) => message,
            };

            match message {
                Ok(body) => self.dispatch(&body),
                Err(e) => {
                    self.close(Some(TransportError::Closed(format!("{:#}", e))));
                    break;
                }
            }
        }
    }

    fn dispatch(&self, body: &str) {
        match IncomingMessage::parse(body) {
            Ok(IncomingMessage::Response(response)) => {
                let Some(id) = response.request_id() else {
                    warn!("Hub response with unroutable id {} ignored", response.raw_id());
                    return;
                };
                match lock(&self.pending).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(response.into_outcome());
                    }
                    None => debug!("Response for unknown or abandoned request {}", id),
                }
            }
            Ok(IncomingMessage::Notification(notification)) => self.notify(notification),
            Err(e) => warn!("Invalid message from hub: {}", e),
        }
    }

    fn notify(&self, notification: JsonRpcNotification) {
        if notification.method != READY_NOTIFICATION {
            debug!("Unhandled hub notification: {}", notification.method);
            return;
        }
        match decode_result::<ReadyStatus, _>(notification.payload()) {
            Ok(status) => {
                info!("Hub pushed Ready (version {})", status.version);
                self.receiver.ready(status);
            }
            Err(e) => warn!("Malformed Ready notification: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct Ignore;
    impl HubReceiver for Ignore {
        fn ready(&self, _status: ReadyStatus) {}
    }

    /// A started transport plus the hub-side socket, which never answers.
    async fn silent_hub() -> (FramedTransport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (hub, _) = accepted.unwrap();

        let transport = FramedTransport::new(client.unwrap(), Arc::new(Ignore));
        transport.start();
        (transport, hub)
    }

    #[test]
    fn test_resolve_address_forms() {
        assert_eq!(resolve_address("tcp://127.0.0.1:5294").unwrap(), "127.0.0.1:5294");
        assert_eq!(resolve_address("localhost:5294").unwrap(), "localhost:5294");
        assert_eq!(
            resolve_address("http://hub.example.com:8080/hub").unwrap(),
            "hub.example.com:8080"
        );
        assert_eq!(
            resolve_address("http://hub.example.com/hub").unwrap(),
            "hub.example.com:80"
        );
    }

    #[test]
    fn test_resolve_address_requires_port() {
        let err = resolve_address("tcp://localhost").unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
        assert!(err.to_string().contains("missing port"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a local port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = FramedConnector
            .connect(&format!("tcp://{}", addr), Arc::new(Ignore))
            .await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_abandoned_calls_leave_pending() {
        let (transport, _hub) = silent_hub().await;

        for _ in 0..1000 {
            let call = transport.invoke("Stall", Vec::new());
            let _ = tokio::time::timeout(std::time::Duration::ZERO, call).await;
        }

        // The next call sweeps every abandoned entry.
        let live = transport.invoke("Stall", Vec::new());
        assert_eq!(lock(&transport.inner.pending).len(), 1);

        drop(live);
        transport.stop();
        assert!(lock(&transport.inner.pending).is_empty());
    }

    #[tokio::test]
    async fn test_stop_fails_pending_calls() {
        let (transport, _hub) = silent_hub().await;
        let call = transport.invoke("Stall", Vec::new());

        transport.stop();
        let outcome = call.await.unwrap();
        assert_eq!(outcome.unwrap_err().message, "connection closed");

        // Closed transports fail new calls at once.
        let late = transport.invoke("Stall", Vec::new()).await.unwrap();
        assert!(late.is_err());
    }
}

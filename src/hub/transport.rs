//! Transport contract consumed by [`HubClient`](super::HubClient).
//!
//! The client never touches sockets directly. It drives a [`Transport`]
//! created by a [`Connector`], and the transport pushes server-initiated
//! notifications back through a [`HubReceiver`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::models::ReadyStatus;

/// Outcome of a single remote call as reported by the transport.
pub type CallResult = Result<serde_json::Value, RemoteError>;

/// Stream of connection-state transitions, in the order the transport emits them.
///
/// The stream ends when the subscription is cancelled or the transport is dropped.
pub type StateStream = mpsc::UnboundedReceiver<ConnectionState>;

/// Connection state as observed by the client's watch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, or the client disconnected.
    #[default]
    Disconnected,
    /// Transport started, negotiation in progress.
    Connecting,
    /// Transport ready to carry calls.
    Connected,
    /// Transport closed, locally or by the remote side.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level failures: address resolution, connection setup, I/O.
///
/// Cloneable so a transport can hand out its last recorded error repeatedly.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The hub address could not be parsed into a host and port.
    #[error("invalid hub address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The connection could not be established.
    #[error("failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Transport creation did not finish within the creation deadline.
    #[error("connection was not established within {}s", .0.as_secs_f64())]
    CreationTimeout(Duration),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Framing or encoding failure on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failure reported by the hub for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Protocol error code, when the hub sent one.
    pub code: Option<i64>,
    pub message: String,
    /// Optional structured details.
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Cancels a state-change subscription.
///
/// Cancelling must close the associated [`StateStream`].
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send + Sync>>);

impl Unsubscribe {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }

    /// A subscription with nothing to release.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Unsubscribe").field(&self.0.is_some()).finish()
    }
}

/// A persistent connection to the hub.
///
/// Implementations must be safe to share between the client, its watch loop
/// and concurrent callers.
pub trait Transport: Send + Sync {
    /// Begin connection negotiation. Progress is reported through state changes.
    fn start(&self);

    /// Close the connection. Calls still in flight fail.
    fn stop(&self);

    /// Submit a call. The returned channel yields exactly one result, or is
    /// dropped if the transport gives up on the call.
    fn invoke(&self, method: &str, args: Vec<serde_json::Value>) -> oneshot::Receiver<CallResult>;

    /// Subscribe to connection-state transitions.
    fn observe_state_changes(&self) -> (StateStream, Unsubscribe);

    /// The error that caused the most recent close, if any.
    fn last_error(&self) -> Option<TransportError>;
}

/// Creates transports bound to a hub address.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Create a transport for `address`. Server pushes are delivered to `receiver`.
    ///
    /// The caller bounds this with its own creation deadline.
    async fn connect(
        &self,
        address: &str,
        receiver: Arc<dyn HubReceiver>,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Target for server-to-client notifications.
pub trait HubReceiver: Send + Sync {
    /// The hub finished initializing (or refreshing) and is safe to query.
    fn ready(&self, status: ReadyStatus);
}

//! Hub client: connection lifecycle, handler dispatch and timed invocation.
//!
//! `HubClient` owns at most one [`Transport`] at a time. A background watch
//! task follows the transport's state changes, keeps the connected flag in
//! sync and fans out disconnect notifications. Server pushes arrive through
//! an [`EventReceiver`] that only holds a weak reference to the client state.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn, Dispatch};

use super::context::CallContext;
use super::error::{HubError, WaitAborted};
use super::framed::FramedConnector;
use super::transport::{
    ConnectionState, Connector, HubReceiver, RemoteError, StateStream, Transport, TransportError,
    Unsubscribe,
};
use crate::models::ReadyStatus;

/// Default invocation timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Callback for `Ready` notifications.
pub type ReadyHandler = Arc<dyn Fn(ReadyStatus) + Send + Sync>;

/// Callback for connection loss. Receives the cause of the close.
pub type DisconnectHandler = Arc<dyn Fn(&HubError) + Send + Sync>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub address, e.g. `tcp://127.0.0.1:5294`.
    pub address: String,
    /// Default deadline for calls whose context has none. Also bounds
    /// transport creation in [`HubClient::connect`].
    pub timeout: Duration,
    /// Where the client and its transport emit their `tracing` events.
    /// Defaults to [`Dispatch::none`], so a client logs nothing unless given
    /// a logger, whatever subscriber the process has installed.
    pub logger: Dispatch,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            logger: Dispatch::none(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route the client's log events to `logger`.
    ///
    /// ```ignore
    /// let config = ClientConfig::new(url)
    ///     .with_logger(tracing::dispatcher::get_default(Dispatch::clone));
    /// ```
    pub fn with_logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.logger = logger.into();
        self
    }
}

/// Everything guarded by the client's single read/write lock.
#[derive(Default)]
struct ClientState {
    connected: bool,
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    unsubscribe: Option<Unsubscribe>,
    /// Cancels the watch task of the current transport.
    watch: Option<CancellationToken>,
    ready_handlers: Vec<ReadyHandler>,
    disconnect_handlers: Vec<DisconnectHandler>,
}

type SharedState = Arc<RwLock<ClientState>>;

// Callbacks never run under the lock, so a poisoned guard is still consistent.
fn read_state(state: &RwLock<ClientState>) -> RwLockReadGuard<'_, ClientState> {
    state.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_state(state: &RwLock<ClientState>) -> RwLockWriteGuard<'_, ClientState> {
    state.write().unwrap_or_else(PoisonError::into_inner)
}

/// Client for the hub's persistent RPC channel.
///
/// # Connection Lifecycle
///
/// - `connect()` - create and start a transport (returns before the hub is ready)
/// - `on_ready()` - learn when the hub can be queried
/// - `on_disconnect()` - learn when the connection is lost
/// - `disconnect()` - stop the transport
///
/// The client never reconnects on its own.
///
/// # Example
///
/// ```ignore
/// use questhub_client::hub::{CallContext, HubClient};
///
/// let client = HubClient::new("tcp://127.0.0.1:5294");
/// client.on_ready(|status| println!("hub {} ready", status.version));
/// client.connect().await?;
///
/// let status = client.get_service_status(&CallContext::background()).await?;
/// ```
pub struct HubClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: SharedState,
    /// Serializes connect/disconnect so transport creation never holds `shared`.
    lifecycle: Mutex<()>,
    /// Parent of every per-connection watch token.
    shutdown: CancellationToken,
}

impl HubClient {
    /// Client for `address` using the default framed transport.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(address))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(FramedConnector))
    }

    /// Client using a caller-supplied transport factory.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            shared: Arc::new(RwLock::new(ClientState::default())),
            lifecycle: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create and start a transport.
    ///
    /// Returns immediately when already connected or while the current
    /// transport is still negotiating. Readiness is reported through
    /// [`on_ready`](Self::on_ready), not by this method returning.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Connection` if the transport cannot be created
    /// within the configured timeout. Client state is left unchanged.
    pub async fn connect(&self) -> Result<(), HubError> {
        self.establish()
            .with_subscriber(self.config.logger.clone())
            .await
    }

    async fn establish(&self) -> Result<(), HubError> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let state = read_state(&self.shared);
            if state.connected
                || (state.transport.is_some() && state.state != ConnectionState::Closed)
            {
                return Ok(());
            }
        }

        let receiver: Arc<dyn HubReceiver> = Arc::new(EventReceiver {
            state: Arc::downgrade(&self.shared),
            logger: self.config.logger.clone(),
        });
        let timeout = self.config.timeout;
        let created = tokio::time::timeout(
            timeout,
            self.connector.connect(&self.config.address, receiver),
        )
        .await;

        let transport = match created {
            Ok(Ok(transport)) => transport,
            Ok(Err(err)) => {
                error!("Failed to create hub connection: {}", err);
                return Err(err.into());
            }
            Err(_) => {
                let err = TransportError::CreationTimeout(timeout);
                error!("Failed to create hub connection: {}", err);
                return Err(err.into());
            }
        };

        let (states, unsubscribe) = transport.observe_state_changes();
        let watch = self.shutdown.child_token();

        let (stale_transport, stale_unsubscribe) = {
            let mut state = write_state(&self.shared);
            if let Some(previous) = state.watch.replace(watch.clone()) {
                previous.cancel();
            }
            state.state = ConnectionState::Connecting;
            (
                state.transport.replace(Arc::clone(&transport)),
                state.unsubscribe.replace(unsubscribe),
            )
        };

        if let Some(unsubscribe) = stale_unsubscribe {
            unsubscribe.cancel();
        }
        if let Some(stale) = stale_transport {
            debug!("Replacing closed hub transport");
            stale.stop();
        }

        tokio::spawn(
            watch_states(
                Arc::clone(&self.shared),
                Arc::clone(&transport),
                states,
                watch,
            )
            .with_subscriber(self.config.logger.clone()),
        );

        // Polled under the client logger, so the transport's tasks inherit it.
        transport.start();

        info!("Connecting to hub at {}", self.config.address);
        Ok(())
    }

    /// Stop the transport and clear the connected flag.
    ///
    /// Idempotent. Disconnect handlers are not invoked for a disconnect the
    /// caller asked for.
    pub async fn disconnect(&self) -> Result<(), HubError> {
        self.teardown()
            .with_subscriber(self.config.logger.clone())
            .await
    }

    async fn teardown(&self) -> Result<(), HubError> {
        let _lifecycle = self.lifecycle.lock().await;

        let (transport, unsubscribe) = {
            let mut state = write_state(&self.shared);
            state.connected = false;
            state.state = ConnectionState::Disconnected;
            if let Some(watch) = state.watch.take() {
                watch.cancel();
            }
            (state.transport.take(), state.unsubscribe.take())
        };

        let Some(transport) = transport else {
            return Ok(());
        };

        if let Some(unsubscribe) = unsubscribe {
            unsubscribe.cancel();
        }
        transport.stop();

        info!("Disconnected from hub");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        read_state(&self.shared).connected
    }

    /// Last connection state observed by the watch task.
    pub fn state(&self) -> ConnectionState {
        read_state(&self.shared).state
    }

    /// Register a callback for `Ready` notifications.
    ///
    /// Only notifications arriving after registration are delivered. Each
    /// callback runs on its own blocking task.
    pub fn on_ready<F>(&self, handler: F)
    where
        F: Fn(ReadyStatus) + Send + Sync + 'static,
    {
        write_state(&self.shared)
            .ready_handlers
            .push(Arc::new(handler));
    }

    /// Register a callback for connection loss.
    ///
    /// Only closes observed after registration are delivered.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&HubError) + Send + Sync + 'static,
    {
        write_state(&self.shared)
            .disconnect_handlers
            .push(Arc::new(handler));
    }

    /// Invoke `method` and wait for its raw result.
    ///
    /// Fails with `HubError::NotConnected` without touching the transport
    /// when disconnected. The wait is bounded by the context deadline, or
    /// the configured timeout if the context has none.
    ///
    /// # Errors
    ///
    /// - `HubError::NotConnected` - no live connection
    /// - `HubError::ConnectionTimeout` - deadline elapsed or caller canceled
    /// - `HubError::InvokeFailed` - the hub reported a failure
    pub async fn invoke(
        &self,
        ctx: &CallContext,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, HubError> {
        self.await_result(ctx, method, args)
            .with_subscriber(self.config.logger.clone())
            .await
    }

    async fn await_result(
        &self,
        ctx: &CallContext,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, HubError> {
        let transport = {
            let state = read_state(&self.shared);
            match (&state.transport, state.connected) {
                (Some(transport), true) => Arc::clone(transport),
                _ => return Err(HubError::NotConnected),
            }
        };

        let deadline = ctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + self.config.timeout);

        debug!(method, "Invoking hub method");
        let pending = transport.invoke(method, args);

        tokio::select! {
            outcome = pending => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(remote)) => {
                    error!("Method {} failed: {}", method, remote);
                    Err(HubError::InvokeFailed {
                        method: method.to_string(),
                        source: remote,
                    })
                }
                Err(_) => {
                    warn!("Transport dropped pending call to {}", method);
                    Err(HubError::InvokeFailed {
                        method: method.to_string(),
                        source: RemoteError::new("call abandoned by transport"),
                    })
                }
            },
            _ = tokio::time::sleep_until(deadline) => Err(HubError::ConnectionTimeout {
                method: method.to_string(),
                reason: WaitAborted::DeadlineExceeded,
            }),
            _ = ctx.cancelled() => Err(HubError::ConnectionTimeout {
                method: method.to_string(),
                reason: WaitAborted::Canceled,
            }),
        }
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.shutdown.cancel();

        let (transport, unsubscribe) = {
            let mut state = write_state(&self.shared);
            state.connected = false;
            (state.transport.take(), state.unsubscribe.take())
        };
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe.cancel();
        }
        if let Some(transport) = transport {
            tracing::dispatcher::with_default(&self.config.logger, || transport.stop());
        }
    }
}

/// Follow one transport's state changes until its subscription ends.
async fn watch_states(
    shared: SharedState,
    transport: Arc<dyn Transport>,
    mut states: StateStream,
    watch: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = watch.cancelled() => break,
            next = states.recv() => next,
        };
        let Some(observed) = next else {
            break;
        };

        {
            let mut state = write_state(&shared);
            // Checked under the lock: a replaced transport must not touch state.
            if watch.is_cancelled() {
                break;
            }
            state.state = observed;
            match observed {
                ConnectionState::Connected => state.connected = true,
                ConnectionState::Closed => state.connected = false,
                ConnectionState::Connecting | ConnectionState::Disconnected => {}
            }
        }

        match observed {
            ConnectionState::Connected => info!("Connected to hub"),
            ConnectionState::Closed => {
                let cause = transport
                    .last_error()
                    .map(HubError::Connection)
                    .unwrap_or(HubError::NotConnected);
                warn!("Disconnected from hub: {}", cause);

                let handlers = read_state(&shared).disconnect_handlers.clone();
                dispatch_disconnect(handlers, Arc::new(cause));
            }
            other => debug!("Hub connection {}", other),
        }
    }

    debug!("Hub state watch stopped");
}

/// Forwards server pushes to the client's ready handlers.
struct EventReceiver {
    state: Weak<RwLock<ClientState>>,
    logger: Dispatch,
}

impl HubReceiver for EventReceiver {
    fn ready(&self, status: ReadyStatus) {
        tracing::dispatcher::with_default(&self.logger, || {
            let Some(state) = self.state.upgrade() else {
                debug!("Ready notification after client was dropped");
                return;
            };

            info!(
                "Service ready - version: {}, initialized: {}",
                status.version, status.initialized
            );

            let handlers = read_state(&state).ready_handlers.clone();
            dispatch_ready(handlers, status);
        });
    }
}

fn dispatch_ready(handlers: Vec<ReadyHandler>, status: ReadyStatus) {
    for handler in handlers {
        let status = status.clone();
        spawn_handler(move || handler(status));
    }
}

fn dispatch_disconnect(handlers: Vec<DisconnectHandler>, cause: Arc<HubError>) {
    for handler in handlers {
        let cause = Arc::clone(&cause);
        spawn_handler(move || handler(&cause));
    }
}

/// Run a user callback on its own thread so a slow or panicking handler
/// cannot hold up the watch task or its siblings. Callbacks log through the
/// process default subscriber, not the client logger.
fn spawn_handler(task: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => drop(runtime.spawn_blocking(task)),
        Err(_) => drop(std::thread::spawn(task)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new("tcp://127.0.0.1:5294");
        assert_eq!(config.address, "tcp://127.0.0.1:5294");
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let config = config.with_timeout(Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = HubClient::new("tcp://127.0.0.1:1");
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // Disconnect without a transport is a no-op.
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_invoke_while_disconnected() {
        let client = HubClient::new("tcp://127.0.0.1:1");
        let err = client
            .invoke(&CallContext::background(), "GetServiceStatus", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::NotConnected));
    }

    #[tokio::test]
    async fn test_receiver_dispatches_to_current_handlers() {
        let client = HubClient::new("tcp://127.0.0.1:1");
        let receiver = EventReceiver {
            state: Arc::downgrade(&client.shared),
            logger: Dispatch::none(),
        };

        // Nothing registered yet: the push goes nowhere.
        receiver.ready(ReadyStatus::default());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client.on_ready(move |status| {
            let _ = tx.send(status.version);
        });

        receiver.ready(ReadyStatus {
            initialized: true,
            version: "9.9.9".to_string(),
            refreshed: false,
        });

        let version = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("handler should run")
            .expect("channel open");
        assert_eq!(version, "9.9.9");
    }

    #[tokio::test]
    async fn test_receiver_after_client_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let receiver = {
            let client = HubClient::new("tcp://127.0.0.1:1");
            let counter = Arc::clone(&calls);
            client.on_ready(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            EventReceiver {
                state: Arc::downgrade(&client.shared),
                logger: Dispatch::none(),
            }
        };

        receiver.ready(ReadyStatus::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_affect_siblings() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handlers: Vec<ReadyHandler> = vec![
            Arc::new(|_: ReadyStatus| panic!("handler failure")),
            Arc::new(move |status: ReadyStatus| {
                let _ = tx.send(status.initialized);
            }),
        ];

        dispatch_ready(
            handlers,
            ReadyStatus {
                initialized: true,
                ..Default::default()
            },
        );

        let initialized = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("sibling handler should run")
            .expect("channel open");
        assert!(initialized);
    }
}

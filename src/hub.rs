//! Client for the quest hub's persistent RPC channel.
//!
//! # Architecture
//!
//! ```text
//!  caller ──► HubClient ──invoke──► Transport ◄──────────► hub
//!               ▲   │                   │
//!   on_ready ───┘   └── watch task ◄────┘ state changes
//!   on_disconnect        (connected flag, disconnect fan-out)
//! ```
//!
//! `HubClient` owns the connection lifecycle and the typed methods. The
//! transport is reached only through the [`Transport`] / [`Connector`]
//! traits; [`FramedConnector`] is the default, speaking JSON-RPC 2.0 with
//! Content-Length framing over TCP.
//!
//! # Usage
//!
//! ```ignore
//! use questhub_client::hub::{CallContext, HubClient};
//! use std::time::Duration;
//!
//! let client = HubClient::new("tcp://127.0.0.1:5294");
//! client.on_disconnect(|err| eprintln!("hub connection lost: {err}"));
//! client.connect().await?;
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(10));
//! let quests = client.get_daily_quests(&ctx).await?;
//! ```

mod client;
mod context;
mod decode;
mod error;
mod framed;
mod framing;
pub mod methods;
pub mod protocol;
mod transport;

pub use client::{
    ClientConfig, DisconnectHandler, HubClient, ReadyHandler, DEFAULT_TIMEOUT_SECS,
};
pub use context::CallContext;
pub use decode::{decode_result, DecodeError};
pub use error::{ErrorKind, HubError, WaitAborted};
pub use framed::{resolve_address, FramedConnector, FramedTransport};
pub use framing::{read_message, write_message, MAX_MESSAGE_SIZE};
pub use transport::{
    CallResult, ConnectionState, Connector, HubReceiver, RemoteError, StateStream, Transport,
    TransportError, Unsubscribe,
};

//! Quest hub client library.
//!
//! - `hub` - connection lifecycle, typed RPC methods and the default transport
//! - `models` - payloads returned by the hub
//!
//! ```ignore
//! use questhub_client::hub::{CallContext, HubClient};
//!
//! let client = HubClient::new("tcp://127.0.0.1:5294");
//! client.connect().await?;
//! let status = client.get_service_status(&CallContext::background()).await?;
//! ```

pub mod hub;
pub mod models;

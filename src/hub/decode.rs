//! Conversion of untyped call results into domain types.
//!
//! Transports return loosely typed results. Decoding re-encodes the result to
//! canonical JSON and parses that into the requested type, so a transport
//! never needs to know about domain structs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Which half of the round trip failed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to marshal result: {0}")]
    Marshal(#[source] serde_json::Error),

    #[error("failed to unmarshal result: {0}")]
    Unmarshal(#[source] serde_json::Error),
}

/// Decode `raw` into `T` through its canonical JSON encoding.
pub fn decode_result<T, R>(raw: &R) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
    R: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(raw).map_err(DecodeError::Marshal)?;
    serde_json::from_slice(&bytes).map_err(DecodeError::Unmarshal)
}

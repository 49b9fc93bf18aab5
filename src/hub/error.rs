//! Error types for hub invocations.

use std::fmt;

use thiserror::Error;

use super::decode::DecodeError;
use super::transport::{RemoteError, TransportError};

/// Messages the hub uses for its own domain failures.
const NOT_INITIALIZED_MESSAGE: &str = "service not initialized";
const QUEST_NOT_FOUND_MESSAGE: &str = "quest not found";
const BUNDLE_NOT_FOUND_MESSAGE: &str = "bundle not found";

/// Why the client stopped waiting for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAborted {
    /// The effective deadline elapsed.
    DeadlineExceeded,
    /// The caller's cancellation token fired.
    Canceled,
}

impl fmt::Display for WaitAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitAborted::DeadlineExceeded => f.write_str("deadline exceeded"),
            WaitAborted::Canceled => f.write_str("call canceled"),
        }
    }
}

/// Errors returned by [`HubClient`](super::HubClient).
///
/// Every invocation-path error names the hub method it came from.
#[derive(Debug, Error)]
pub enum HubError {
    /// The client has no live connection. No call was attempted.
    #[error("client is not connected")]
    NotConnected,

    /// No result arrived before the deadline, or the caller canceled.
    #[error("connection timeout: {method} - {reason}")]
    ConnectionTimeout { method: String, reason: WaitAborted },

    /// The hub reported a failure for this method.
    #[error("hub method invocation failed: {method} - {source}")]
    InvokeFailed {
        method: String,
        #[source]
        source: RemoteError,
    },

    #[error("invalid quest ID")]
    InvalidQuestId,

    #[error("invalid template ID")]
    InvalidTemplateId,

    /// The result did not match the expected shape.
    #[error("failed to decode {method} result: {source}")]
    Decode {
        method: String,
        #[source]
        source: DecodeError,
    },

    /// Transport creation failed, or the transport recorded this as its close cause.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),
}

/// Coarse classification of a [`HubError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConnected,
    ConnectionTimeout,
    InvokeFailed,
    InvalidArgument,
    DecodeFailed,
    /// The hub has not finished initializing.
    NotInitialized,
    /// The requested quest or bundle does not exist.
    NotFound,
    Connection,
}

impl HubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::NotConnected => ErrorKind::NotConnected,
            HubError::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            HubError::InvokeFailed { source, .. } => classify_remote(source),
            HubError::InvalidQuestId | HubError::InvalidTemplateId => ErrorKind::InvalidArgument,
            HubError::Decode { .. } => ErrorKind::DecodeFailed,
            HubError::Connection(_) => ErrorKind::Connection,
        }
    }

    /// The hub method this error belongs to, if it came from an invocation.
    pub fn method(&self) -> Option<&str> {
        match self {
            HubError::ConnectionTimeout { method, .. }
            | HubError::InvokeFailed { method, .. }
            | HubError::Decode { method, .. } => Some(method),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

fn classify_remote(err: &RemoteError) -> ErrorKind {
    let message = err.message.to_ascii_lowercase();
    if message.contains(NOT_INITIALIZED_MESSAGE) {
        ErrorKind::NotInitialized
    } else if message.contains(QUEST_NOT_FOUND_MESSAGE) || message.contains(BUNDLE_NOT_FOUND_MESSAGE)
    {
        ErrorKind::NotFound
    } else {
        ErrorKind::InvokeFailed
    }
}

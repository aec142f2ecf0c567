//! Error types for the transport.

use serde_json::Value;

/// Errors while converting packets to and from their wire form.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode packet: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors raised by a [`Channel`](crate::Channel) implementation.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Outcome of a failed RPC call.
///
/// `Cancelled` carries nothing on purpose: a cancelled call never saw a
/// response, so there is no payload to inspect. A remote failure always
/// arrives as `Failure`, even when its payload is empty.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("call cancelled before a response arrived")]
    Cancelled,

    #[error("remote failure: {0}")]
    Failure(Value),

    #[error("client shut down with the call still pending")]
    Shutdown,

    #[error("pending call dropped without a response")]
    Dropped,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("failed to encode request payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response payload: {0}")]
    Decode(#[source] serde_json::Error),
}

impl RpcError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RpcError::Cancelled)
    }

    /// Payload of a remote failure, if this is one.
    pub fn failure_payload(&self) -> Option<&Value> {
        match self {
            RpcError::Failure(payload) => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cancellation_is_distinct_from_empty_failure() {
        let cancelled = RpcError::Cancelled;
        let empty = RpcError::Failure(Value::Null);

        assert!(cancelled.is_cancelled());
        assert!(cancelled.failure_payload().is_none());
        assert!(!empty.is_cancelled());
        assert_eq!(empty.failure_payload(), Some(&Value::Null));
    }

    #[test]
    fn failure_display_includes_payload() {
        let err = RpcError::Failure(json!("Unknown method."));
        assert_eq!(err.to_string(), "remote failure: \"Unknown method.\"");
    }
}

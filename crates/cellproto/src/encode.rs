//! Client stub for the encode job backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reply::Response;

/// Which output stream of the running job to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub source: String,
}

impl RefreshRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Everything the job has written to the requested stream so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReply {
    pub data: String,
}

impl Response for RefreshReply {}

crate::rpc_interface! {
    /// Control of a running encode job.
    pub struct EncodeRpc {
        /// Terminate the job.
        fn kill() -> Value;
        /// Ask the job to stop at the next safe point.
        fn interrupt() -> Value;
        fn refresh(RefreshRequest) -> RefreshReply;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcStub;
    use serde_json::json;

    #[test]
    fn refresh_payload_shape() {
        assert_eq!(
            serde_json::to_value(RefreshRequest::new("stderr")).unwrap(),
            json!({"source": "stderr"})
        );
    }

    #[test]
    fn stub_lists_methods() {
        assert_eq!(EncodeRpc::METHODS, &["kill", "interrupt", "refresh"]);
    }
}

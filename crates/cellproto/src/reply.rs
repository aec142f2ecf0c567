//! Successful call results and their typed decoding.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::RpcError;

/// A response payload together with its binary attachments.
///
/// Handlers return one; clients receive one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub payload: Value,
    pub buffers: Vec<Bytes>,
}

impl Reply {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            buffers: Vec::new(),
        }
    }

    /// Serialize any value into a reply payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    pub fn with_buffers(mut self, buffers: Vec<Bytes>) -> Self {
        self.buffers = buffers;
        self
    }

    /// Decode into a typed result, handing the attachments over to it.
    pub fn decode<R: Response>(self) -> Result<R, RpcError> {
        let mut result: R = serde_json::from_value(self.payload).map_err(RpcError::Decode)?;
        result.attach_buffers(self.buffers);
        Ok(result)
    }
}

/// A typed call result.
///
/// Results that carry binary data keep their buffers in a `#[serde(skip)]`
/// field and override [`attach_buffers`](Response::attach_buffers).
pub trait Response: DeserializeOwned + Send + 'static {
    fn attach_buffers(&mut self, _buffers: Vec<Bytes>) {}
}

macro_rules! plain_response {
    ($($ty:ty),* $(,)?) => {
        $(impl Response for $ty {})*
    };
}

plain_response!(Value, String, bool, u32, u64, i64, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Chunk {
        size: u64,
        #[serde(skip)]
        buffers: Vec<Bytes>,
    }

    impl Response for Chunk {
        fn attach_buffers(&mut self, buffers: Vec<Bytes>) {
            self.buffers = buffers;
        }
    }

    #[test]
    fn decode_moves_buffers_into_result() {
        let reply = Reply::new(json!({"size": 4}))
            .with_buffers(vec![Bytes::from_static(&[0, 0, 128, 63])]);

        let decoded: Chunk = reply.decode().unwrap();
        assert_eq!(decoded.size, 4);
        assert_eq!(decoded.buffers.len(), 1);
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let result = Reply::new(json!("nope")).decode::<Chunk>();
        assert!(matches!(result, Err(RpcError::Decode(_))));
    }
}

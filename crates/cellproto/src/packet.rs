//! Packets and their wire form.
//!
//! A packet travels as a JSON body plus an ordered list of binary
//! attachments. The attachments never appear inside the JSON; the channel
//! carries them next to it, the way notebook comm messages carry buffers.
//!
//! ```text
//! request:  {"id": "3--17", "type": "render", "payload": {"frame": 4}}  + [buffers...]
//! response: {"id": "3--17", "type": "response", "payload": {"size": 73728}} + [ch0, ch1]
//! failure:  {"id": "3--17", "type": "failure", "payload": "Unknown method."}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::WireError;

/// A call from client to server. `method` is `type` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPacket {
    #[serde(default, deserialize_with = "string_or_null")]
    pub id: String,

    #[serde(rename = "type", default, deserialize_with = "string_or_null")]
    pub method: String,

    #[serde(default)]
    pub payload: Value,

    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl RequestPacket {
    pub fn new(id: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            payload,
            buffers: Vec::new(),
        }
    }

    pub fn with_buffers(mut self, buffers: Vec<Bytes>) -> Self {
        self.buffers = buffers;
        self
    }
}

/// Whether a response carries a result or a failure description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Response,
    Failure,
}

/// A reply from server to client, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePacket {
    #[serde(default, deserialize_with = "string_or_null")]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ResponseKind,

    #[serde(default)]
    pub payload: Value,

    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl ResponsePacket {
    pub fn response(id: impl Into<String>, payload: Value, buffers: Vec<Bytes>) -> Self {
        Self {
            id: id.into(),
            kind: ResponseKind::Response,
            payload,
            buffers,
        }
    }

    pub fn failure(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: ResponseKind::Failure,
            payload,
            buffers: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind == ResponseKind::Failure
    }
}

/// One message as the host channel transports it.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// UTF-8 JSON body
    pub content: Bytes,
    pub buffers: Vec<Bytes>,
}

impl WireMessage {
    pub fn json(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            buffers: Vec::new(),
        }
    }
}

/// Conversion between a packet and its wire form.
pub trait WirePacket: Sized {
    fn to_wire(&self) -> Result<WireMessage, WireError>;
    fn from_wire(message: WireMessage) -> Result<Self, WireError>;
}

macro_rules! impl_wire_packet {
    ($ty:ty) => {
        impl WirePacket for $ty {
            fn to_wire(&self) -> Result<WireMessage, WireError> {
                let content = serde_json::to_vec(self).map_err(WireError::Encode)?;
                Ok(WireMessage {
                    content: Bytes::from(content),
                    buffers: self.buffers.clone(),
                })
            }

            fn from_wire(message: WireMessage) -> Result<Self, WireError> {
                let mut packet: $ty =
                    serde_json::from_slice(&message.content).map_err(WireError::Decode)?;
                packet.buffers = message.buffers;
                Ok(packet)
            }
        }
    };
}

impl_wire_packet!(RequestPacket);
impl_wire_packet!(ResponsePacket);

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn buffers_travel_beside_the_json_body() {
        let packet = RequestPacket::new("0--1", "render", json!({"frame": 3}))
            .with_buffers(vec![Bytes::from_static(b"\x01\x02")]);

        let wire = packet.to_wire().unwrap();
        let body: Value = serde_json::from_slice(&wire.content).unwrap();

        assert_eq!(body, json!({"id": "0--1", "type": "render", "payload": {"frame": 3}}));
        assert_eq!(wire.buffers, vec![Bytes::from_static(b"\x01\x02")]);

        let decoded = RequestPacket::from_wire(wire).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn missing_or_null_fields_decode_empty() {
        let packet = RequestPacket::from_wire(WireMessage::json(r#"{"payload": 1}"#)).unwrap();
        assert_eq!(packet.id, "");
        assert_eq!(packet.method, "");

        let packet =
            RequestPacket::from_wire(WireMessage::json(r#"{"id": null, "type": "meta"}"#)).unwrap();
        assert_eq!(packet.id, "");
        assert_eq!(packet.method, "meta");
        assert_eq!(packet.payload, Value::Null);
    }

    #[test]
    fn response_kind_uses_lowercase_tags() {
        let wire = ResponsePacket::failure("7--0", json!("boom")).to_wire().unwrap();
        let body: Value = serde_json::from_slice(&wire.content).unwrap();
        assert_eq!(body["type"], "failure");

        let bad = ResponsePacket::from_wire(WireMessage::json(r#"{"id": "1", "type": "maybe"}"#));
        assert!(matches!(bad, Err(WireError::Decode(_))));
    }
}

//! Client stub and payloads for the audio decoding backend.
//!
//! `render` answers with the chunk length in samples and one attachment per
//! channel, each a run of little-endian `f32` samples.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::reply::Response;

/// Shape of the remote audio clip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMeta {
    pub channel_count: u32,
    pub sample_count: u64,
    pub samples_per_second: u32,
    /// Number of render chunks the clip is split into.
    pub frames: u64,
}

impl Response for AudioMeta {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub frame: u64,
}

/// One rendered chunk: `size` samples per channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedChunk {
    pub size: u64,
    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl Response for RenderedChunk {
    fn attach_buffers(&mut self, buffers: Vec<Bytes>) {
        self.buffers = buffers;
    }
}

impl RenderedChunk {
    /// Decode every channel buffer into samples.
    pub fn channels(&self) -> Vec<Vec<f32>> {
        self.buffers.iter().map(|b| decode_samples(b)).collect()
    }
}

crate::rpc_interface! {
    /// Remote audio decoder.
    pub struct AudioRpc {
        /// Clip shape; fetched once per source.
        fn meta() -> AudioMeta;
        /// Render one chunk of every channel.
        fn render(RenderRequest) -> RenderedChunk;
    }
}

/// Pack samples as little-endian `f32`.
pub fn encode_samples(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 4);
    for sample in samples {
        buf.put_f32_le(*sample);
    }
    buf.freeze()
}

/// Unpack little-endian `f32` samples. A trailing partial sample is ignored.
pub fn decode_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

//! Clip preview client with a frame cache in front of it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use cellconf::PreviewConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::ResultCache;
use crate::error::RpcError;
use crate::reply::Response;

/// Which picture of a frame to render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    #[default]
    Clip,
    Diff,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Clip => "clip",
            ImageKind::Diff => "diff",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRequest {
    pub frame: u64,
    #[serde(default)]
    pub image: ImageKind,
}

impl FrameRequest {
    pub fn clip(frame: u64) -> Self {
        Self {
            frame,
            image: ImageKind::Clip,
        }
    }

    pub fn diff(frame: u64) -> Self {
        Self {
            frame,
            image: ImageKind::Diff,
        }
    }
}

/// A rendered frame: `(width, height)`, frame properties, and the encoded
/// picture as the first attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub size: (u32, u32),
    #[serde(default)]
    pub props: HashMap<String, Value>,
    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl Response for FrameResult {
    fn attach_buffers(&mut self, buffers: Vec<Bytes>) {
        self.buffers = buffers;
    }
}

impl FrameResult {
    /// The encoded picture, if the backend sent one.
    pub fn image(&self) -> Option<&Bytes> {
        self.buffers.first()
    }
}

crate::rpc_interface! {
    /// Remote clip preview renderer.
    pub struct PreviewRpc {
        /// Number of frames in the clip.
        fn length() -> u64;
        fn frame(FrameRequest) -> FrameResult;
    }
}

/// Cache key for one rendered picture of one clip.
pub fn frame_key(clip_id: &str, image: ImageKind, frame: u64) -> String {
    format!("{clip_id}--{image}--{frame}")
}

/// [`PreviewRpc`] with rendered frames kept in a [`ResultCache`].
#[derive(Clone)]
pub struct CachedPreview {
    clip_id: String,
    rpc: PreviewRpc,
    cache: ResultCache<FrameResult, RpcError>,
}

impl CachedPreview {
    /// `clip_id` scopes the cache keys so previews of different clips can
    /// share a cache.
    pub fn new(clip_id: impl Into<String>, rpc: PreviewRpc, capacity: usize) -> Self {
        Self::with_cache(clip_id, rpc, ResultCache::new(capacity))
    }

    /// Cache sized from the `[preview]` config section.
    pub fn from_config(
        clip_id: impl Into<String>,
        rpc: PreviewRpc,
        config: &PreviewConfig,
    ) -> Self {
        Self::new(clip_id, rpc, config.cache_capacity)
    }

    pub fn with_cache(
        clip_id: impl Into<String>,
        rpc: PreviewRpc,
        cache: ResultCache<FrameResult, RpcError>,
    ) -> Self {
        Self {
            clip_id: clip_id.into(),
            rpc,
            cache,
        }
    }

    pub fn open(&self) {
        self.rpc.open()
    }

    pub fn close(&self) {
        self.rpc.close()
    }

    /// Clip length, never cached.
    pub async fn length(&self) -> Result<u64, RpcError> {
        self.rpc.length().await
    }

    /// Render a frame, or return the cached rendering.
    pub async fn frame(&self, frame: u64, image: ImageKind) -> Result<FrameResult, Arc<RpcError>> {
        let key = frame_key(&self.clip_id, image, frame);
        let rpc = self.rpc.clone();
        self.cache
            .get(&key, move || async move {
                rpc.frame(FrameRequest { frame, image }).await
            })
            .await
    }

    /// Forget every cached frame.
    pub fn clear(&self) {
        self.cache.clear()
    }

    pub fn cache(&self) -> &ResultCache<FrameResult, RpcError> {
        &self.cache
    }
}

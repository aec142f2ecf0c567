//! Remote audio clip, fetched chunk by chunk.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cellproto::audio::{AudioMeta, AudioRpc, RenderRequest};
use cellproto::{CancelPolicy, RpcClient, RpcError};
use futures::Stream;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, trace};

use crate::stitch::AudioChunk;

/// An audio clip served by an [`AudioRpc`] backend.
///
/// Metadata is fetched once and kept for the lifetime of the source. Until
/// then every accessor reports zero.
pub struct AudioSource {
    rpc: AudioRpc,
    open: AtomicBool,
    meta: OnceCell<AudioMeta>,
    loaded: AtomicU64,
    metadata_tx: broadcast::Sender<()>,
}

impl AudioSource {
    pub fn new(client: Arc<RpcClient>, cancel: CancelPolicy) -> Self {
        Self::from_stub(client.make_proxy(cancel))
    }

    pub fn from_stub(rpc: AudioRpc) -> Self {
        let (metadata_tx, _) = broadcast::channel(16);
        Self {
            rpc,
            open: AtomicBool::new(false),
            meta: OnceCell::new(),
            loaded: AtomicU64::new(0),
            metadata_tx,
        }
    }

    pub fn open(&self) {
        self.rpc.open();
        self.open.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.rpc.close();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Fetch metadata if it has not been fetched yet, then notify
    /// metadata subscribers.
    pub async fn load_metadata(&self) -> Result<AudioMeta, RpcError> {
        let meta = *self
            .meta
            .get_or_try_init(|| async {
                let meta = self.rpc.meta().await?;
                debug!(
                    "audio metadata: {} frames, {} samples, {} Hz, {} channels",
                    meta.frames, meta.sample_count, meta.samples_per_second, meta.channel_count
                );
                Ok::<_, RpcError>(meta)
            })
            .await?;

        let _ = self.metadata_tx.send(());
        Ok(meta)
    }

    /// Receive a notification every time metadata is (re)announced.
    pub fn subscribe_metadata(&self) -> broadcast::Receiver<()> {
        self.metadata_tx.subscribe()
    }

    pub fn metadata(&self) -> Option<AudioMeta> {
        self.meta.get().copied()
    }

    pub fn channels(&self) -> u32 {
        self.meta.get().map(|m| m.channel_count).unwrap_or(0)
    }

    pub fn frames(&self) -> u64 {
        self.meta.get().map(|m| m.frames).unwrap_or(0)
    }

    pub fn samples(&self) -> u64 {
        self.meta.get().map(|m| m.sample_count).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.meta.get().map(|m| m.samples_per_second).unwrap_or(0)
    }

    /// Clip length in seconds; 0 before metadata is loaded.
    pub fn duration(&self) -> f64 {
        match self.sample_rate() {
            0 => 0.0,
            rate => self.samples() as f64 / f64::from(rate),
        }
    }

    /// Samples fetched so far, over all `render` calls.
    pub fn loaded(&self) -> u64 {
        self.loaded.load(Ordering::Acquire)
    }

    /// Fetch one chunk.
    pub async fn fetch(&self, frame: u64) -> Result<AudioChunk, RpcError> {
        let rendered = self.rpc.render(RenderRequest { frame }).await?;
        self.loaded.fetch_add(rendered.size, Ordering::AcqRel);
        trace!("fetched frame {} ({} samples)", frame, rendered.size);
        Ok(AudioChunk::from_rendered(&rendered))
    }

    /// Chunks from `start` to the end of the clip.
    ///
    /// The stream ends early once the source is closed; the consumer stops it
    /// early by dropping it.
    pub fn render(
        &self,
        start: u64,
    ) -> impl Stream<Item = Result<(u64, AudioChunk), RpcError>> + Send + '_ {
        async_stream::try_stream! {
            if self.frames() == 0 {
                self.load_metadata().await?;
            }

            for frame in start..self.frames() {
                if !self.is_open() {
                    debug!("source closed, stopping render at frame {}", frame);
                    break;
                }
                let chunk = self.fetch(frame).await?;
                yield (frame, chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::{register_tone, Tone};
    use cellproto::{rpc_pair, RpcServer};
    use futures::StreamExt;

    fn serve(tone: Tone) -> (AudioSource, RpcServer) {
        let (client_end, server_end) = rpc_pair();
        let mut server = RpcServer::new(Arc::new(server_end));
        register_tone(&mut server, tone);
        server.open();

        let client = RpcClient::new(Arc::new(client_end));
        (AudioSource::new(client, CancelPolicy::none()), server)
    }

    fn tone() -> Tone {
        Tone {
            frequency: 440.0,
            sample_rate: 24576,
            channels: 2,
            sample_count: 2 * 73728 + 1000,
        }
    }

    #[tokio::test]
    async fn accessors_are_zero_until_loaded() {
        let (source, _server) = serve(tone());
        assert_eq!(source.frames(), 0);
        assert_eq!(source.duration(), 0.0);

        source.open();
        let mut changed = source.subscribe_metadata();
        source.load_metadata().await.unwrap();

        assert_eq!(source.frames(), 3);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 24576);
        assert!(changed.try_recv().is_ok());

        // Reloading notifies again but keeps the first answer.
        source.load_metadata().await.unwrap();
        assert!(changed.try_recv().is_ok());
    }

    #[tokio::test]
    async fn render_streams_to_the_end() {
        let (source, _server) = serve(tone());
        source.open();

        let frames: Vec<(u64, usize)> = source
            .render(1)
            .map(|item| item.map(|(frame, chunk)| (frame, chunk.len())))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(frames, vec![(1, 73728), (2, 1000)]);
        assert_eq!(source.loaded(), 73728 + 1000);
    }

    #[tokio::test]
    async fn closed_source_yields_nothing() {
        let (source, _server) = serve(tone());
        source.open();
        source.load_metadata().await.unwrap();
        source.close();

        let chunks: Vec<_> = source.render(0).collect().await;
        assert!(chunks.is_empty());
    }
}

//! Streaming playback of an [`AudioSource`] on an [`AudioOutput`].
//!
//! One `play()` call is one session:
//!
//! 1. Load metadata, create an output context and suspend it.
//! 2. Seek: find the fetch unit holding the start sample and decide what
//!    the first segment continues from.
//! 3. Stream on the adaptive clock: every tick fetch chunks until the
//!    prefetch target is buffered, stitch them into one-second segments and
//!    schedule them back to back. Fetching pauses above the high watermark;
//!    the context is suspended while less than the low watermark is buffered.
//! 4. Tear down: close the context and mark the player paused, on every exit
//!    path.
//!
//! `pause()` suspends the context right away; the loop notices on its next
//! tick and ends the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cellproto::RpcError;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::clock::{run_clock, Ticker, TICK_PERIOD};
use crate::output::{AudioOutput, ContextState, OutputContext, OutputError};
use crate::source::AudioSource;
use crate::stitch::{calculate_position, AudioChunk, AudioSegment, Stitcher, SAMPLES_PER_REQUEST};

/// Buffered seconds after which a tick stops fetching.
pub const PREFETCH_SECONDS: f64 = 5.0;

/// Buffered seconds above which ticks skip fetching, unless they run late.
pub const BUFFER_HIGH_MARK_SECONDS: f64 = 30.0;

/// Buffered seconds below which the context is suspended.
pub const BUFFER_LOW_MARK_SECONDS: f64 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("audio backend call failed: {0}")]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("unplayable metadata: {channels} channels at {sample_rate} Hz")]
    InvalidMetadata { sample_rate: u32, channels: u32 },
}

/// Progress report published once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackEvent {
    /// Seconds into the clip the device has played to.
    pub current_time: f64,
    /// Seconds into the clip that have been scheduled.
    pub buffer_second: f64,
    pub playing: bool,
}

enum Slot {
    Idle,
    Loading,
    Running(Arc<dyn OutputContext>),
}

/// Plays one [`AudioSource`], one session at a time.
pub struct AudioPlayer {
    source: Arc<AudioSource>,
    output: Arc<dyn AudioOutput>,
    paused: AtomicBool,
    session: Mutex<Slot>,
    events: broadcast::Sender<PlaybackEvent>,
}

/// Ends a session however `play()` exits.
struct SessionGuard<'a> {
    player: &'a AudioPlayer,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let session = std::mem::replace(&mut *self.player.session.lock(), Slot::Idle);
        if let Slot::Running(ctx) = session {
            ctx.close();
        }
        self.player.paused.store(true, Ordering::Release);
        debug!("playback session torn down");
    }
}

impl AudioPlayer {
    pub fn new(source: Arc<AudioSource>, output: Arc<dyn AudioOutput>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            source,
            output,
            paused: AtomicBool::new(true),
            session: Mutex::new(Slot::Idle),
            events,
        }
    }

    pub fn source(&self) -> &Arc<AudioSource> {
        &self.source
    }

    /// Open the source and load its metadata.
    pub async fn open(&self) -> Result<(), PlayerError> {
        self.source.open();
        self.source.load_metadata().await?;
        Ok(())
    }

    /// Whether no session is active or tearing down.
    pub fn is_playable(&self) -> bool {
        matches!(*self.session.lock(), Slot::Idle)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Progress events, one per tick plus a final one when the session ends.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Suspend output and ask the running session to end.
    pub fn pause(&self) {
        if let Slot::Running(ctx) = &*self.session.lock() {
            ctx.suspend();
        }
        self.paused.store(true, Ordering::Release);
    }

    /// Play from `start_at` (in samples) until the end of the clip or a
    /// `pause()`. Returns at once if a session is already active.
    pub async fn play(&self, start_at: u64) -> Result<(), PlayerError> {
        {
            let mut session = self.session.lock();
            if !matches!(*session, Slot::Idle) || !self.is_paused() {
                debug!("play ignored, a session is already active");
                return Ok(());
            }
            *session = Slot::Loading;
            self.paused.store(false, Ordering::Release);
        }
        let _guard = SessionGuard { player: self };

        let meta = self.source.load_metadata().await?;
        if meta.samples_per_second == 0 || meta.channel_count == 0 {
            return Err(PlayerError::InvalidMetadata {
                sample_rate: meta.samples_per_second,
                channels: meta.channel_count,
            });
        }
        let sample_rate = meta.samples_per_second;

        let ctx = self
            .output
            .create_context(sample_rate, meta.channel_count)?;
        ctx.suspend();
        {
            let mut session = self.session.lock();
            *session = Slot::Running(ctx.clone());
        }
        info!(
            "playing from sample {} ({} frames at {} Hz)",
            start_at, meta.frames, sample_rate
        );

        let (frame, within) = calculate_position(start_at);
        let unit_left = SAMPLES_PER_REQUEST - within;
        let (previous, next_frame, offset) = if unit_left > u64::from(sample_rate) {
            // More than a second of this unit is left: start from a silent
            // placeholder and skip into the unit itself.
            let placeholder =
                AudioChunk::silent(meta.channel_count as usize, SAMPLES_PER_REQUEST as usize);
            (placeholder, frame, -(within as i64))
        } else {
            let chunk = self.source.fetch(frame).await?;
            (chunk, frame + 1, unit_left as i64)
        };

        let start_second = start_at as f64 / f64::from(sample_rate);
        let max_length =
            meta.sample_count.saturating_sub(start_at) as f64 / f64::from(sample_rate);

        let mut streaming = Streaming {
            player: self,
            ctx,
            frames: meta.frames,
            next_frame,
            stitcher: Stitcher::new(previous, offset, sample_rate),
            current_second: 0,
            start_second,
            max_length,
        };

        let result = run_clock(TICK_PERIOD, &mut streaming).await;
        streaming.report(false);
        if let Err(e) = &result {
            warn!("playback stopped: {}", e);
        }
        result
    }
}

/// Per-session streaming state, driven by the clock.
struct Streaming<'a> {
    player: &'a AudioPlayer,
    ctx: Arc<dyn OutputContext>,
    frames: u64,
    next_frame: u64,
    stitcher: Stitcher,
    /// Seconds scheduled so far; the start time of the next segment.
    current_second: u64,
    start_second: f64,
    max_length: f64,
}

impl Streaming<'_> {
    fn buffered_ahead(&self) -> f64 {
        self.current_second as f64 - self.ctx.current_time()
    }

    fn report(&self, playing: bool) {
        let event = PlaybackEvent {
            current_time: self.ctx.current_time().min(self.max_length) + self.start_second,
            buffer_second: (self.current_second as f64).min(self.max_length) + self.start_second,
            playing,
        };
        // No subscribers is fine.
        let _ = self.player.events.send(event);
    }

    fn resume(&self) {
        if self.ctx.state() == ContextState::Suspended && !self.player.is_paused() {
            self.ctx.resume();
        }
    }

    fn schedule(&mut self, segment: AudioSegment) -> Result<(), PlayerError> {
        self.ctx.schedule(segment, self.current_second as f64)?;
        self.current_second += 1;
        Ok(())
    }

    /// Fetch and schedule chunks until the prefetch target is reached.
    async fn fill(&mut self) -> Result<(), PlayerError> {
        let player = self.player;
        let chunks = player.source.render(self.next_frame);
        futures::pin_mut!(chunks);

        while let Some(item) = chunks.next().await {
            let (frame, chunk) = item?;
            if player.is_paused() {
                break;
            }

            if self.buffered_ahead() < BUFFER_LOW_MARK_SECONDS {
                self.ctx.suspend();
            }

            self.next_frame = frame + 1;
            for segment in self.stitcher.push(chunk) {
                self.schedule(segment)?;
            }
            if self.next_frame >= self.frames {
                if let Some(tail) = self.stitcher.flush() {
                    self.schedule(tail)?;
                }
            }
            trace!(
                "frame {} stitched, scheduled through {}s",
                frame,
                self.current_second
            );

            if self.buffered_ahead() >= PREFETCH_SECONDS {
                break;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<'a> Ticker for Streaming<'a> {
    type Error = PlayerError;

    async fn tick(&mut self, skipped: u32) -> Result<bool, PlayerError> {
        self.report(!self.player.is_paused());

        if self.player.is_paused() {
            return Ok(false);
        }

        // Everything is fetched; keep going until the device catches up.
        if self.next_frame >= self.frames {
            if let Some(tail) = self.stitcher.flush() {
                self.schedule(tail)?;
            }
            self.resume();
            return Ok(self.current_second as f64 >= self.ctx.current_time());
        }

        if skipped == 0 && self.buffered_ahead() > BUFFER_HIGH_MARK_SECONDS {
            return Ok(true);
        }

        self.fill().await?;
        self.resume();

        Ok(!self.player.is_paused())
    }
}

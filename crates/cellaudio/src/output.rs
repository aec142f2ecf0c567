//! Output device contract and a virtual device.
//!
//! A context plays scheduled one-second segments against its own clock. The
//! clock only advances while the context is running, so suspending it holds
//! playback in place while more audio is fetched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::stitch::AudioSegment;

/// Errors from the output device.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("output context is closed")]
    Closed,

    #[error("output device unavailable: {0}")]
    Unavailable(String),

    #[error("segment shape {channels}x{len} does not match context {expected_channels}x{expected_len}")]
    InvalidSegment {
        channels: usize,
        len: usize,
        expected_channels: usize,
        expected_len: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// Creates playback contexts.
pub trait AudioOutput: Send + Sync {
    fn create_context(
        &self,
        sample_rate: u32,
        channels: u32,
    ) -> Result<Arc<dyn OutputContext>, OutputError>;
}

/// One playback session on an output device.
pub trait OutputContext: Send + Sync {
    /// Seconds of audio played since the context was created.
    fn current_time(&self) -> f64;

    fn state(&self) -> ContextState;

    fn suspend(&self);

    fn resume(&self);

    /// Queue `segment` to start at `at_second` on the context clock.
    fn schedule(&self, segment: AudioSegment, at_second: f64) -> Result<(), OutputError>;

    /// Stop playback and release the device. Idempotent.
    fn close(&self);
}

/// Playback position that advances with wall time only while running.
#[derive(Debug, Default)]
pub struct DeviceClock {
    /// When the clock last started running (None if stopped)
    start_instant: Option<Instant>,

    /// Time accumulated over previous running spans
    accumulated: Duration,
}

impl DeviceClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.start_instant.is_none() {
            self.start_instant = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.start_instant.is_some()
    }

    /// Stop without resetting position.
    pub fn pause(&mut self) {
        if let Some(start) = self.start_instant.take() {
            self.accumulated += start.elapsed();
        }
    }

    pub fn position(&self) -> Duration {
        match self.start_instant {
            Some(start) => self.accumulated + start.elapsed(),
            None => self.accumulated,
        }
    }
}

/// A segment as the virtual device received it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSegment {
    pub at_second: f64,
    pub segment: AudioSegment,
}

struct ContextInner {
    state: ContextState,
    clock: DeviceClock,
    scheduled: Vec<ScheduledSegment>,
}

/// Context of a [`VirtualOutput`]: keeps every scheduled segment.
pub struct VirtualContext {
    sample_rate: u32,
    channels: u32,
    inner: Mutex<ContextInner>,
}

impl VirtualContext {
    fn new(sample_rate: u32, channels: u32) -> Self {
        let mut clock = DeviceClock::new();
        clock.start();
        Self {
            sample_rate,
            channels,
            inner: Mutex::new(ContextInner {
                state: ContextState::Running,
                clock,
                scheduled: Vec::new(),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Segments scheduled so far, in scheduling order.
    pub fn scheduled(&self) -> Vec<ScheduledSegment> {
        self.inner.lock().scheduled.clone()
    }

    /// Start times of the scheduled segments.
    pub fn scheduled_seconds(&self) -> Vec<f64> {
        self.inner
            .lock()
            .scheduled
            .iter()
            .map(|s| s.at_second)
            .collect()
    }
}

impl OutputContext for VirtualContext {
    fn current_time(&self) -> f64 {
        self.inner.lock().clock.position().as_secs_f64()
    }

    fn state(&self) -> ContextState {
        self.inner.lock().state
    }

    fn suspend(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ContextState::Running {
            inner.clock.pause();
            inner.state = ContextState::Suspended;
            trace!("virtual context suspended at {:?}", inner.clock.position());
        }
    }

    fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ContextState::Suspended {
            inner.clock.start();
            inner.state = ContextState::Running;
            trace!("virtual context resumed at {:?}", inner.clock.position());
        }
    }

    fn schedule(&self, segment: AudioSegment, at_second: f64) -> Result<(), OutputError> {
        let expected_channels = self.channels as usize;
        let expected_len = self.sample_rate as usize;
        if segment.channels.len() != expected_channels || segment.len() != expected_len {
            return Err(OutputError::InvalidSegment {
                channels: segment.channels.len(),
                len: segment.len(),
                expected_channels,
                expected_len,
            });
        }

        let mut inner = self.inner.lock();
        if inner.state == ContextState::Closed {
            return Err(OutputError::Closed);
        }
        inner.scheduled.push(ScheduledSegment { at_second, segment });
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state != ContextState::Closed {
            inner.clock.pause();
            inner.state = ContextState::Closed;
            debug!(
                "virtual context closed after {:?} with {} segments",
                inner.clock.position(),
                inner.scheduled.len()
            );
        }
    }
}

/// An output device that plays nothing and remembers everything.
#[derive(Default)]
pub struct VirtualOutput {
    contexts: Mutex<Vec<Arc<VirtualContext>>>,
    created: AtomicUsize,
}

impl VirtualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn last_context(&self) -> Option<Arc<VirtualContext>> {
        self.contexts.lock().last().cloned()
    }
}

impl AudioOutput for VirtualOutput {
    fn create_context(
        &self,
        sample_rate: u32,
        channels: u32,
    ) -> Result<Arc<dyn OutputContext>, OutputError> {
        if sample_rate == 0 || channels == 0 {
            return Err(OutputError::Unavailable(format!(
                "cannot open {channels} channels at {sample_rate} Hz"
            )));
        }

        let context = Arc::new(VirtualContext::new(sample_rate, channels));
        self.contexts.lock().push(context.clone());
        self.created.fetch_add(1, Ordering::AcqRel);
        debug!("virtual context created: {} Hz, {} channels", sample_rate, channels);
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(channels: usize, len: usize) -> AudioSegment {
        AudioSegment {
            sample_rate: len as u32,
            channels: vec![vec![0.0; len]; channels],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clock_only_runs_while_running() {
        let output = VirtualOutput::new();
        let ctx = output.create_context(100, 1).unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        ctx.suspend();
        assert_eq!(ctx.state(), ContextState::Suspended);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(ctx.current_time(), 1.0);

        ctx.resume();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ctx.current_time(), 3.0);
    }

    #[tokio::test]
    async fn schedule_checks_shape_and_state() {
        let output = VirtualOutput::new();
        let ctx = output.create_context(100, 2).unwrap();

        assert!(matches!(
            ctx.schedule(segment(1, 100), 0.0),
            Err(OutputError::InvalidSegment { .. })
        ));
        ctx.schedule(segment(2, 100), 0.0).unwrap();

        ctx.close();
        ctx.close();
        assert_eq!(ctx.state(), ContextState::Closed);
        assert!(matches!(ctx.schedule(segment(2, 100), 1.0), Err(OutputError::Closed)));

        let recorded = output.last_context().unwrap();
        assert_eq!(recorded.scheduled_seconds(), vec![0.0]);
        assert_eq!(output.contexts_created(), 1);
    }

    #[test]
    fn zero_rate_is_unavailable() {
        let output = VirtualOutput::new();
        assert!(matches!(
            output.create_context(0, 2),
            Err(OutputError::Unavailable(_))
        ));
        assert_eq!(output.contexts_created(), 0);
    }
}

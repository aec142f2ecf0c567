//! cellaudio - adaptive streaming playback of remote audio
//!
//! An [`AudioSource`] pulls decoded chunks from an audio backend over
//! `cellproto`. An [`AudioPlayer`] stitches them into one-second segments
//! and keeps an [`OutputContext`] a few seconds ahead of the listener,
//! throttled by buffer watermarks and paced by the adaptive [`clock`].

pub mod clock;
pub mod output;
pub mod player;
pub mod source;
pub mod stitch;
pub mod tone;

pub use clock::{run_clock, Ticker, MIN_SLEEP, TICK_PERIOD};
pub use output::{
    AudioOutput, ContextState, DeviceClock, OutputContext, OutputError, ScheduledSegment,
    VirtualContext, VirtualOutput,
};
pub use player::{
    AudioPlayer, PlaybackEvent, PlayerError, BUFFER_HIGH_MARK_SECONDS, BUFFER_LOW_MARK_SECONDS,
    PREFETCH_SECONDS,
};
pub use source::AudioSource;
pub use stitch::{
    build_buffer, calculate_position, flush_tail, AudioChunk, AudioSegment, Stitcher,
    COMBINED_FRAMES, SAMPLES_PER_DECODE_FRAME, SAMPLES_PER_REQUEST,
};
pub use tone::{register_tone, Tone};

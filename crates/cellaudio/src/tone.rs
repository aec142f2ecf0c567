//! A synthetic audio backend serving a sine tone.
//!
//! Answers `meta` and `render` the way a decoding backend would, which is
//! enough to drive an [`AudioPlayer`](crate::AudioPlayer) end to end without
//! a real decoder.

use std::f64::consts::TAU;

use anyhow::{bail, Context};
use cellconf::AudioConfig;
use cellproto::audio::{encode_samples, AudioMeta, RenderRequest};
use cellproto::{Reply, RpcServer};
use serde_json::json;

use crate::stitch::SAMPLES_PER_REQUEST;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f64,
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_count: u64,
}

impl Tone {
    /// A stereo tone as configured.
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self {
            frequency: audio.tone_hz,
            sample_rate: audio.sample_rate,
            channels: 2,
            sample_count: (audio.tone_seconds * f64::from(audio.sample_rate)).round() as u64,
        }
    }

    pub fn frames(&self) -> u64 {
        self.sample_count.div_ceil(SAMPLES_PER_REQUEST)
    }

    pub fn meta(&self) -> AudioMeta {
        AudioMeta {
            channel_count: self.channels,
            sample_count: self.sample_count,
            samples_per_second: self.sample_rate,
            frames: self.frames(),
        }
    }

    /// Samples of one fetch unit, the same for every channel.
    pub fn samples(&self, frame: u64) -> Vec<f32> {
        let start = frame * SAMPLES_PER_REQUEST;
        let end = (start + SAMPLES_PER_REQUEST).min(self.sample_count);
        let rate = f64::from(self.sample_rate.max(1));

        (start..end)
            .map(|n| (TAU * self.frequency * n as f64 / rate).sin() as f32 * 0.5)
            .collect()
    }

    pub fn render(&self, frame: u64) -> anyhow::Result<Reply> {
        if frame >= self.frames() {
            bail!("frame {} is past the end of the clip ({} frames)", frame, self.frames());
        }
        let samples = self.samples(frame);
        let buffer = encode_samples(&samples);
        let buffers = (0..self.channels).map(|_| buffer.clone()).collect();

        Ok(Reply::new(json!({ "size": samples.len() })).with_buffers(buffers))
    }
}

/// Register `meta` and `render` for `tone` on `server`.
pub fn register_tone(server: &mut RpcServer, tone: Tone) {
    server
        .register_fn("meta", move |_, _| {
            Reply::json(&tone.meta()).context("failed to encode audio metadata")
        })
        .register_fn("render", move |payload, _| {
            let request: RenderRequest =
                serde_json::from_value(payload).context("invalid render request")?;
            tone.render(request.frame)
        });
}

//! Stitching fetched chunks into one-second output segments.
//!
//! Chunks arrive in fetch units of [`SAMPLES_PER_REQUEST`] samples, which do
//! not line up with second boundaries. Every segment handed to the output
//! device is exactly one second long, so each new chunk is cut against the
//! tail of the previous one.
//!
//! ```text
//!              offset
//!             <------>
//! previous  |.........xxxxxxxx|
//! next                        |yyyyyyyyyyyyyyyyyyyyyyyyyy|zz|
//! segments            [xxxxxxxxyyyy][yyyyyyyyyyyy][yyyyyyyyyyyy]
//!                                                 ^ rest carried as next offset
//! ```

use cellproto::audio::RenderedChunk;

/// Decoder frames combined into one fetch unit.
pub const COMBINED_FRAMES: u64 = 24;

/// Samples produced per decoder frame.
pub const SAMPLES_PER_DECODE_FRAME: u64 = 3072;

/// Samples per channel in one `render` response.
pub const SAMPLES_PER_REQUEST: u64 = COMBINED_FRAMES * SAMPLES_PER_DECODE_FRAME;

/// One fetched chunk: a run of samples per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioChunk {
    pub channels: Vec<Vec<f32>>,
}

impl AudioChunk {
    pub fn new(channels: Vec<Vec<f32>>) -> Self {
        Self { channels }
    }

    /// A zero-filled chunk.
    pub fn silent(channels: usize, len: usize) -> Self {
        Self {
            channels: vec![vec![0.0; len]; channels],
        }
    }

    pub fn from_rendered(rendered: &RenderedChunk) -> Self {
        Self::new(rendered.channels())
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// One second of audio, ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioSegment {
    fn silent(channels: usize, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; sample_rate as usize]; channels],
        }
    }

    /// Copy `src[from..]` of every channel into this segment at `at`.
    ///
    /// Copies stop at the end of either side; anything not covered stays
    /// silent.
    fn copy_from(&mut self, chunk: &AudioChunk, from: usize, at: usize) {
        for (dst, src) in self.channels.iter_mut().zip(&chunk.channels) {
            if from >= src.len() || at >= dst.len() {
                continue;
            }
            let n = (src.len() - from).min(dst.len() - at);
            dst[at..at + n].copy_from_slice(&src[from..from + n]);
        }
    }

    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split an absolute sample position into `(fetch unit, offset within it)`.
pub fn calculate_position(sample: u64) -> (u64, u64) {
    (sample / SAMPLES_PER_REQUEST, sample % SAMPLES_PER_REQUEST)
}

/// Cut `next` into one-second segments, continuing from `previous`.
///
/// With a non-negative `offset`, the first segment takes the last `offset`
/// samples of `previous` followed by the head of `next`. A negative offset
/// means there is nothing to carry from `previous`; the first `-offset`
/// samples of `next` are skipped instead.
///
/// Full segments are emitted while more than one second of `next` remains.
/// The returned count of samples left at the end of `next` is the offset for
/// the following call.
pub fn build_buffer(
    previous: &AudioChunk,
    next: &AudioChunk,
    offset: i64,
    sample_rate: u32,
) -> (Vec<AudioSegment>, i64) {
    let length = i64::from(sample_rate);
    let channels = next.channel_count().max(previous.channel_count());
    let next_len = next.len() as i64;
    let mut segments = Vec::new();

    let mut rest = if offset >= 0 {
        let mut segment = AudioSegment::silent(channels, sample_rate);
        if offset > 0 {
            let from = (previous.len() as i64 - offset).max(0) as usize;
            segment.copy_from(previous, from, 0);
        }
        segment.copy_from(next, 0, offset as usize);
        segments.push(segment);

        next_len - (length - offset)
    } else {
        next_len + offset
    };

    while rest > length {
        let mut segment = AudioSegment::silent(channels, sample_rate);
        segment.copy_from(next, (next_len - rest) as usize, 0);
        segments.push(segment);
        rest -= length;
    }

    (segments, rest)
}

/// The samples of `last` that no segment has covered yet, padded to one
/// second. Used once the final chunk has been stitched.
pub fn flush_tail(last: &AudioChunk, offset: i64, sample_rate: u32) -> Option<AudioSegment> {
    if offset <= 0 || last.is_empty() {
        return None;
    }
    let from = (last.len() as i64 - offset).max(0) as usize;
    let mut segment = AudioSegment::silent(last.channel_count(), sample_rate);
    segment.copy_from(last, from, 0);
    Some(segment)
}

/// Running stitch state across the chunks of one playback session.
///
/// Wraps [`build_buffer`] and keeps `previous` and `offset` between calls.
/// A chunk too short to complete the pending segment (any chunk once the
/// sample rate exceeds [`SAMPLES_PER_REQUEST`], or a short final chunk) is
/// appended to the carried samples instead of being padded.
#[derive(Debug, Clone)]
pub struct Stitcher {
    previous: AudioChunk,
    offset: i64,
    sample_rate: u32,
}

impl Stitcher {
    /// Continue from the last `offset` samples of `previous`, or skip the
    /// first `-offset` samples of the next chunk.
    pub fn new(previous: AudioChunk, offset: i64, sample_rate: u32) -> Self {
        Self {
            previous,
            offset,
            sample_rate,
        }
    }

    /// Samples carried into the next segment; negative while skipping.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Stitch `next`, returning every segment it completes.
    pub fn push(&mut self, next: AudioChunk) -> Vec<AudioSegment> {
        let missing = i64::from(self.sample_rate) - self.offset;
        if self.offset >= 0 && (next.len() as i64) < missing {
            self.carry(next);
            return Vec::new();
        }

        let (segments, leftover) =
            build_buffer(&self.previous, &next, self.offset, self.sample_rate);
        self.previous = next;
        self.offset = leftover;
        segments
    }

    /// The carried samples as a final zero-padded segment.
    pub fn flush(&mut self) -> Option<AudioSegment> {
        let tail = flush_tail(&self.previous, self.offset, self.sample_rate);
        if tail.is_some() {
            self.offset = 0;
        }
        tail
    }

    /// Append `next` to the carried tail of `previous`.
    fn carry(&mut self, next: AudioChunk) {
        let keep = self.offset.max(0) as usize;
        let channels = self.previous.channel_count().max(next.channel_count());

        let merged = (0..channels)
            .map(|ch| {
                let prev = self.previous.channels.get(ch).map(Vec::as_slice).unwrap_or(&[]);
                let head = next.channels.get(ch).map(Vec::as_slice).unwrap_or(&[]);
                let mut samples = Vec::with_capacity(keep + head.len());
                samples.extend_from_slice(&prev[prev.len().saturating_sub(keep)..]);
                samples.extend_from_slice(head);
                samples
            })
            .collect();

        self.offset += next.len() as i64;
        self.previous = AudioChunk::new(merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A mono chunk whose samples count up from `start`.
    fn ramp(start: usize, len: usize) -> AudioChunk {
        AudioChunk::new(vec![(start..start + len).map(|s| s as f32).collect()])
    }

    fn concat(segments: &[AudioSegment]) -> Vec<f32> {
        segments.iter().flat_map(|s| s.channels[0].clone()).collect()
    }

    #[test]
    fn position_splits_on_fetch_units() {
        assert_eq!(SAMPLES_PER_REQUEST, 73728);
        assert_eq!(calculate_position(0), (0, 0));
        assert_eq!(calculate_position(73728 + 5), (1, 5));
    }

    #[test]
    fn half_second_carry_yields_two_segments() {
        let previous = ramp(0, 96000);
        let next = ramp(96000, 96000);

        let (segments, leftover) = build_buffer(&previous, &next, 48000, 48000);

        assert_eq!(segments.len(), 2);
        // Exactly one second of `next` is left, which is not "more than one
        // second", so it is carried instead of emitted. Reporting 0 here would
        // drop those samples from the stream.
        assert_eq!(leftover, 48000);
        assert_eq!(concat(&segments), (48000..144000).map(|s| s as f32).collect::<Vec<_>>());
    }

    #[test]
    fn segments_reproduce_the_stream() {
        let rate = 1000;
        let previous = ramp(0, 2500);
        let next = ramp(2500, 2500);

        let (segments, leftover) = build_buffer(&previous, &next, 300, rate);

        // previous[2200..2500] + next[..700], then next[700..1700]
        assert_eq!(segments.len(), 2);
        assert_eq!(concat(&segments), (2200..4200).map(|s| s as f32).collect::<Vec<_>>());
        assert_eq!(leftover, 800);

        // Carrying the leftover into the following chunk keeps the stream seamless.
        let after = ramp(5000, 2500);
        let (segments, _) = build_buffer(&next, &after, leftover, rate);
        assert_eq!(segments[0].channels[0][0], 4200.0);
    }

    #[test]
    fn zero_offset_starts_at_head_of_next() {
        let (segments, leftover) = build_buffer(&AudioChunk::silent(1, 10), &ramp(0, 2500), 0, 1000);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].channels[0][0], 0.0);
        assert_eq!(segments[1].channels[0][0], 1000.0);
        assert_eq!(leftover, 500);
    }

    #[test]
    fn negative_offset_skips_head_of_next() {
        let placeholder = AudioChunk::silent(1, 2500);
        let (segments, leftover) = build_buffer(&placeholder, &ramp(0, 2500), -200, 1000);

        assert_eq!(segments.len(), 2);
        assert_eq!(concat(&segments), (200..2200).map(|s| s as f32).collect::<Vec<_>>());
        assert_eq!(leftover, 300);
    }

    #[test]
    fn short_final_chunk_is_zero_padded() {
        let (segments, leftover) = build_buffer(&ramp(0, 2500), &ramp(2500, 100), 500, 1000);

        assert_eq!(segments.len(), 1);
        let samples = &segments[0].channels[0];
        assert_eq!(samples[0], 2000.0);
        assert_eq!(samples[599], 2599.0);
        assert_eq!(samples[600], 0.0);
        assert!(leftover < 0);
        assert!(flush_tail(&ramp(2500, 100), leftover, 1000).is_none());
    }

    #[test]
    fn tail_is_flushed_padded() {
        let last = ramp(0, 2500);
        let tail = flush_tail(&last, 500, 1000).unwrap();

        assert_eq!(tail.len(), 1000);
        assert_eq!(tail.channels[0][0], 2000.0);
        assert_eq!(tail.channels[0][499], 2499.0);
        assert_eq!(tail.channels[0][500], 0.0);
    }

    fn feed(stitcher: &mut Stitcher, chunks: impl IntoIterator<Item = AudioChunk>) -> Vec<f32> {
        let mut segments = Vec::new();
        for chunk in chunks {
            segments.extend(stitcher.push(chunk));
        }
        segments.extend(stitcher.flush());
        concat(&segments)
    }

    #[test]
    fn chunks_shorter_than_a_second_are_carried() {
        let mut stitcher = Stitcher::new(AudioChunk::default(), 0, 1000);
        let chunks = (0..7).map(|n| ramp(n * 300, 300));

        let played = feed(&mut stitcher, chunks);

        // 2100 samples: two full seconds plus 100 padded.
        assert_eq!(played.len(), 3000);
        assert_eq!(&played[..2100], &(0..2100).map(|s| s as f32).collect::<Vec<_>>()[..]);
        assert!(played[2100..].iter().all(|s| *s == 0.0));
        assert_eq!(stitcher.offset(), 0);
    }

    #[test]
    fn stitcher_skips_into_the_first_chunk() {
        let mut stitcher = Stitcher::new(AudioChunk::silent(1, 2500), -200, 1000);

        let played = feed(&mut stitcher, [ramp(0, 2500), ramp(2500, 2500)]);

        assert_eq!(&played[..4800], &(200..5000).map(|s| s as f32).collect::<Vec<_>>()[..]);
        assert_eq!(played.len(), 5000);
    }

    #[test]
    fn every_channel_is_stitched() {
        let previous = AudioChunk::new(vec![vec![1.0; 1500], vec![2.0; 1500]]);
        let next = AudioChunk::new(vec![vec![3.0; 1500], vec![4.0; 1500]]);

        let (segments, _) = build_buffer(&previous, &next, 250, 1000);

        assert_eq!(segments[0].channels.len(), 2);
        assert_eq!(segments[0].channels[1][249], 2.0);
        assert_eq!(segments[0].channels[1][250], 4.0);
    }
}

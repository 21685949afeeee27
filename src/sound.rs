//! One opened file: demuxer/decoder/resampler handles, formats, ring buffer,
//! and the cursor/seek/eof atomics shared with readers outside the audio thread.
//!
//! Split in two per the design notes' "reference-counted audio objects": the
//! lightweight [`SoundShared`] carries only the atomics a façade reader needs
//! and is safe to clone across threads; the heavier [`Sound`] (decoder,
//! resampler, ring, scratch buffers) is owned exclusively by the engine's
//! audio thread and is never touched from anywhere else. The engine mutex
//! only ever rebinds which `Arc<SoundShared>` is current — it never guards
//! access to the decode state itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::decoder::AudioDecoder;
use crate::error::Result;
use crate::format::AudioFormat;
use crate::resampler::Resampler;
use crate::ring::RingBuffer;

/// Ring sized to hold this many seconds of target-format audio.
pub const RING_BUFFER_SECONDS: f64 = 5.0;
/// Decode scratch sized to this many seconds of target-format audio, or
/// [`MIN_DECODE_BUFFER_FRAMES`], whichever is larger.
pub const DECODE_BUFFER_SECONDS: f64 = 0.5;
pub const MIN_DECODE_BUFFER_FRAMES: usize = 4096;

/// Cross-thread-safe cursor/seek/eof state for one open Sound.
pub struct SoundShared {
    pub path: PathBuf,
    pub target_format: AudioFormat,
    pub duration_frames: u64,
    cursor_frames: AtomicU64,
    seek_target_frame: AtomicU64,
    seek_pending: AtomicBool,
    eof: AtomicBool,
    decode_error_count: AtomicU64,
}

impl SoundShared {
    pub fn cursor_frames(&self) -> u64 {
        self.cursor_frames.load(Ordering::Relaxed)
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Relaxed)
    }

    /// Malformed packets dropped by the decoder so far for this file.
    pub fn decode_error_count(&self) -> u64 {
        self.decode_error_count.load(Ordering::Relaxed)
    }

    pub fn is_seek_pending(&self) -> bool {
        self.seek_pending.load(Ordering::Acquire)
    }

    /// Request a seek to `frame` (clamped to the known duration). Consumed by
    /// the audio thread on its next `decode_step`.
    pub fn request_seek(&self, frame: u64) {
        let clamped = if self.duration_frames > 0 { frame.min(self.duration_frames) } else { frame };
        self.seek_target_frame.store(clamped, Ordering::Relaxed);
        self.seek_pending.store(true, Ordering::Release);
    }
}

/// Per-open-file decode state, owned exclusively by the engine's audio thread.
pub struct Sound {
    pub shared: Arc<SoundShared>,
    pub source_format: AudioFormat,
    decoder: AudioDecoder,
    resampler: Resampler,
    ring: RingBuffer,
    raw_scratch: Vec<f32>,
    /// Resampled/remixed output produced but not yet written into the ring
    /// because it didn't fit; written first on the next fill attempt.
    leftover: Vec<f32>,
    /// Source-format frames still to discard at the start of the stream
    /// (encoder priming delay, from container gapless metadata).
    start_skip_remaining: u64,
    /// Source-format frames decoded so far, used to detect the trailing
    /// padding region so it can be trimmed.
    source_frames_decoded: u64,
    source_duration_frames: u64,
    end_skip: u64,
}

impl Sound {
    /// Open `path`, configure a resampler into `target_format`, and size the
    /// ring and decode scratch per the buffer-sizing constants above.
    pub fn prepare(path: &Path, target_format: AudioFormat) -> Result<Self> {
        let mut decoder = AudioDecoder::open(path)?;
        let source_format = decoder.source_format().clone();
        let resampler = Resampler::new(source_format.sample_rate, target_format.sample_rate, source_format.channels);

        let source_duration_frames = decoder.duration_frames();
        let duration_frames_target = if resampler.needs_resampling() {
            (source_duration_frames as f64 * resampler.ratio()).round() as u64
        } else {
            source_duration_frames
        };

        let ring_capacity = (RING_BUFFER_SECONDS * target_format.sample_rate as f64).ceil() as usize
            * target_format.channels as usize;
        let decode_capacity = (DECODE_BUFFER_SECONDS * target_format.sample_rate as f64)
            .max(MIN_DECODE_BUFFER_FRAMES as f64) as usize
            * target_format.channels as usize;

        let start_skip = decoder.start_skip();
        let end_skip = decoder.end_skip();

        let shared = Arc::new(SoundShared {
            path: path.to_path_buf(),
            target_format: target_format.clone(),
            duration_frames: duration_frames_target,
            cursor_frames: AtomicU64::new(0),
            seek_target_frame: AtomicU64::new(0),
            seek_pending: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            decode_error_count: AtomicU64::new(0),
        });

        Ok(Self {
            shared,
            source_format,
            decoder,
            resampler,
            ring: RingBuffer::new(ring_capacity, target_format.channels as usize),
            raw_scratch: Vec::with_capacity(decode_capacity),
            leftover: Vec::new(),
            start_skip_remaining: start_skip,
            source_frames_decoded: 0,
            source_duration_frames,
            end_skip,
        })
    }

    pub fn ring_available(&self) -> usize {
        self.ring.available()
    }

    pub fn ring_space(&self) -> usize {
        self.ring.space()
    }

    /// Resampled/remixed samples produced but not yet written into the ring
    /// because it didn't have room — including the resampler's flush tail at
    /// EOF, which may not fit in a single `fill_ring_once` call.
    pub fn has_pending_leftover(&self) -> bool {
        !self.leftover.is_empty()
    }

    /// Read up to `dst.len()` samples from the ring, advancing cursor_frames
    /// by the corresponding frame count. Returns the number of samples read.
    pub fn read_into(&mut self, dst: &mut [f32]) -> usize {
        let channels = self.shared.target_format.channels as usize;
        let n = dst.len().min(self.ring.available());
        let n = (n / channels) * channels;
        if n > 0 {
            self.ring.read(&mut dst[..n]);
            self.shared.cursor_frames.fetch_add((n / channels) as u64, Ordering::Relaxed);
        }
        n
    }

    /// If a seek is pending, reset resampler/ring, reposition the decoder,
    /// and clear the pending flag. No-op otherwise.
    pub fn apply_pending_seek(&mut self) -> Result<()> {
        if !self.shared.is_seek_pending() {
            return Ok(());
        }
        let target_frame = self.shared.seek_target_frame.load(Ordering::Relaxed);
        let source_frame = if self.resampler.needs_resampling() {
            (target_frame as f64 / self.resampler.ratio()) as u64
        } else {
            target_frame
        };

        self.resampler.reset();
        self.decoder.seek_to_frame(source_frame)?;
        self.ring.clear();
        self.leftover.clear();
        self.source_frames_decoded = source_frame;
        self.start_skip_remaining = 0;

        self.shared.eof.store(false, Ordering::Relaxed);
        self.shared.cursor_frames.store(target_frame, Ordering::Relaxed);
        self.shared.seek_pending.store(false, Ordering::Release);
        Ok(())
    }

    /// Decode, resample, and write one unit of work into the ring. Returns
    /// `Ok(true)` if the stream may still have data (caller should keep
    /// calling while ring space remains), `Ok(false)` once end-of-stream has
    /// been fully drained into the ring.
    pub fn fill_ring_once(&mut self) -> Result<bool> {
        if !self.leftover.is_empty() {
            self.drain_leftover_into_ring();
            return Ok(true);
        }

        if self.shared.is_eof() {
            return Ok(false);
        }

        self.raw_scratch.clear();
        let more = self.decoder.decode_next(&mut self.raw_scratch)?;
        self.shared.decode_error_count.store(self.decoder.malformed_packet_count(), Ordering::Relaxed);
        if !more {
            let tail = self.resampler.flush();
            self.leftover.extend(tail);
            self.shared.eof.store(true, Ordering::Relaxed);
            self.drain_leftover_into_ring();
            return Ok(!self.leftover.is_empty());
        }

        let channels = self.source_format.channels as usize;
        let frames_in_packet = self.raw_scratch.len() / channels.max(1);
        self.source_frames_decoded += frames_in_packet as u64;

        let trimmed = self.trim_start_and_end_skip(frames_in_packet, channels);
        let resampled = self.resampler.process(&trimmed);
        let remixed = remix_channels(&resampled, self.source_format.channels, self.shared.target_format.channels);
        self.leftover.extend(remixed);
        self.drain_leftover_into_ring();
        Ok(true)
    }

    /// Discard start-skip frames at the head of the stream and end-skip
    /// frames once the packet crosses into the trailing padding region.
    fn trim_start_and_end_skip(&mut self, frames_in_packet: usize, channels: usize) -> Vec<f32> {
        let mut start_frame = 0usize;
        if self.start_skip_remaining > 0 {
            let skip_frames = (self.start_skip_remaining as usize).min(frames_in_packet);
            start_frame = skip_frames;
            self.start_skip_remaining -= skip_frames as u64;
        }

        let mut end_frame = frames_in_packet;
        if self.source_duration_frames > 0 && self.end_skip > 0 {
            let cutoff = self.source_duration_frames.saturating_sub(self.end_skip);
            let packet_start_frame = self.source_frames_decoded - frames_in_packet as u64;
            if packet_start_frame + frames_in_packet as u64 > cutoff {
                let allowed = cutoff.saturating_sub(packet_start_frame).min(frames_in_packet as u64);
                end_frame = allowed as usize;
            }
        }

        let start = (start_frame * channels).min(self.raw_scratch.len());
        let end = (end_frame * channels).max(start).min(self.raw_scratch.len());
        self.raw_scratch[start..end].to_vec()
    }

    fn drain_leftover_into_ring(&mut self) {
        let space = self.ring.space();
        let take = self.leftover.len().min(space);
        if take == 0 {
            return;
        }
        let channels = self.shared.target_format.channels as usize;
        let take = (take / channels) * channels;
        if take == 0 {
            return;
        }
        self.ring.write(&self.leftover[..take]);
        self.leftover.drain(..take);
    }
}

/// Best-effort channel remap between a source and target channel count.
/// Handles the common mono<->stereo cases directly; for anything else it
/// truncates or zero-pads per frame.
fn remix_channels(interleaved: &[f32], source_channels: u16, target_channels: u16) -> Vec<f32> {
    if source_channels == target_channels {
        return interleaved.to_vec();
    }

    let src = source_channels as usize;
    let dst = target_channels as usize;
    let frames = interleaved.len() / src.max(1);
    let mut out = Vec::with_capacity(frames * dst);

    match (src, dst) {
        (1, 2) => {
            for &sample in interleaved {
                out.push(sample);
                out.push(sample);
            }
        }
        (2, 1) => {
            for frame in interleaved.chunks_exact(2) {
                out.push((frame[0] + frame[1]) * 0.5);
            }
        }
        _ => {
            for frame in interleaved.chunks(src) {
                for ch in 0..dst {
                    out.push(frame.get(ch).copied().unwrap_or(0.0));
                }
            }
        }
    }

    out
}

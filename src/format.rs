//! Audio format descriptors shared by [`crate::sound::Sound`] and the backend.

/// Sample representation kind negotiated with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormatKind {
    F32,
    I16,
}

/// `{ sample rate, channel count, sample format kind, channel layout }`.
///
/// A [`crate::sound::Sound`] carries two of these: the *source* format as read
/// from the file, and the *target* format negotiated with the backend at
/// `init_for_device` time.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormatKind,
    /// Human-readable channel layout, e.g. "stereo", "mono", "5.1".
    pub channel_layout: String,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormatKind) -> Self {
        let channel_layout = match channels {
            1 => "mono",
            2 => "stereo",
            6 => "5.1",
            8 => "7.1",
            _ => "multichannel",
        }
        .to_string();
        Self { sample_rate, channels, sample_format, channel_layout }
    }
}

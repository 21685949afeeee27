//! Decode → resample → ring-buffer → device-write playback engine.
//!
//! [`AudioService`] is the entry point: it owns the track registry, the
//! playlist, and the [`PlaybackEngine`], and serializes all of it behind one
//! mutex. Everything below that — the per-file `Sound`, the ring buffer,
//! the [`AudioBackend`] trait and its `cpal` implementation — is internal
//! machinery most callers never touch directly.

mod backend;
mod decoder;
mod engine;
mod error;
mod format;
mod playlist;
mod registry;
mod resampler;
mod ring;
mod simd;
mod sound;

mod service;

pub use backend::{AudioBackend, BackendError, BackendInfo, Device, Devices};
pub use engine::{PlaybackEngine, PlaybackState};
pub use error::{Error, Result};
pub use format::{AudioFormat, SampleFormatKind};
pub use playlist::Playlist;
pub use registry::{TrackHandle, TrackMetadata, TrackRegistry};
pub use service::{AudioService, TrackInfo};

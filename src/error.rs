//! Crate-wide error taxonomy for the playback engine.
//!
//! Every fallible public operation returns [`Result<T>`]. The variants map
//! directly onto the error categories the engine distinguishes: device/backend
//! initialization, per-track load failures, and façade misuse. Transient decode
//! errors and device xruns never surface here — they are logged and counted,
//! not propagated (see [`crate::backend::BackendError`] for the internal
//! recoverable/fatal split that feeds category 4).

use std::path::PathBuf;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Category 1: device open or format negotiation failed.
    #[error("failed to initialize audio device {device}: {reason}")]
    DeviceInit { device: String, reason: String },

    /// Category 1: no compatible sample format, or no decoder for the codec.
    #[error("unsupported: {detail}")]
    Unsupported { detail: String },

    /// Category 2: file missing, unreadable, or the resampler could not be configured.
    #[error("failed to load track {path}: {reason}")]
    TrackLoad { path: PathBuf, reason: String },

    /// Category 2: the container has no audio stream.
    #[error("no audio stream in {path}")]
    NoAudioStream { path: PathBuf },

    /// Category 4, fatal half: a device error survived backend-internal recovery.
    #[error("audio backend error: {0}")]
    Backend(String),

    /// Category 5 / 6: a façade operation was called before `init_for_device`,
    /// or after `shutdown`.
    #[error("engine is not initialized")]
    EngineNotInitialized,
}

impl Error {
    pub fn device_init(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceInit { device: device.into(), reason: reason.into() }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::Unsupported { detail: detail.into() }
    }

    pub fn track_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::TrackLoad { path: path.into(), reason: reason.into() }
    }

    pub fn no_audio_stream(path: impl Into<PathBuf>) -> Self {
        Self::NoAudioStream { path: path.into() }
    }
}

//! Abstract audio output backend.
//!
//! `AudioBackend` is the capability set a device driver must provide:
//! enumerate candidate devices, open one, accept blocking interleaved writes,
//! recover from an xrun, and report a descriptive snapshot for diagnostics.
//! [`cpal_backend::CpalBackend`] is the one implementation, targeting Linux
//! ALSA through cpal as its primary device.

mod cpal_backend;

pub use cpal_backend::CpalBackend;

use crate::format::AudioFormat;

/// One candidate output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub description: String,
    pub card_index: Option<u32>,
    pub device_index: Option<u32>,
    pub is_default: bool,
}

/// The devices a backend can see right now.
#[derive(Debug, Clone, Default)]
pub struct Devices {
    pub devices: Vec<Device>,
}

impl Devices {
    pub fn default_device(&self) -> Option<&Device> {
        self.devices.iter().find(|d| d.is_default).or_else(|| self.devices.first())
    }
}

/// Snapshot of the negotiated device state, for diagnostics and the façade's
/// `get_backend_info` query.
#[derive(Debug, Clone)]
pub struct BackendInfo {
    pub device: Device,
    pub format: AudioFormat,
    pub pcm_format_name: &'static str,
    pub period_frames: u32,
    pub buffer_frames: u32,
    pub latency_ms: f64,
    pub xrun_count: u64,
    pub write_count: u64,
}

/// Failures a backend can surface from `write`/`recover`.
///
/// `Recoverable` covers conditions the backend already retried internally
/// (a single xrun) that the caller should just account for; `Fatal` means the
/// device connection is gone and the engine must stop or reopen it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("recoverable device underrun/overrun")]
    Recoverable,
    #[error("fatal backend error: {0}")]
    Fatal(String),
}

/// Abstract audio output device. One concrete implementation today
/// ([`CpalBackend`]); the trait boundary exists so the playback engine and
/// its tests never depend on a live device.
pub trait AudioBackend: Send {
    /// List devices this backend's host can currently see.
    fn enumerate_devices(&self) -> Devices;

    /// Open `device_name` (or the host default when `None`), negotiating a
    /// format as close to `preferred` as the device supports. Returns the
    /// negotiated format info.
    fn init_for_device(&mut self, device_name: Option<&str>, preferred: &AudioFormat) -> crate::error::Result<BackendInfo>;

    /// Block until `frames` (interleaved, in the negotiated format) have
    /// been accepted by the device, applying `volume` as a linear multiplier
    /// along the way.
    fn write(&mut self, frames: &[f32], volume: f32) -> Result<(), BackendError>;

    /// Attempt to recover from a prior xrun (e.g. reset/restart the stream).
    fn recover(&mut self) -> Result<(), BackendError>;

    /// Current negotiated-state snapshot.
    fn info(&self) -> BackendInfo;

    /// Release the device. Called on engine shutdown or device switch.
    fn shutdown(&mut self);
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use crate::format::SampleFormatKind;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic in-memory backend for engine/service tests: accepts
    /// writes into a growable buffer instead of touching a real device.
    ///
    /// The buffer lives behind an `Arc<Mutex<_>>` so a test can hold a handle
    /// to it (via [`RecordingBackend::written_handle`]) from before the
    /// backend is boxed and handed off to the audio thread.
    pub struct RecordingBackend {
        written: Arc<Mutex<Vec<f32>>>,
        pub format: AudioFormat,
        write_count: AtomicU64,
        pub fail_next_write: bool,
    }

    impl RecordingBackend {
        pub fn new(format: AudioFormat) -> Self {
            Self { written: Arc::new(Mutex::new(Vec::new())), format, write_count: AtomicU64::new(0), fail_next_write: false }
        }

        /// Snapshot of everything written so far.
        pub fn written(&self) -> Vec<f32> {
            self.written.lock().clone()
        }

        /// A clone of the underlying buffer handle, to retain visibility
        /// after the backend is boxed and moved into the audio thread.
        pub fn written_handle(&self) -> Arc<Mutex<Vec<f32>>> {
            Arc::clone(&self.written)
        }
    }

    impl AudioBackend for RecordingBackend {
        fn enumerate_devices(&self) -> Devices {
            Devices {
                devices: vec![Device {
                    name: "test-device".to_string(),
                    description: "in-memory test double".to_string(),
                    card_index: None,
                    device_index: None,
                    is_default: true,
                }],
            }
        }

        fn init_for_device(&mut self, _device_name: Option<&str>, preferred: &AudioFormat) -> crate::error::Result<BackendInfo> {
            self.format = preferred.clone();
            Ok(self.info())
        }

        fn write(&mut self, frames: &[f32], volume: f32) -> Result<(), BackendError> {
            if self.fail_next_write {
                self.fail_next_write = false;
                return Err(BackendError::Recoverable);
            }
            self.written.lock().extend(frames.iter().map(|s| s * volume));
            self.write_count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn recover(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        fn info(&self) -> BackendInfo {
            BackendInfo {
                device: self.enumerate_devices().devices.remove(0),
                format: self.format.clone(),
                pcm_format_name: match self.format.sample_format {
                    SampleFormatKind::F32 => "f32",
                    SampleFormatKind::I16 => "i16",
                },
                period_frames: 1024,
                buffer_frames: 4096,
                latency_ms: 0.0,
                xrun_count: 0,
                write_count: self.write_count.load(Ordering::Relaxed),
            }
        }

        fn shutdown(&mut self) {}
    }

    #[test]
    fn recording_backend_applies_volume_on_write() {
        let mut backend = RecordingBackend::new(AudioFormat::new(44100, 2, SampleFormatKind::F32));
        backend.write(&[1.0, -1.0], 0.5).unwrap();
        assert_eq!(backend.written(), vec![0.5, -0.5]);
    }

    #[test]
    fn recording_backend_surfaces_recoverable_error_once() {
        let mut backend = RecordingBackend::new(AudioFormat::new(44100, 2, SampleFormatKind::F32));
        backend.fail_next_write = true;
        assert!(matches!(backend.write(&[0.0; 2], 1.0), Err(BackendError::Recoverable)));
        assert!(backend.write(&[0.0; 2], 1.0).is_ok());
    }
}

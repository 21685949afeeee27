//! `AudioService`: the single façade the rest of the application talks to.
//!
//! One `parking_lot::Mutex` serializes every public operation. Critical
//! sections stay short — a call either mutates the playlist/registry (pure,
//! in-memory) or forwards to the engine, which itself never blocks on the
//! audio thread. Grounded on the original engine's `Service`/`withBackend`
//! pattern: lock, do the minimum, release.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{AudioBackend, BackendInfo, CpalBackend, Devices};
use crate::engine::{PlaybackEngine, PlaybackState};
use crate::error::{Error, Result};
use crate::playlist::Playlist;
use crate::registry::{TrackHandle, TrackMetadata, TrackRegistry};

/// Presenter-facing snapshot combining playlist metadata, engine position,
/// and negotiated device format — the "Track Info surface" read model.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub handle: TrackHandle,
    pub metadata: TrackMetadata,
    pub position_sec: f64,
    pub length_sec: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub format_name: String,
    pub is_playing: bool,
}

struct ServiceInner {
    engine: PlaybackEngine,
    playlist: Playlist,
    registry: TrackRegistry,
    current_device: Option<String>,
}

/// Thread-safe façade over the playback engine, playlist, and track registry.
pub struct AudioService {
    inner: Mutex<ServiceInner>,
}

impl AudioService {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ServiceInner {
                engine: PlaybackEngine::new(),
                playlist: Playlist::new(),
                registry: TrackRegistry::new(),
                current_device: None,
            }),
        }
    }

    // -- device / backend discovery -------------------------------------

    pub fn enumerate_devices(&self) -> Devices {
        CpalBackend::new().enumerate_devices()
    }

    pub fn init_for_device(&self, device_name: Option<&str>) -> Result<BackendInfo> {
        let mut inner = self.inner.lock();
        let info = inner.engine.init_for_device(Box::new(CpalBackend::new()), device_name)?;
        inner.current_device = Some(info.device.name.clone());
        Ok(info)
    }

    /// Test-only hook: swap in an arbitrary backend (e.g. an in-memory test
    /// double) instead of opening a real device.
    #[cfg(test)]
    pub(crate) fn init_for_device_with_backend(&self, backend: Box<dyn AudioBackend>, device_name: Option<&str>) -> Result<BackendInfo> {
        let mut inner = self.inner.lock();
        let info = inner.engine.init_for_device(backend, device_name)?;
        inner.current_device = Some(info.device.name.clone());
        Ok(info)
    }

    /// Switch to a different device, keeping the playlist/registry intact.
    /// When the new device negotiates the same format as the one already
    /// running, the in-flight track's decode position and any gapless
    /// successor are preserved and playback is not interrupted; otherwise
    /// this falls back to a full re-init and the caller must resume/seek.
    pub fn switch_device(&self, device_name: Option<&str>) -> Result<BackendInfo> {
        let mut inner = self.inner.lock();
        let info = inner.engine.switch_device(Box::new(CpalBackend::new()), device_name)?;
        inner.current_device = Some(info.device.name.clone());
        Ok(info)
    }

    /// Test-only hook: same fast-path logic as `switch_device`, but with an
    /// injectable backend instead of opening a real device.
    #[cfg(test)]
    pub(crate) fn switch_device_with_backend(&self, backend: Box<dyn AudioBackend>, device_name: Option<&str>) -> Result<BackendInfo> {
        let mut inner = self.inner.lock();
        let info = inner.engine.switch_device(backend, device_name)?;
        inner.current_device = Some(info.device.name.clone());
        Ok(info)
    }

    pub fn current_device(&self) -> Option<String> {
        self.inner.lock().current_device.clone()
    }

    pub fn get_backend_info(&self) -> Option<BackendInfo> {
        self.inner.lock().engine.current_device_info()
    }

    // -- registry ---------------------------------------------------------

    pub fn register_track(&self, path: impl Into<PathBuf>, metadata: TrackMetadata) -> TrackHandle {
        self.inner.lock().registry.register(path.into(), metadata)
    }

    pub fn get_metadata(&self, handle: TrackHandle) -> Option<TrackMetadata> {
        self.inner.lock().registry.get(handle).map(|e| e.metadata.clone())
    }

    pub fn get_current_metadata(&self) -> Option<TrackMetadata> {
        let inner = self.inner.lock();
        let handle = inner.playlist.current()?;
        inner.registry.get(handle).map(|e| e.metadata.clone())
    }

    pub fn get_metadata_at(&self, index: usize) -> Option<TrackMetadata> {
        let inner = self.inner.lock();
        let handle = inner.playlist.get(index)?;
        inner.registry.get(handle).map(|e| e.metadata.clone())
    }

    // -- playlist -----------------------------------------------------------

    pub fn add_to_playlist(&self, handle: TrackHandle) {
        self.inner.lock().playlist.add(handle);
    }

    /// Remove the playlist entry at `index`. If it was the current track,
    /// playback is stopped — deciding whether to auto-advance is left to
    /// the caller.
    pub fn remove_from_playlist(&self, index: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let was_current = inner.playlist.current_index() == index && !inner.playlist.is_empty();
        inner.playlist.remove_at(index);
        if was_current {
            inner.engine.stop()?;
        }
        Ok(())
    }

    pub fn clear_playlist(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.playlist.clear();
        inner.engine.stop()
    }

    pub fn get_playlist_size(&self) -> usize {
        self.inner.lock().playlist.len()
    }

    pub fn get_current_index(&self) -> usize {
        self.inner.lock().playlist.current_index()
    }

    pub fn get_current_track(&self) -> Option<TrackHandle> {
        self.inner.lock().playlist.current()
    }

    /// Snapshot combining the current playlist entry's metadata with the
    /// engine's live position and negotiated format.
    pub fn get_current_track_info(&self) -> Option<TrackInfo> {
        let inner = self.inner.lock();
        let handle = inner.playlist.current()?;
        let metadata = inner.registry.get(handle)?.metadata.clone();
        let target = inner.engine.target_format().clone();
        let format_name = inner
            .engine
            .current_device_info()
            .map(|info| info.pcm_format_name.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Some(TrackInfo {
            handle,
            metadata,
            position_sec: inner.engine.playback_time().as_secs_f64(),
            length_sec: inner.engine.duration().as_secs_f64(),
            sample_rate: target.sample_rate,
            channels: target.channels,
            format_name,
            is_playing: inner.engine.is_playing(),
        })
    }

    // -- transport ----------------------------------------------------------

    /// Load the playlist's current track into the engine and start playing.
    pub fn play_current(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner.playlist.current().ok_or(Error::EngineNotInitialized)?;
        let path = inner.registry.get(handle).ok_or(Error::EngineNotInitialized)?.path.clone();
        inner.engine.load(&path)?;
        inner.engine.play()
    }

    /// Advance to the next playlist entry and start playing it.
    pub fn next_track(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner.playlist.next().ok_or(Error::EngineNotInitialized)?;
        let path = inner.registry.get(handle).ok_or(Error::EngineNotInitialized)?.path.clone();
        inner.engine.load(&path)?;
        inner.engine.play()
    }

    pub fn previous_track(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner.playlist.previous().ok_or(Error::EngineNotInitialized)?;
        let path = inner.registry.get(handle).ok_or(Error::EngineNotInitialized)?.path.clone();
        inner.engine.load(&path)?;
        inner.engine.play()
    }

    /// Pre-decode the playlist's next entry as the gapless successor,
    /// without interrupting what's currently playing.
    pub fn queue_next_gapless(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.playlist.is_empty() {
            return Ok(());
        }
        let next_index = (inner.playlist.current_index() + 1) % inner.playlist.len();
        let Some(handle) = inner.playlist.get(next_index) else { return Ok(()) };
        let path = inner.registry.get(handle).ok_or(Error::EngineNotInitialized)?.path.clone();
        inner.engine.queue_next(&path)
    }

    pub fn play(&self) -> Result<()> {
        self.inner.lock().engine.play()
    }

    pub fn pause(&self) -> Result<()> {
        self.inner.lock().engine.pause()
    }

    pub fn stop(&self) -> Result<()> {
        self.inner.lock().engine.stop()
    }

    pub fn restart_current(&self) -> Result<()> {
        self.inner.lock().engine.restart()
    }

    pub fn seek_absolute(&self, frame: u64) -> Result<()> {
        self.inner.lock().engine.seek_absolute(frame)
    }

    pub fn seek_forward(&self, seconds: f64) -> Result<()> {
        self.inner.lock().engine.seek_forward(seconds)
    }

    pub fn seek_backward(&self, seconds: f64) -> Result<()> {
        self.inner.lock().engine.seek_backward(seconds)
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().engine.is_playing()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.inner.lock().engine.playback_state()
    }

    pub fn get_playback_time(&self) -> Duration {
        self.inner.lock().engine.playback_time()
    }

    pub fn get_duration(&self) -> Duration {
        self.inner.lock().engine.duration()
    }

    pub fn set_volume(&self, volume: f32) {
        self.inner.lock().engine.set_volume(volume);
    }

    pub fn get_volume(&self) -> f32 {
        self.inner.lock().engine.volume()
    }

    pub fn is_track_finished(&self) -> bool {
        self.inner.lock().engine.is_track_finished()
    }

    pub fn decode_error_count(&self) -> u64 {
        self.inner.lock().engine.decode_error_count()
    }

    pub fn clear_track_finished(&self) {
        self.inner.lock().engine.clear_track_finished();
    }

    pub fn with_audio_buffer<R>(&self, f: impl FnOnce(&[f32], u64) -> R) -> R {
        self.inner.lock().engine.with_audio_buffer(f)
    }

    /// Release the device and stop the audio thread. The playlist and
    /// registry survive; a later `init_for_device` can resume playback.
    pub fn shutdown(&self) {
        self.inner.lock().engine.shutdown();
    }
}

impl Default for AudioService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_double::RecordingBackend;
    use crate::format::{AudioFormat, SampleFormatKind};
    use std::thread;
    use std::time::Duration as StdDuration;

    fn write_test_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total_frames = (sample_rate as f32 * seconds) as u32;
        for i in 0..total_frames {
            let t = i as f32 / sample_rate as f32;
            let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn operations_before_init_report_engine_not_initialized() {
        let service = AudioService::new();
        let handle = service.register_track("/a.flac", TrackMetadata::default());
        service.add_to_playlist(handle);
        assert!(service.play_current().is_err());
    }

    #[test]
    fn register_add_play_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 44100, 2, 0.2);

        let service = AudioService::new();
        let format = AudioFormat::new(44100, 2, SampleFormatKind::F32);
        service.init_for_device_with_backend(Box::new(RecordingBackend::new(format)), None).unwrap();

        let handle = service.register_track(&path, TrackMetadata { title: "Tone".into(), ..Default::default() });
        service.add_to_playlist(handle);
        assert_eq!(service.get_playlist_size(), 1);

        service.play_current().unwrap();
        assert!(service.is_playing());

        let info = service.get_current_track_info().unwrap();
        assert_eq!(info.handle, handle);
        assert_eq!(info.metadata.title, "Tone");
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);

        let start = std::time::Instant::now();
        while !service.is_track_finished() && start.elapsed() < StdDuration::from_secs(5) {
            thread::sleep(StdDuration::from_millis(20));
        }
        assert!(service.is_track_finished());
        service.shutdown();
    }

    #[test]
    fn switch_device_preserves_in_flight_sound_when_format_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 44100, 2, 0.5);

        let service = AudioService::new();
        let format = AudioFormat::new(44100, 2, SampleFormatKind::F32);
        service.init_for_device_with_backend(Box::new(RecordingBackend::new(format.clone())), None).unwrap();

        let handle = service.register_track(&path, TrackMetadata::default());
        service.add_to_playlist(handle);
        service.play_current().unwrap();

        thread::sleep(StdDuration::from_millis(100));
        let position_before = service.get_playback_time();
        assert!(position_before > StdDuration::ZERO, "expected playback to have advanced before switching");

        service.switch_device_with_backend(Box::new(RecordingBackend::new(format)), None).unwrap();

        assert!(service.is_playing(), "switch_device's fast path should not stop playback");
        assert!(!service.is_track_finished());
        let position_after = service.get_playback_time();
        assert!(position_after >= position_before, "switch_device should not rewind the in-flight track");
    }

    #[test]
    fn remove_current_entry_stops_playback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 44100, 2, 0.2);

        let service = AudioService::new();
        let format = AudioFormat::new(44100, 2, SampleFormatKind::F32);
        service.init_for_device_with_backend(Box::new(RecordingBackend::new(format)), None).unwrap();

        let handle = service.register_track(&path, TrackMetadata::default());
        service.add_to_playlist(handle);
        service.play_current().unwrap();

        service.remove_from_playlist(0).unwrap();
        assert_eq!(service.get_playlist_size(), 0);
    }
}

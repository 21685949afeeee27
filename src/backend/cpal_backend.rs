//! cpal-based [`AudioBackend`], targeting ALSA on Linux as the primary
//! device while staying portable to whatever host cpal selects elsewhere.
//!
//! `write` is a blocking call on the engine's audio thread; cpal's callback
//! runs on its own real-time thread. The two are bridged with an `rtrb`
//! lock-free ring: `write` pushes into the producer half (spinning/backing
//! off while the ring is full, approximating ALSA's blocking-write
//! semantics), and the cpal callback drains the consumer half without ever
//! taking a lock or allocating.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat as CpalSampleFormat, Stream, StreamConfig};
use rtrb::{Consumer, Producer, RingBuffer as RtrbRingBuffer};

use super::{AudioBackend, BackendError, BackendInfo, Device as BackendDevice, Devices};
use crate::error::{Error, Result};
use crate::format::{AudioFormat, SampleFormatKind};
use crate::simd;

/// Seconds of negotiated-format audio the cross-thread bridge ring can hold.
const BRIDGE_RING_SECONDS: f64 = 0.5;

#[derive(Default)]
struct BridgeShared {
    xruns: AtomicU64,
    stream_error: AtomicBool,
}

pub struct CpalBackend {
    stream: Option<Stream>,
    producer: Option<Producer<f32>>,
    shared: Arc<BridgeShared>,
    info: Option<BackendInfo>,
    write_count: u64,
    volume_scratch: Vec<f32>,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            stream: None,
            producer: None,
            shared: Arc::new(BridgeShared::default()),
            info: None,
            write_count: 0,
            volume_scratch: Vec::new(),
        }
    }

    fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
        if let Some(name) = name {
            let mut devices =
                host.output_devices().map_err(|e| Error::device_init(name, e.to_string()))?;
            return devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| Error::device_init(name, "no such output device"));
        }
        host.default_output_device().ok_or_else(|| Error::device_init("default", "no output device found"))
    }
}

impl AudioBackend for CpalBackend {
    fn enumerate_devices(&self) -> Devices {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let devices = host
            .output_devices()
            .map(|iter| {
                iter.filter_map(|d| {
                    let name = d.name().ok()?;
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    Some(BackendDevice {
                        description: name.clone(),
                        name,
                        card_index: None,
                        device_index: None,
                        is_default,
                    })
                })
                .collect()
            })
            .unwrap_or_default();
        Devices { devices }
    }

    fn init_for_device(&mut self, device_name: Option<&str>, preferred: &AudioFormat) -> Result<BackendInfo> {
        let host = cpal::default_host();
        let device = Self::select_device(&host, device_name)?;
        let device_label = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| Error::device_init(device_label.as_str(), e.to_string()))?;

        let sample_rate = if preferred.sample_rate > 0 { supported.sample_rate().0.max(preferred.sample_rate) } else {
            supported.sample_rate().0
        };
        let channels = supported.channels();
        let cpal_sample_format = supported.sample_format();

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring_capacity = (BRIDGE_RING_SECONDS * sample_rate as f64).ceil() as usize * channels as usize;
        let (producer, consumer) = RtrbRingBuffer::<f32>::new(ring_capacity.max(channels as usize));

        let negotiated_format = match cpal_sample_format {
            CpalSampleFormat::F32 => SampleFormatKind::F32,
            _ => SampleFormatKind::I16,
        };

        let shared = Arc::clone(&self.shared);
        let stream = match negotiated_format {
            SampleFormatKind::F32 => build_f32_stream(&device, &config, consumer, Arc::clone(&shared)),
            SampleFormatKind::I16 => build_i16_stream(&device, &config, consumer, Arc::clone(&shared)),
        }
        .map_err(|e| Error::device_init(device_label.as_str(), e.to_string()))?;

        stream.play().map_err(|e| Error::device_init(device_label.as_str(), e.to_string()))?;

        let format = AudioFormat::new(sample_rate, channels, negotiated_format);
        let info = BackendInfo {
            device: BackendDevice {
                name: device_label.clone(),
                description: device_label,
                card_index: None,
                device_index: None,
                is_default: device_name.is_none(),
            },
            format,
            pcm_format_name: match negotiated_format {
                SampleFormatKind::F32 => "f32",
                SampleFormatKind::I16 => "i16",
            },
            period_frames: 1024,
            buffer_frames: (ring_capacity / channels as usize) as u32,
            latency_ms: 1000.0 * (ring_capacity as f64 / channels as f64) / sample_rate as f64,
            xrun_count: 0,
            write_count: 0,
        };

        self.stream = Some(stream);
        self.producer = Some(producer);
        self.info = Some(info.clone());
        self.write_count = 0;
        Ok(info)
    }

    fn write(&mut self, frames: &[f32], volume: f32) -> Result<(), BackendError> {
        let Some(producer) = self.producer.as_mut() else {
            return Err(BackendError::Fatal("backend not initialized".to_string()));
        };

        self.volume_scratch.clear();
        self.volume_scratch.extend_from_slice(frames);
        simd::apply_volume(&mut self.volume_scratch, volume);

        for &sample in &self.volume_scratch {
            let mut spins = 0;
            while producer.push(sample).is_err() {
                spins += 1;
                if spins > 10_000 {
                    return Err(BackendError::Fatal("device stalled accepting audio".to_string()));
                }
                thread::sleep(Duration::from_micros(100));
            }
        }
        self.write_count += 1;

        if self.shared.stream_error.swap(false, Ordering::AcqRel) {
            return Err(BackendError::Recoverable);
        }
        Ok(())
    }

    fn recover(&mut self) -> Result<(), BackendError> {
        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| BackendError::Fatal(e.to_string()))?;
        }
        self.shared.stream_error.store(false, Ordering::Release);
        Ok(())
    }

    fn info(&self) -> BackendInfo {
        let mut info = self.info.clone().unwrap_or_else(|| BackendInfo {
            device: BackendDevice {
                name: "uninitialized".to_string(),
                description: "uninitialized".to_string(),
                card_index: None,
                device_index: None,
                is_default: false,
            },
            format: AudioFormat::new(0, 0, SampleFormatKind::F32),
            pcm_format_name: "f32",
            period_frames: 0,
            buffer_frames: 0,
            latency_ms: 0.0,
            xrun_count: 0,
            write_count: 0,
        });
        info.xrun_count = self.shared.xruns.load(Ordering::Relaxed);
        info.write_count = self.write_count;
        info
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
        self.producer = None;
    }
}

fn build_f32_stream(
    device: &Device,
    config: &StreamConfig,
    mut consumer: Consumer<f32>,
    shared: Arc<BridgeShared>,
) -> std::result::Result<Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for sample in data.iter_mut() {
                match consumer.pop() {
                    Ok(s) => *sample = s,
                    Err(_) => {
                        shared.xruns.fetch_add(1, Ordering::Relaxed);
                        *sample = 0.0;
                    }
                }
            }
        },
        move |err| {
            tracing::error!("audio stream error: {err}");
            shared.stream_error.store(true, Ordering::Release);
        },
        None,
    )
}

fn build_i16_stream(
    device: &Device,
    config: &StreamConfig,
    mut consumer: Consumer<f32>,
    shared: Arc<BridgeShared>,
) -> std::result::Result<Stream, cpal::BuildStreamError> {
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            scratch.clear();
            scratch.resize(data.len(), 0.0);
            for sample in scratch.iter_mut() {
                match consumer.pop() {
                    Ok(s) => *sample = s,
                    Err(_) => {
                        shared.xruns.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            // Volume was already applied before the producer side pushed these
            // samples, so the conversion pass here runs at unity gain.
            simd::f32_to_i16_with_volume(&scratch, data, 1.0);
        },
        move |err| {
            tracing::error!("audio stream error: {err}");
            shared.stream_error.store(true, Ordering::Release);
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_starts_with_no_info() {
        let backend = CpalBackend::new();
        assert!(backend.producer.is_none());
    }

    #[test]
    fn write_before_init_is_fatal() {
        let mut backend = CpalBackend::new();
        let err = backend.write(&[0.0; 4], 1.0).unwrap_err();
        assert!(matches!(err, BackendError::Fatal(_)));
    }
}

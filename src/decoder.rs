//! Container demuxing and codec decoding via symphonia.
//!
//! Supported containers/codecs: MP3 (ID3v2-tagged), FLAC, OGG Vorbis, WAV/PCM,
//! AAC — the feature set enabled on the `symphonia` dependency. This is the
//! "Codec/demux library" collaborator named in the external-interfaces section
//! of the design: an opaque module providing open/enumerate/decode/seek.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{Error, Result};
use crate::format::{AudioFormat, SampleFormatKind};
use crate::registry::TrackMetadata;

/// An opened, decodable audio container.
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    source_format: AudioFormat,
    time_base: Option<TimeBase>,
    duration_frames: u64,
    start_skip: u64,
    end_skip: u64,
    malformed_packets: u64,
}

impl AudioDecoder {
    /// Open `path`, probe its container, and select the first audio stream.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::track_load(path, format!("cannot open file: {e}")))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions { enable_gapless: true, ..Default::default() };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| Error::unsupported(format!("unrecognized container: {e}")))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::no_audio_stream(path))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::track_load(path, "unknown sample rate"))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let time_base = codec_params.time_base;

        let duration_frames = codec_params.n_frames.unwrap_or(0);
        let start_skip = codec_params.delay.unwrap_or(0) as u64;
        let end_skip = codec_params.padding.unwrap_or(0) as u64;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::unsupported(format!("no decoder for codec: {e}")))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            source_format: AudioFormat::new(sample_rate, channels, SampleFormatKind::F32),
            time_base,
            duration_frames,
            start_skip,
            end_skip,
            malformed_packets: 0,
        })
    }

    /// Malformed packets dropped (and logged) so far by `decode_next`.
    pub fn malformed_packet_count(&self) -> u64 {
        self.malformed_packets
    }

    pub fn source_format(&self) -> &AudioFormat {
        &self.source_format
    }

    /// Total frames per the container's metadata; zero if unknown.
    pub fn duration_frames(&self) -> u64 {
        self.duration_frames
    }

    /// Encoder priming samples to discard from the start, per gapless metadata.
    pub fn start_skip(&self) -> u64 {
        self.start_skip
    }

    /// Encoder padding samples to discard from the end, per gapless metadata.
    pub fn end_skip(&self) -> u64 {
        self.end_skip
    }

    /// Extract whatever standard tags the container carries.
    pub fn read_metadata(&mut self, path: &Path) -> TrackMetadata {
        let mut info = TrackMetadata::default();
        if let Some(metadata) = self.reader.metadata().current() {
            for tag in metadata.tags() {
                use symphonia::core::meta::StandardTagKey as K;
                match tag.std_key {
                    Some(K::TrackTitle) => info.title = tag.value.to_string(),
                    Some(K::Artist) => info.artist = tag.value.to_string(),
                    Some(K::Album) => info.album = tag.value.to_string(),
                    Some(K::TrackNumber) => {
                        info.track_number = tag.value.to_string().parse().ok();
                    }
                    Some(K::DiscNumber) => {
                        info.disc_number = tag.value.to_string().parse().ok();
                    }
                    Some(K::Date) => {
                        let s = tag.value.to_string();
                        info.year = s.split('-').next().and_then(|y| y.parse().ok());
                    }
                    Some(K::Genre) => info.genre = Some(tag.value.to_string()),
                    _ => {}
                }
            }
        }
        if info.title.is_empty() {
            info.title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Unknown".to_string());
        }
        if let (Some(tb), frames) = (self.time_base, self.duration_frames)
            && frames > 0
        {
            let time = tb.calc_time(frames);
            info.duration_sec = Some(time.seconds as f64 + time.frac);
        }
        info
    }

    /// Seek the underlying container to `frame` (in target-format frames,
    /// converted through the stream time-base) and reset decoder state.
    pub fn seek_to_frame(&mut self, frame: u64) -> Result<()> {
        let seconds = if let Some(tb) = self.time_base {
            frame as f64 * tb.denom as f64 / tb.numer as f64
        } else {
            0.0
        };
        let seek_to = SeekTo::Time { time: Time::from(seconds), track_id: Some(self.track_id) };
        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| Error::Backend(format!("seek failed: {e}")))?;
        self.decoder.reset();
        Ok(())
    }

    /// Decode the next packet belonging to this track, appending interleaved
    /// f32 samples to `out`. Returns `Ok(false)` at end of stream.
    pub fn decode_next(&mut self, out: &mut Vec<f32>) -> Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(Error::Backend(format!("demux error: {e}"))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => {
                    self.malformed_packets += 1;
                    tracing::debug!("dropping malformed packet, continuing decode");
                    continue;
                }
                Err(e) => return Err(Error::Backend(format!("decode error: {e}"))),
            };

            Self::append_interleaved(&decoded, out);
            return Ok(true);
        }
    }

    fn append_interleaved(buffer: &AudioBufferRef, out: &mut Vec<f32>) {
        match buffer {
            AudioBufferRef::F32(buf) => {
                let planes = buf.planes();
                let slices = planes.planes();
                if slices.is_empty() {
                    return;
                }
                for frame in 0..slices[0].len() {
                    for plane in slices {
                        out.push(plane[frame]);
                    }
                }
            }
            AudioBufferRef::S16(buf) => {
                let planes = buf.planes();
                for frame in 0..buf.frames() {
                    for plane in planes.planes() {
                        out.push(plane[frame] as f32 / 32768.0);
                    }
                }
            }
            AudioBufferRef::S24(buf) => {
                let planes = buf.planes();
                for frame in 0..buf.frames() {
                    for plane in planes.planes() {
                        out.push(plane[frame].0 as f32 / 8_388_608.0);
                    }
                }
            }
            AudioBufferRef::S32(buf) => {
                let planes = buf.planes();
                for frame in 0..buf.frames() {
                    for plane in planes.planes() {
                        out.push(plane[frame] as f32 / 2_147_483_648.0);
                    }
                }
            }
            AudioBufferRef::U8(buf) => {
                let planes = buf.planes();
                for frame in 0..buf.frames() {
                    for plane in planes.planes() {
                        out.push((plane[frame] as f32 - 128.0) / 128.0);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_nonexistent_file_errors() {
        let result = AudioDecoder::open(Path::new("/nonexistent/file.mp3"));
        assert!(result.is_err());
    }

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
    fn opens_and_decodes_a_synthetic_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 44100, 2, 0.25);

        let mut decoder = AudioDecoder::open(&path).expect("should open valid wav");
        assert_eq!(decoder.source_format().sample_rate, 44100);
        assert_eq!(decoder.source_format().channels, 2);

        let mut total_samples = 0usize;
        let mut buf = Vec::new();
        while decoder.decode_next(&mut buf).unwrap() {
            total_samples += buf.len();
            buf.clear();
        }
        assert!(total_samples > 0);
    }
}

//! Sample-rate resampling via rubato, source rate → target device rate.

use rubato::{FftFixedIn, Resampler as RubatoResampler};

/// Converts interleaved float audio between sample rates. A no-op passthrough
/// when the source and target rates already match.
pub struct Resampler {
    resampler: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    input_buffer: Vec<Vec<f32>>,
    chunk_size: usize,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Self {
        let channels = channels as usize;

        if input_rate == output_rate {
            return Self {
                resampler: None,
                input_rate,
                output_rate,
                channels,
                input_buffer: vec![Vec::new(); channels],
                chunk_size: 0,
            };
        }

        let chunk_size = 1024;
        let resampler = FftFixedIn::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            chunk_size,
            2,
            channels,
        )
        .expect("rubato resampler construction with validated rates should not fail");

        tracing::info!(input_rate, output_rate, channels, "resampler configured");

        Self {
            resampler: Some(resampler),
            input_rate,
            output_rate,
            channels,
            input_buffer: vec![Vec::new(); channels],
            chunk_size,
        }
    }

    pub fn needs_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Process interleaved input samples, returning resampled interleaved output.
    /// Output may be shorter than a full chunk's worth if not enough input has
    /// accumulated yet; call `flush` at end-of-stream to drain the remainder.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return input.to_vec();
        };

        for (i, sample) in input.iter().enumerate() {
            let channel = i % self.channels;
            self.input_buffer[channel].push(*sample);
        }

        let mut output = Vec::new();
        while self.input_buffer[0].len() >= self.chunk_size {
            let mut input_chunks: Vec<Vec<f32>> = Vec::with_capacity(self.channels);
            for ch_buf in &mut self.input_buffer {
                input_chunks.push(ch_buf.drain(..self.chunk_size).collect());
            }

            match resampler.process(&input_chunks, None) {
                Ok(resampled) => Self::interleave_into(&resampled, &mut output),
                Err(e) => tracing::warn!("resampling error: {e}"),
            }
        }

        output
    }

    /// Drain any samples still buffered at end-of-stream, padding the final
    /// chunk with zeros and trimming the output to the expected frame count.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };

        let remaining = self.input_buffer[0].len();
        if remaining == 0 {
            return Vec::new();
        }

        let pad_needed = self.chunk_size - remaining;
        for ch_buf in &mut self.input_buffer {
            ch_buf.extend(std::iter::repeat_n(0.0, pad_needed));
        }

        let input_chunks: Vec<Vec<f32>> = self.input_buffer.drain(..).collect();
        self.input_buffer = vec![Vec::new(); self.channels];

        let mut output = Vec::new();
        match resampler.process(&input_chunks, None) {
            Ok(resampled) => {
                if !resampled.is_empty() && !resampled[0].is_empty() {
                    let expected_frames = (remaining as f64 * self.ratio()).ceil() as usize;
                    let frames = resampled[0].len().min(expected_frames);
                    for frame in 0..frames {
                        for ch in &resampled {
                            output.push(ch[frame]);
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("resampling flush error: {e}"),
        }

        output
    }

    /// Discard buffered input and reset internal resampler state. Call after a seek.
    pub fn reset(&mut self) {
        for ch_buf in &mut self.input_buffer {
            ch_buf.clear();
        }
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }

    fn interleave_into(resampled: &[Vec<f32>], output: &mut Vec<f32>) {
        if resampled.is_empty() || resampled[0].is_empty() {
            return;
        }
        let frames = resampled[0].len();
        for frame in 0..frames {
            for ch in resampled {
                output.push(ch[frame]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_resampling_when_rates_match() {
        let resampler = Resampler::new(48000, 48000, 2);
        assert!(!resampler.needs_resampling());
    }

    #[test]
    fn resampling_needed_when_rates_differ() {
        let resampler = Resampler::new(44100, 48000, 2);
        assert!(resampler.needs_resampling());
    }

    #[test]
    fn ratio_calculation() {
        let resampler = Resampler::new(44100, 48000, 2);
        assert!((resampler.ratio() - 48000.0 / 44100.0).abs() < 0.0001);
    }

    #[test]
    fn passthrough_when_no_resampling() {
        let mut resampler = Resampler::new(48000, 48000, 2);
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resampler.process(&input), input);
    }

    #[test]
    fn reset_clears_buffered_input() {
        let mut resampler = Resampler::new(44100, 48000, 1);
        resampler.process(&[0.1; 100]);
        resampler.reset();
        assert_eq!(resampler.input_buffer[0].len(), 0);
    }
}

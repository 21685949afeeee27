//! Bounded single-producer/single-consumer float sample ring.
//!
//! Sits between the decoder and the device-write loop inside a [`crate::sound::Sound`].
//! Both sides run on the same audio thread, so no lock is required here — see
//! the shared-resource matrix in the crate's design notes. One slot is always
//! reserved so `available()` and `space()` can distinguish full from empty
//! without a separate flag.

/// A bounded ring of interleaved float samples.
///
/// Capacity is always rounded to a multiple of `channels` so that reads and
/// writes never split a frame across the wrap point.
pub struct RingBuffer {
    data: Vec<f32>,
    channels: usize,
    read: usize,
    write: usize,
    capacity: usize,
}

impl RingBuffer {
    /// Construct a ring able to hold `capacity_samples` samples, rounded up to
    /// the nearest multiple of `channels`. `channels` must be at least 1.
    pub fn new(capacity_samples: usize, channels: usize) -> Self {
        assert!(channels >= 1, "ring buffer channel count must be at least 1");
        let frames = capacity_samples.div_ceil(channels).max(1);
        let capacity = frames * channels;
        Self { data: vec![0.0; capacity], channels, read: 0, write: 0, capacity }
    }

    /// Total usable capacity in samples (`cap - 1` frame's worth reserved).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples committed but not yet consumed.
    pub fn available(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.capacity - (self.read - self.write)
        }
    }

    /// Samples that can be written without overtaking the reader.
    pub fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    /// Copy `src` into the ring. Panics if `src.len() > space()`.
    pub fn write(&mut self, src: &[f32]) {
        let n = src.len();
        assert!(n <= self.space(), "ring buffer write exceeds available space");
        for (i, sample) in src.iter().enumerate() {
            self.data[(self.write + i) % self.capacity] = *sample;
        }
        self.write = (self.write + n) % self.capacity;
    }

    /// Copy up to `dst.len()` samples out of the ring. Panics if
    /// `dst.len() > available()`.
    pub fn read(&mut self, dst: &mut [f32]) {
        let n = dst.len();
        assert!(n <= self.available(), "ring buffer read exceeds available samples");
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.data[(self.read + i) % self.capacity];
        }
        self.read = (self.read + n) % self.capacity;
    }

    /// Reset both cursors to zero, discarding all buffered content.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let ring = RingBuffer::new(16, 2);
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.space(), ring.capacity() - 1);
    }

    #[test]
    fn capacity_rounds_to_channel_multiple() {
        let ring = RingBuffer::new(10, 4);
        assert_eq!(ring.capacity() % 4, 0);
        assert!(ring.capacity() >= 10);
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut ring = RingBuffer::new(8, 2);
        let samples = [1.0, 2.0, 3.0, 4.0];
        ring.write(&samples);
        assert_eq!(ring.available(), 4);

        let mut out = [0.0; 4];
        ring.read(&mut out);
        assert_eq!(out, samples);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn wraps_around_capacity() {
        let mut ring = RingBuffer::new(8, 1);
        let cap = ring.capacity();
        // Fill, drain, fill again so writes wrap past the end of the backing array.
        ring.write(&vec![1.0; cap - 1]);
        let mut drain = vec![0.0; cap - 1];
        ring.read(&mut drain);
        ring.write(&[9.0, 9.0, 9.0]);
        assert_eq!(ring.available(), 3);
        let mut out = [0.0; 3];
        ring.read(&mut out);
        assert_eq!(out, [9.0, 9.0, 9.0]);
    }

    #[test]
    fn clear_resets_cursors() {
        let mut ring = RingBuffer::new(8, 2);
        ring.write(&[1.0, 2.0]);
        ring.clear();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.space(), ring.capacity() - 1);
    }

    #[test]
    #[should_panic]
    fn write_past_space_panics() {
        let mut ring = RingBuffer::new(4, 1);
        let cap = ring.capacity();
        ring.write(&vec![0.0; cap]); // one more than space() allows
    }

    proptest::proptest! {
        #[test]
        fn fifo_and_capacity_invariant(ops in proptest::collection::vec(0i32..200, 1..200)) {
            let mut ring = RingBuffer::new(64, 1);
            let mut model: std::collections::VecDeque<f32> = std::collections::VecDeque::new();
            let mut next_value = 0.0f32;

            for op in ops {
                if op % 2 == 0 {
                    let want = (op as usize % 5) + 1;
                    let n = want.min(ring.space());
                    if n > 0 {
                        let batch: Vec<f32> = (0..n).map(|_| { next_value += 1.0; next_value }).collect();
                        ring.write(&batch);
                        model.extend(batch);
                    }
                } else {
                    let want = (op as usize % 5) + 1;
                    let n = want.min(ring.available());
                    if n > 0 {
                        let mut out = vec![0.0; n];
                        ring.read(&mut out);
                        for sample in out {
                            let expected = model.pop_front().unwrap();
                            prop_assert_eq!(sample, expected);
                        }
                    }
                }
                prop_assert!(ring.available() <= ring.capacity() - 1);
                prop_assert_eq!(ring.available(), model.len());
            }
        }
    }
}

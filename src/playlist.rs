//! Ordered playlist of track handles with wrap-around navigation,
//! distinct-from-current random selection, and index-stable removal.
//!
//! Grounded on the original engine's `audio::service::Playlist` for the basic
//! wraparound shape; `random` and `remove_at` are not present there and are
//! built from the textual contract instead.

use rand::Rng;

use crate::registry::TrackHandle;

/// Ordered sequence of track handles plus a current index.
#[derive(Debug, Default)]
pub struct Playlist {
    tracks: Vec<TrackHandle>,
    current: usize,
}

impl Playlist {
    pub fn new() -> Self {
        Self { tracks: Vec::new(), current: 0 }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Append a handle to the end of the playlist.
    pub fn add(&mut self, handle: TrackHandle) {
        self.tracks.push(handle);
    }

    /// The handle at the current index, or `None` if empty.
    pub fn current(&self) -> Option<TrackHandle> {
        self.tracks.get(self.current).copied()
    }

    /// The handle at `index`, without disturbing `current`.
    pub fn get(&self, index: usize) -> Option<TrackHandle> {
        self.tracks.get(index).copied()
    }

    /// Advance the current index by one, wrapping to the start. Returns the
    /// new current handle.
    pub fn next(&mut self) -> Option<TrackHandle> {
        if self.tracks.is_empty() {
            return None;
        }
        self.current = (self.current + 1) % self.tracks.len();
        self.current()
    }

    /// Step the current index back by one, wrapping to the end.
    pub fn previous(&mut self) -> Option<TrackHandle> {
        if self.tracks.is_empty() {
            return None;
        }
        self.current = (self.current + self.tracks.len() - 1) % self.tracks.len();
        self.current()
    }

    /// Set the current index, if `index` is in bounds.
    pub fn jump_to(&mut self, index: usize) -> Option<TrackHandle> {
        if index < self.tracks.len() {
            self.current = index;
            self.current()
        } else {
            None
        }
    }

    /// Pick a uniform-random index distinct from the current one when
    /// `len >= 2`; returns the sole track unchanged when `len == 1`; `None`
    /// when empty. Does not mutate `current` — callers decide whether the
    /// returned handle becomes current via `jump_to`.
    pub fn random(&self) -> Option<TrackHandle> {
        match self.tracks.len() {
            0 => None,
            1 => self.tracks.first().copied(),
            n => {
                let mut rng = rand::rng();
                loop {
                    let candidate = rng.random_range(0..n);
                    if candidate != self.current {
                        return self.tracks.get(candidate).copied();
                    }
                }
            }
        }
    }

    /// Random index distinct from current, for callers that need to `jump_to` it.
    pub fn random_index(&self) -> Option<usize> {
        match self.tracks.len() {
            0 => None,
            1 => Some(0),
            n => {
                let mut rng = rand::rng();
                loop {
                    let candidate = rng.random_range(0..n);
                    if candidate != self.current {
                        return Some(candidate);
                    }
                }
            }
        }
    }

    /// Remove the track at `i`. Current-index correction: if `current > i`,
    /// decrement current; else if `current >= new_size`, clamp to
    /// `new_size - 1`; if emptied, current resets to 0.
    pub fn remove_at(&mut self, i: usize) {
        if i >= self.tracks.len() {
            return;
        }
        self.tracks.remove(i);
        if self.tracks.is_empty() {
            self.current = 0;
        } else if self.current > i {
            self.current -= 1;
        } else if self.current >= self.tracks.len() {
            self.current = self.tracks.len() - 1;
        }
    }

    /// Empty the playlist and reset current to 0.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = 0;
    }
}

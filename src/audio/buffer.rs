//! Rolling store of raw audio samples with overlap retention.
//!
//! The buffer keeps the most recent `capacity` samples and addresses them by
//! absolute position: the first sample ever appended is position 0, and
//! positions keep counting up forever. The segmenter extracts finalized
//! utterances and overlap prefixes by absolute range, so eviction never
//! invalidates anyone's bookkeeping; an evicted range simply comes back
//! clamped.

use std::collections::VecDeque;
use tracing::warn;

/// Bounded rolling sample store with absolute indexing.
pub struct UtteranceBuffer {
    data: VecDeque<i16>,
    capacity: usize,
    /// Absolute position of the next sample to be appended.
    total_appended: u64,
    /// Samples evicted so far, for overrun reporting.
    total_evicted: u64,
}

impl UtteranceBuffer {
    /// Creates a buffer holding `duration_s` seconds at `sample_rate`.
    pub fn new(duration_s: u32, sample_rate: u32) -> Self {
        Self::with_capacity((duration_s as usize) * (sample_rate as usize))
    }

    /// Creates a buffer with an explicit sample capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            total_appended: 0,
            total_evicted: 0,
        }
    }

    /// Appends a block of samples, evicting the oldest if the buffer is full.
    ///
    /// Returns the number of samples evicted. Eviction is logged but never
    /// blocks the producer: live capture wins over downstream consumption.
    pub fn append(&mut self, samples: &[i16]) -> usize {
        let mut evicted = 0;
        for &sample in samples {
            if self.data.len() == self.capacity {
                self.data.pop_front();
                evicted += 1;
            }
            self.data.push_back(sample);
        }
        self.total_appended += samples.len() as u64;
        if evicted > 0 {
            self.total_evicted += evicted as u64;
            warn!(
                evicted,
                total_evicted = self.total_evicted,
                "audio buffer overrun, oldest samples dropped"
            );
        }
        evicted
    }

    /// Absolute position of the oldest retained sample.
    pub fn earliest(&self) -> u64 {
        self.total_appended - self.data.len() as u64
    }

    /// Absolute position one past the newest retained sample.
    pub fn latest(&self) -> u64 {
        self.total_appended
    }

    /// Extracts an absolute sample range, clamped to the retained window.
    ///
    /// Requesting a partially evicted range returns the surviving suffix;
    /// a fully evicted or empty range returns an empty vector.
    pub fn extract(&self, start: u64, end: u64) -> Vec<i16> {
        let start = start.max(self.earliest()).min(self.latest());
        let end = end.max(self.earliest()).min(self.latest());
        if start >= end {
            return Vec::new();
        }
        let offset = (start - self.earliest()) as usize;
        let len = (end - start) as usize;
        self.data.iter().skip(offset).take(len).copied().collect()
    }

    /// Number of samples currently retained.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been retained.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total samples evicted over the buffer's lifetime.
    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }
}

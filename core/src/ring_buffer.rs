//! Fixed-capacity circular buffer for streamed PCM samples.
//!
//! Capacity is fixed at construction and sized to hold exactly one framed
//! message. Reads always reconstruct the logical (time-ordered) contents
//! from the write cursor; stored data is never shifted. Not safe for
//! concurrent mutation; the orchestrator serializes all access.

pub struct RingBuffer {
    samples: Vec<f32>,
    /// Next write position, modulo capacity.
    index: usize,
    /// Analysis step accounting only; never used for addressing.
    analysis_index: usize,
}

impl RingBuffer {
    /// Creates a zero-filled buffer of `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            samples: vec![0.0; capacity],
            index: 0,
            analysis_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Copies `values` in at the write cursor, wrapping past the end.
    ///
    /// Writes longer than the space left before the end wrap within this
    /// single call; writes longer than the whole capacity leave the last
    /// `capacity` samples, matching a sample-by-sample write.
    pub fn add(&mut self, values: &[f32]) {
        let capacity = self.capacity();
        let mut values = values;
        if values.len() > capacity {
            values = &values[values.len() - capacity..];
        }
        let space_left = capacity - self.index;
        if values.len() > space_left {
            self.samples[self.index..].copy_from_slice(&values[..space_left]);
            self.samples[..values.len() - space_left].copy_from_slice(&values[space_left..]);
        } else {
            self.samples[self.index..self.index + values.len()].copy_from_slice(values);
        }
        self.index = (self.index + values.len()) % capacity;
    }

    /// Returns the contents oldest-first, independent of the cursor
    /// position. Pure read, no mutation.
    pub fn snapshot_ordered(&self) -> Vec<f32> {
        let mut ordered = Vec::with_capacity(self.capacity());
        ordered.extend_from_slice(&self.samples[self.index..]);
        ordered.extend_from_slice(&self.samples[..self.index]);
        ordered
    }

    /// Oldest `n` samples in time order.
    pub fn first_window(&self, n: usize) -> Vec<f32> {
        assert!(n <= self.capacity());
        let mut window = Vec::with_capacity(n);
        let to_end = self.capacity() - self.index;
        if n <= to_end {
            window.extend_from_slice(&self.samples[self.index..self.index + n]);
        } else {
            window.extend_from_slice(&self.samples[self.index..]);
            window.extend_from_slice(&self.samples[..n - to_end]);
        }
        window
    }

    /// Newest `n` samples in time order.
    pub fn last_window(&self, n: usize) -> Vec<f32> {
        assert!(n <= self.capacity());
        let mut window = Vec::with_capacity(n);
        if n <= self.index {
            window.extend_from_slice(&self.samples[self.index - n..self.index]);
        } else {
            window.extend_from_slice(&self.samples[self.capacity() - (n - self.index)..]);
            window.extend_from_slice(&self.samples[..self.index]);
        }
        window
    }

    /// Advances the analysis cursor; step accounting for the capture loop.
    pub fn advance_analysis(&mut self, step: usize) {
        self.analysis_index = (self.analysis_index + step) % self.capacity();
    }

    pub fn analysis_index(&self) -> usize {
        self.analysis_index
    }
}

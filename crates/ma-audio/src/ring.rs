//! Capture ring buffer
//!
//! Single-producer / single-consumer ring of 16-bit samples sitting between
//! the capture device callback and the processing worker. One mutex
//! serializes both endpoints and the level query; critical sections are
//! memcpy-sized. The producer runs at real-time priority and must never
//! block on the consumer, so on overflow the writer drops the excess and
//! counts it: pipeline latency is preferred over data preservation when
//! downstream cannot keep up.

use parking_lot::Mutex;

/// Ring state. Invariant at every unlock:
/// `available == (write_pos - read_pos) mod capacity` and
/// `available <= capacity`.
struct RingState {
    buffer: Vec<i16>,
    write_pos: usize,
    read_pos: usize,
    available: usize,
    dropped: u64,
}

impl RingState {
    #[cfg(debug_assertions)]
    fn check_invariant(&self) {
        let capacity = self.buffer.len();
        debug_assert!(self.available <= capacity);
        debug_assert_eq!(
            (self.write_pos + capacity - self.read_pos) % capacity,
            self.available % capacity
        );
    }

    #[cfg(not(debug_assertions))]
    fn check_invariant(&self) {}
}

/// Mutex-serialized SPSC sample ring.
pub struct CaptureRing {
    state: Mutex<RingState>,
    capacity: usize,
}

impl CaptureRing {
    /// Create a ring holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buffer: vec![0; capacity],
                write_pos: 0,
                read_pos: 0,
                available: 0,
                dropped: 0,
            }),
            capacity,
        }
    }

    /// Copy up to `capacity - available` samples in, silently dropping any
    /// excess. Returns the number accepted.
    pub fn push(&self, samples: &[i16]) -> usize {
        let mut state = self.state.lock();
        let space = self.capacity - state.available;
        let accepted = samples.len().min(space);

        let write_pos = state.write_pos;
        let first = accepted.min(self.capacity - write_pos);
        state.buffer[write_pos..write_pos + first].copy_from_slice(&samples[..first]);
        state.buffer[..accepted - first].copy_from_slice(&samples[first..accepted]);

        state.write_pos = (write_pos + accepted) % self.capacity;
        state.available += accepted;
        state.dropped += (samples.len() - accepted) as u64;
        state.check_invariant();
        accepted
    }

    /// Copy up to `min(out.len(), available)` samples out in FIFO order.
    /// Returns the number read.
    pub fn pop(&self, out: &mut [i16]) -> usize {
        let mut state = self.state.lock();
        let to_read = out.len().min(state.available);

        let read_pos = state.read_pos;
        let first = to_read.min(self.capacity - read_pos);
        out[..first].copy_from_slice(&state.buffer[read_pos..read_pos + first]);
        out[first..to_read].copy_from_slice(&state.buffer[..to_read - first]);

        state.read_pos = (read_pos + to_read) % self.capacity;
        state.available -= to_read;
        state.check_invariant();
        to_read
    }

    /// Samples currently buffered.
    pub fn level(&self) -> usize {
        self.state.lock().available
    }

    /// Total samples dropped on overflow since creation or the last clear.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Discard buffered samples and the drop counter.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.write_pos = 0;
        state.read_pos = 0;
        state.available = 0;
        state.dropped = 0;
    }
}

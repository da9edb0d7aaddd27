//! Circular byte buffer between network receive and audio playback
//!
//! Single producer (the network receive context) and single consumer (the
//! playback scheduler) share one [`RingBuffer`] behind an `Arc`. The producer
//! never blocks: bytes past the free space are truncated, which is the flow
//! control policy, not an error. The consumer blocks on a condition variable
//! signaled on every write, and a `finished` flag lets it drain the tail and
//! terminate instead of waiting forever.

use std::sync::{Condvar, Mutex};

struct RingState {
    buf: Vec<u8>,
    read: usize,
    write: usize,
    fill: usize,
    finished: bool,
}

/// Fixed-capacity circular FIFO byte store
pub struct RingBuffer {
    state: Mutex<RingState>,
    data_ready: Condvar,
    capacity: usize,
}

impl RingBuffer {
    /// Create a ring buffer holding up to `capacity` bytes
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            state: Mutex::new(RingState {
                buf: vec![0; capacity],
                read: 0,
                write: 0,
                fill: 0,
                finished: false,
            }),
            data_ready: Condvar::new(),
            capacity,
        }
    }

    /// Append bytes, truncating anything beyond the free space
    ///
    /// Never blocks and never overwrites unread data. Returns the number of
    /// bytes accepted.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock().unwrap();

        let accepted = bytes.len().min(self.capacity - state.fill);
        if accepted < bytes.len() {
            tracing::trace!(
                offered = bytes.len(),
                accepted,
                "ring buffer full, truncating write"
            );
        }

        let write = state.write;
        let first = accepted.min(self.capacity - write);
        state.buf[write..write + first].copy_from_slice(&bytes[..first]);
        let wrapped = accepted - first;
        state.buf[..wrapped].copy_from_slice(&bytes[first..accepted]);

        state.write = (write + accepted) % self.capacity;
        state.fill += accepted;
        drop(state);

        self.data_ready.notify_all();
        accepted
    }

    /// Read exactly `out.len()` bytes, blocking until they are available
    ///
    /// Returns fewer bytes only once `finished` is set and the remaining fill
    /// is smaller than the request; returns 0 when fully drained.
    ///
    /// # Panics
    ///
    /// Panics if `out.len()` exceeds the capacity; such a read could never
    /// be satisfied and would block until `finish`.
    pub fn read_exact(&self, out: &mut [u8]) -> usize {
        assert!(
            out.len() <= self.capacity,
            "read larger than ring capacity"
        );
        let mut state = self.state.lock().unwrap();
        while state.fill < out.len() && !state.finished {
            state = self.data_ready.wait(state).unwrap();
        }

        let n = out.len().min(state.fill);
        let read = state.read;
        let first = n.min(self.capacity - read);
        out[..first].copy_from_slice(&state.buf[read..read + first]);
        out[first..n].copy_from_slice(&state.buf[..n - first]);

        state.read = (read + n) % self.capacity;
        state.fill -= n;
        n
    }

    /// Discard `n` bytes from the stream, one byte at a time
    ///
    /// Each byte read waits for data if the buffer is momentarily empty, so
    /// a header can be skipped while it is still arriving. Returns how many
    /// bytes were actually discarded (fewer only if the stream ended).
    pub fn skip(&self, n: usize) -> usize {
        let mut byte = [0u8; 1];
        let mut skipped = 0;
        for _ in 0..n {
            if self.read_exact(&mut byte) == 0 {
                break;
            }
            skipped += 1;
        }
        skipped
    }

    /// Block until the fill level reaches `threshold` or the stream finished
    ///
    /// Returns the fill level at wake-up. A short payload that never reaches
    /// the threshold wakes the caller via the `finished` flag.
    pub fn wait_for_fill(&self, threshold: usize) -> usize {
        let mut state = self.state.lock().unwrap();
        while state.fill < threshold && !state.finished {
            state = self.data_ready.wait(state).unwrap();
        }
        state.fill
    }

    /// Bytes currently buffered
    #[must_use]
    pub fn fill(&self) -> usize {
        self.state.lock().unwrap().fill
    }

    /// Total capacity in bytes
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark that no more data will ever arrive
    pub fn finish(&self) {
        self.state.lock().unwrap().finished = true;
        self.data_ready.notify_all();
    }

    /// Whether the producer has marked the stream complete
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    /// Whether the stream is complete and every byte has been consumed
    #[must_use]
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.finished && state.fill == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use rand::Rng;

    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let ring = RingBuffer::new(64);
        assert_eq!(ring.write(b"hello "), 6);
        assert_eq!(ring.write(b"world"), 5);

        let mut out = [0u8; 11];
        assert_eq!(ring.read_exact(&mut out), 11);
        assert_eq!(&out, b"hello world");
        assert_eq!(ring.fill(), 0);
    }

    #[test]
    fn overflow_keeps_first_bytes() {
        let ring = RingBuffer::new(8);
        let data: Vec<u8> = (0..12).collect();

        assert_eq!(ring.write(&data), 8);
        assert_eq!(ring.fill(), 8);

        // A full buffer accepts nothing further
        assert_eq!(ring.write(&[99]), 0);

        ring.finish();
        let mut out = [0u8; 8];
        assert_eq!(ring.read_exact(&mut out), 8);
        assert_eq!(&out, &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn read_past_end_returns_short_after_finish() {
        let ring = RingBuffer::new(16);
        ring.write(&[1, 2, 3]);
        ring.finish();

        let mut out = [0u8; 8];
        assert_eq!(ring.read_exact(&mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(ring.read_exact(&mut out), 0);
        assert!(ring.is_drained());
    }

    #[test]
    #[should_panic(expected = "read larger than ring capacity")]
    fn oversized_read_is_rejected() {
        let ring = RingBuffer::new(8);
        let mut out = [0u8; 9];
        ring.read_exact(&mut out);
    }

    #[test]
    fn skip_discards_exact_count() {
        let ring = RingBuffer::new(64);
        ring.write(&[9u8; 44]);
        ring.write(&[7u8; 4]);

        assert_eq!(ring.skip(44), 44);
        let mut out = [0u8; 4];
        assert_eq!(ring.read_exact(&mut out), 4);
        assert_eq!(&out, &[7u8; 4]);
    }

    #[test]
    fn skip_stops_at_stream_end() {
        let ring = RingBuffer::new(16);
        ring.write(&[1, 2, 3]);
        ring.finish();
        assert_eq!(ring.skip(10), 3);
    }

    #[test]
    fn blocking_read_wakes_on_producer_write() {
        let ring = Arc::new(RingBuffer::new(32));
        let producer_ring = Arc::clone(&ring);

        let producer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            producer_ring.write(&[5u8; 10]);
        });

        let mut out = [0u8; 10];
        assert_eq!(ring.read_exact(&mut out), 10);
        assert_eq!(&out, &[5u8; 10]);
        producer.join().unwrap();
    }

    #[test]
    fn wait_for_fill_returns_on_finish_below_threshold() {
        let ring = Arc::new(RingBuffer::new(1024));
        let producer_ring = Arc::clone(&ring);

        let producer = std::thread::spawn(move || {
            producer_ring.write(&[0u8; 100]);
            producer_ring.finish();
        });

        // Threshold can never be reached; finish must unblock the wait
        let fill = ring.wait_for_fill(900);
        assert!(fill <= 100);
        producer.join().unwrap();
    }

    #[test]
    fn wrap_around_matches_unbounded_reference() {
        let mut rng = rand::thread_rng();
        let ring = RingBuffer::new(61); // odd capacity exercises wrap offsets
        let mut reference: VecDeque<u8> = VecDeque::new();

        for _ in 0..2000 {
            if rng.gen_bool(0.5) {
                let len = rng.gen_range(0..40);
                let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
                let accepted = ring.write(&data);
                assert_eq!(accepted, data.len().min(61 - reference.len()));
                reference.extend(&data[..accepted]);
            } else {
                let want = rng.gen_range(1..30).min(reference.len().max(1));
                if reference.len() >= want {
                    let mut out = vec![0u8; want];
                    assert_eq!(ring.read_exact(&mut out), want);
                    let expected: Vec<u8> = reference.drain(..want).collect();
                    assert_eq!(out, expected);
                }
            }
            assert_eq!(ring.fill(), reference.len());
        }
    }
}

//! Per-connection stream assembly
//!
//! Each WebSocket session owns one [`StreamAssembler`]. Inbound binary
//! frames accumulate into a single ordered byte sequence until a finalize
//! trigger: the explicit `"done"` control message or the transport closing.
//! Finalize happens at most once per session; whatever arrives afterwards is
//! ignored so a connection cannot be replayed.

/// Accumulates inbound PCM chunks into one utterance payload
#[derive(Debug, Default)]
pub struct StreamAssembler {
    data: Vec<u8>,
    finalized: bool,
}

impl StreamAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one binary chunk; returns false if the session was already
    /// finalized (the chunk is dropped)
    pub fn push_chunk(&mut self, chunk: &[u8]) -> bool {
        if self.finalized {
            tracing::debug!(bytes = chunk.len(), "chunk after finalize ignored");
            return false;
        }
        self.data.extend_from_slice(chunk);
        true
    }

    /// Finalize the stream, yielding the accumulated payload
    ///
    /// The first call returns the payload (possibly empty; the caller
    /// decides how to signal "no audio"); every later call returns `None`.
    /// Accumulation state is cleared so the buffer cannot be re-read.
    pub fn finalize(&mut self) -> Option<Vec<u8>> {
        if self.finalized {
            return None;
        }
        self.finalized = true;
        Some(std::mem::take(&mut self.data))
    }

    /// Whether finalize has already happened
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Bytes accumulated so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been accumulated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_accumulate_in_order() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.push_chunk(&[1, 2]));
        assert!(assembler.push_chunk(&[3]));
        assert!(assembler.push_chunk(&[4, 5, 6]));
        assert_eq!(assembler.len(), 6);

        assert_eq!(assembler.finalize(), Some(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut assembler = StreamAssembler::new();
        assembler.push_chunk(&[1, 2, 3]);

        assert_eq!(assembler.finalize(), Some(vec![1, 2, 3]));
        assert!(assembler.is_finalized());
        assert_eq!(assembler.finalize(), None);
        assert_eq!(assembler.finalize(), None);
    }

    #[test]
    fn chunks_after_finalize_are_dropped() {
        let mut assembler = StreamAssembler::new();
        assembler.push_chunk(&[1]);
        assembler.finalize();

        assert!(!assembler.push_chunk(&[2]));
        assert_eq!(assembler.len(), 0);
        assert_eq!(assembler.finalize(), None);
    }

    #[test]
    fn empty_finalize_yields_empty_payload() {
        let mut assembler = StreamAssembler::new();
        let payload = assembler.finalize().unwrap();
        assert!(payload.is_empty());
    }
}

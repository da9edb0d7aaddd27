//! Playback scheduler: drains the ring buffer into an audio sink
//!
//! Runs on a dedicated thread so speaker timing is isolated from the network
//! receive context. The scheduler holds back until the buffer crosses its
//! start threshold (or the stream ends first), discards the 44-byte WAV
//! header byte-by-byte while it may still be arriving, then consumes one
//! chunk per real-time chunk duration so the buffer drains at the speaker's
//! playback rate instead of instantaneously.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AudioConfig, PlaybackConfig};
use crate::device::ring::RingBuffer;
use crate::device::sink::AudioSink;
use crate::wav;
use crate::Result;

/// Playback phases, in transition order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// Blocked until the buffer fill reaches the start threshold
    WaitingForFill,
    /// Discarding the 44-byte WAV header ahead of the first sample
    SkippingHeader,
    /// Draining chunks to the sink at the real-time cadence
    Playing,
    /// Stream fully consumed, sink released
    Finished,
}

/// Consumes a [`RingBuffer`] into an [`AudioSink`] at playback rate
pub struct PlaybackScheduler<S: AudioSink> {
    ring: Arc<RingBuffer>,
    sink: S,
    chunk_size: usize,
    sample_rate: u32,
    gain: f32,
    start_threshold: usize,
    phase: PlaybackPhase,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    #[must_use]
    pub fn new(
        ring: Arc<RingBuffer>,
        sink: S,
        audio: &AudioConfig,
        playback: &PlaybackConfig,
    ) -> Self {
        Self {
            ring,
            sink,
            chunk_size: audio.chunk_size,
            sample_rate: audio.sample_rate,
            gain: playback.gain,
            start_threshold: playback.start_threshold(),
            phase: PlaybackPhase::WaitingForFill,
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    /// Run the playback state machine to completion
    ///
    /// Blocks the calling thread. The sink is closed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns error if a sink write fails; the failed chunk is not retried.
    pub fn run(mut self) -> Result<()> {
        let result = self.run_phases();
        if let Err(e) = self.sink.close() {
            tracing::warn!(error = %e, "audio sink close failed");
        }
        result
    }

    fn run_phases(&mut self) -> Result<()> {
        loop {
            match self.phase {
                PlaybackPhase::WaitingForFill => self.wait_for_fill(),
                PlaybackPhase::SkippingHeader => self.skip_header(),
                PlaybackPhase::Playing => self.play()?,
                PlaybackPhase::Finished => return Ok(()),
            }
        }
    }

    fn wait_for_fill(&mut self) {
        let fill = self.ring.wait_for_fill(self.start_threshold);
        tracing::debug!(
            fill,
            threshold = self.start_threshold,
            finished = self.ring.is_finished(),
            "buffer primed, starting playback"
        );
        self.phase = PlaybackPhase::SkippingHeader;
    }

    fn skip_header(&mut self) {
        let skipped = self.ring.skip(wav::HEADER_LEN);
        if skipped < wav::HEADER_LEN {
            // Stream ended inside the header; nothing decodable follows
            tracing::warn!(skipped, "stream ended before header completed");
            self.phase = PlaybackPhase::Finished;
        } else {
            self.phase = PlaybackPhase::Playing;
        }
    }

    fn play(&mut self) -> Result<()> {
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            if self.ring.is_drained() {
                break;
            }
            let n = self.ring.read_exact(&mut chunk);
            if n == 0 {
                break;
            }

            apply_gain(&mut chunk[..n], self.gain);
            self.sink.write(&chunk[..n])?;

            // Pace consumption to the chunk's real-time duration
            std::thread::sleep(chunk_duration(n, self.sample_rate));
        }
        tracing::debug!("playback drained");
        self.phase = PlaybackPhase::Finished;
        Ok(())
    }
}

/// Real-time duration of `bytes` of 16-bit mono PCM at `sample_rate`
#[must_use]
pub fn chunk_duration(bytes: usize, sample_rate: u32) -> Duration {
    let samples = (bytes / 2) as u64;
    Duration::from_micros(samples * 1_000_000 / u64::from(sample_rate))
}

/// Apply a linear gain in place, saturating at the i16 range
#[allow(clippy::cast_possible_truncation)]
pub fn apply_gain(pcm: &mut [u8], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for pair in pcm.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        let amplified = (f32::from(sample) * gain).clamp(-32768.0, 32767.0) as i16;
        pair.copy_from_slice(&amplified.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sink::MemorySink;

    fn test_audio() -> AudioConfig {
        // Tiny chunks keep the pacing sleeps negligible in tests
        AudioConfig {
            sample_rate: 24_000,
            chunk_size: 64,
        }
    }

    fn test_playback(capacity: usize, start_fill: f32, gain: f32) -> PlaybackConfig {
        PlaybackConfig {
            buffer_capacity: capacity,
            start_fill,
            gain,
        }
    }

    /// A 44-byte header followed by a constant-amplitude payload
    fn headered_payload(amplitude: i16, payload_bytes: usize) -> Vec<u8> {
        let mut data = vec![0u8; wav::HEADER_LEN];
        for _ in 0..payload_bytes / 2 {
            data.extend_from_slice(&amplitude.to_le_bytes());
        }
        data
    }

    #[test]
    fn no_sink_write_before_threshold() {
        let ring = Arc::new(RingBuffer::new(1024));
        let sink = MemorySink::new();
        let handle = sink.handle();

        let scheduler = PlaybackScheduler::new(
            Arc::clone(&ring),
            sink,
            &test_audio(),
            &test_playback(1024, 0.875, 1.0),
        );
        let worker = std::thread::spawn(move || scheduler.run());

        // Slow producer: stay below the 896-byte threshold for a while
        ring.write(&headered_payload(100, 256)[..256]);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.written_len(), 0, "sink written before threshold");

        // Cross the threshold and finish the stream
        ring.write(&headered_payload(100, 2048)[wav::HEADER_LEN..]);
        ring.finish();

        worker.join().unwrap().unwrap();
        assert!(handle.written_len() > 0);
        assert!(handle.is_closed());
    }

    #[test]
    fn short_payload_plays_without_deadlock() {
        // Payload far below the threshold; finish() must unblock the wait
        let ring = Arc::new(RingBuffer::new(4096));
        let sink = MemorySink::new();
        let handle = sink.handle();

        let data = headered_payload(1000, 128);
        ring.write(&data);
        ring.finish();

        let scheduler = PlaybackScheduler::new(
            ring,
            sink,
            &test_audio(),
            &test_playback(4096, 0.875, 1.0),
        );
        scheduler.run().unwrap();

        assert_eq!(handle.written_len(), 128);
        assert!(handle.is_closed());
    }

    #[test]
    fn header_is_not_audible() {
        let ring = Arc::new(RingBuffer::new(4096));
        let sink = MemorySink::new();
        let handle = sink.handle();

        // Header bytes are a recognizable pattern the payload never contains
        let mut data = vec![0xEEu8; wav::HEADER_LEN];
        for _ in 0..64 {
            data.extend_from_slice(&42i16.to_le_bytes());
        }
        ring.write(&data);
        ring.finish();

        let scheduler = PlaybackScheduler::new(
            ring,
            sink,
            &test_audio(),
            &test_playback(4096, 0.1, 1.0),
        );
        scheduler.run().unwrap();

        let written = handle.written();
        assert_eq!(written.len(), 128);
        assert!(written.iter().all(|&b| b != 0xEE));
    }

    #[test]
    fn stream_ending_inside_header_finishes_cleanly() {
        let ring = Arc::new(RingBuffer::new(1024));
        ring.write(&[0u8; 20]);
        ring.finish();

        let sink = MemorySink::new();
        let handle = sink.handle();
        let scheduler = PlaybackScheduler::new(
            ring,
            sink,
            &test_audio(),
            &test_playback(1024, 0.01, 1.0),
        );
        scheduler.run().unwrap();

        assert_eq!(handle.written_len(), 0);
        assert!(handle.is_closed());
    }

    #[test]
    fn gain_amplifies_and_saturates() {
        let mut pcm = Vec::new();
        pcm.extend_from_slice(&1000i16.to_le_bytes());
        pcm.extend_from_slice(&30_000i16.to_le_bytes());
        pcm.extend_from_slice(&(-30_000i16).to_le_bytes());

        apply_gain(&mut pcm, 2.0);

        let samples: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(samples, vec![2000, 32_767, -32_768]);
    }

    #[test]
    fn unity_gain_leaves_samples_untouched() {
        let mut pcm: Vec<u8> = (0..64u8).collect();
        let original = pcm.clone();
        apply_gain(&mut pcm, 1.0);
        assert_eq!(pcm, original);
    }

    #[test]
    fn chunk_duration_matches_sample_math() {
        // 2048 bytes = 1024 samples at 24 kHz ≈ 42.67 ms
        let d = chunk_duration(2048, 24_000);
        assert_eq!(d.as_micros(), 42_666);
    }
}

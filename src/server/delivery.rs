//! Paced delivery of a synthesized reply
//!
//! A complete audio payload is cut into device-sized chunks and sent in two
//! phases: an initial burst that front-loads the device's ring buffer as
//! fast as the transport allows, then a paced tail that matches the device's
//! real-time consumption so the buffer neither starves nor overflows. Time
//! is abstracted behind a [`Clock`] so the pacing cadence is testable
//! without waiting for it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::DeliveryConfig;
use crate::wav::{self, WavFormat};
use crate::{Error, Result};

/// Outbound side of one reply delivery
///
/// Chunk loss on a closed transport is terminal for the delivery; none of
/// these operations retry.
#[async_trait]
pub trait ReplyTransport: Send {
    /// Send one binary audio chunk
    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// Send the completion marker
    async fn send_done(&mut self) -> Result<()>;

    /// Whether the transport is still usable
    fn is_open(&self) -> bool;
}

/// Time source for the pacing loop
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's epoch
    fn now(&self) -> Duration;

    /// Sleep for `duration`, yielding the task
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock [`Clock`] backed by tokio timers
pub struct TokioClock {
    epoch: std::time::Instant,
}

impl TokioClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic [`Clock`] whose sleeps complete instantly
///
/// Every sleep advances the virtual time by the requested amount, so a test
/// can assert the exact cadence the scheduler would have produced.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }
}

/// Chunking and cadence derived from one complete reply payload
#[derive(Debug)]
pub struct DeliveryPlan {
    payload: Vec<u8>,
    chunk_size: usize,
    format: WavFormat,
    total_chunks: usize,
    burst_chunks: usize,
    interval: Duration,
}

impl DeliveryPlan {
    /// Build a plan for `payload`
    ///
    /// The stream format is parsed from the payload's WAV header; a missing
    /// or malformed header falls back to the bridge default (24 kHz mono
    /// 16-bit). `chunk_size` must equal the device's receive chunk size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn new(payload: Vec<u8>, chunk_size: usize, burst_fraction: f64) -> Self {
        let format = wav::parse_header(&payload).unwrap_or_else(|| {
            tracing::debug!("payload has no parsable WAV header, assuming defaults");
            WavFormat::default()
        });

        let bytes_per_second =
            f64::from(format.sample_rate) * f64::from(format.bits_per_sample / 8);
        let interval_ms = (1000.0 * chunk_size as f64 / bytes_per_second).round() as u64;

        let total_chunks = payload.len().div_ceil(chunk_size);
        let burst_chunks = if total_chunks == 0 {
            0
        } else {
            ((total_chunks as f64 * burst_fraction).floor() as usize).max(1)
        };

        Self {
            payload,
            chunk_size,
            format,
            total_chunks,
            burst_chunks,
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// The `index`-th chunk; the final chunk may be shorter than `chunk_size`
    ///
    /// # Panics
    ///
    /// Panics if `index >= total_chunks()`.
    #[must_use]
    pub fn chunk(&self, index: usize) -> &[u8] {
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.payload.len());
        &self.payload[start..end]
    }

    #[must_use]
    pub const fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    #[must_use]
    pub const fn burst_chunks(&self) -> usize {
        self.burst_chunks
    }

    /// Real-time playback duration of one full chunk
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub const fn format(&self) -> WavFormat {
        self.format
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Streams a [`DeliveryPlan`] over a [`ReplyTransport`] in burst + paced phases
pub struct PacedDeliveryScheduler<C: Clock> {
    clock: C,
    handshake_timeout: Duration,
}

impl<C: Clock> PacedDeliveryScheduler<C> {
    #[must_use]
    pub fn new(clock: C, config: &DeliveryConfig) -> Self {
        Self {
            clock,
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// Deliver every chunk of `plan`, then the completion marker
    ///
    /// When `ready` is supplied, sending is held until the receiver signals
    /// readiness or the handshake timeout elapses; the timeout is logged and
    /// delivery proceeds (the receiver's own buffering provides slack).
    ///
    /// # Errors
    ///
    /// Returns a transport error the moment the connection is observed
    /// closed; the delivery is aborted, nothing is retried.
    pub async fn deliver<T: ReplyTransport>(
        &self,
        plan: &DeliveryPlan,
        transport: &mut T,
        ready: Option<watch::Receiver<bool>>,
    ) -> Result<()> {
        if let Some(mut ready) = ready {
            tokio::select! {
                result = ready.wait_for(|r| *r) => {
                    if result.is_ok() {
                        tracing::debug!("client signaled ready");
                    }
                }
                () = self.clock.sleep(self.handshake_timeout) => {
                    tracing::warn!(
                        timeout_ms = self.handshake_timeout.as_millis() as u64,
                        "readiness handshake timed out, sending anyway"
                    );
                }
            }
        }

        tracing::debug!(
            total = plan.total_chunks(),
            burst = plan.burst_chunks(),
            interval_ms = plan.interval().as_millis() as u64,
            payload = plan.payload_len(),
            "starting delivery"
        );

        for index in 0..plan.total_chunks() {
            if !transport.is_open() {
                return Err(Error::Transport(
                    "connection closed during delivery".to_string(),
                ));
            }

            let send_started = self.clock.now();
            transport.send_chunk(plan.chunk(index)).await?;

            // Pacing applies from the end of the burst onward: the sleep sits
            // in front of each paced chunk, measured against the time the
            // previous send actually took
            let next_is_paced =
                index + 1 >= plan.burst_chunks() && index + 1 < plan.total_chunks();
            if next_is_paced {
                let elapsed = self.clock.now().saturating_sub(send_started);
                self.clock
                    .sleep(plan.interval().saturating_sub(elapsed))
                    .await;
            }
        }

        if !transport.is_open() {
            return Err(Error::Transport(
                "connection closed before completion marker".to_string(),
            ));
        }
        transport.send_done().await?;
        tracing::debug!(chunks = plan.total_chunks(), "delivery complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_chunk_math() {
        let plan = DeliveryPlan::new(vec![0u8; 10_000], 2048, 0.8);
        assert_eq!(plan.total_chunks(), 5);
        assert_eq!(plan.burst_chunks(), 4);
        assert_eq!(plan.chunk(0).len(), 2048);
        assert_eq!(plan.chunk(4).len(), 10_000 - 4 * 2048);
    }

    #[test]
    fn plan_exact_multiple_has_full_final_chunk() {
        let plan = DeliveryPlan::new(vec![0u8; 4096], 2048, 0.8);
        assert_eq!(plan.total_chunks(), 2);
        assert_eq!(plan.chunk(1).len(), 2048);
    }

    #[test]
    fn burst_is_at_least_one_chunk() {
        let plan = DeliveryPlan::new(vec![0u8; 100], 2048, 0.8);
        assert_eq!(plan.total_chunks(), 1);
        assert_eq!(plan.burst_chunks(), 1);
    }

    #[test]
    fn empty_payload_has_no_chunks() {
        let plan = DeliveryPlan::new(Vec::new(), 2048, 0.8);
        assert_eq!(plan.total_chunks(), 0);
        assert_eq!(plan.burst_chunks(), 0);
    }

    #[test]
    fn interval_from_default_format() {
        // Headerless payload falls back to 24 kHz 16-bit:
        // 1000 * 2048 / 48000 = 42.67 → 43 ms
        let plan = DeliveryPlan::new(vec![0u8; 10_000], 2048, 0.8);
        assert_eq!(plan.interval(), Duration::from_millis(43));
        assert_eq!(plan.format(), WavFormat::default());
    }

    #[test]
    fn interval_follows_parsed_header() {
        let pcm = vec![0u8; 8192];
        let wav = crate::wav::encode_wav(
            &pcm,
            WavFormat {
                sample_rate: 16_000,
                channels: 1,
                bits_per_sample: 16,
            },
        )
        .unwrap();
        let plan = DeliveryPlan::new(wav, 2048, 0.8);
        // 1000 * 2048 / 32000 = 64 ms
        assert_eq!(plan.interval(), Duration::from_millis(64));
    }

    #[test]
    fn sub_byte_depth_header_falls_back_to_default_cadence() {
        let mut wav = crate::wav::encode_wav(&vec![0u8; 8192], WavFormat::default()).unwrap();
        // Corrupt the depth field to 4 bits; the plan must not trust it,
        // otherwise the byte rate degenerates and pacing sleeps forever
        wav[34..36].copy_from_slice(&4u16.to_le_bytes());

        let plan = DeliveryPlan::new(wav, 2048, 0.8);
        assert_eq!(plan.format(), WavFormat::default());
        assert_eq!(plan.interval(), Duration::from_millis(43));
    }

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        tokio_test::block_on(clock.sleep(Duration::from_millis(30)));
        assert_eq!(clock.now(), Duration::from_millis(30));
    }
}

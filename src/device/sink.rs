//! Audio output sinks for the playback scheduler

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Destination for decoded PCM chunks
///
/// The playback scheduler owns exactly one sink and always closes it before
/// returning, including on error paths.
pub trait AudioSink {
    /// Write one chunk of 16-bit little-endian mono PCM
    ///
    /// # Errors
    ///
    /// Returns error if the sink can no longer accept audio.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Flush remaining audio and release the underlying resource
    ///
    /// # Errors
    ///
    /// Returns error if the sink fails while draining.
    fn close(&mut self) -> Result<()>;
}

/// Speaker output via the default cpal device
///
/// Holds a live output stream fed from a shared sample queue; `write` appends
/// to the queue and the stream callback drains it. Not `Send` (cpal streams
/// are thread-bound), so construct it on the playback thread itself.
pub struct CpalSink {
    queue: Arc<Mutex<VecDeque<i16>>>,
    stream: Option<Stream>,
    sample_rate: u32,
    channels: usize,
}

impl CpalSink {
    /// Open the default output device at the given sample rate
    ///
    /// # Errors
    ///
    /// Returns error if no output device or no suitable mono/stereo config
    /// exists.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: stereo, duplicating the mono signal
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();
        let channels = config.channels as usize;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio sink initialized"
        );

        let queue: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let queue_for_callback = Arc::clone(&queue);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue_for_callback.lock().unwrap();
                    for frame in data.chunks_mut(channels) {
                        let sample = queue
                            .pop_front()
                            .map_or(0.0, |s| f32::from(s) / 32768.0);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio sink stream error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            queue,
            stream: Some(stream),
            sample_rate,
            channels,
        })
    }

    fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Audio("sink already closed".to_string()));
        }
        let mut queue = self.queue.lock().unwrap();
        for pair in pcm.chunks_exact(2) {
            queue.push_back(i16::from_le_bytes([pair[0], pair[1]]));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        // Let the callback drain what is queued, bounded by the queue's
        // real-time duration plus slack
        let remaining = self.queued();
        let duration_ms = (remaining as u64 * 1000) / u64::from(self.sample_rate) + 200;
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(duration_ms);
        while self.queued() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        drop(stream);
        tracing::debug!(channels = self.channels, "audio sink closed");
        Ok(())
    }
}

/// In-memory sink for tests and headless runs
///
/// Captures everything written; a shared handle lets a test observe writes
/// while the scheduler runs on another thread.
#[derive(Default)]
pub struct MemorySink {
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle observing this sink's state from another thread
    #[must_use]
    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            written: Arc::clone(&self.written),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.written.lock().unwrap().extend_from_slice(pcm);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Observer handle for [`MemorySink`]
#[derive(Clone)]
pub struct MemorySinkHandle {
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemorySinkHandle {
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    #[must_use]
    pub fn written_len(&self) -> usize {
        self.written.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

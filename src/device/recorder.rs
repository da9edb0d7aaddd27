//! Voice-activity-gated recording
//!
//! Classifies fixed-size microphone frames by mean absolute amplitude and
//! captures exactly one utterance: frames before the first speech frame are
//! dropped (no leading silence in the result), accumulated silence after
//! speech ends the utterance, and a hard timeout abandons a session where
//! nobody ever spoke.

use std::time::{Duration, Instant};

use crate::config::VadConfig;
use crate::device::capture::AudioCapture;
use crate::Result;

/// Recorder phases, in transition order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    /// No speech heard yet; the overall timeout is ticking
    AwaitingSpeech,
    /// Speech detected at least once; capturing until silence accumulates
    Recording,
    /// Utterance complete or timed out
    Done,
}

/// Amplitude-gated utterance recorder
///
/// Pure state machine over i16 frames; feeding it synthetic traces exercises
/// every transition without hardware.
pub struct VoiceActivityRecorder {
    config: VadConfig,
    sample_rate: u32,
    phase: RecorderPhase,
    captured: Vec<u8>,
    silence_ms: u64,
    elapsed_ms: u64,
}

impl VoiceActivityRecorder {
    #[must_use]
    pub const fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            phase: RecorderPhase::AwaitingSpeech,
            captured: Vec::new(),
            silence_ms: 0,
            elapsed_ms: 0,
        }
    }

    /// Feed one frame of samples; returns the phase after processing
    pub fn push_frame(&mut self, frame: &[i16]) -> RecorderPhase {
        if self.phase == RecorderPhase::Done || frame.is_empty() {
            return self.phase;
        }

        let frame_ms = frame.len() as u64 * 1000 / u64::from(self.sample_rate);
        self.elapsed_ms += frame_ms;

        let amplitude = mean_abs_amplitude(frame);
        let is_speech = amplitude >= self.config.amplitude_threshold;

        match self.phase {
            RecorderPhase::AwaitingSpeech => {
                if is_speech {
                    tracing::debug!(amplitude, "speech detected, recording");
                    self.phase = RecorderPhase::Recording;
                    self.silence_ms = 0;
                    self.append(frame);
                } else if self.elapsed_ms >= self.config.timeout_ms {
                    tracing::debug!(
                        elapsed_ms = self.elapsed_ms,
                        "timeout without speech, abandoning recording"
                    );
                    self.phase = RecorderPhase::Done;
                }
            }
            RecorderPhase::Recording => {
                self.append(frame);
                if is_speech {
                    self.silence_ms = 0;
                } else {
                    self.silence_ms += frame_ms;
                    if self.silence_ms >= self.config.silence_ms {
                        tracing::debug!(
                            captured_bytes = self.captured.len(),
                            "utterance complete"
                        );
                        self.phase = RecorderPhase::Done;
                    }
                }
            }
            RecorderPhase::Done => {}
        }

        self.phase
    }

    fn append(&mut self, frame: &[i16]) {
        for &sample in frame {
            self.captured.extend_from_slice(&sample.to_le_bytes());
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> RecorderPhase {
        self.phase
    }

    /// Bytes captured so far
    #[must_use]
    pub fn captured_len(&self) -> usize {
        self.captured.len()
    }

    /// Consume the recorder, yielding the captured PCM
    ///
    /// Returns `None` when nothing was captured: no file should be finalized
    /// for a session where speech was never detected.
    #[must_use]
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.captured.is_empty() {
            None
        } else {
            Some(self.captured)
        }
    }
}

/// Mean absolute amplitude of a frame, on the i16 scale
#[allow(clippy::cast_precision_loss)]
fn mean_abs_amplitude(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|&s| f32::from(s).abs()).sum();
    sum / frame.len() as f32
}

/// Record one utterance from the default microphone
///
/// Polls the capture buffer at roughly the frame cadence and feeds
/// fixed-size frames through the recorder until it reports `Done`. The
/// recorder's timeout advances with captured frames only, so a separate
/// wall-clock bound ends the session if the input stream stops producing
/// samples altogether.
///
/// # Errors
///
/// Returns error if the microphone cannot be opened or started.
pub async fn record_utterance(config: VadConfig, sample_rate: u32) -> Result<Option<Vec<u8>>> {
    let mut capture = AudioCapture::new(sample_rate)?;
    capture.start()?;
    let captured = drive_recorder(config, sample_rate, || capture.take_buffer()).await;
    capture.stop();
    Ok(captured)
}

/// Poll `take_samples` and feed fixed-size frames through the recorder
///
/// `timeout_ms` doubles as the stall bound: a source that yields nothing for
/// that long ends the session with whatever was captured so far.
async fn drive_recorder<F>(
    config: VadConfig,
    sample_rate: u32,
    mut take_samples: F,
) -> Option<Vec<u8>>
where
    F: FnMut() -> Vec<i16>,
{
    let mut recorder = VoiceActivityRecorder::new(config, sample_rate);
    let mut pending: Vec<i16> = Vec::new();
    let frame_len = config.frame_samples;
    let poll = Duration::from_millis(frame_len as u64 * 1000 / u64::from(sample_rate)).max(
        Duration::from_millis(10),
    );
    let stall_bound = Duration::from_millis(config.timeout_ms);
    let mut last_samples = Instant::now();

    loop {
        tokio::time::sleep(poll).await;

        let samples = take_samples();
        if samples.is_empty() {
            if last_samples.elapsed() >= stall_bound {
                tracing::warn!("input stream stalled, ending recording");
                return recorder.finish();
            }
        } else {
            last_samples = Instant::now();
            pending.extend(samples);
        }

        while pending.len() >= frame_len {
            let frame: Vec<i16> = pending.drain(..frame_len).collect();
            if recorder.push_frame(&frame) == RecorderPhase::Done {
                return recorder.finish();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 24_000;

    fn test_config() -> VadConfig {
        VadConfig {
            amplitude_threshold: 500.0,
            silence_ms: 200,
            timeout_ms: 1000,
            frame_samples: 240, // 10 ms at 24 kHz
        }
    }

    fn silence_frame() -> Vec<i16> {
        vec![0; 240]
    }

    fn speech_frame() -> Vec<i16> {
        vec![2000; 240]
    }

    #[test]
    fn all_silence_times_out_with_no_capture() {
        let mut recorder = VoiceActivityRecorder::new(test_config(), RATE);

        // 100 frames of 10 ms silence reach the 1000 ms timeout
        for _ in 0..100 {
            recorder.push_frame(&silence_frame());
        }
        assert_eq!(recorder.phase(), RecorderPhase::Done);
        assert_eq!(recorder.captured_len(), 0);
        assert!(recorder.finish().is_none());
    }

    #[test]
    fn leading_silence_is_not_captured() {
        let mut recorder = VoiceActivityRecorder::new(test_config(), RATE);

        for _ in 0..10 {
            recorder.push_frame(&silence_frame());
        }
        assert_eq!(recorder.phase(), RecorderPhase::AwaitingSpeech);
        assert_eq!(recorder.captured_len(), 0);

        recorder.push_frame(&speech_frame());
        assert_eq!(recorder.phase(), RecorderPhase::Recording);
        // The triggering frame itself is captured
        assert_eq!(recorder.captured_len(), 240 * 2);
    }

    #[test]
    fn silence_after_speech_ends_utterance() {
        let mut recorder = VoiceActivityRecorder::new(test_config(), RATE);

        for _ in 0..5 {
            recorder.push_frame(&speech_frame());
        }
        assert_eq!(recorder.phase(), RecorderPhase::Recording);

        // 200 ms of silence = 20 frames
        for _ in 0..19 {
            assert_eq!(recorder.push_frame(&silence_frame()), RecorderPhase::Recording);
        }
        assert_eq!(recorder.push_frame(&silence_frame()), RecorderPhase::Done);

        // Speech frames plus the trailing silence were captured
        let captured = recorder.finish().unwrap();
        assert_eq!(captured.len(), (5 + 20) * 240 * 2);
    }

    #[test]
    fn speech_resets_silence_accumulator() {
        let mut recorder = VoiceActivityRecorder::new(test_config(), RATE);

        recorder.push_frame(&speech_frame());
        for _ in 0..15 {
            recorder.push_frame(&silence_frame());
        }
        // Speech again before the 200 ms silence bound
        recorder.push_frame(&speech_frame());
        for _ in 0..15 {
            recorder.push_frame(&silence_frame());
        }
        assert_eq!(recorder.phase(), RecorderPhase::Recording);
    }

    #[test]
    fn frames_after_done_are_ignored() {
        let mut recorder = VoiceActivityRecorder::new(test_config(), RATE);

        for _ in 0..100 {
            recorder.push_frame(&silence_frame());
        }
        assert_eq!(recorder.phase(), RecorderPhase::Done);

        recorder.push_frame(&speech_frame());
        assert_eq!(recorder.phase(), RecorderPhase::Done);
        assert_eq!(recorder.captured_len(), 0);
    }

    #[test]
    fn mean_amplitude_is_sign_independent() {
        let frame: Vec<i16> = vec![1000, -1000, 1000, -1000];
        assert!((mean_abs_amplitude(&frame) - 1000.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn stalled_source_ends_recording_with_captured_audio() {
        // Large silence budget: only the wall-clock stall bound can end this
        let config = VadConfig {
            amplitude_threshold: 500.0,
            silence_ms: 60_000,
            timeout_ms: 40,
            frame_samples: 240,
        };

        let mut polls = 0;
        let captured = drive_recorder(config, RATE, move || {
            polls += 1;
            if polls <= 2 {
                vec![2000i16; 240]
            } else {
                Vec::new()
            }
        })
        .await;

        assert_eq!(captured.unwrap().len(), 2 * 240 * 2);
    }

    #[tokio::test]
    async fn stalled_source_with_no_speech_yields_nothing() {
        let config = VadConfig {
            amplitude_threshold: 500.0,
            silence_ms: 200,
            timeout_ms: 40,
            frame_samples: 240,
        };

        let captured = drive_recorder(config, RATE, Vec::new).await;
        assert!(captured.is_none());
    }
}

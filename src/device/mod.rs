//! Device-side pipeline
//!
//! Capture, voice-activity-gated recording, and buffered playback. The
//! inbound half is a single-producer/single-consumer pair: a network receive
//! context writes into the [`RingBuffer`] while the [`PlaybackScheduler`]
//! drains it to the speaker on its own thread.

mod capture;
mod playback;
mod recorder;
mod ring;
mod sink;

pub use capture::AudioCapture;
pub use playback::{apply_gain, chunk_duration, PlaybackPhase, PlaybackScheduler};
pub use recorder::{record_utterance, RecorderPhase, VoiceActivityRecorder};
pub use ring::RingBuffer;
pub use sink::{AudioSink, CpalSink, MemorySink, MemorySinkHandle};

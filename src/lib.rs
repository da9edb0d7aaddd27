//! Chirp Bridge - real-time voice bridge between devices and speech/AI backends
//!
//! The bridge carries one utterance at a time through a bidirectional
//! streaming pipeline:
//!
//! ```text
//! ┌──────────────────────── device ────────────────────────┐
//! │  mic → VAD recorder → chunked WebSocket upload          │
//! │  speaker ← playback scheduler ← ring buffer ← receive   │
//! └────────────────────────┬───────────────────────────────┘
//!                          │ binary PCM frames + text control
//! ┌────────────────────────▼───────────────────────────────┐
//! │                  relay server                           │
//! │  stream assembler → STT → LLM → TTS → paced delivery    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! The device side buffers the synthesized reply in a fixed circular buffer
//! and only starts draining to the speaker once a fill threshold is reached;
//! the server side front-loads that buffer with a burst phase and then paces
//! the remaining chunks at the real-time playback rate.

pub mod config;
pub mod device;
pub mod error;
pub mod media;
pub mod server;
pub mod wav;

pub use config::Config;
pub use error::{Error, Result};
pub use server::ApiServer;

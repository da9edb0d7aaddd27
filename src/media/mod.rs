//! Speech pipeline collaborators
//!
//! The bridge treats transcription, reply generation, and synthesis as one
//! [`SpeechBackend`] seam: the server calls through the trait, tests swap in
//! a stub, and the production implementation composes the three HTTP clients.

mod reply;
mod stt;
mod tts;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::Result;

pub use reply::ReplyGenerator;
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

/// External speech services behind one seam
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Transcribe a complete WAV utterance to text
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;

    /// Generate a conversational reply to a transcript
    async fn reply(&self, transcript: &str) -> Result<String>;

    /// Synthesize a reply into audio bytes (WAV preferred)
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Production backend over the OpenAI speech and chat APIs
pub struct OpenAiBackend {
    stt: SpeechToText,
    generator: ReplyGenerator,
    tts: TextToSpeech,
}

impl OpenAiBackend {
    /// Build the backend from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let api_key = config.openai_api_key.clone().unwrap_or_default();

        Ok(Self {
            stt: SpeechToText::new(api_key.clone(), config.stt_model.clone())?,
            generator: ReplyGenerator::new(
                api_key.clone(),
                config.llm_model.clone(),
                config.system_prompt.clone(),
            )?,
            tts: TextToSpeech::new(api_key, config.tts_model.clone(), config.tts_voice.clone())?,
        })
    }
}

#[async_trait]
impl SpeechBackend for OpenAiBackend {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        self.stt.transcribe(wav).await
    }

    async fn reply(&self, transcript: &str) -> Result<String> {
        self.generator.reply(transcript).await
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.tts.synthesize(text).await
    }
}

//! ElevenLabs text-to-speech client.

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::ElevenLabsConfig;
use crate::errors::Error;

const SERVICE: &str = "ElevenLabs";

/// Tutor persona; each has its own voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teacher {
    Math,
    Science,
}

impl Teacher {
    /// Strict parse for endpoints that only accept the two known personas.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "math" => Some(Self::Math),
            "science" => Some(Self::Science),
            _ => None,
        }
    }

    /// Lenient parse: anything other than `math` gets the science voice.
    pub fn from_name_or_science(name: &str) -> Self {
        Self::parse(name).unwrap_or(Self::Science)
    }

    pub fn voice_id(self) -> &'static str {
        match self {
            Teacher::Math => "pNInz6obpgDQGcFmaJgB",
            Teacher::Science => "EXAVITQu4vr4xnSDxMaL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
}

impl VoiceSettings {
    /// Used for answers read back in the tutor UI.
    pub const STANDARD: Self = Self {
        stability: 0.5,
        similarity_boost: 0.75,
        style: None,
        use_speaker_boost: None,
    };

    /// Steadier delivery for the streamed teacher voice.
    pub const NATURAL: Self = Self {
        stability: 0.71,
        similarity_boost: 0.5,
        style: Some(0.0),
        use_speaker_boost: Some(true),
    };
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

fn upstream(message: impl Into<String>) -> Error {
    Error::Upstream {
        service: SERVICE.to_string(),
        message: message.into(),
    }
}

#[derive(Clone)]
pub struct SpeechClient {
    http: reqwest::Client,
    base_url: String,
    model_id: String,
    api_key: Option<String>,
}

impl SpeechClient {
    pub fn new(config: &ElevenLabsConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("create ElevenLabs HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Synthesize `text` with the teacher's voice; returns MPEG audio.
    #[instrument(skip(self, text), fields(text_len = text.len()), err)]
    pub async fn synthesize(&self, text: &str, teacher: Teacher, settings: VoiceSettings) -> Result<Bytes, Error> {
        let api_key = self.api_key.as_deref().ok_or_else(|| upstream("API key is not configured"))?;

        let response = self
            .http
            .post(format!("{}/v1/text-to-speech/{}", self.base_url, teacher.voice_id()))
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", api_key)
            .json(&SpeechRequest {
                text,
                model_id: &self.model_id,
                voice_settings: settings,
            })
            .send()
            .await
            .map_err(|e| upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream(format!("HTTP {status}: {body}")));
        }

        let audio = response.bytes().await.map_err(|e| upstream(format!("read audio: {e}")))?;
        debug!(bytes = audio.len(), "Speech generated");
        Ok(audio)
    }
}

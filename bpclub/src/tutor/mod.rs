//! AI tutor: prompt construction, upstream model and speech clients, and answer post-processing.
//!
//! A tutor request is two sequential upstream calls at most: one to the generative model for the
//! answer, and optionally one to the speech API to read it aloud. Nothing here touches the
//! database; question quotas live in `db::handlers::TutorSessions`.

pub mod gemini;
pub mod prompt;
pub mod response;
pub mod speech;

pub use gemini::GeminiClient;
pub use speech::{SpeechClient, Teacher};

use crate::config::TutorConfig;
use crate::errors::Error;

/// Upstream clients used by the tutor endpoints.
#[derive(Clone)]
pub struct TutorClients {
    pub gemini: GeminiClient,
    pub speech: SpeechClient,
}

impl TutorClients {
    pub fn new(config: &TutorConfig) -> Result<Self, Error> {
        Ok(Self {
            gemini: GeminiClient::new(&config.gemini)?,
            speech: SpeechClient::new(&config.elevenlabs)?,
        })
    }
}

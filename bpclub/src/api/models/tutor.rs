//! API models for the AI tutor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::tutor::{TutorQuestion, TutorSession};

/// A question for the tutor. All fields are required but accepted as optional so a missing
/// one is reported as a 400 rather than a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub teaching_style: Option<String>,
}

/// The three fields of a [`QuestionRequest`], present and non-empty.
pub struct Question<'a> {
    pub text: &'a str,
    pub subject: &'a str,
    pub teaching_style: &'a str,
}

impl QuestionRequest {
    pub fn required(&self) -> Option<Question<'_>> {
        fn non_empty(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        Some(Question {
            text: non_empty(&self.text)?,
            subject: non_empty(&self.subject)?,
            teaching_style: non_empty(&self.teaching_style)?,
        })
    }
}

fn default_teacher() -> String {
    "math".to_string()
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VoiceRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// `math` or `science`
    #[serde(default = "default_teacher")]
    pub teacher: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoiceResponse {
    /// `data:audio/mpeg;base64,...`
    pub audio_url: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub teacher: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecentQuestion {
    pub question: String,
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

impl From<TutorQuestion> for RecentQuestion {
    fn from(db: TutorQuestion) -> Self {
        Self {
            question: db.question,
            subject: db.subject,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TutorSessionResponse {
    pub questions_left: i32,
    pub recent_questions: Vec<RecentQuestion>,
}

impl TutorSessionResponse {
    pub fn new(session: TutorSession, recent: Vec<TutorQuestion>) -> Self {
        Self {
            questions_left: session.questions_left,
            recent_questions: recent.into_iter().map(RecentQuestion::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_question_requires_all_fields() {
        let full: QuestionRequest =
            serde_json::from_value(json!({"text": "What is 2+2?", "subject": "math", "teachingStyle": "visual"})).unwrap();
        let question = full.required().unwrap();
        assert_eq!(question.text, "What is 2+2?");
        assert_eq!(question.teaching_style, "visual");

        let missing: QuestionRequest = serde_json::from_value(json!({"text": "What is 2+2?", "subject": "math"})).unwrap();
        assert!(missing.required().is_none());

        let blank: QuestionRequest =
            serde_json::from_value(json!({"text": "  ", "subject": "math", "teachingStyle": "visual"})).unwrap();
        assert!(blank.required().is_none());

        let padded: QuestionRequest =
            serde_json::from_value(json!({"text": "  Why?\n", "subject": " science ", "teachingStyle": "socratic"})).unwrap();
        let question = padded.required().unwrap();
        assert_eq!(question.text, "Why?");
        assert_eq!(question.subject, "science");
    }

    #[test]
    fn test_voice_teacher_defaults_to_math() {
        let request: VoiceRequest = serde_json::from_value(json!({"text": "hi"})).unwrap();
        assert_eq!(request.teacher, "math");
    }
}

//! AI tutor endpoints: answers, whiteboard lessons, question quota and speech.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use tracing::{info, instrument};

use crate::{
    AppState,
    api::models::{
        tutor::{Question, QuestionRequest, SpeakRequest, TutorSessionResponse, VoiceRequest, VoiceResponse},
        users::CurrentUser,
    },
    db::{handlers::TutorSessions, models::tutor::TutorSession},
    errors::{Error, Result},
    tutor::{
        Teacher,
        prompt::{explanation_prompt, whiteboard_prompt},
        response::{TutorAnswer, WhiteboardContent, process_explanation, process_whiteboard},
        speech::VoiceSettings,
    },
    types::UserId,
};

const RECENT_QUESTIONS: i64 = 5;

fn no_active_session() -> Error {
    Error::Forbidden {
        message: "No active session found".to_string(),
    }
}

fn missing_fields() -> Error {
    Error::BadRequest {
        message: "Missing required fields".to_string(),
    }
}

async fn active_session(state: &AppState, user_id: UserId) -> Result<TutorSession> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    TutorSessions::new(&mut conn)
        .active_for_user(user_id)
        .await?
        .ok_or_else(no_active_session)
}

/// Take one question from the session and log it. The quota is only charged for answered
/// questions, so this runs after the model call succeeds.
async fn charge_question(state: &AppState, session: &TutorSession, question: &Question<'_>, answer: &str) -> Result<i32> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = TutorSessions::new(&mut tx);
    let updated = repo.consume_question(session.id).await?.ok_or_else(no_active_session)?;
    repo.record_question(session.id, question.text, question.subject, Some(answer)).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    Ok(updated.questions_left)
}

/// Explain a question in the requested teaching style
#[utoipa::path(
    post,
    path = "/aitutor/process",
    tag = "tutor",
    summary = "Ask the tutor",
    request_body = QuestionRequest,
    responses(
        (status = 200, description = "Cleaned answer with optional chart data", body = TutorAnswer),
        (status = 400, description = "Missing required fields"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No active session found"),
        (status = 502, description = "Model request failed"),
    )
)]
#[instrument(skip_all)]
pub async fn process_question(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<TutorAnswer>> {
    let question = request.required().ok_or_else(missing_fields)?;
    let session = active_session(&state, current_user.id).await?;

    let prompt = explanation_prompt(question.text, question.subject, question.teaching_style);
    let raw = state.tutor.gemini.generate(&prompt).await?;
    let answer = process_explanation(&raw);

    let questions_left = charge_question(&state, &session, &question, &answer.text).await?;
    info!(subject = question.subject, questions_left, "Tutor question answered");

    Ok(Json(answer))
}

/// Structured lesson for the whiteboard view
#[utoipa::path(
    post,
    path = "/aitutor/whiteboard",
    tag = "tutor",
    summary = "Whiteboard lesson",
    request_body = QuestionRequest,
    responses(
        (status = 200, description = "Steps, visual, practice problems and concepts", body = WhiteboardContent),
        (status = 400, description = "Missing required fields"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No active session found"),
        (status = 502, description = "Model request failed"),
    )
)]
#[instrument(skip_all)]
pub async fn whiteboard(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<QuestionRequest>,
) -> Result<Json<WhiteboardContent>> {
    let question = request.required().ok_or_else(missing_fields)?;
    let session = active_session(&state, current_user.id).await?;

    let prompt = whiteboard_prompt(question.text, question.subject, question.teaching_style);
    let raw = state.tutor.gemini.generate(&prompt).await?;
    let content = process_whiteboard(&raw, question.text);

    charge_question(&state, &session, &question, &content.steps).await?;
    Ok(Json(content))
}

/// Current question quota, starting a new session when the last one is used up
#[utoipa::path(
    get,
    path = "/aitutor/session",
    tag = "tutor",
    summary = "Get tutor session",
    responses(
        (status = 200, description = "Questions left and the latest questions", body = TutorSessionResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[instrument(skip_all)]
pub async fn get_session(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<TutorSessionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = TutorSessions::new(&mut conn);

    let session = match repo.active_for_user(current_user.id).await? {
        Some(session) => session,
        None => {
            info!("Starting new tutor session");
            repo.create(current_user.id, state.config.tutor.questions_per_session).await?
        }
    };
    let recent = repo.recent_questions(session.id, RECENT_QUESTIONS).await?;

    Ok(Json(TutorSessionResponse::new(session, recent)))
}

/// Read text aloud, returned inline as a data URL
#[utoipa::path(
    post,
    path = "/aitutor/voice",
    tag = "tutor",
    summary = "Synthesize voice",
    request_body = VoiceRequest,
    responses(
        (status = 200, description = "Audio as a data URL", body = VoiceResponse),
        (status = 400, description = "Text is required"),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "Speech request failed"),
    )
)]
#[instrument(skip_all)]
pub async fn voice(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Json(request): Json<VoiceRequest>,
) -> Result<Json<VoiceResponse>> {
    let text = request
        .text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::BadRequest {
            message: "Text is required".to_string(),
        })?;
    let teacher = Teacher::from_name_or_science(&request.teacher);

    let audio = state.tutor.speech.synthesize(text, teacher, VoiceSettings::STANDARD).await?;
    Ok(Json(VoiceResponse {
        audio_url: format!("data:audio/mpeg;base64,{}", BASE64_STANDARD.encode(&audio)),
    }))
}

/// Teacher voice as raw MPEG audio
#[utoipa::path(
    post,
    path = "/aitutor/speak",
    tag = "tutor",
    summary = "Speak as teacher",
    request_body = SpeakRequest,
    responses(
        (status = 200, description = "MPEG audio", content_type = "audio/mpeg", body = Vec<u8>),
        (status = 400, description = "Invalid request parameters"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "No active session found"),
        (status = 502, description = "Speech request failed"),
    )
)]
#[instrument(skip_all)]
pub async fn speak(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<SpeakRequest>,
) -> Result<Response> {
    let invalid = || Error::BadRequest {
        message: "Invalid request parameters".to_string(),
    };
    let text = request.text.as_deref().filter(|t| !t.trim().is_empty()).ok_or_else(invalid)?;
    let teacher = request.teacher.as_deref().and_then(Teacher::parse).ok_or_else(invalid)?;

    active_session(&state, current_user.id).await?;

    let audio = state.tutor.speech.synthesize(text, teacher, VoiceSettings::NATURAL).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "audio/mpeg"), (header::CACHE_CONTROL, "no-cache")],
        audio,
    )
        .into_response())
}

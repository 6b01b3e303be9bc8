//! Database models for AI tutor quotas and question history.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::UserId;

#[derive(Debug, Clone, FromRow)]
pub struct TutorSession {
    pub id: Uuid,
    pub user_id: UserId,
    pub questions_left: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TutorQuestion {
    pub id: Uuid,
    pub session_id: Uuid,
    pub question: String,
    pub subject: String,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

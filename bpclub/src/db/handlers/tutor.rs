//! Database repository for AI tutor sessions.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::tutor::{TutorQuestion, TutorSession};
use crate::types::{UserId, abbrev_uuid};

pub struct TutorSessions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> TutorSessions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Newest session of the user that still has questions left.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn active_for_user(&mut self, user_id: UserId) -> Result<Option<TutorSession>> {
        let session = sqlx::query_as::<_, TutorSession>(
            r#"
            SELECT * FROM tutor_sessions
            WHERE user_id = $1 AND questions_left > 0
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(session)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create(&mut self, user_id: UserId, questions: i32) -> Result<TutorSession> {
        let session = sqlx::query_as::<_, TutorSession>(
            "INSERT INTO tutor_sessions (user_id, questions_left) VALUES ($1, $2) RETURNING *",
        )
        .bind(user_id)
        .bind(questions)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(session)
    }

    /// Take one question from the session. Returns `None` when it has none left.
    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&id)), err)]
    pub async fn consume_question(&mut self, id: Uuid) -> Result<Option<TutorSession>> {
        let session = sqlx::query_as::<_, TutorSession>(
            r#"
            UPDATE tutor_sessions
            SET questions_left = questions_left - 1, updated_at = NOW()
            WHERE id = $1 AND questions_left > 0
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(session)
    }

    #[instrument(skip(self, question, answer), fields(session_id = %abbrev_uuid(&session_id)), err)]
    pub async fn record_question(
        &mut self,
        session_id: Uuid,
        question: &str,
        subject: &str,
        answer: Option<&str>,
    ) -> Result<TutorQuestion> {
        let row = sqlx::query_as::<_, TutorQuestion>(
            r#"
            INSERT INTO tutor_questions (session_id, question, subject, answer)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(question)
        .bind(subject)
        .bind(answer)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row)
    }

    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&session_id)), err)]
    pub async fn recent_questions(&mut self, session_id: Uuid, limit: i64) -> Result<Vec<TutorQuestion>> {
        let questions = sqlx::query_as::<_, TutorQuestion>(
            r#"
            SELECT * FROM tutor_questions
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(questions)
    }
}

//! Database repository for team invitations.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::teams::{InvitationCreateDBRequest, InvitationDBResponse, InvitationStatus};
use crate::types::{InvitationId, TeamId, abbrev_uuid};

pub struct Invitations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Invitations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&request.team_id)), err)]
    pub async fn create(&mut self, request: &InvitationCreateDBRequest) -> Result<InvitationDBResponse> {
        let invitation = sqlx::query_as::<_, InvitationDBResponse>(
            r#"
            INSERT INTO invitations (team_id, email, role, token, invited_by, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(request.team_id)
        .bind(&request.email)
        .bind(request.role)
        .bind(&request.token)
        .bind(request.invited_by)
        .bind(request.expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(invitation)
    }

    #[instrument(skip(self, token), err)]
    pub async fn get_by_token(&mut self, token: &str) -> Result<Option<InvitationDBResponse>> {
        let invitation = sqlx::query_as::<_, InvitationDBResponse>("SELECT * FROM invitations WHERE token = $1")
            .bind(token)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(invitation)
    }

    /// Pending invitation for an email address in a team, if any.
    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn find_pending(&mut self, team_id: TeamId, email: &str) -> Result<Option<InvitationDBResponse>> {
        let invitation = sqlx::query_as::<_, InvitationDBResponse>(
            r#"
            SELECT * FROM invitations
            WHERE team_id = $1 AND LOWER(email) = LOWER($2) AND status = 'PENDING' AND expires_at > NOW()
            LIMIT 1
            "#,
        )
        .bind(team_id)
        .bind(email)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(invitation)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn list_pending(&mut self, team_id: TeamId) -> Result<Vec<InvitationDBResponse>> {
        let invitations = sqlx::query_as::<_, InvitationDBResponse>(
            r#"
            SELECT * FROM invitations
            WHERE team_id = $1 AND status = 'PENDING'
            ORDER BY created_at DESC
            "#,
        )
        .bind(team_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(invitations)
    }

    #[instrument(skip(self), fields(invitation_id = %abbrev_uuid(&id)), err)]
    pub async fn set_status(&mut self, id: InvitationId, status: InvitationStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE invitations SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

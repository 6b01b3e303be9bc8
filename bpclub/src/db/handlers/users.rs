//! Database repository for users and login sessions.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::users::{UserCreateDBRequest, UserDBResponse, UserSessionDBResponse};
use crate::types::{SessionId, UserId, abbrev_uuid};

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    pub async fn create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (email, name, image, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.email)
        .bind(&request.name)
        .bind(&request.image)
        .bind(&request.password_hash)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Case-insensitive lookup by email.
    #[instrument(skip(self), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, password_hash), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn set_password_hash(&mut self, id: UserId, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the first successful email verification; later calls keep the original time.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_email_verified(&mut self, id: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET email_verified_at = COALESCE(email_verified_at, NOW()), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn set_stripe_customer_id(&mut self, id: UserId, customer_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(customer_id)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_stripe_customer_id(&mut self, customer_id: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE stripe_customer_id = $1")
            .bind(customer_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }
}

/// Repository for `user_sessions`.
pub struct Sessions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Sessions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, user_agent), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create(
        &mut self,
        user_id: UserId,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<UserSessionDBResponse> {
        let session = sqlx::query_as::<_, UserSessionDBResponse>(
            r#"
            INSERT INTO user_sessions (user_id, ip_address, user_agent)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(session)
    }

    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: SessionId) -> Result<Option<UserSessionDBResponse>> {
        let session = sqlx::query_as::<_, UserSessionDBResponse>("SELECT * FROM user_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(session)
    }

    /// Sessions of a user that have not been revoked, most recently active first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_active_for_user(&mut self, user_id: UserId) -> Result<Vec<UserSessionDBResponse>> {
        let sessions = sqlx::query_as::<_, UserSessionDBResponse>(
            r#"
            SELECT * FROM user_sessions
            WHERE user_id = $1 AND revoked_at IS NULL
            ORDER BY last_active_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(sessions)
    }

    /// Bump `last_active_at`, refreshing the client details when supplied.
    #[instrument(skip(self, user_agent), fields(session_id = %abbrev_uuid(&id)), err)]
    pub async fn touch(&mut self, id: SessionId, ip_address: Option<&str>, user_agent: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_sessions
            SET last_active_at = NOW(),
                ip_address = COALESCE($2, ip_address),
                user_agent = COALESCE($3, user_agent)
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .bind(ip_address)
        .bind(user_agent)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&id)), err)]
    pub async fn revoke(&mut self, id: SessionId) -> Result<bool> {
        let result = sqlx::query("UPDATE user_sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Sign a user out everywhere.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE user_sessions SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_create_and_lookup_user_case_insensitive(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let user = repo
            .create(&UserCreateDBRequest {
                email: "Ada@Example.com".to_string(),
                name: Some("Ada".to_string()),
                image: None,
                password_hash: None,
            })
            .await
            .unwrap();

        let found = repo.get_user_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[sqlx::test]
    async fn test_duplicate_email_is_unique_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);
        let request = UserCreateDBRequest {
            email: "dup@example.com".to_string(),
            name: None,
            image: None,
            password_hash: None,
        };
        repo.create(&request).await.unwrap();

        let err = repo
            .create(&UserCreateDBRequest {
                email: "DUP@example.com".to_string(),
                ..request
            })
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("users_email_unique"));
    }

    #[sqlx::test]
    async fn test_session_revoke(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                email: "s@example.com".to_string(),
                name: None,
                image: None,
                password_hash: None,
            })
            .await
            .unwrap();

        let mut sessions = Sessions::new(&mut conn);
        let session = sessions.create(user.id, Some("10.0.0.1"), Some("test-agent")).await.unwrap();
        assert!(sessions.touch(session.id, None, None).await.unwrap());
        assert_eq!(sessions.list_active_for_user(user.id).await.unwrap().len(), 1);

        assert!(sessions.revoke(session.id).await.unwrap());
        assert!(!sessions.revoke(session.id).await.unwrap());
        assert!(!sessions.touch(session.id, None, None).await.unwrap());

        let stored = sessions.get_by_id(session.id).await.unwrap().unwrap();
        assert!(stored.is_revoked());
        assert!(sessions.list_active_for_user(user.id).await.unwrap().is_empty());
    }
}

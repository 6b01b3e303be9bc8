//! Database repository for password reset and email verification tokens.

use chrono::{Duration, Utc};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    crypto,
    db::{
        errors::Result,
        models::verification_tokens::{TokenPurpose, VerificationTokenDBResponse},
    },
    types::{UserId, abbrev_uuid},
};

pub struct VerificationTokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> VerificationTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Issue a fresh token, retiring any unused one the user already holds for `purpose`.
    /// Returns the raw token; only its hash is stored.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn issue(&mut self, user_id: UserId, purpose: TokenPurpose, ttl: Duration) -> Result<String> {
        self.invalidate_for_user(user_id, purpose).await?;

        let raw_token = crypto::generate_token();
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (user_id, purpose, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(purpose)
        .bind(crypto::hash_token(&raw_token))
        .bind(Utc::now() + ttl)
        .execute(&mut *self.db)
        .await?;

        Ok(raw_token)
    }

    /// Look a raw token up, whether or not it is still usable.
    #[instrument(skip(self, raw_token), err)]
    pub async fn find(&mut self, purpose: TokenPurpose, raw_token: &str) -> Result<Option<VerificationTokenDBResponse>> {
        let token = sqlx::query_as::<_, VerificationTokenDBResponse>(
            "SELECT * FROM verification_tokens WHERE token_hash = $1 AND purpose = $2",
        )
        .bind(crypto::hash_token(raw_token))
        .bind(purpose)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(token)
    }

    /// Spend a token. False if it was already used or has expired since it was read.
    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_used(&mut self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE verification_tokens SET used_at = NOW() WHERE id = $1 AND used_at IS NULL AND expires_at > NOW()",
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn invalidate_for_user(&mut self, user_id: UserId, purpose: TokenPurpose) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE verification_tokens SET used_at = NOW() WHERE user_id = $1 AND purpose = $2 AND used_at IS NULL",
        )
        .bind(user_id)
        .bind(purpose)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;

    async fn user(conn: &mut PgConnection) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                email: "reset@example.com".to_string(),
                name: None,
                image: None,
                password_hash: None,
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test]
    async fn test_issue_find_and_spend(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = user(&mut conn).await;
        let mut tokens = VerificationTokens::new(&mut conn);

        let raw = tokens.issue(user_id, TokenPurpose::PasswordReset, Duration::hours(24)).await.unwrap();
        let stored = tokens.find(TokenPurpose::PasswordReset, &raw).await.unwrap().unwrap();
        assert_eq!(stored.user_id, user_id);
        assert_ne!(stored.token_hash, raw);
        assert!(!stored.is_expired(Utc::now()));

        // Purposes do not mix
        assert!(tokens.find(TokenPurpose::EmailVerification, &raw).await.unwrap().is_none());

        assert!(tokens.mark_used(stored.id).await.unwrap());
        assert!(!tokens.mark_used(stored.id).await.unwrap());
    }

    #[sqlx::test]
    async fn test_reissue_retires_previous_token(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = user(&mut conn).await;
        let mut tokens = VerificationTokens::new(&mut conn);

        let first = tokens.issue(user_id, TokenPurpose::PasswordReset, Duration::hours(24)).await.unwrap();
        let verify = tokens.issue(user_id, TokenPurpose::EmailVerification, Duration::hours(24)).await.unwrap();
        tokens.issue(user_id, TokenPurpose::PasswordReset, Duration::hours(24)).await.unwrap();

        let first = tokens.find(TokenPurpose::PasswordReset, &first).await.unwrap().unwrap();
        assert!(first.used_at.is_some());
        let verify = tokens.find(TokenPurpose::EmailVerification, &verify).await.unwrap().unwrap();
        assert!(verify.used_at.is_none());
    }

    #[sqlx::test]
    async fn test_expired_token_cannot_be_spent(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let user_id = user(&mut conn).await;
        let mut tokens = VerificationTokens::new(&mut conn);

        let raw = tokens.issue(user_id, TokenPurpose::PasswordReset, Duration::seconds(-1)).await.unwrap();
        let stored = tokens.find(TokenPurpose::PasswordReset, &raw).await.unwrap().unwrap();
        assert!(stored.is_expired(Utc::now()));
        assert!(!tokens.mark_used(stored.id).await.unwrap());
    }
}

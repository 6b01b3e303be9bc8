//! Database repository for teams and team memberships.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::models::teams::{TeamCreateDBRequest, TeamDBResponse, TeamMemberDBResponse, TeamUpdateDBRequest};
use crate::types::{MemberId, Operation, TeamId, TeamRole, UserId, abbrev_uuid};

const MEMBER_SELECT: &str = r#"
    SELECT tm.id, tm.team_id, tm.user_id, tm.role, tm.created_at, tm.updated_at,
           u.email AS user_email, u.name AS user_name, u.image AS user_image
    FROM team_members tm
    INNER JOIN users u ON u.id = tm.user_id
"#;

pub struct Teams<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Teams<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    pub async fn create(&mut self, request: &TeamCreateDBRequest) -> Result<TeamDBResponse> {
        let team = sqlx::query_as::<_, TeamDBResponse>(
            r#"
            INSERT INTO teams (name, slug, domain, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.slug)
        .bind(&request.domain)
        .bind(request.created_by)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(team)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: TeamId) -> Result<Option<TeamDBResponse>> {
        let team = sqlx::query_as::<_, TeamDBResponse>("SELECT * FROM teams WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(team)
    }

    #[instrument(skip(self), err)]
    pub async fn slug_exists(&mut self, slug: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(exists)
    }

    /// True if another team already claims this domain.
    #[instrument(skip(self), err)]
    pub async fn domain_taken(&mut self, domain: &str, except: Option<TeamId>) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM teams WHERE LOWER(domain) = LOWER($1) AND ($2::UUID IS NULL OR id <> $2))",
        )
        .bind(domain)
        .bind(except)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(exists)
    }

    /// Teams the user belongs to, newest first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<TeamDBResponse>> {
        let teams = sqlx::query_as::<_, TeamDBResponse>(
            r#"
            SELECT t.* FROM teams t
            INNER JOIN team_members tm ON tm.team_id = t.id
            WHERE tm.user_id = $1
            ORDER BY t.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(teams)
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&id)), err)]
    pub async fn update(&mut self, id: TeamId, request: &TeamUpdateDBRequest) -> Result<Option<TeamDBResponse>> {
        let team = sqlx::query_as::<_, TeamDBResponse>(
            r#"
            UPDATE teams
            SET name = COALESCE($2, name),
                domain = CASE WHEN $3::boolean THEN $4 ELSE domain END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(request.domain.is_some())
        .bind(request.domain.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(team)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: TeamId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM teams WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set SCIM state. `token: None` keeps the current token.
    #[instrument(skip(self, token), fields(team_id = %abbrev_uuid(&id)), err)]
    pub async fn set_scim(&mut self, id: TeamId, enabled: bool, token: Option<&str>) -> Result<Option<TeamDBResponse>> {
        let team = sqlx::query_as::<_, TeamDBResponse>(
            r#"
            UPDATE teams
            SET scim_enabled = $2,
                scim_token = COALESCE($3, scim_token),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(enabled)
        .bind(token)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(team)
    }

    /// Resolve a SCIM bearer token to its team, only while SCIM is enabled.
    #[instrument(skip(self, token), err)]
    pub async fn get_by_scim_token(&mut self, token: &str) -> Result<Option<TeamDBResponse>> {
        let team = sqlx::query_as::<_, TeamDBResponse>("SELECT * FROM teams WHERE scim_token = $1 AND scim_enabled")
            .bind(token)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(team)
    }

    /// Memberships across every team created by `user_id`.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn count_members_of_teams_created_by(&mut self, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM team_members tm
            INNER JOIN teams t ON t.id = tm.team_id
            WHERE t.created_by = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(count)
    }
}

/// Repository for `team_members`.
pub struct Members<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Members<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn add(&mut self, team_id: TeamId, user_id: UserId, role: TeamRole) -> Result<TeamMemberDBResponse> {
        let id: MemberId = sqlx::query_scalar(
            r#"
            INSERT INTO team_members (team_id, user_id, role)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(team_id)
        .bind(user_id)
        .bind(role)
        .fetch_one(&mut *self.db)
        .await?;

        self.get(team_id, id).await?.ok_or(crate::db::errors::DbError::NotFound)
    }

    /// A membership by id, scoped to the team.
    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id), member_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, team_id: TeamId, id: MemberId) -> Result<Option<TeamMemberDBResponse>> {
        let query = format!("{MEMBER_SELECT} WHERE tm.team_id = $1 AND tm.id = $2");
        let member = sqlx::query_as::<_, TeamMemberDBResponse>(&query)
            .bind(team_id)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(member)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_by_user(&mut self, team_id: TeamId, user_id: UserId) -> Result<Option<TeamMemberDBResponse>> {
        let query = format!("{MEMBER_SELECT} WHERE tm.team_id = $1 AND tm.user_id = $2");
        let member = sqlx::query_as::<_, TeamMemberDBResponse>(&query)
            .bind(team_id)
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(member)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn list(&mut self, team_id: TeamId) -> Result<Vec<TeamMemberDBResponse>> {
        let query = format!("{MEMBER_SELECT} WHERE tm.team_id = $1 ORDER BY tm.created_at ASC");
        let members = sqlx::query_as::<_, TeamMemberDBResponse>(&query)
            .bind(team_id)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(members)
    }

    /// Members holding one of `roles`, used to pick notification recipients.
    #[instrument(skip(self, roles), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn list_with_roles(&mut self, team_id: TeamId, roles: &[TeamRole]) -> Result<Vec<TeamMemberDBResponse>> {
        let roles: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
        let query = format!("{MEMBER_SELECT} WHERE tm.team_id = $1 AND tm.role = ANY($2) ORDER BY tm.created_at ASC");
        let members = sqlx::query_as::<_, TeamMemberDBResponse>(&query)
            .bind(team_id)
            .bind(roles)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(members)
    }

    /// Lock the team's owner rows and count them. Held until the transaction ends, so a
    /// concurrent demotion or removal of another owner waits and then sees the new count.
    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn lock_owners(&mut self, team_id: TeamId) -> Result<i64> {
        let owners: Vec<MemberId> =
            sqlx::query_scalar("SELECT id FROM team_members WHERE team_id = $1 AND role = 'OWNER' ORDER BY id FOR UPDATE")
                .bind(team_id)
                .fetch_all(&mut *self.db)
                .await?;

        Ok(owners.len() as i64)
    }

    /// Fail with [`DbError::ProtectedEntity`] if taking the owner role from `member` would leave
    /// the team without one. Must run in the transaction that applies the change.
    #[instrument(skip(self, member, reason), fields(member_id = %abbrev_uuid(&member.id)), err)]
    pub async fn ensure_not_last_owner(&mut self, member: &TeamMemberDBResponse, operation: Operation, reason: &str) -> Result<()> {
        if member.role != TeamRole::Owner || self.lock_owners(member.team_id).await? > 1 {
            return Ok(());
        }
        Err(DbError::ProtectedEntity {
            operation,
            reason: reason.to_string(),
            entity_type: "team_member".to_string(),
            entity_id: Some(member.id.to_string()),
        })
    }

    #[instrument(skip(self), fields(member_id = %abbrev_uuid(&id)), err)]
    pub async fn update_role(&mut self, team_id: TeamId, id: MemberId, role: TeamRole) -> Result<Option<TeamMemberDBResponse>> {
        let result = sqlx::query("UPDATE team_members SET role = $3, updated_at = NOW() WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .bind(role)
            .execute(&mut *self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(team_id, id).await
    }

    #[instrument(skip(self), fields(member_id = %abbrev_uuid(&id)), err)]
    pub async fn remove(&mut self, team_id: TeamId, id: MemberId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM team_members WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;

    async fn user(conn: &mut PgConnection, email: &str) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                email: email.to_string(),
                name: None,
                image: None,
                password_hash: None,
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test]
    async fn test_team_with_members(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = user(&mut conn, "owner@example.com").await;
        let other = user(&mut conn, "other@example.com").await;

        let team = Teams::new(&mut conn)
            .create(&TeamCreateDBRequest {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                domain: Some("acme.com".to_string()),
                created_by: owner,
            })
            .await
            .unwrap();

        let mut members = Members::new(&mut conn);
        members.add(team.id, owner, TeamRole::Owner).await.unwrap();
        let added = members.add(team.id, other, TeamRole::Member).await.unwrap();
        assert_eq!(added.user_email, "other@example.com");

        let err = members.add(team.id, other, TeamRole::Admin).await.unwrap_err();
        assert!(err.is_unique_violation_on("team_members_team_user_unique"));

        assert_eq!(members.lock_owners(team.id).await.unwrap(), 1);
        let admins = members.list_with_roles(team.id, &[TeamRole::Owner, TeamRole::Admin]).await.unwrap();
        assert_eq!(admins.len(), 1);

        let updated = members.update_role(team.id, added.id, TeamRole::Admin).await.unwrap().unwrap();
        assert_eq!(updated.role, TeamRole::Admin);

        let mut teams = Teams::new(&mut conn);
        assert_eq!(teams.count_members_of_teams_created_by(owner).await.unwrap(), 2);
        assert!(teams.slug_exists("acme").await.unwrap());
        assert!(teams.domain_taken("ACME.com", None).await.unwrap());
        assert!(!teams.domain_taken("acme.com", Some(team.id)).await.unwrap());
        assert_eq!(teams.list_for_user(other).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    async fn test_update_can_clear_domain(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = user(&mut conn, "owner@example.com").await;
        let mut teams = Teams::new(&mut conn);
        let team = teams
            .create(&TeamCreateDBRequest {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                domain: Some("acme.com".to_string()),
                created_by: owner,
            })
            .await
            .unwrap();

        let renamed = teams
            .update(
                team.id,
                &TeamUpdateDBRequest {
                    name: Some("Acme Inc".to_string()),
                    domain: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Acme Inc");
        assert_eq!(renamed.domain.as_deref(), Some("acme.com"));

        let cleared = teams
            .update(
                team.id,
                &TeamUpdateDBRequest {
                    name: None,
                    domain: Some(None),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.domain.is_none());
    }

    #[sqlx::test]
    async fn test_concurrent_owner_demotions_keep_one_owner(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let first = user(&mut conn, "first@example.com").await;
        let second = user(&mut conn, "second@example.com").await;
        let team = Teams::new(&mut conn)
            .create(&TeamCreateDBRequest {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                domain: None,
                created_by: first,
            })
            .await
            .unwrap();
        let mut members = Members::new(&mut conn);
        let first = members.add(team.id, first, TeamRole::Owner).await.unwrap();
        let second = members.add(team.id, second, TeamRole::Owner).await.unwrap();
        drop(conn);

        // First transaction passes the check and demotes its owner, holding the owner locks
        let mut tx1 = pool.begin().await.unwrap();
        let mut members = Members::new(&mut tx1);
        members.ensure_not_last_owner(&first, Operation::Update, "last owner").await.unwrap();
        members.update_role(team.id, first.id, TeamRole::Member).await.unwrap();

        // Second transaction demotes the other owner and must wait for the first to finish
        let second_demotion = tokio::spawn({
            let pool = pool.clone();
            async move {
                let mut tx2 = pool.begin().await.unwrap();
                let mut members = Members::new(&mut tx2);
                let checked = members.ensure_not_last_owner(&second, Operation::Update, "last owner").await;
                if checked.is_ok() {
                    members.update_role(second.team_id, second.id, TeamRole::Member).await.unwrap();
                    tx2.commit().await.unwrap();
                }
                checked
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!second_demotion.is_finished());

        tx1.commit().await.unwrap();
        let err = second_demotion.await.unwrap().unwrap_err();
        assert!(matches!(err, DbError::ProtectedEntity { operation: Operation::Update, .. }));

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Members::new(&mut conn).lock_owners(team.id).await.unwrap(), 1);
    }

    #[sqlx::test]
    async fn test_scim_token_lookup_requires_enabled(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let owner = user(&mut conn, "owner@example.com").await;
        let mut teams = Teams::new(&mut conn);
        let team = teams
            .create(&TeamCreateDBRequest {
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                domain: None,
                created_by: owner,
            })
            .await
            .unwrap();

        teams.set_scim(team.id, true, Some("tok")).await.unwrap();
        assert!(teams.get_by_scim_token("tok").await.unwrap().is_some());

        let disabled = teams.set_scim(team.id, false, None).await.unwrap().unwrap();
        assert_eq!(disabled.scim_token.as_deref(), Some("tok"));
        assert!(teams.get_by_scim_token("tok").await.unwrap().is_none());
    }
}

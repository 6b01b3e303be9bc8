//! Database repositories for SCIM resources and SAML connections.

use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::identity::{
    SamlConnection, SamlConnectionUpsert, ScimGroup, ScimGroupWrite, ScimUser, ScimUserWrite,
};
use crate::types::{TeamId, abbrev_uuid};

pub struct ScimUsers<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ScimUsers<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn create(&mut self, team_id: TeamId, request: &ScimUserWrite) -> Result<ScimUser> {
        let user = sqlx::query_as::<_, ScimUser>(
            r#"
            INSERT INTO scim_users (team_id, external_id, user_name, display_name, given_name, family_name, email, active, raw)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(&request.external_id)
        .bind(&request.user_name)
        .bind(&request.display_name)
        .bind(&request.given_name)
        .bind(&request.family_name)
        .bind(&request.email)
        .bind(request.active)
        .bind(&request.raw)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn get(&mut self, team_id: TeamId, id: Uuid) -> Result<Option<ScimUser>> {
        let user = sqlx::query_as::<_, ScimUser>("SELECT * FROM scim_users WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// A page of users, optionally restricted to an exact `userName`. Returns the page and the total.
    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn list(
        &mut self,
        team_id: TeamId,
        user_name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ScimUser>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scim_users WHERE team_id = $1 AND ($2::TEXT IS NULL OR user_name = $2)",
        )
        .bind(team_id)
        .bind(user_name)
        .fetch_one(&mut *self.db)
        .await?;

        let users = sqlx::query_as::<_, ScimUser>(
            r#"
            SELECT * FROM scim_users
            WHERE team_id = $1 AND ($2::TEXT IS NULL OR user_name = $2)
            ORDER BY created_at ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(team_id)
        .bind(user_name)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;

        Ok((users, total))
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn replace(&mut self, team_id: TeamId, id: Uuid, request: &ScimUserWrite) -> Result<Option<ScimUser>> {
        let user = sqlx::query_as::<_, ScimUser>(
            r#"
            UPDATE scim_users
            SET external_id = $3, user_name = $4, display_name = $5, given_name = $6,
                family_name = $7, email = $8, active = $9, raw = $10, updated_at = NOW()
            WHERE team_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(id)
        .bind(&request.external_id)
        .bind(&request.user_name)
        .bind(&request.display_name)
        .bind(&request.given_name)
        .bind(&request.family_name)
        .bind(&request.email)
        .bind(request.active)
        .bind(&request.raw)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn delete(&mut self, team_id: TeamId, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scim_users WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ScimGroups<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ScimGroups<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Replace a group's membership with `member_ids`, ignoring ids from other teams.
    async fn set_members(&mut self, team_id: TeamId, group_id: Uuid, member_ids: &[Uuid]) -> Result<()> {
        sqlx::query("DELETE FROM scim_group_members WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *self.db)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO scim_group_members (group_id, user_id)
            SELECT $1, id FROM scim_users WHERE team_id = $2 AND id = ANY($3)
            "#,
        )
        .bind(group_id)
        .bind(team_id)
        .bind(member_ids)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn create(&mut self, team_id: TeamId, request: &ScimGroupWrite) -> Result<ScimGroup> {
        let group = sqlx::query_as::<_, ScimGroup>(
            r#"
            INSERT INTO scim_groups (team_id, external_id, display_name, raw)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(&request.external_id)
        .bind(&request.display_name)
        .bind(&request.raw)
        .fetch_one(&mut *self.db)
        .await?;

        self.set_members(team_id, group.id, &request.member_ids).await?;
        Ok(group)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn get(&mut self, team_id: TeamId, id: Uuid) -> Result<Option<ScimGroup>> {
        let group = sqlx::query_as::<_, ScimGroup>("SELECT * FROM scim_groups WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(group)
    }

    /// Members of a group as `(id, userName)` pairs.
    #[instrument(skip(self), fields(group_id = %abbrev_uuid(&group_id)), err)]
    pub async fn members(&mut self, group_id: Uuid) -> Result<Vec<(Uuid, String)>> {
        let members = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT u.id, u.user_name FROM scim_group_members gm
            INNER JOIN scim_users u ON u.id = gm.user_id
            WHERE gm.group_id = $1
            ORDER BY u.user_name
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(members)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn list(
        &mut self,
        team_id: TeamId,
        display_name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ScimGroup>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scim_groups WHERE team_id = $1 AND ($2::TEXT IS NULL OR display_name = $2)",
        )
        .bind(team_id)
        .bind(display_name)
        .fetch_one(&mut *self.db)
        .await?;

        let groups = sqlx::query_as::<_, ScimGroup>(
            r#"
            SELECT * FROM scim_groups
            WHERE team_id = $1 AND ($2::TEXT IS NULL OR display_name = $2)
            ORDER BY created_at ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(team_id)
        .bind(display_name)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;

        Ok((groups, total))
    }

    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn replace(&mut self, team_id: TeamId, id: Uuid, request: &ScimGroupWrite) -> Result<Option<ScimGroup>> {
        let group = sqlx::query_as::<_, ScimGroup>(
            r#"
            UPDATE scim_groups
            SET external_id = $3, display_name = $4, raw = $5, updated_at = NOW()
            WHERE team_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(id)
        .bind(&request.external_id)
        .bind(&request.display_name)
        .bind(&request.raw)
        .fetch_optional(&mut *self.db)
        .await?;

        if let Some(group) = &group {
            self.set_members(team_id, group.id, &request.member_ids).await?;
        }
        Ok(group)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn delete(&mut self, team_id: TeamId, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scim_groups WHERE team_id = $1 AND id = $2")
            .bind(team_id)
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct SamlConnections<'c> {
    db: &'c mut PgConnection,
}

impl<'c> SamlConnections<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn get_for_team(&mut self, team_id: TeamId) -> Result<Option<SamlConnection>> {
        let connection = sqlx::query_as::<_, SamlConnection>("SELECT * FROM saml_connections WHERE team_id = $1")
            .bind(team_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(connection)
    }

    /// Create the team's connection or replace the existing one.
    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&request.team_id)), err)]
    pub async fn upsert(&mut self, request: &SamlConnectionUpsert) -> Result<SamlConnection> {
        let connection = sqlx::query_as::<_, SamlConnection>(
            r#"
            INSERT INTO saml_connections (
                team_id, tenant, product, encoded_metadata, entity_id, sso_url, certificate,
                redirect_url, default_redirect_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT ON CONSTRAINT saml_connections_team_unique DO UPDATE SET
                tenant = EXCLUDED.tenant,
                product = EXCLUDED.product,
                encoded_metadata = EXCLUDED.encoded_metadata,
                entity_id = EXCLUDED.entity_id,
                sso_url = EXCLUDED.sso_url,
                certificate = EXCLUDED.certificate,
                redirect_url = EXCLUDED.redirect_url,
                default_redirect_url = EXCLUDED.default_redirect_url,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(request.team_id)
        .bind(&request.tenant)
        .bind(&request.product)
        .bind(&request.encoded_metadata)
        .bind(&request.entity_id)
        .bind(&request.sso_url)
        .bind(&request.certificate)
        .bind(&request.redirect_url)
        .bind(&request.default_redirect_url)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(connection)
    }

    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn delete_for_team(&mut self, team_id: TeamId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saml_connections WHERE team_id = $1")
            .bind(team_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

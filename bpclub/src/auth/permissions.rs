//! Team membership and role checks used by handlers.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    api::models::users::CurrentUser,
    db::{handlers::Members, models::teams::TeamMemberDBResponse},
    errors::{Error, Result},
    types::{Operation, TeamId, TeamRole, abbrev_uuid},
};

/// Require that `user` is any member of the team.
#[instrument(skip(conn, user), fields(team_id = %abbrev_uuid(&team_id), user_id = %abbrev_uuid(&user.id)), err)]
pub async fn require_membership(
    conn: &mut PgConnection,
    team_id: TeamId,
    user: &CurrentUser,
    action: Operation,
    resource: &str,
) -> Result<TeamMemberDBResponse> {
    require_team_role(conn, team_id, user, TeamRole::Member, action, resource).await
}

/// Require that `user` holds at least `required` in the team.
///
/// Non-members get the same 403 as under-privileged members, so the response does not reveal
/// whether a team exists.
#[instrument(skip(conn, user), fields(team_id = %abbrev_uuid(&team_id), user_id = %abbrev_uuid(&user.id)), err)]
pub async fn require_team_role(
    conn: &mut PgConnection,
    team_id: TeamId,
    user: &CurrentUser,
    required: TeamRole,
    action: Operation,
    resource: &str,
) -> Result<TeamMemberDBResponse> {
    let member = Members::new(conn).get_by_user(team_id, user.id).await?;

    match member {
        Some(member) if member.role.at_least(required) => Ok(member),
        _ => Err(Error::InsufficientPermissions {
            required,
            action,
            resource: format!("{resource} for team {}", abbrev_uuid(&team_id)),
        }),
    }
}

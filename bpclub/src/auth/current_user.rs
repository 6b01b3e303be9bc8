use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    db::{errors::DbError, handlers::Sessions},
    errors::{Error, Result},
    request_context::ClientInfo,
    types::abbrev_uuid,
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{debug, instrument, trace};

/// Extract user from JWT session cookie if present and valid
/// Returns:
/// - None: No session cookie present
/// - Some(Ok(user)): Valid JWT found and verified
/// - Some(Err(error)): Cookie present but the token is invalid or expired
fn try_jwt_session_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    let cookie_str = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    let token = session::token_from_cookie_header(cookie_str, &config.auth.session.cookie_name)?;
    Some(session::verify_session_token(token, config))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = match try_jwt_session_auth(parts, &state.config) {
            Some(Ok(user)) => user,
            Some(Err(e)) => {
                trace!("JWT session authentication failed: {:?}", e);
                return Err(Error::Unauthenticated { message: None });
            }
            None => {
                trace!("No session cookie found in request");
                return Err(Error::Unauthenticated { message: None });
            }
        };

        // The JWT is only valid while its server-side session is
        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        let session = Sessions::new(&mut conn).get_by_id(user.session_id).await?;
        drop(conn);

        match session {
            Some(s) if s.user_id == user.id && !s.is_revoked() => {}
            _ => {
                debug!(session_id = %abbrev_uuid(&user.session_id), "Rejecting token for missing or revoked session");
                return Err(Error::Unauthenticated { message: None });
            }
        }

        let Ok(client) = ClientInfo::from_request_parts(parts, state).await;
        state.audit().track_session_activity(user.session_id, &client).await;

        debug!("Found JWT session authenticated user: {}", abbrev_uuid(&user.id));
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Sessions;
    use crate::test_utils::{create_test_state, create_test_user, login};
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;

    fn parts_with_cookie(cookie: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("http://localhost/api/teams").header("user-agent", "test-agent");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let (parts, _body) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_valid_session_cookie(pool: PgPool) {
        let state = create_test_state(pool.clone());
        let user = create_test_user(&pool, "alice@example.com").await;
        let (current, cookie) = login(&state, &user).await;

        let mut parts = parts_with_cookie(Some(&cookie));
        let extracted = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(extracted.id, user.id);
        assert_eq!(extracted.session_id, current.session_id);

        let mut conn = pool.acquire().await.unwrap();
        let session = Sessions::new(&mut conn).get_by_id(current.session_id).await.unwrap().unwrap();
        assert_eq!(session.user_agent.as_deref(), Some("test-agent"));
    }

    #[sqlx::test]
    async fn test_missing_cookie_is_unauthorized(pool: PgPool) {
        let state = create_test_state(pool);
        let mut parts = parts_with_cookie(None);

        let error = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(error.user_message(), "Unauthorized");
    }

    #[sqlx::test]
    async fn test_garbage_token_is_unauthorized(pool: PgPool) {
        let state = create_test_state(pool);
        let mut parts = parts_with_cookie(Some("bpclub_session=not-a-jwt"));

        let error = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_revoked_session_is_unauthorized(pool: PgPool) {
        let state = create_test_state(pool.clone());
        let user = create_test_user(&pool, "bob@example.com").await;
        let (current, cookie) = login(&state, &user).await;

        state.audit().revoke_session(current.session_id).await;

        let mut parts = parts_with_cookie(Some(&cookie));
        let error = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }
}

//! Password registration, login, session management, password resets and email verification.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::users::{
        AuthCookieResponse, AuthResponse, CurrentUser, LoginRequest, MessageResponse, PasswordResetConfirm, PasswordResetRequest,
        RegisterRequest, SessionResponse, UserResponse, VerifyEmailQuery,
    },
    audit::AuditEntry,
    auth::{password, session},
    config::PasswordConfig,
    db::{
        handlers::{Sessions, Teams, Users, VerificationTokens},
        models::{
            audit_logs::{AuditCategory, AuditStatus},
            users::{UserCreateDBRequest, UserDBResponse},
            verification_tokens::TokenPurpose,
        },
    },
    errors::{Error, Result},
    request_context::ClientInfo,
    types::SessionId,
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

fn missing_fields() -> Error {
    Error::BadRequest {
        message: "Missing required fields".to_string(),
    }
}

fn ttl(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::hours(24))
}

/// Argon2 is deliberately slow; keep it off the async runtime
async fn hash_password_blocking(password: String, config: PasswordConfig) -> Result<String> {
    tokio::task::spawn_blocking(move || password::hash_password(&password, &config))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

/// Mail a verification link. Registration succeeds even if this fails.
async fn send_verification(state: &AppState, user: &UserDBResponse) {
    let issued = match state.db.acquire().await {
        Ok(mut conn) => {
            VerificationTokens::new(&mut conn)
                .issue(user.id, TokenPurpose::EmailVerification, ttl(state.config.auth.email_verification_expiry))
                .await
        }
        Err(e) => Err(e.into()),
    };

    let result = match issued {
        Ok(token) => state.email.send_email_verification(&user.email, user.name.as_deref(), &token).await,
        Err(e) => Err(Error::Database(e)),
    };
    if let Err(e) = result {
        warn!("Failed to send verification email: {}", e);
    }
}

/// Open a session row and build the cookie response around it.
async fn start_session(state: &AppState, user: UserDBResponse, client: &ClientInfo, status: StatusCode, message: &str) -> Result<AuthCookieResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let session_row = Sessions::new(&mut conn)
        .create(user.id, client.ip_address.as_deref(), client.user_agent.as_deref())
        .await?;

    let current_user = CurrentUser {
        id: user.id,
        session_id: session_row.id,
        email: user.email.clone(),
        name: user.name.clone(),
    };
    let token = session::create_session_token(&current_user, &state.config)?;

    let body = serde_json::to_value(AuthResponse {
        user: UserResponse::from(user),
        message: message.to_string(),
    })
    .map_err(|e| Error::Internal {
        operation: format!("serialize auth response: {e}"),
    })?;

    Ok(AuthCookieResponse {
        status,
        body,
        cookie: session::session_cookie(&token, &state.config),
    })
}

/// Record a login attempt against every team the user belongs to.
async fn audit_login(state: &AppState, user: &UserDBResponse, actor: Option<CurrentUser>, client: &ClientInfo, status: AuditStatus) {
    let teams = match state.db.acquire().await {
        Ok(mut conn) => Teams::new(&mut conn).list_for_user(user.id).await.unwrap_or_default(),
        Err(e) => {
            tracing::warn!("Failed to load teams for login audit: {}", e);
            return;
        }
    };

    let action = match status {
        AuditStatus::Success => "auth.login",
        _ => "auth.login_failed",
    };
    let audit = state.audit();
    for team in teams {
        audit
            .log(
                AuditEntry::builder()
                    .team_id(team.id)
                    .action(action)
                    .category(AuditCategory::Auth)
                    .status(status)
                    .maybe_actor(actor.clone())
                    .target_id(user.id.to_string())
                    .target_type("user")
                    .target_name(user.email.clone())
                    .client(client.clone())
                    .build(),
            )
            .await;
    }
}

/// Register a new account and sign it in
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "auth",
    summary = "Register",
    responses(
        (status = 201, description = "Account created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "An account with this email already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, client: ClientInfo, Json(request): Json<RegisterRequest>) -> Result<AuthCookieResponse> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let email = request.email.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        });
    }
    let password_config = state.config.auth.password.clone();
    password::validate_password(&request.password, &password_config)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Users::new(&mut conn).get_user_by_email(&email).await?.is_some() {
        return Err(Error::Conflict {
            message: "An account with this email address already exists".to_string(),
        });
    }

    let password_hash = hash_password_blocking(request.password, password_config).await?;

    let user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email,
            name: request.name.filter(|n| !n.trim().is_empty()),
            image: None,
            password_hash: Some(password_hash),
        })
        .await?;
    drop(conn);

    send_verification(&state, &user).await;
    start_session(&state, user, &client, StatusCode::CREATED, "Registration successful").await
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    summary = "Login",
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid email or password"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, client: ClientInfo, Json(request): Json<LoginRequest>) -> Result<AuthCookieResponse> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .get_user_by_email(request.email.trim())
        .await?
        .ok_or_else(invalid_credentials)?;
    drop(conn);

    let Some(hash) = user.password_hash.clone() else {
        return Err(invalid_credentials());
    };

    let password = request.password;
    let is_valid = tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;

    if !is_valid {
        audit_login(&state, &user, None, &client, AuditStatus::Failure).await;
        return Err(invalid_credentials());
    }

    let response = start_session(&state, user.clone(), &client, StatusCode::OK, "Login successful").await?;
    let actor = CurrentUser {
        id: user.id,
        session_id: SessionId::nil(),
        email: user.email.clone(),
        name: user.name.clone(),
    };
    audit_login(&state, &user, Some(actor), &client, AuditStatus::Success).await;

    Ok(response)
}

/// Sign out, revoking the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    summary = "Logout",
    responses(
        (status = 200, description = "Signed out"),
        (status = 401, description = "Not signed in"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, current_user: CurrentUser) -> Result<AuthCookieResponse> {
    state.audit().revoke_session(current_user.session_id).await;

    Ok(AuthCookieResponse {
        status: StatusCode::OK,
        body: json!({ "message": "Logout successful" }),
        cookie: session::clear_session_cookie(&state.config),
    })
}

/// The signed-in user
#[utoipa::path(
    get,
    path = "/auth/session",
    tag = "auth",
    summary = "Current session",
    responses(
        (status = 200, description = "Signed-in user", body = CurrentUser),
        (status = 401, description = "Not signed in"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_session(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}

/// Active sessions of the signed-in user
#[utoipa::path(
    get,
    path = "/auth/sessions",
    tag = "auth",
    summary = "List sessions",
    responses(
        (status = 200, description = "Active sessions, newest activity first", body = [SessionResponse]),
        (status = 401, description = "Not signed in"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_sessions(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<SessionResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let sessions = Sessions::new(&mut conn).list_active_for_user(current_user.id).await?;

    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionResponse::new(s, current_user.session_id))
            .collect(),
    ))
}

/// Revoke one of the signed-in user's sessions
#[utoipa::path(
    delete,
    path = "/auth/sessions/{session_id}",
    tag = "auth",
    summary = "Revoke session",
    params(("session_id" = uuid::Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "Session not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn revoke_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    current_user: CurrentUser,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut sessions = Sessions::new(&mut conn);

    let owned = sessions
        .get_by_id(session_id)
        .await?
        .filter(|s| s.user_id == current_user.id && !s.is_revoked());
    if owned.is_none() {
        return Err(Error::NotFound {
            resource: "Session".to_string(),
            id: session_id.to_string(),
        });
    }

    sessions.revoke(session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Email a password reset link
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = PasswordResetRequest,
    tag = "auth",
    summary = "Request password reset",
    description = "Responds the same way whether or not an account exists for the address.",
    responses(
        (status = 200, description = "Password reset email sent", body = MessageResponse),
        (status = 400, description = "Missing required fields"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>> {
    let email = request.email.as_deref().map(str::trim).filter(|e| !e.is_empty()).ok_or_else(missing_fields)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    match Users::new(&mut conn).get_user_by_email(email).await? {
        Some(user) => {
            let token = VerificationTokens::new(&mut conn)
                .issue(user.id, TokenPurpose::PasswordReset, ttl(state.config.auth.password_reset_expiry))
                .await?;
            drop(conn);
            state.email.send_password_reset(&user.email, user.name.as_deref(), &token).await?;
            info!(user_id = %user.id, "Password reset email sent");
        }
        None => info!("Password reset requested for unknown email"),
    }

    Ok(Json(MessageResponse::new("Password reset email sent")))
}

/// Set a new password with a mailed reset token
#[utoipa::path(
    put,
    path = "/auth/reset-password",
    request_body = PasswordResetConfirm,
    tag = "auth",
    summary = "Reset password",
    description = "Signs the user out of every existing session.",
    responses(
        (status = 200, description = "Password updated successfully", body = MessageResponse),
        (status = 400, description = "Missing fields, invalid password, or an invalid or expired token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetConfirm>,
) -> Result<Json<MessageResponse>> {
    let (Some(token), Some(new_password)) = (request.token.filter(|t| !t.is_empty()), request.password) else {
        return Err(missing_fields());
    };
    let invalid_token = || Error::BadRequest {
        message: "Invalid token".to_string(),
    };

    let password_config = state.config.auth.password.clone();
    password::validate_password(&new_password, &password_config)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let reset = VerificationTokens::new(&mut conn)
        .find(TokenPurpose::PasswordReset, &token)
        .await?
        .filter(|t| t.used_at.is_none())
        .ok_or_else(invalid_token)?;
    drop(conn);

    if reset.is_expired(chrono::Utc::now()) {
        return Err(Error::BadRequest {
            message: "Token expired".to_string(),
        });
    }

    let password_hash = hash_password_blocking(new_password, password_config).await?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    if !VerificationTokens::new(&mut tx).mark_used(reset.id).await? {
        return Err(invalid_token());
    }
    Users::new(&mut tx).set_password_hash(reset.user_id, &password_hash).await?;
    let revoked = Sessions::new(&mut tx).revoke_all_for_user(reset.user_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!(user_id = %reset.user_id, revoked, "Password reset");
    Ok(Json(MessageResponse::new("Password updated successfully")))
}

/// Confirm an email address with a mailed verification token
#[utoipa::path(
    get,
    path = "/auth/verify",
    tag = "auth",
    summary = "Verify email",
    params(VerifyEmailQuery),
    responses(
        (status = 200, description = "Email verified successfully", body = MessageResponse),
        (status = 400, description = "Invalid or expired token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_email(State(state): State<AppState>, Query(query): Query<VerifyEmailQuery>) -> Result<Json<MessageResponse>> {
    let token = query.token.filter(|t| !t.is_empty()).ok_or_else(|| Error::BadRequest {
        message: "Invalid token".to_string(),
    })?;
    let invalid = || Error::BadRequest {
        message: "Invalid or expired token".to_string(),
    };

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut tokens = VerificationTokens::new(&mut tx);
    let verification = tokens
        .find(TokenPurpose::EmailVerification, &token)
        .await?
        .ok_or_else(invalid)?;
    if !tokens.mark_used(verification.id).await? {
        return Err(invalid());
    }
    Users::new(&mut tx).mark_email_verified(verification.user_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(MessageResponse::new("Email verified successfully")))
}

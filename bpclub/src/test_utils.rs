//! Test utilities shared by unit and integration tests.

use axum_test::TestServer;
use sqlx::PgPool;

use crate::{
    AppState, Application,
    api::models::users::CurrentUser,
    auth::session,
    config::{Config, DummyConfig, EmailTransportConfig, PaymentConfig},
    db::{
        handlers::{Members, Sessions, Teams, Users},
        models::{
            teams::{TeamCreateDBRequest, TeamDBResponse},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::{TeamId, TeamRole},
};

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let emails_dir = std::env::temp_dir().join(format!("bpclub-test-emails-{}", std::process::id()));

    let mut config = Config {
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        app_url: "http://localhost:3000".to_string(),
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: emails_dir.to_string_lossy().to_string(),
    };
    config.billing.payment = Some(PaymentConfig::Dummy(DummyConfig::default()));
    config.auth.session.cookie_secure = false;
    // Cheap hashing keeps auth tests fast
    config.auth.password.argon2_memory_kib = 1024;
    config.auth.password.argon2_iterations = 1;
    config
}

pub fn create_test_state(pool: PgPool) -> AppState {
    create_test_state_with_config(pool, create_test_config())
}

pub fn create_test_state_with_config(pool: PgPool, config: Config) -> AppState {
    AppState::from_config(pool, config).expect("Failed to build test state")
}

pub fn create_test_app(pool: PgPool) -> (TestServer, AppState) {
    create_test_app_with_config(pool, create_test_config())
}

pub fn create_test_app_with_config(pool: PgPool, config: Config) -> (TestServer, AppState) {
    let app = Application::from_pool(config, pool).expect("Failed to create application");
    let state = app.state().clone();
    (app.into_test_server(), state)
}

pub async fn create_test_user(pool: &PgPool, email: &str) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let name = email.split('@').next().map(str::to_string);
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            name,
            image: None,
            password_hash: None,
        })
        .await
        .expect("Failed to create test user")
}

/// A `CurrentUser` for direct calls that skip the session lookup.
pub fn as_current_user(user: &UserDBResponse) -> CurrentUser {
    CurrentUser {
        id: user.id,
        session_id: uuid::Uuid::new_v4(),
        email: user.email.clone(),
        name: user.name.clone(),
    }
}

/// Open a real session for `user` and return it with a ready-to-send `Cookie` header value.
pub async fn login(state: &AppState, user: &UserDBResponse) -> (CurrentUser, String) {
    let mut conn = state.db.acquire().await.expect("Failed to acquire connection");
    let session_row = Sessions::new(&mut conn)
        .create(user.id, Some("127.0.0.1"), Some("test"))
        .await
        .expect("Failed to create session");

    let current = CurrentUser {
        id: user.id,
        session_id: session_row.id,
        email: user.email.clone(),
        name: user.name.clone(),
    };
    let token = session::create_session_token(&current, &state.config).expect("Failed to create token");
    let cookie = format!("{}={}", state.config.auth.session.cookie_name, token);
    (current, cookie)
}

/// Create a team with `owner` as its only OWNER.
pub async fn create_test_team(pool: &PgPool, owner: &UserDBResponse, name: &str) -> TeamDBResponse {
    let mut tx = pool.begin().await.expect("Failed to begin transaction");
    let team = Teams::new(&mut tx)
        .create(&TeamCreateDBRequest {
            name: name.to_string(),
            slug: crate::api::handlers::teams::slugify(name),
            domain: None,
            created_by: owner.id,
        })
        .await
        .expect("Failed to create test team");
    Members::new(&mut tx)
        .add(team.id, owner.id, TeamRole::Owner)
        .await
        .expect("Failed to add team owner");
    tx.commit().await.expect("Failed to commit");
    team
}

pub async fn add_member(pool: &PgPool, team_id: TeamId, user: &UserDBResponse, role: TeamRole) {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Members::new(&mut conn)
        .add(team_id, user.id, role)
        .await
        .expect("Failed to add team member");
}

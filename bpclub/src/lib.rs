//! # bpclub: Blueprint Club backend
//!
//! `bpclub` is the HTTP backend of Blueprint Club, a multi-tenant SaaS product. It owns team
//! (tenant) management with role-based access, SSO configuration through SAML and SCIM
//! provisioning, a per-team audit trail, outbound webhooks for team events, subscription billing,
//! and an AI tutor backed by third-party generative and speech APIs.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! uses PostgreSQL for all persistence. Every request follows the same path:
//!
//! ```text
//! router -> handler -> permission check -> repository (sqlx) -> external API (if any) -> JSON
//! ```
//!
//! There are no background workers. The only in-process fan-out is webhook delivery, which posts
//! one event to every subscribed webhook concurrently and records each attempt.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) exposes everything under `/api`. Browser clients authenticate with
//! an HTTP-only session cookie; SCIM clients authenticate with a per-team bearer token.
//!
//! The **authentication layer** ([`auth`]) issues and verifies session JWTs, backed by a
//! `user_sessions` row so sessions can be revoked, and checks team roles for handlers.
//!
//! The **database layer** ([`db`]) uses the repository pattern. Each repository borrows a
//! connection, so handlers decide when several writes share a transaction.
//!
//! **Services** wrap the parts of a request that are not plain CRUD: [`audit`] (best-effort audit
//! writes and CSV export), [`webhooks`] (signed fan-out delivery), [`billing`] together with
//! [`payment_providers`], [`email`], [`saml`], [`scim`] and [`tutor`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use bpclub::{Application, config::{Args, Config}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let config = Config::load(&args)?;
//!     bpclub::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations in `migrations/` are embedded and run on startup by [`Application::new`].

pub mod api;
pub mod audit;
pub mod auth;
pub mod billing;
pub mod config;
pub mod crypto;
pub mod db;
pub mod email;
pub mod errors;
mod openapi;
pub mod payment_providers;
pub mod rate_limit;
pub mod request_context;
pub mod saml;
pub mod scim;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod tutor;
pub mod types;
pub mod webhooks;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    audit::AuditService,
    config::{Config, CorsOrigin},
    email::EmailService,
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
    rate_limit::RateLimiter,
    tutor::TutorClients,
    webhooks::WebhookService,
};

pub use types::{TeamId, UserId};

/// Install aws-lc-rs as the process-wide rustls crypto provider.
///
/// The HTTP clients are built without a bundled provider, so this must run before the first
/// client is constructed. Calling it again is a no-op.
pub fn install_crypto_provider() {
    // Errors only when a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Application state shared across all request handlers.
///
/// # Fields
///
/// - `db`: PostgreSQL connection pool
/// - `config`: Application configuration loaded from file and environment
/// - `webhooks`: Outbound webhook dispatcher
/// - `email`: Transactional email sender
/// - `payment_provider`: Configured payment processor, if billing is enabled
/// - `tutor`: Generative-AI and speech clients for the AI tutor
/// - `rate_limiter`: Per-client limiter for webhook management routes, if enabled
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .webhooks(webhooks)
///     .email(Arc::new(email))
///     .tutor(tutor)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub webhooks: WebhookService,
    pub email: Arc<EmailService>,
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
    pub tutor: TutorClients,
    pub rate_limiter: Option<RateLimiter>,
}

impl AppState {
    /// Build every service from configuration around an existing pool.
    pub fn from_config(db: PgPool, config: Config) -> anyhow::Result<Self> {
        install_crypto_provider();
        let webhooks = WebhookService::new(db.clone(), &config.webhooks)?;
        let email = Arc::new(EmailService::new(&config)?);
        let tutor = TutorClients::new(&config.tutor)?;
        let payment_provider = config.billing.payment.clone().map(payment_providers::create_provider);
        let rate_limiter = config.rate_limit.enabled.then(|| RateLimiter::new(&config.rate_limit));

        Ok(Self::builder()
            .db(db)
            .config(config)
            .webhooks(webhooks)
            .email(email)
            .maybe_payment_provider(payment_provider)
            .tutor(tutor)
            .maybe_rate_limiter(rate_limiter)
            .build())
    }

    /// Audit service over the shared pool.
    pub fn audit(&self) -> AuditService {
        AuditService::new(self.db.clone())
    }
}

/// Get the bpclub database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION, http::header::CONTENT_DISPOSITION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - Authentication (`/api/auth/*`)
/// - Teams, members, invitations, audit logs, webhooks, SCIM and SAML settings (`/api/teams/*`)
/// - SCIM 2.0 provisioning (`/api/scim/v2.0/*`, bearer token)
/// - Billing (`/api/billing/*`, `/api/stripe/*`)
/// - AI tutor (`/api/aitutor/*`)
/// - API reference at `/docs`, liveness at `/healthz`
///
/// Webhook management routes sit behind the per-client rate limiter. CORS and request tracing
/// wrap everything.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{audit_logs, auth, billing, invitations, members, saml, scim, teams, tutor, webhooks};

    let auth_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/session", get(auth::get_session))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/sessions/{session_id}", delete(auth::revoke_session))
        .route(
            "/auth/reset-password",
            post(auth::request_password_reset).put(auth::confirm_password_reset),
        )
        .route("/auth/verify", get(auth::verify_email));

    let webhook_routes = Router::new()
        .route(
            "/teams/{team_id}/webhooks",
            get(webhooks::list_webhooks).post(webhooks::create_webhook),
        )
        .route(
            "/teams/{team_id}/webhooks/{webhook_id}",
            get(webhooks::get_webhook)
                .patch(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .route(
            "/teams/{team_id}/webhooks/{webhook_id}/deliveries",
            get(webhooks::list_deliveries),
        )
        .route("/teams/{team_id}/webhooks/{webhook_id}/test", post(webhooks::test_webhook))
        .route_layer(from_fn_with_state(state.clone(), rate_limit::rate_limit_middleware));

    let team_routes = Router::new()
        .route("/teams", get(teams::list_teams).post(teams::create_team))
        .route("/teams/members/count", get(teams::count_members))
        .route(
            "/teams/{team_id}",
            get(teams::get_team).patch(teams::update_team).delete(teams::delete_team),
        )
        // Members
        .route(
            "/teams/{team_id}/members",
            get(members::list_members).post(members::add_member),
        )
        .route(
            "/teams/{team_id}/members/{member_id}",
            get(members::get_member)
                .patch(members::update_member)
                .delete(members::remove_member),
        )
        // Invitations
        .route(
            "/teams/{team_id}/invitations",
            get(invitations::list_invitations).post(invitations::create_invitation),
        )
        .route(
            "/teams/{team_id}/invitations/{token}",
            get(invitations::get_invitation)
                .post(invitations::accept_invitation)
                .delete(invitations::cancel_invitation),
        )
        // Audit logs
        .route("/teams/{team_id}/audit-logs", get(audit_logs::list_audit_logs))
        .route("/teams/{team_id}/audit-logs/export", get(audit_logs::export_audit_logs))
        // Identity settings
        .route("/teams/{team_id}/scim", get(scim::get_scim_settings).post(scim::update_scim_settings))
        .route("/teams/{team_id}/scim/token", post(scim::regenerate_scim_token))
        .route(
            "/teams/{team_id}/saml",
            get(saml::get_saml_connection)
                .post(saml::configure_saml_connection)
                .delete(saml::delete_saml_connection),
        )
        .merge(webhook_routes);

    // SCIM clients address resources by path; the handler resolves the resource type itself
    let scim_routes = Router::new().route(
        "/scim/v2.0/{*path}",
        get(scim::scim_get)
            .post(scim::scim_post)
            .put(scim::scim_put)
            .patch(scim::scim_patch)
            .delete(scim::scim_delete),
    );

    let billing_routes = Router::new()
        .route("/billing/plans", get(billing::list_plans))
        .route("/billing/usage", get(billing::get_usage).post(billing::record_usage))
        .route("/stripe/subscription", get(billing::get_subscription))
        .route("/stripe/create-subscription", post(billing::create_subscription))
        .route("/stripe/portal-session", post(billing::create_portal_session))
        .route("/stripe/webhook", post(billing::payment_webhook));

    let tutor_routes = Router::new()
        .route("/aitutor/process", post(tutor::process_question))
        .route("/aitutor/whiteboard", post(tutor::whiteboard))
        .route("/aitutor/session", get(tutor::get_session))
        .route("/aitutor/voice", post(tutor::voice))
        .route("/aitutor/speak", post(tutor::speak));

    let api_routes = Router::new()
        .merge(auth_routes)
        .merge(team_routes)
        .merge(scim_routes)
        .merge(billing_routes)
        .merge(tutor_routes)
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;

    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns the router and its resources.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations and builds
///    every service from configuration
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown future resolves, in-flight requests finish, then the pool
///    is closed and telemetry flushed
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting bpclub with configuration: {:#?}", config);

        let pool_settings = &config.database.pool;
        let pool = PgPoolOptions::new()
            .max_connections(pool_settings.max_connections)
            .min_connections(pool_settings.min_connections)
            .acquire_timeout(pool_settings.acquire_timeout)
            .connect(&config.database.url)
            .await?;
        migrator().run(&pool).await?;

        Self::from_pool(config, pool)
    }

    /// Build the application around an already migrated pool.
    pub fn from_pool(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        let app_state = AppState::from_config(pool.clone(), config.clone())?;
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
            pool,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        // Stands in for the peer address the real listener provides
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        let service = self
            .router
            .layer(axum::extract::connect_info::MockConnectInfo(peer))
            .into_make_service();
        axum_test::TestServer::new(service).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "bpclub listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_healthz(pool: PgPool) {
        let (app, _) = create_test_app(pool);
        let response = app.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[test]
    fn test_crypto_provider_install_is_idempotent() {
        crate::install_crypto_provider();
        crate::install_crypto_provider();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
        reqwest::Client::builder().build().expect("client builds once a provider is installed");
    }

    #[sqlx::test]
    async fn test_openapi_docs_served(pool: PgPool) {
        let (app, _) = create_test_app(pool);
        app.get("/docs").await.assert_status_ok();
    }

    #[sqlx::test]
    async fn test_unknown_api_route_is_404(pool: PgPool) {
        let (app, _) = create_test_app(pool);
        app.get("/api/nope").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    async fn test_cors_preflight_allows_configured_origin(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.security.cors.allow_credentials = true;
        config.auth.security.cors.allowed_origins = vec![crate::config::CorsOrigin::Url(
            "https://app.example.com".parse().unwrap(),
        )];
        let (app, _) = create_test_app_with_config(pool, config);

        let response = app
            .method(axum::http::Method::OPTIONS, "/api/teams")
            .add_header("origin", "https://app.example.com")
            .add_header("access-control-request-method", "GET")
            .await;
        assert_eq!(
            response.header("access-control-allow-origin"),
            "https://app.example.com"
        );
    }
}

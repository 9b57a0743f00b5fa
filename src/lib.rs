use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{Method, Request},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod points;
pub mod resume;
pub mod routes;
pub mod settings;
pub mod storage;

use config::AuthConfig;
use db::DbPool;
use error::AppError;
use resume::RetryPolicy;
use storage::ImageStore;

/// Resumes arrive as multipart uploads and images as inline base64.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub images: ImageStore,
    pub auth: Arc<AuthConfig>,
    pub production: bool,
    pub resume_retry: RetryPolicy,
}

/// Application routes without the per-IP rate limiter, which needs the
/// peer address supplied by the server.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Public site
        .route("/api/settings", get(routes::settings::get_settings))
        .route("/api/points-submission", post(routes::points::submit))
        .route("/api/points/check", post(routes::points::check))
        .route("/api/points/daily-count", get(routes::points::daily_count))
        .route("/api/member-applications", post(routes::applications::submit))
        .route("/api/partner-request", post(routes::partners::submit_request))
        .route("/api/partners", get(routes::partners::list_partners))
        .route("/api/forms/submit", post(routes::forms::email_signup))
        .route("/api/officer-applications", post(routes::forms::officer_application))
        .route("/api/officers", get(routes::officers::list))
        .route("/api/events", get(routes::events::list))
        .route("/api/hero-images", get(routes::hero::list))
        // CMS
        .route("/api/cms/me", get(auth::me))
        .route("/api/cms/members", get(routes::members::list).post(routes::members::create))
        .route("/api/cms/members/{id}", put(routes::members::update).delete(routes::members::delete))
        .route("/api/cms/point-submissions", get(routes::points::list))
        .route(
            "/api/cms/point-submissions/{id}",
            put(routes::points::transition).delete(routes::points::delete),
        )
        .route("/api/cms/member-applications", get(routes::applications::list))
        .route(
            "/api/cms/member-applications/{id}",
            put(routes::applications::update).delete(routes::applications::delete),
        )
        .route(
            "/api/cms/member-applications/{id}/resume",
            get(routes::applications::download_resume),
        )
        .route("/api/cms/partner-requests", get(routes::partners::list_requests))
        .route(
            "/api/cms/partner-requests/{id}",
            put(routes::partners::review_request).delete(routes::partners::delete_request),
        )
        .route("/api/cms/partners", delete(routes::partners::delete_all_partners))
        .route("/api/cms/officers", post(routes::officers::create))
        .route("/api/cms/officers/{id}", put(routes::officers::update).delete(routes::officers::delete))
        .route("/api/cms/events", post(routes::events::create))
        .route("/api/cms/events/{id}", put(routes::events::update).delete(routes::events::delete))
        .route("/api/cms/hero-images", post(routes::hero::create))
        .route("/api/cms/hero-images/{id}", put(routes::hero::update).delete(routes::hero::delete))
        .route("/api/cms/settings", put(routes::settings::update_settings))
        .route("/api/cms/email-signups", get(routes::forms::list_email_signups))
        .route("/api/cms/officer-applications", get(routes::forms::list_officer_applications))
        .route("/api/cms/reports/members.csv", get(routes::reports::export_members))
        .route("/api/cms/reports/email-signups.csv", get(routes::reports::export_email_signups))
        .route("/api/cms/admin/set-admin", post(auth::set_admin))
        // Auth
        .route("/auth/dev/login", post(auth::dev_login))
        .route("/auth/logout", post(auth::logout))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    // Public site routes stay open; only the CMS surface needs a token.
    let path = req.uri().path();
    if req.method() == Method::OPTIONS || !path.starts_with("/api/cms/") {
        return next.run(req).await;
    }

    match auth::extract_token_from_headers(req.headers()) {
        Some(token) if auth::validate_token(&state.auth, &token).is_ok() => next.run(req).await,
        Some(_) => AppError::Unauthorized("Invalid token".to_string()).into_response(),
        None => AppError::Unauthorized("Missing auth token".to_string()).into_response(),
    }
}

async fn health_check() -> &'static str {
    "OK"
}

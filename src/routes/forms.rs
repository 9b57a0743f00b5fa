use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::db::models::{EmailSignup, OfficerApplication, ReviewStatus};
use crate::db::{decode_all, to_data, Direction, Query, EMAIL_SIGNUPS, OFFICER_APPLICATIONS};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::routes::filled;
use crate::settings::Settings;
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSignupRequest {
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    eid: Option<String>,
    year_in_school: Option<String>,
}

fn required(value: &Option<String>, field: &str) -> AppResult<String> {
    filled(value).ok_or_else(|| AppError::validation(format!("{} is required", field)))
}

pub async fn email_signup(
    State(state): State<AppState>,
    Settings(settings): Settings,
    AppJson(req): AppJson<EmailSignupRequest>,
) -> AppResult<impl IntoResponse> {
    if !settings.email_signup_enabled {
        return Err(AppError::Forbidden("Email signup is currently disabled".to_string()));
    }

    let signup = EmailSignup {
        id: String::new(),
        email: required(&req.email, "email")?.to_lowercase(),
        first_name: required(&req.first_name, "firstName")?,
        last_name: required(&req.last_name, "lastName")?,
        eid: required(&req.eid, "eid")?,
        year_in_school: required(&req.year_in_school, "yearInSchool")?,
        subscribed: true,
        created_at: Utc::now(),
    };
    if !signup.email.contains('@') {
        return Err(AppError::validation("email is invalid"));
    }

    let id = state.db.add(EMAIL_SIGNUPS, to_data(&signup)?).await?;
    tracing::info!(signup_id = %id, "Email signup received");
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerApplicationRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    eid: Option<String>,
    year_in_school: Option<String>,
    major: Option<String>,
    gpa: Option<String>,
    position: Option<String>,
    experience: Option<String>,
    why_join: Option<String>,
    ideas: Option<String>,
}

pub async fn officer_application(
    State(state): State<AppState>,
    AppJson(req): AppJson<OfficerApplicationRequest>,
) -> AppResult<impl IntoResponse> {
    let application = OfficerApplication {
        id: String::new(),
        first_name: required(&req.first_name, "firstName")?,
        last_name: required(&req.last_name, "lastName")?,
        email: required(&req.email, "email")?,
        eid: required(&req.eid, "eid")?,
        year_in_school: required(&req.year_in_school, "yearInSchool")?,
        major: required(&req.major, "major")?,
        gpa: required(&req.gpa, "gpa")?,
        position: required(&req.position, "position")?,
        experience: filled(&req.experience).unwrap_or_default(),
        why_join: required(&req.why_join, "whyJoin")?,
        ideas: filled(&req.ideas).unwrap_or_default(),
        status: ReviewStatus::Pending,
        created_at: Utc::now(),
    };

    let id = state.db.add(OFFICER_APPLICATIONS, to_data(&application)?).await?;
    tracing::info!(application_id = %id, position = %application.position, "Officer application received");
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
}

pub async fn list_email_signups(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(EMAIL_SIGNUPS, &Query::new().order_by("createdAt", Direction::Desc))
        .await?;
    let signups: Vec<EmailSignup> = decode_all(&docs)?;
    Ok(Json(signups))
}

pub async fn list_officer_applications(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(OFFICER_APPLICATIONS, &Query::new().order_by("createdAt", Direction::Desc))
        .await?;
    let applications: Vec<OfficerApplication> = decode_all(&docs)?;
    Ok(Json(applications))
}

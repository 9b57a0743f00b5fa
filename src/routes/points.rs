use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::db::models::Member;
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppQuery};
use crate::points::{self, MemberLookup, NewSubmission, DAILY_SUBMISSION_LIMIT};
use crate::AppState;

pub async fn submit(
    State(state): State<AppState>,
    AppJson(input): AppJson<NewSubmission>,
) -> AppResult<impl IntoResponse> {
    let id = points::submit(state.db.as_ref(), &input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
}

/// Public progress lookup; the caller proves identity with the name + EID triple.
pub async fn check(
    State(state): State<AppState>,
    AppJson(lookup): AppJson<MemberLookup>,
) -> AppResult<impl IntoResponse> {
    if lookup.first_name.trim().is_empty() || lookup.last_name.trim().is_empty() || lookup.eid.trim().is_empty() {
        return Err(AppError::validation("firstName, lastName and eid are required"));
    }
    let member: Member = points::find_member(state.db.as_ref(), &lookup.first_name, &lookup.last_name, &lookup.eid)
        .await?
        .ok_or_else(|| AppError::not_found("No member found with that name and EID"))?
        .decode()?;

    let requirements = points::requirements(&member);
    Ok(Json(json!({ "member": member, "requirements": requirements })))
}

#[derive(Deserialize)]
pub struct DailyCountParams {
    eid: Option<String>,
}

pub async fn daily_count(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<DailyCountParams>,
) -> AppResult<impl IntoResponse> {
    let eid = params
        .eid
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| AppError::validation("eid is required"))?;
    let count = points::daily_count(state.db.as_ref(), &eid, Utc::now()).await?;
    Ok(Json(json!({ "count": count, "limit": DAILY_SUBMISSION_LIMIT })))
}

#[derive(Deserialize)]
pub struct ListParams {
    status: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    AppQuery(params): AppQuery<ListParams>,
) -> AppResult<impl IntoResponse> {
    let submissions = points::list(state.db.as_ref(), params.status.as_deref()).await?;
    Ok(Json(submissions))
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    action: String,
}

pub async fn transition(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<TransitionRequest>,
) -> AppResult<impl IntoResponse> {
    match req.action.as_str() {
        "approve" => {
            let member = points::approve(state.db.as_ref(), &id, Some(&user.id)).await?;
            Ok(Json(json!({ "success": true, "member": member })))
        }
        "archive" => {
            points::archive(state.db.as_ref(), &id).await?;
            Ok(Json(json!({ "success": true })))
        }
        other => Err(AppError::validation(format!("Unknown action: {}", other))),
    }
}

pub async fn delete(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    points::delete(state.db.as_ref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::{AdminUser, AuthenticatedUser};
use crate::db::models::{Partner, PartnerRequest, ReviewStatus};
use crate::db::{decode_all, to_data, Direction, Query, WriteBatch, PARTNERS, PARTNER_REQUESTS};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::settings::Settings;
use crate::AppState;

const REQUIRED_FIELDS: [&str; 9] = [
    "schoolName",
    "district",
    "address",
    "contactName",
    "position",
    "email",
    "gradeLevel",
    "studentCount",
    "schedule",
];

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

fn optional_text(body: &Map<String, Value>, key: &str) -> Option<String> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text(body: &Map<String, Value>, key: &str) -> String {
    optional_text(body, key).unwrap_or_default()
}

/// Validates a visitor's request body; the student count may arrive as text.
fn build_request(body: &Map<String, Value>) -> AppResult<PartnerRequest> {
    for field in REQUIRED_FIELDS {
        if is_blank(body.get(field)) {
            return Err(AppError::validation(format!("Missing required field: {}", field)));
        }
    }
    let student_count = match body.get("studentCount") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .and_then(|n| u32::try_from(n).ok())
    .ok_or_else(|| AppError::validation("studentCount must be a whole number"))?;

    Ok(PartnerRequest {
        id: String::new(),
        school_name: text(body, "schoolName"),
        district: text(body, "district"),
        address: text(body, "address"),
        contact_name: text(body, "contactName"),
        position: text(body, "position"),
        email: text(body, "email"),
        phone: optional_text(body, "phone"),
        website: optional_text(body, "website"),
        grade_level: text(body, "gradeLevel"),
        student_count,
        schedule: text(body, "schedule"),
        notes: optional_text(body, "notes"),
        message: optional_text(body, "message"),
        status: ReviewStatus::Pending,
        created_at: Utc::now(),
    })
}

pub async fn submit_request(
    State(state): State<AppState>,
    Settings(settings): Settings,
    AppJson(body): AppJson<Map<String, Value>>,
) -> AppResult<impl IntoResponse> {
    if !settings.partner_requests_open {
        return Err(AppError::Forbidden("Partner requests are currently closed".to_string()));
    }
    let request = build_request(&body)?;
    let id = state.db.add(PARTNER_REQUESTS, to_data(&request)?).await?;
    tracing::info!(request_id = %id, school = %request.school_name, "Partner request received");
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
}

pub async fn list_partners(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(PARTNERS, &Query::new().order_by("schoolName", Direction::Asc))
        .await?;
    let partners: Vec<Partner> = decode_all(&docs)?;
    Ok(Json(partners))
}

pub async fn list_requests(State(state): State<AppState>, _user: AuthenticatedUser) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(PARTNER_REQUESTS, &Query::new().order_by("createdAt", Direction::Desc))
        .await?;
    let requests: Vec<PartnerRequest> = decode_all(&docs)?;
    Ok(Json(requests))
}

#[derive(Deserialize)]
pub struct ActionRequest {
    action: String,
}

pub async fn review_request(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<ActionRequest>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(PARTNER_REQUESTS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Partner request not found"))?;
    let request: PartnerRequest = doc.decode()?;

    let status = match req.action.as_str() {
        "accept" => ReviewStatus::Approved,
        "reject" => ReviewStatus::Rejected,
        other => return Err(AppError::validation(format!("Invalid action: {}", other))),
    };
    if request.status != ReviewStatus::Pending {
        return Err(AppError::conflict("Partner request has already been reviewed"));
    }

    let mut patch = Map::new();
    patch.insert("status".into(), to_data(&status)?);
    let mut batch = WriteBatch::new();
    batch.update_if_version(PARTNER_REQUESTS, &id, patch, doc.version);

    let mut partner_id = None;
    if status == ReviewStatus::Approved {
        let partner = Partner::from_request(&request, Utc::now());
        let new_id = uuid::Uuid::new_v4().to_string();
        batch.set(PARTNERS, &new_id, to_data(&partner)?);
        partner_id = Some(new_id);
    }
    state.db.commit(batch).await?;

    tracing::info!(request_id = %id, partner_id = ?partner_id, "Partner request reviewed");
    Ok(Json(json!({ "success": true, "partnerId": partner_id })))
}

/// Deleting an approved request also removes the partners it produced.
pub async fn delete_request(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(PARTNER_REQUESTS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Partner request not found"))?;
    let request: PartnerRequest = doc.decode()?;

    let mut batch = WriteBatch::new();
    if request.status == ReviewStatus::Approved {
        let query = Query::new()
            .where_eq("schoolName", request.school_name.as_str())
            .where_eq("email", request.email.as_str());
        for partner in state.db.query(PARTNERS, &query).await? {
            batch.delete(PARTNERS, &partner.id);
        }
    }
    let removed_partners = batch.len();
    batch.delete_if_version(PARTNER_REQUESTS, &id, doc.version);
    state.db.commit(batch).await?;

    tracing::info!(request_id = %id, removed_partners, "Partner request deleted");
    Ok(Json(json!({ "success": true, "removedPartners": removed_partners })))
}

pub async fn delete_all_partners(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> AppResult<impl IntoResponse> {
    let docs = state.db.query(PARTNERS, &Query::new()).await?;
    let mut batch = WriteBatch::new();
    for doc in &docs {
        batch.delete(PARTNERS, &doc.id);
    }
    state.db.commit(batch).await?;

    tracing::warn!(admin = %admin.id, deleted = docs.len(), "All partners deleted");
    Ok(Json(json!({ "success": true, "deleted": docs.len() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Map<String, Value> {
        let value = json!({
            "schoolName": "Lincoln Elementary",
            "district": "Austin ISD",
            "address": "1 Main St",
            "contactName": "Pat Lee",
            "position": "Principal",
            "email": "pat@lincoln.edu",
            "gradeLevel": "K-5",
            "studentCount": "320",
            "schedule": "Tuesdays",
            "notes": "  "
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn builds_pending_request() {
        let request = build_request(&body()).unwrap();
        assert_eq!(request.student_count, 320);
        assert_eq!(request.status, ReviewStatus::Pending);
        assert!(request.notes.is_none());
    }

    #[test]
    fn reports_first_missing_field() {
        let mut b = body();
        b.remove("position");
        match build_request(&b) {
            Err(AppError::Validation(msg)) => assert_eq!(msg, "Missing required field: position"),
            _ => panic!("expected validation error"),
        }
    }
}

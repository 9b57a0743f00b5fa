use std::collections::HashMap;

use axum::{
    extract::{Json, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map};

use crate::auth::AuthenticatedUser;
use crate::db::models::{ApplicationStatus, Member, MemberApplication};
use crate::db::{decode_all, to_data, Direction, Query, WriteBatch, MEMBERS, MEMBER_APPLICATIONS};
use crate::error::{AppError, AppResult};
use crate::extract::{AppJson, AppQuery};
use crate::resume;
use crate::routes::members::ensure_eid_available;
use crate::settings::Settings;
use crate::AppState;

const REQUIRED_FIELDS: [&str; 9] = [
    "firstName", "lastName", "email", "phone", "eid", "major", "grade", "gpa", "whyJoin",
];

struct ResumeUpload {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

async fn read_form(mut multipart: Multipart) -> AppResult<(HashMap<String, String>, Option<ResumeUpload>)> {
    let mut fields = HashMap::new();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "resume" {
            let file_name = field.file_name().unwrap_or("resume.pdf").to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::validation(format!("Read error: {e}")))?
                .to_vec();
            if !bytes.is_empty() {
                upload = Some(ResumeUpload {
                    file_name,
                    content_type,
                    bytes,
                });
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::validation(format!("Read error: {e}")))?;
            fields.insert(name, value.trim().to_string());
        }
    }
    Ok((fields, upload))
}

fn build_application(fields: &HashMap<String, String>) -> AppResult<MemberApplication> {
    for field in REQUIRED_FIELDS {
        if fields.get(field).map_or(true, |v| v.is_empty()) {
            return Err(AppError::validation(format!("Missing required field: {}", field)));
        }
    }
    let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
    let gpa: f64 = get("gpa")
        .parse()
        .map_err(|_| AppError::validation("GPA must be a number"))?;

    let now = Utc::now();
    Ok(MemberApplication {
        id: String::new(),
        first_name: get("firstName"),
        last_name: get("lastName"),
        email: get("email"),
        phone: get("phone"),
        eid: get("eid"),
        major: get("major"),
        grade: get("grade"),
        gpa,
        why_join: get("whyJoin"),
        experience: get("experience"),
        status: ApplicationStatus::Pending,
        created_at: now,
        updated_at: now,
        resume_storage_type: None,
        resume_chunks: Vec::new(),
        resume_metadata: None,
    })
}

pub async fn submit(
    State(state): State<AppState>,
    Settings(settings): Settings,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    if !settings.membership_applications_open {
        return Err(AppError::Forbidden("Membership applications are currently closed".to_string()));
    }

    let (fields, upload) = read_form(multipart).await?;
    let application = build_application(&fields)?;
    if let Some(file) = &upload {
        resume::validate_upload(&file.content_type, file.bytes.len())?;
    }

    let id = state.db.add(MEMBER_APPLICATIONS, to_data(&application)?).await?;

    if let Some(file) = upload {
        let stored = resume::store_resume(
            state.db.as_ref(),
            &id,
            &file.bytes,
            &file.file_name,
            &file.content_type,
            state.resume_retry,
        )
        .await;
        if let Err(e) = stored {
            if let Err(cleanup) = state.db.delete(MEMBER_APPLICATIONS, &id).await {
                tracing::error!(application_id = %id, "Failed to remove application after resume failure: {}", cleanup);
            }
            return Err(e);
        }
    }

    tracing::info!(application_id = %id, "Member application received");
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
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
    let mut query = Query::new().order_by("createdAt", Direction::Desc);
    if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty() && *s != "all") {
        query = query.where_eq("status", status);
    }
    let docs = state.db.query(MEMBER_APPLICATIONS, &query).await?;
    let applications: Vec<MemberApplication> = decode_all(&docs)?;
    Ok(Json(applications))
}

#[derive(Deserialize)]
pub struct ActionRequest {
    action: String,
}

pub async fn update(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<ActionRequest>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(MEMBER_APPLICATIONS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Application not found"))?;
    let application: MemberApplication = doc.decode()?;

    let status = match req.action.as_str() {
        "accept" => ApplicationStatus::Accepted,
        "archive" => ApplicationStatus::Archived,
        "reject" => ApplicationStatus::Rejected,
        other => return Err(AppError::validation(format!("Unknown action: {}", other))),
    };
    if application.status == status {
        return Err(AppError::conflict(format!("Application is already {}", status.as_str())));
    }

    let now = Utc::now();
    let mut patch = Map::new();
    patch.insert("status".into(), to_data(&status)?);
    patch.insert("updatedAt".into(), to_data(&now)?);

    let mut batch = WriteBatch::new();
    batch.update_if_version(MEMBER_APPLICATIONS, &id, patch, doc.version);

    let mut member_id = None;
    if status == ApplicationStatus::Accepted {
        ensure_eid_available(state.db.as_ref(), &application.eid).await?;
        let member = Member::new(&application.first_name, &application.last_name, &application.eid, now);
        let new_id = uuid::Uuid::new_v4().to_string();
        batch.set(MEMBERS, &new_id, to_data(&member)?);
        member_id = Some(new_id);
    }
    state.db.commit(batch).await?;

    tracing::info!(application_id = %id, status = status.as_str(), member_id = ?member_id, "Application updated");
    Ok(Json(json!({ "success": true, "status": status, "memberId": member_id })))
}

pub async fn delete(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if state.db.get(MEMBER_APPLICATIONS, &id).await?.is_none() {
        return Err(AppError::not_found("Application not found"));
    }
    let removed = resume::delete_resume(state.db.as_ref(), &id).await?;
    state.db.delete(MEMBER_APPLICATIONS, &id).await?;
    tracing::info!(application_id = %id, resume_records = removed, "Application deleted");
    Ok(Json(json!({ "success": true })))
}

pub async fn download_resume(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let decoded = resume::load_resume(state.db.as_ref(), &id).await?;

    let content_type = HeaderValue::from_str(&decoded.file_type)
        .unwrap_or_else(|_| HeaderValue::from_static(resume::RESUME_MIME));
    let disposition = format!(
        "inline; filename=\"{}\"",
        decoded.file_name.replace(['"', '\r', '\n'], "_")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Ok((
        [(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)],
        decoded.bytes,
    )
        .into_response())
}

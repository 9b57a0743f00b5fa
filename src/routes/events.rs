use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::db::models::Event;
use crate::db::{decode_all, to_data, to_patch, Direction, Query, WriteBatch, EVENTS};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::routes::filled;
use crate::storage::{ImageFolder, ImageUpload};
use crate::AppState;

pub async fn list(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(EVENTS, &Query::new().order_by("date", Direction::Desc))
        .await?;
    let events: Vec<Event> = decode_all(&docs)?;
    Ok(Json(events))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    title: Option<String>,
    description: Option<String>,
    date: Option<String>,
    location: Option<String>,
    registration_link: Option<String>,
    image: Option<ImageUpload>,
}

/// Accepts a full RFC 3339 timestamp or a plain `YYYY-MM-DD` date.
fn parse_event_date(raw: &str) -> AppResult<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| AppError::validation("date must be YYYY-MM-DD or an RFC 3339 timestamp"))
}

pub async fn create(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    AppJson(req): AppJson<EventRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(title), Some(description), Some(date)) = (filled(&req.title), filled(&req.description), filled(&req.date))
    else {
        return Err(AppError::validation("Title, description, and date are required fields"));
    };
    let date = parse_event_date(&date)?;

    let image = match &req.image {
        Some(upload) => state.images.upload(ImageFolder::Events, upload).await?,
        None => String::new(),
    };

    let mut event = Event {
        id: String::new(),
        title,
        description,
        date,
        image,
        location: filled(&req.location),
        registration_link: filled(&req.registration_link),
    };

    match state.db.add(EVENTS, to_data(&event)?).await {
        Ok(id) => event.id = id,
        Err(e) => {
            state.images.delete_by_url(&event.image).await;
            return Err(e.into());
        }
    }

    tracing::info!(event_id = %event.id, "Event created");
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn update(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<EventRequest>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(EVENTS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Event not found"))?;
    let mut event: Event = doc.decode()?;

    if let Some(title) = filled(&req.title) {
        event.title = title;
    }
    if let Some(description) = filled(&req.description) {
        event.description = description;
    }
    if let Some(date) = filled(&req.date) {
        event.date = parse_event_date(&date)?;
    }
    if req.location.is_some() {
        event.location = filled(&req.location);
    }
    if req.registration_link.is_some() {
        event.registration_link = filled(&req.registration_link);
    }

    let mut replaced = None;
    if let Some(upload) = &req.image {
        let url = state.images.upload(ImageFolder::Events, upload).await?;
        replaced = Some(std::mem::replace(&mut event.image, url));
    }

    let mut batch = WriteBatch::new();
    batch.update_if_version(EVENTS, &id, to_patch(&event)?, doc.version);
    if let Err(e) = state.db.commit(batch).await {
        if replaced.is_some() {
            state.images.delete_by_url(&event.image).await;
        }
        return Err(e.into());
    }

    if let Some(old) = replaced {
        state.images.delete_by_url(&old).await;
    }

    tracing::info!(event_id = %id, "Event updated");
    Ok(Json(event))
}

pub async fn delete(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(EVENTS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Event not found"))?;
    let event: Event = doc.decode()?;

    state.db.delete(EVENTS, &id).await?;
    state.images.delete_by_url(&event.image).await;

    tracing::info!(event_id = %id, "Event deleted");
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_accept_plain_and_full_forms() {
        let plain = parse_event_date("2026-04-18").unwrap();
        assert_eq!(plain.to_rfc3339(), "2026-04-18T00:00:00+00:00");
        let full = parse_event_date("2026-04-18T18:30:00-05:00").unwrap();
        assert_eq!(full.to_rfc3339(), "2026-04-18T23:30:00+00:00");
        assert!(parse_event_date("next tuesday").is_err());
    }
}

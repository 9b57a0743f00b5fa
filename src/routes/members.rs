use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::AuthenticatedUser;
use crate::db::models::{EventType, Member, MemberStatus};
use crate::db::{decode_all, to_data, Direction, DocumentStore, Query, WriteBatch, MEMBERS};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::AppState;

/// Inserts a member with zero points. EIDs are unique among members.
pub async fn create_member(
    db: &dyn DocumentStore,
    first_name: &str,
    last_name: &str,
    eid: &str,
) -> AppResult<Member> {
    let mut member = Member::new(first_name, last_name, eid, Utc::now());
    if member.first_name.is_empty() || member.last_name.is_empty() || member.eid.is_empty() {
        return Err(AppError::validation("firstName, lastName and eid are required"));
    }

    ensure_eid_available(db, &member.eid).await?;

    member.id = db.add(MEMBERS, to_data(&member)?).await?;
    tracing::info!(member_id = %member.id, eid = %member.eid, "Member created");
    Ok(member)
}

pub async fn ensure_eid_available(db: &dyn DocumentStore, eid: &str) -> AppResult<()> {
    let existing = db
        .query(MEMBERS, &Query::new().where_eq("eid", eid.trim()).limit(1))
        .await?;
    if !existing.is_empty() {
        return Err(AppError::conflict(format!("A member with EID {} already exists", eid.trim())));
    }
    Ok(())
}

pub async fn list(State(state): State<AppState>, _user: AuthenticatedUser) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(MEMBERS, &Query::new().order_by("lastName", Direction::Asc))
        .await?;
    let members: Vec<Member> = decode_all(&docs)?;
    Ok(Json(members))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMemberRequest {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    eid: String,
}

pub async fn create(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    AppJson(req): AppJson<CreateMemberRequest>,
) -> AppResult<impl IntoResponse> {
    let member = create_member(state.db.as_ref(), &req.first_name, &req.last_name, &req.eid).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// Either `{field, value}` to set one category, or `{status}`.
#[derive(Deserialize)]
pub struct UpdateMemberRequest {
    field: Option<String>,
    value: Option<Value>,
    status: Option<MemberStatus>,
}

pub async fn update(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateMemberRequest>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(MEMBERS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Member not found"))?;
    let mut member: Member = doc.decode()?;
    let now = Utc::now();
    let mut patch = Map::new();

    match (req.field, req.status) {
        (Some(field), _) => {
            let category: EventType = field
                .parse()
                .map_err(|_| AppError::validation(format!("Unknown points field: {}", field)))?;
            let value = req
                .value
                .as_ref()
                .and_then(parse_points)
                .ok_or_else(|| {
                    AppError::validation(format!("value must be a whole number from 0 to {}", MAX_CATEGORY_POINTS))
                })?;
            member.set_points(category, value, now)?;
            patch.insert(category.points_field().to_string(), value.into());
            patch.insert("totalPoints".to_string(), member.total_points.into());
        }
        (None, Some(status)) => {
            member.status = status;
            member.last_updated = now;
            patch.insert("status".to_string(), to_data(&status)?);
        }
        (None, None) => return Err(AppError::validation("Nothing to update")),
    }
    patch.insert("lastUpdated".to_string(), to_data(&now)?);

    let mut batch = WriteBatch::new();
    batch.update_if_version(MEMBERS, &id, patch, doc.version);
    state.db.commit(batch).await?;

    tracing::info!(member_id = %id, total_points = member.total_points, "Member updated");
    Ok(Json(member))
}

/// Upper bound for a staff-entered category value.
const MAX_CATEGORY_POINTS: i64 = 10_000;

fn parse_points(value: &Value) -> Option<i64> {
    let n = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (0..=MAX_CATEGORY_POINTS).contains(&n).then_some(n)
}

pub async fn delete(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !state.db.delete(MEMBERS, &id).await? {
        return Err(AppError::not_found("Member not found"));
    }
    tracing::info!(member_id = %id, "Member deleted");
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    #[tokio::test]
    async fn duplicate_eid_is_rejected() {
        let db = SqliteStore::open_in_memory().unwrap();
        create_member(&db, "Ada", "Lovelace", " ab1234 ").await.unwrap();
        let err = create_member(&db, "Alan", "Turing", "ab1234").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(db.count(MEMBERS).await.unwrap(), 1);
    }

    #[test]
    fn points_values_must_be_whole_and_non_negative() {
        assert_eq!(parse_points(&json!(3)), Some(3));
        assert_eq!(parse_points(&json!("4")), Some(4));
        assert_eq!(parse_points(&json!(-1)), None);
        assert_eq!(parse_points(&json!(1.5)), None);
        assert_eq!(parse_points(&json!(MAX_CATEGORY_POINTS)), Some(MAX_CATEGORY_POINTS));
        assert_eq!(parse_points(&json!(i64::MAX)), None);
        assert_eq!(parse_points(&json!("9223372036854775807")), None);
    }
}

//! Point submissions: visitors self-report participation, staff approve or
//! archive, and approved submissions are credited to the member's totals.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{EventType, Member, PointSubmission, SubmissionState};
use crate::db::{
    decode_all, to_data, to_patch, Direction, Document, DocumentStore, Op, Query, StoreError, WriteBatch,
    MEMBERS, POINT_SUBMISSIONS,
};
use crate::error::{AppError, AppResult};

/// Advisory cap on submissions per EID per UTC day; surfaced to the client only.
pub const DAILY_SUBMISSION_LIMIT: usize = 5;
pub const AGGREGATE_REQUIREMENT: i64 = 15;
const MAX_APPROVE_ATTEMPTS: u32 = 5;

pub fn point_value(_event_type: EventType) -> i64 {
    1
}

pub fn required_points(event_type: EventType) -> i64 {
    match event_type {
        EventType::Meeting => 2,
        EventType::Volunteer => 4,
        EventType::Tabling => 2,
        EventType::Social => 3,
        EventType::Fundraising => 3,
        EventType::Bonus => 1,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubmission {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub eid: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLookup {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub eid: String,
}

fn require<'a>(value: &'a str, field: &str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{} is required", field)));
    }
    Ok(trimmed)
}

/// Exact match on the trimmed (first name, last name, EID) triple.
pub async fn find_member(
    db: &dyn DocumentStore,
    first_name: &str,
    last_name: &str,
    eid: &str,
) -> AppResult<Option<Document>> {
    let query = Query::new()
        .where_eq("firstName", first_name.trim())
        .where_eq("lastName", last_name.trim())
        .where_eq("eid", eid.trim())
        .limit(1);
    Ok(db.query(MEMBERS, &query).await?.into_iter().next())
}

pub async fn submit(db: &dyn DocumentStore, input: &NewSubmission, now: DateTime<Utc>) -> AppResult<String> {
    let first_name = require(&input.first_name, "firstName")?;
    let last_name = require(&input.last_name, "lastName")?;
    let eid = require(&input.eid, "eid")?;
    let event_type: EventType = require(&input.event_type, "eventType")?
        .parse()
        .map_err(AppError::Validation)?;
    let description = require(&input.description, "description")?;

    let member = find_member(db, first_name, last_name, eid)
        .await?
        .ok_or_else(|| AppError::not_found("No member found with that name and EID"))?;

    let submission = PointSubmission {
        id: String::new(),
        member_id: member.id.clone(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        eid: eid.to_string(),
        event_type,
        description: description.to_string(),
        points: point_value(event_type),
        state: SubmissionState::Pending,
        created_at: now,
    };
    let id = db.add(POINT_SUBMISSIONS, to_data(&submission)?).await?;

    tracing::info!(submission_id = %id, member_id = %member.id, event_type = %event_type, "Point submission received");
    Ok(id)
}

pub async fn daily_count(db: &dyn DocumentStore, eid: &str, now: DateTime<Utc>) -> AppResult<usize> {
    let start_of_day = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or(now);
    let query = Query::new()
        .where_eq("eid", eid.trim())
        .where_op("createdAt", Op::Gte, to_data(&start_of_day)?);
    Ok(db.query(POINT_SUBMISSIONS, &query).await?.len())
}

pub async fn list(db: &dyn DocumentStore, status: Option<&str>) -> AppResult<Vec<PointSubmission>> {
    let mut query = Query::new().order_by("createdAt", Direction::Desc);
    if let Some(status) = status.filter(|s| !s.is_empty() && *s != "all") {
        query = query.where_eq("status", status);
    }
    let docs = db.query(POINT_SUBMISSIONS, &query).await?;
    Ok(decode_all(&docs)?)
}

async fn load_submission(db: &dyn DocumentStore, id: &str) -> AppResult<(Document, PointSubmission)> {
    let doc = db
        .get(POINT_SUBMISSIONS, id)
        .await?
        .ok_or_else(|| AppError::not_found("Submission not found"))?;
    let submission = doc.decode()?;
    Ok((doc, submission))
}

/// Credits a pending submission to its member. The member and submission
/// writes commit together, conditioned on the versions that were read, and
/// the whole read-modify-write is retried when another writer got there first.
pub async fn approve(db: &dyn DocumentStore, id: &str, approver: Option<&str>) -> AppResult<Member> {
    for attempt in 1..=MAX_APPROVE_ATTEMPTS {
        if let Some(member) = try_approve(db, id, approver).await? {
            return Ok(member);
        }
        tracing::warn!(submission_id = %id, attempt, "Approval raced another write, retrying");
        tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
    }
    Err(AppError::conflict("Submission is being updated concurrently, try again"))
}

/// `Ok(None)` when a versioned write lost the race.
async fn try_approve(db: &dyn DocumentStore, id: &str, approver: Option<&str>) -> AppResult<Option<Member>> {
    let (sub_doc, submission) = load_submission(db, id).await?;
    if submission.state != SubmissionState::Pending {
        return Err(AppError::conflict(format!(
            "Submission is already {}",
            submission.state.name()
        )));
    }

    let member_doc = db
        .get(MEMBERS, &submission.member_id)
        .await?
        .ok_or_else(|| AppError::not_found("Member not found"))?;
    let mut member: Member = member_doc.decode()?;

    let now = Utc::now();
    member.add_points(submission.event_type, submission.points, now)?;

    let mut member_patch = serde_json::Map::new();
    member_patch.insert(
        submission.event_type.points_field().to_string(),
        member.points.get(submission.event_type).into(),
    );
    member_patch.insert("totalPoints".to_string(), member.total_points.into());
    member_patch.insert("lastUpdated".to_string(), to_data(&now)?);

    let state = SubmissionState::Approved {
        approved_at: now,
        approved_by: approver.map(str::to_string),
    };

    let mut batch = WriteBatch::new();
    batch.update_if_version(MEMBERS, &member_doc.id, member_patch, member_doc.version);
    batch.update_if_version(POINT_SUBMISSIONS, &sub_doc.id, to_patch(&state)?, sub_doc.version);
    match db.commit(batch).await {
        Ok(()) => {}
        Err(StoreError::Conflict(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        submission_id = %id,
        member_id = %member_doc.id,
        total_points = member.total_points,
        "Point submission approved"
    );
    Ok(Some(member))
}

/// Moves a submission to `archived` from any state. Credited points stay banked.
pub async fn archive(db: &dyn DocumentStore, id: &str) -> AppResult<()> {
    let (doc, submission) = load_submission(db, id).await?;
    if matches!(submission.state, SubmissionState::Archived { .. }) {
        return Ok(());
    }

    let state = SubmissionState::Archived { archived_at: Utc::now() };
    let mut batch = WriteBatch::new();
    batch.update_if_version(POINT_SUBMISSIONS, id, to_patch(&state)?, doc.version);
    db.commit(batch).await?;

    tracing::info!(submission_id = %id, "Point submission archived");
    Ok(())
}

/// Removes the record in any state. Points already credited stay with the member.
pub async fn delete(db: &dyn DocumentStore, id: &str) -> AppResult<()> {
    if !db.delete(POINT_SUBMISSIONS, id).await? {
        return Err(AppError::not_found("Submission not found"));
    }
    tracing::info!(submission_id = %id, "Point submission deleted");
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Progress {
    #[serde(rename = "Complete")]
    Complete,
    #[serde(rename = "In Progress")]
    InProgress,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryProgress {
    pub category: EventType,
    pub label: &'static str,
    pub earned: i64,
    pub required: i64,
    pub status: Progress,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsReport {
    pub categories: Vec<CategoryProgress>,
    pub total_points: i64,
    pub total_required: i64,
    pub complete: bool,
    pub status: &'static str,
}

pub fn requirements(member: &Member) -> RequirementsReport {
    let categories: Vec<CategoryProgress> = EventType::ALL
        .into_iter()
        .map(|t| {
            let earned = member.points.get(t);
            let required = required_points(t);
            CategoryProgress {
                category: t,
                label: t.label(),
                earned,
                required,
                status: if earned >= required {
                    Progress::Complete
                } else {
                    Progress::InProgress
                },
            }
        })
        .collect();

    let total = member.total_points;
    let complete = total >= AGGREGATE_REQUIREMENT
        && categories.iter().all(|c| c.status == Progress::Complete);

    RequirementsReport {
        categories,
        total_points: total,
        total_required: AGGREGATE_REQUIREMENT,
        complete,
        status: if complete {
            "Requirements Complete"
        } else {
            "Requirements In Progress"
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use std::sync::Arc;

    async fn seed_member(db: &dyn DocumentStore, eid: &str, meeting: i64) -> String {
        let now = Utc::now();
        let mut m = Member::new("Ada", "Lovelace", eid, now);
        m.set_points(EventType::Meeting, meeting, now).unwrap();
        db.add(MEMBERS, to_data(&m).unwrap()).await.unwrap()
    }

    fn submission(eid: &str, event_type: &str) -> NewSubmission {
        NewSubmission {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            eid: eid.into(),
            event_type: event_type.into(),
            description: "Helped out".into(),
        }
    }

    async fn member(db: &dyn DocumentStore, id: &str) -> Document {
        db.get(MEMBERS, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn approving_a_meeting_increments_member() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "ab1234", 1).await;

        let id = submit(&db, &submission("ab1234", "meeting"), Utc::now()).await.unwrap();
        let updated = approve(&db, &id, Some("staff-1")).await.unwrap();
        assert_eq!(updated.points.meeting_points, 2);
        assert_eq!(updated.total_points, 2);

        let stored: Member = member(&db, &member_id).await.decode().unwrap();
        assert_eq!(stored.points.meeting_points, 2);
        assert_eq!(stored.total_points, 2);

        let sub: PointSubmission = db.get(POINT_SUBMISSIONS, &id).await.unwrap().unwrap().decode().unwrap();
        assert!(matches!(sub.state, SubmissionState::Approved { ref approved_by, .. } if approved_by.as_deref() == Some("staff-1")));
    }

    #[tokio::test]
    async fn sequential_approvals_keep_total_in_sync() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "cd5678", 0).await;

        for event_type in ["meeting", "Volunteer", "tabling", "Social", "fundraising", "Bonus Points", "meeting"] {
            let id = submit(&db, &submission("cd5678", event_type), Utc::now()).await.unwrap();
            approve(&db, &id, None).await.unwrap();

            let m: Member = member(&db, &member_id).await.decode().unwrap();
            assert_eq!(Some(m.total_points), m.points.total());
        }
        let m: Member = member(&db, &member_id).await.decode().unwrap();
        assert_eq!(m.total_points, 7);
        assert_eq!(m.points.meeting_points, 2);
    }

    #[tokio::test]
    async fn unknown_member_creates_nothing() {
        let db = SqliteStore::open_in_memory().unwrap();
        seed_member(&db, "ab1234", 0).await;

        let err = submit(&db, &submission("zz0000", "meeting"), Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(db.count(POINT_SUBMISSIONS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blank_or_unknown_fields_are_rejected() {
        let db = SqliteStore::open_in_memory().unwrap();
        seed_member(&db, "ab1234", 0).await;

        let mut input = submission("ab1234", "meeting");
        input.description = "   ".into();
        assert!(matches!(submit(&db, &input, Utc::now()).await, Err(AppError::Validation(_))));

        let input = submission("ab1234", "karaoke");
        assert!(matches!(submit(&db, &input, Utc::now()).await, Err(AppError::Validation(_))));
        assert_eq!(db.count(POINT_SUBMISSIONS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn archive_never_touches_members() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "ab1234", 1).await;
        let before = member(&db, &member_id).await;

        let id = submit(&db, &submission("ab1234", "social"), Utc::now()).await.unwrap();
        archive(&db, &id).await.unwrap();

        assert_eq!(member(&db, &member_id).await, before);
        let sub: PointSubmission = db.get(POINT_SUBMISSIONS, &id).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(sub.state.name(), "archived");

        assert!(matches!(approve(&db, &id, None).await, Err(AppError::Conflict(_))));
        archive(&db, &id).await.unwrap();
        let again: PointSubmission = db.get(POINT_SUBMISSIONS, &id).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(again.state, sub.state);
    }

    #[tokio::test]
    async fn archiving_an_approved_submission_keeps_points() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "ab1234", 0).await;
        let id = submit(&db, &submission("ab1234", "tabling"), Utc::now()).await.unwrap();
        approve(&db, &id, Some("staff-1")).await.unwrap();

        archive(&db, &id).await.unwrap();

        let m: Member = member(&db, &member_id).await.decode().unwrap();
        assert_eq!(m.points.tabling_points, 1);
        assert_eq!(m.total_points, 1);
    }

    #[tokio::test]
    async fn approve_mutates_only_the_owning_member() {
        let db = SqliteStore::open_in_memory().unwrap();
        let owner = seed_member(&db, "ab1234", 0).await;
        let bystander = seed_member(&db, "ef9012", 0).await;
        let bystander_before = member(&db, &bystander).await;
        let owner_before = member(&db, &owner).await;

        let id = submit(&db, &submission("ab1234", "volunteer"), Utc::now()).await.unwrap();
        approve(&db, &id, None).await.unwrap();

        assert_eq!(member(&db, &bystander).await, bystander_before);
        assert_eq!(member(&db, &owner).await.version, owner_before.version + 1);
    }

    #[tokio::test]
    async fn second_approval_is_rejected() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "ab1234", 0).await;

        let id = submit(&db, &submission("ab1234", "meeting"), Utc::now()).await.unwrap();
        approve(&db, &id, None).await.unwrap();
        let err = approve(&db, &id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let m: Member = member(&db, &member_id).await.decode().unwrap();
        assert_eq!(m.points.meeting_points, 1);
    }

    #[tokio::test]
    async fn concurrent_approvals_all_land() {
        let db: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let member_id = seed_member(db.as_ref(), "ab1234", 0).await;

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(submit(db.as_ref(), &submission("ab1234", "tabling"), Utc::now()).await.unwrap());
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let db = db.clone();
                tokio::spawn(async move { approve(db.as_ref(), &id, None).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let m: Member = member(db.as_ref(), &member_id).await.decode().unwrap();
        assert_eq!(m.points.tabling_points, 4);
        assert_eq!(m.total_points, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_approvals_on_a_file_store_all_land() {
        let path = std::env::temp_dir().join(format!("outreach-approve-{}.db", uuid::Uuid::new_v4()));
        let store = SqliteStore::open(&path).unwrap();
        store.create_schema().await.unwrap();
        let db: Arc<dyn DocumentStore> = Arc::new(store);
        let member_id = seed_member(db.as_ref(), "ab1234", 0).await;

        let mut ids = Vec::new();
        for _ in 0..MAX_APPROVE_ATTEMPTS {
            ids.push(submit(db.as_ref(), &submission("ab1234", "tabling"), Utc::now()).await.unwrap());
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let db = db.clone();
                tokio::spawn(async move { approve(db.as_ref(), &id, None).await })
            })
            .collect();
        let mut errors = Vec::new();
        for h in handles {
            if let Err(e) = h.await.unwrap() {
                errors.push(e.to_string());
            }
        }

        let m: Member = member(db.as_ref(), &member_id).await.decode().unwrap();
        drop(db);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }

        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(m.points.tabling_points, i64::from(MAX_APPROVE_ATTEMPTS));
        assert_eq!(m.total_points, i64::from(MAX_APPROVE_ATTEMPTS));
    }

    #[tokio::test]
    async fn approve_fails_when_member_is_gone() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "ab1234", 0).await;
        let id = submit(&db, &submission("ab1234", "meeting"), Utc::now()).await.unwrap();
        assert!(db.delete(MEMBERS, &member_id).await.unwrap());

        let err = approve(&db, &id, Some("staff-1")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let sub: PointSubmission = db.get(POINT_SUBMISSIONS, &id).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(sub.state, SubmissionState::Pending);
    }

    #[tokio::test]
    async fn archive_of_missing_submission_is_not_found() {
        let db = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(archive(&db, "nope").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn approval_that_would_overflow_is_rejected() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "ab1234", i64::MAX).await;
        let before = member(&db, &member_id).await;
        let id = submit(&db, &submission("ab1234", "meeting"), Utc::now()).await.unwrap();

        let err = approve(&db, &id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(member(&db, &member_id).await, before);
        let sub: PointSubmission = db.get(POINT_SUBMISSIONS, &id).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(sub.state, SubmissionState::Pending);
    }

    #[tokio::test]
    async fn delete_keeps_banked_points() {
        let db = SqliteStore::open_in_memory().unwrap();
        let member_id = seed_member(&db, "ab1234", 0).await;
        let id = submit(&db, &submission("ab1234", "meeting"), Utc::now()).await.unwrap();
        approve(&db, &id, None).await.unwrap();

        delete(&db, &id).await.unwrap();
        assert!(matches!(delete(&db, &id).await, Err(AppError::NotFound(_))));

        let m: Member = member(&db, &member_id).await.decode().unwrap();
        assert_eq!(m.total_points, 1);
    }

    #[tokio::test]
    async fn daily_count_starts_at_utc_midnight() {
        let db = SqliteStore::open_in_memory().unwrap();
        seed_member(&db, "ab1234", 0).await;
        let now: DateTime<Utc> = "2026-05-04T15:00:00Z".parse().unwrap();
        let yesterday: DateTime<Utc> = "2026-05-03T23:59:59Z".parse().unwrap();

        submit(&db, &submission("ab1234", "meeting"), yesterday).await.unwrap();
        submit(&db, &submission("ab1234", "meeting"), now).await.unwrap();
        submit(&db, &submission("ab1234", "social"), now).await.unwrap();

        assert_eq!(daily_count(&db, "ab1234", now).await.unwrap(), 2);
        assert_eq!(daily_count(&db, "other", now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_filters_by_status_newest_first() {
        let db = SqliteStore::open_in_memory().unwrap();
        seed_member(&db, "ab1234", 0).await;
        let older = submit(&db, &submission("ab1234", "meeting"), "2026-01-01T00:00:00Z".parse().unwrap())
            .await
            .unwrap();
        let newer = submit(&db, &submission("ab1234", "social"), "2026-01-02T00:00:00Z".parse().unwrap())
            .await
            .unwrap();
        archive(&db, &older).await.unwrap();

        let all: Vec<_> = list(&db, None).await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(all, vec![newer.clone(), older.clone()]);
        let pending: Vec<_> = list(&db, Some("pending")).await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(pending, vec![newer]);
    }

    #[test]
    fn meeting_complete_but_aggregate_in_progress() {
        let now = Utc::now();
        let mut m = Member::new("Ada", "Lovelace", "ab1234", now);
        m.set_points(EventType::Meeting, 2, now).unwrap();
        m.set_points(EventType::Volunteer, 1, now).unwrap();

        let report = requirements(&m);
        let meeting = &report.categories[0];
        assert_eq!(meeting.label, "Meeting");
        assert_eq!(meeting.status, Progress::Complete);
        assert!(report.categories[1..].iter().all(|c| c.status == Progress::InProgress));
        assert_eq!(report.status, "Requirements In Progress");
    }

    #[test]
    fn all_categories_and_total_complete() {
        let now = Utc::now();
        let mut m = Member::new("Ada", "Lovelace", "ab1234", now);
        for t in EventType::ALL {
            m.set_points(t, required_points(t), now).unwrap();
        }
        assert_eq!(requirements(&m).status, "Requirements Complete");

        // 15 points but nothing in bonus.
        m.set_points(EventType::Bonus, 0, now).unwrap();
        m.set_points(EventType::Volunteer, 5, now).unwrap();
        let report = requirements(&m);
        assert_eq!(report.total_points, 15);
        assert!(!report.complete);
    }
}

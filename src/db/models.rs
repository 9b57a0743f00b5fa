use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Meeting,
    Volunteer,
    Tabling,
    Social,
    Fundraising,
    #[serde(alias = "bonus points")]
    Bonus,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Meeting,
        EventType::Volunteer,
        EventType::Tabling,
        EventType::Social,
        EventType::Fundraising,
        EventType::Bonus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Meeting => "meeting",
            EventType::Volunteer => "volunteer",
            EventType::Tabling => "tabling",
            EventType::Social => "social",
            EventType::Fundraising => "fundraising",
            EventType::Bonus => "bonus",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EventType::Meeting => "Meeting",
            EventType::Volunteer => "Volunteer",
            EventType::Tabling => "Tabling",
            EventType::Social => "Social",
            EventType::Fundraising => "Fundraising",
            EventType::Bonus => "Bonus",
        }
    }

    /// Name of the member field holding this category's points.
    pub fn points_field(self) -> &'static str {
        match self {
            EventType::Meeting => "meetingPoints",
            EventType::Volunteer => "volunteerPoints",
            EventType::Tabling => "tablingPoints",
            EventType::Social => "socialPoints",
            EventType::Fundraising => "fundraisingPoints",
            EventType::Bonus => "bonusPoints",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    /// Accepts stored names, display labels and the legacy "Bonus Points" label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let key = normalized.strip_suffix(" points").unwrap_or(&normalized);
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == key || t.points_field().eq_ignore_ascii_case(key))
            .ok_or_else(|| format!("Unknown event type: {}", s.trim()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPoints {
    #[serde(default)]
    pub meeting_points: i64,
    #[serde(default)]
    pub volunteer_points: i64,
    #[serde(default)]
    pub tabling_points: i64,
    #[serde(default)]
    pub social_points: i64,
    #[serde(default)]
    pub fundraising_points: i64,
    #[serde(default)]
    pub bonus_points: i64,
}

impl CategoryPoints {
    pub fn get(&self, category: EventType) -> i64 {
        match category {
            EventType::Meeting => self.meeting_points,
            EventType::Volunteer => self.volunteer_points,
            EventType::Tabling => self.tabling_points,
            EventType::Social => self.social_points,
            EventType::Fundraising => self.fundraising_points,
            EventType::Bonus => self.bonus_points,
        }
    }

    fn slot(&mut self, category: EventType) -> &mut i64 {
        match category {
            EventType::Meeting => &mut self.meeting_points,
            EventType::Volunteer => &mut self.volunteer_points,
            EventType::Tabling => &mut self.tabling_points,
            EventType::Social => &mut self.social_points,
            EventType::Fundraising => &mut self.fundraising_points,
            EventType::Bonus => &mut self.bonus_points,
        }
    }

    /// `None` when the sum does not fit in an `i64`.
    pub fn total(&self) -> Option<i64> {
        EventType::ALL
            .into_iter()
            .try_fold(0i64, |acc, t| acc.checked_add(self.get(t)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Point value is out of range")]
pub struct PointsOverflow;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub eid: String,
    #[serde(flatten)]
    pub points: CategoryPoints,
    /// Denormalized sum of `points`; only changed through the methods below.
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub status: MemberStatus,
    pub last_updated: DateTime<Utc>,
}

impl Member {
    pub fn new(first_name: &str, last_name: &str, eid: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            eid: eid.trim().to_string(),
            points: CategoryPoints::default(),
            total_points: 0,
            status: MemberStatus::Active,
            last_updated: now,
        }
    }

    pub fn add_points(&mut self, category: EventType, points: i64, now: DateTime<Utc>) -> Result<(), PointsOverflow> {
        let value = self.points.get(category).checked_add(points).ok_or(PointsOverflow)?;
        self.set_points(category, value, now)
    }

    /// Leaves the member untouched when the new total would overflow.
    pub fn set_points(&mut self, category: EventType, value: i64, now: DateTime<Utc>) -> Result<(), PointsOverflow> {
        let mut points = self.points;
        *points.slot(category) = value;
        self.total_points = points.total().ok_or(PointsOverflow)?;
        self.points = points;
        self.last_updated = now;
        Ok(())
    }
}

/// Lifecycle of a point submission; each state carries its own payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubmissionState {
    Pending,
    #[serde(rename_all = "camelCase")]
    Approved {
        approved_at: DateTime<Utc>,
        #[serde(default)]
        approved_by: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Archived { archived_at: DateTime<Utc> },
}

impl SubmissionState {
    pub fn name(&self) -> &'static str {
        match self {
            SubmissionState::Pending => "pending",
            SubmissionState::Approved { .. } => "approved",
            SubmissionState::Archived { .. } => "archived",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PointSubmission {
    #[serde(default)]
    pub id: String,
    pub member_id: String,
    pub first_name: String,
    pub last_name: String,
    pub eid: String,
    pub event_type: EventType,
    pub description: String,
    pub points: i64,
    #[serde(flatten)]
    pub state: SubmissionState,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Archived,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Archived => "archived",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStorageType {
    Chunked,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeChunkMetadata {
    pub total_chunks: usize,
    /// Length of the base64 text, not of the decoded file.
    pub total_size: usize,
    pub created_at: DateTime<Utc>,
    pub file_name: String,
    pub file_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeChunk {
    pub data: String,
    pub index: usize,
    pub created_at: DateTime<Utc>,
    pub application_id: String,
    #[serde(default)]
    pub is_chunk: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberApplication {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub eid: String,
    pub major: String,
    pub grade: String,
    pub gpa: f64,
    pub why_join: String,
    #[serde(default)]
    pub experience: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub resume_storage_type: Option<ResumeStorageType>,
    #[serde(default)]
    pub resume_chunks: Vec<String>,
    #[serde(default)]
    pub resume_metadata: Option<ResumeChunkMetadata>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSettings {
    pub membership_applications_open: bool,
    pub partner_requests_open: bool,
    pub email_signup_enabled: bool,
    pub donations_enabled: bool,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            membership_applications_open: true,
            partner_requests_open: true,
            email_signup_enabled: true,
            donations_enabled: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRequest {
    #[serde(default)]
    pub id: String,
    pub school_name: String,
    pub district: String,
    pub address: String,
    pub contact_name: String,
    pub position: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    pub grade_level: String,
    pub student_count: u32,
    pub schedule: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    #[serde(default)]
    pub id: String,
    pub school_name: String,
    #[serde(default)]
    pub website: Option<String>,
    pub district: String,
    pub address: String,
    pub contact_name: String,
    pub email: String,
    pub grade_level: String,
    pub student_count: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub schedule: String,
    pub added_at: DateTime<Utc>,
}

impl Partner {
    pub fn from_request(request: &PartnerRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            school_name: request.school_name.clone(),
            website: request.website.clone(),
            district: request.district.clone(),
            address: request.address.clone(),
            contact_name: request.contact_name.clone(),
            email: request.email.clone(),
            grade_level: request.grade_level.clone(),
            student_count: request.student_count,
            notes: request.notes.clone().unwrap_or_default(),
            schedule: request.schedule.clone(),
            added_at: now,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Officer {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub position: String,
    pub bio: String,
    #[serde(default)]
    pub image: String,
    pub order: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub registration_link: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeroImage {
    #[serde(default)]
    pub id: String,
    pub url: String,
    pub order: u32,
    pub active: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailSignup {
    #[serde(default)]
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub eid: String,
    pub year_in_school: String,
    #[serde(default = "default_true")]
    pub subscribed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfficerApplication {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub eid: String,
    pub year_in_school: String,
    pub major: String,
    pub gpa: String,
    pub position: String,
    #[serde(default)]
    pub experience: String,
    pub why_join: String,
    #[serde(default)]
    pub ideas: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

/// Custom claims attached to a staff identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StaffClaims {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub admin: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_accepts_labels() {
        assert_eq!("Meeting".parse::<EventType>().unwrap(), EventType::Meeting);
        assert_eq!("Bonus Points".parse::<EventType>().unwrap(), EventType::Bonus);
        assert_eq!(" fundraising ".parse::<EventType>().unwrap(), EventType::Fundraising);
        assert!("potluck".parse::<EventType>().is_err());
    }

    #[test]
    fn member_total_tracks_categories() {
        let now = Utc::now();
        let mut m = Member::new("Ada", "Lovelace", "al123", now);
        m.add_points(EventType::Meeting, 1, now).unwrap();
        m.add_points(EventType::Social, 2, now).unwrap();
        m.set_points(EventType::Meeting, 5, now).unwrap();
        assert_eq!(m.total_points, 7);
        assert_eq!(Some(m.total_points), m.points.total());
    }

    #[test]
    fn overflowing_points_leave_member_unchanged() {
        let now = Utc::now();
        let mut m = Member::new("Ada", "Lovelace", "al123", now);
        m.set_points(EventType::Meeting, i64::MAX, now).unwrap();
        let before = m.clone();

        assert_eq!(m.add_points(EventType::Meeting, 1, now), Err(PointsOverflow));
        assert_eq!(m.set_points(EventType::Social, 1, now), Err(PointsOverflow));
        assert_eq!(m, before);
    }

    #[test]
    fn member_round_trips_flat_fields() {
        let value = json!({
            "id": "m1",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "eid": "ab1234",
            "meetingPoints": 1,
            "totalPoints": 1,
            "status": "active",
            "lastUpdated": "2026-01-01T00:00:00Z"
        });
        let m: Member = serde_json::from_value(value).unwrap();
        assert_eq!(m.points.meeting_points, 1);
        assert_eq!(m.points.bonus_points, 0);
        let out = serde_json::to_value(&m).unwrap();
        assert_eq!(out["meetingPoints"], 1);
        assert_eq!(out["volunteerPoints"], 0);
    }

    #[test]
    fn submission_state_is_tagged_by_status() {
        let s = PointSubmission {
            id: String::new(),
            member_id: "m1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            eid: "ab1234".into(),
            event_type: EventType::Tabling,
            description: "Tabled at the fair".into(),
            points: 1,
            state: SubmissionState::Archived {
                archived_at: "2026-02-01T00:00:00Z".parse().unwrap(),
            },
            created_at: "2026-01-31T00:00:00Z".parse().unwrap(),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["status"], "archived");
        assert_eq!(v["eventType"], "tabling");
        assert!(v.get("archivedAt").is_some());

        let back: PointSubmission = serde_json::from_value(v).unwrap();
        assert_eq!(back, s);
    }
}

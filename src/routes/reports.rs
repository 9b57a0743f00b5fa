use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::Response,
};

use crate::auth::AuthenticatedUser;
use crate::db::models::{EmailSignup, EventType, Member, MemberStatus};
use crate::db::{decode_all, Direction, Query, EMAIL_SIGNUPS, MEMBERS};
use crate::error::AppResult;
use crate::points;
use crate::AppState;

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        let escaped = s.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    } else {
        s.to_string()
    }
}

fn csv_response(body: String, filename: &'static str) -> Response {
    let mut resp = Response::new(body.into());
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static(filename));
    resp
}

fn members_csv(members: &[Member]) -> String {
    let mut w = String::new();
    w.push_str("first_name,last_name,eid,status");
    for t in EventType::ALL {
        w.push(',');
        w.push_str(t.as_str());
    }
    w.push_str(",total,requirements\n");

    for m in members {
        let status = match m.status {
            MemberStatus::Active => "active",
            MemberStatus::Inactive => "inactive",
        };
        let mut row = vec![
            csv_escape(&m.first_name),
            csv_escape(&m.last_name),
            csv_escape(&m.eid),
            status.to_string(),
        ];
        row.extend(EventType::ALL.iter().map(|t| m.points.get(*t).to_string()));
        row.push(m.total_points.to_string());
        row.push(points::requirements(m).status.to_string());
        w.push_str(&row.join(","));
        w.push('\n');
    }
    w
}

fn signups_csv(signups: &[EmailSignup]) -> String {
    let mut w = String::new();
    w.push_str("email,first_name,last_name,eid,year_in_school,subscribed,created_at\n");
    for s in signups {
        w.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            csv_escape(&s.email),
            csv_escape(&s.first_name),
            csv_escape(&s.last_name),
            csv_escape(&s.eid),
            csv_escape(&s.year_in_school),
            s.subscribed,
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
        ));
    }
    w
}

pub async fn export_members(State(state): State<AppState>, _user: AuthenticatedUser) -> AppResult<Response> {
    let docs = state
        .db
        .query(MEMBERS, &Query::new().order_by("lastName", Direction::Asc))
        .await?;
    let members: Vec<Member> = decode_all(&docs)?;
    Ok(csv_response(members_csv(&members), "attachment; filename=members.csv"))
}

pub async fn export_email_signups(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Response> {
    let docs = state
        .db
        .query(EMAIL_SIGNUPS, &Query::new().order_by("createdAt", Direction::Asc))
        .await?;
    let signups: Vec<EmailSignup> = decode_all(&docs)?;
    Ok(csv_response(signups_csv(&signups), "attachment; filename=email-signups.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn escapes_commas_and_quotes() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("Smith, Jr."), "\"Smith, Jr.\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn member_rows_list_every_category() {
        let now = Utc::now();
        let mut m = Member::new("Ada", "King, Countess", "ab1234", now);
        m.set_points(EventType::Volunteer, 3, now).unwrap();
        let csv = members_csv(&[m]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "first_name,last_name,eid,status,meeting,volunteer,tabling,social,fundraising,bonus,total,requirements"
        );
        assert_eq!(
            lines.next().unwrap(),
            "Ada,\"King, Countess\",ab1234,active,0,3,0,0,0,0,3,Requirements In Progress"
        );
    }
}

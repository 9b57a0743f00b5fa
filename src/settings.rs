use std::future::Future;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::db::models::ApplicationSettings;
use crate::db::{to_data, DocumentStore, WriteBatch, SETTINGS};
use crate::error::AppResult;
use crate::AppState;

pub const SETTINGS_DOC: &str = "application";

/// Settings loaded for the current request.
#[derive(Debug, Clone, Copy)]
pub struct Settings(pub ApplicationSettings);

impl FromRequestParts<AppState> for Settings {
    type Rejection = crate::error::AppError;

    fn from_request_parts(
        _parts: &mut Parts,
        state: &AppState,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let db = state.db.clone();
        async move { Ok(Settings(load(db.as_ref()).await?)) }
    }
}

/// Reads the settings document, falling back to defaults without writing.
pub async fn load(db: &dyn DocumentStore) -> AppResult<ApplicationSettings> {
    match db.get(SETTINGS, SETTINGS_DOC).await? {
        Some(doc) => Ok(doc.decode()?),
        None => {
            tracing::warn!("Settings document missing, serving defaults");
            Ok(ApplicationSettings::default())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub membership_applications_open: Option<bool>,
    pub partner_requests_open: Option<bool>,
    pub email_signup_enabled: Option<bool>,
    pub donations_enabled: Option<bool>,
}

pub async fn update(db: &dyn DocumentStore, patch: SettingsPatch) -> AppResult<ApplicationSettings> {
    let current = db.get(SETTINGS, SETTINGS_DOC).await?;
    let mut settings: ApplicationSettings = match &current {
        Some(doc) => doc.decode()?,
        None => ApplicationSettings::default(),
    };

    let mut changes = Map::new();
    let mut apply = |field: &str, value: Option<bool>, slot: &mut bool| {
        if let Some(v) = value {
            *slot = v;
            changes.insert(field.to_string(), Value::Bool(v));
        }
    };
    apply("membershipApplicationsOpen", patch.membership_applications_open, &mut settings.membership_applications_open);
    apply("partnerRequestsOpen", patch.partner_requests_open, &mut settings.partner_requests_open);
    apply("emailSignupEnabled", patch.email_signup_enabled, &mut settings.email_signup_enabled);
    apply("donationsEnabled", patch.donations_enabled, &mut settings.donations_enabled);

    let mut batch = WriteBatch::new();
    match current {
        Some(doc) => batch.update_if_version(SETTINGS, SETTINGS_DOC, changes, doc.version),
        None => batch.set(SETTINGS, SETTINGS_DOC, to_data(&settings)?),
    };
    db.commit(batch).await?;

    tracing::info!(?settings, "Settings updated");
    Ok(settings)
}

/// Creates the settings document with defaults; returns `false` if it already existed.
pub async fn seed(db: &dyn DocumentStore) -> AppResult<bool> {
    if db.get(SETTINGS, SETTINGS_DOC).await?.is_some() {
        return Ok(false);
    }
    db.set(SETTINGS, SETTINGS_DOC, to_data(&ApplicationSettings::default())?)
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    #[tokio::test]
    async fn reads_do_not_create_document() {
        let db = SqliteStore::open_in_memory().unwrap();
        let s = load(&db).await.unwrap();
        assert_eq!(s, ApplicationSettings::default());
        assert!(db.get(SETTINGS, SETTINGS_DOC).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn seed_creates_once() {
        let db = SqliteStore::open_in_memory().unwrap();
        assert!(seed(&db).await.unwrap());
        assert!(!seed(&db).await.unwrap());
        assert!(db.get(SETTINGS, SETTINGS_DOC).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn partial_update_keeps_other_flags() {
        let db = SqliteStore::open_in_memory().unwrap();
        seed(&db).await.unwrap();
        update(
            &db,
            SettingsPatch {
                partner_requests_open: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let s = load(&db).await.unwrap();
        assert!(!s.partner_requests_open);
        assert!(s.membership_applications_open);
        assert!(s.donations_enabled);
    }
}

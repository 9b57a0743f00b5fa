use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{json, Map};

use crate::auth::AuthenticatedUser;
use crate::db::models::Officer;
use crate::db::{decode_all, to_data, Direction, Query, WriteBatch, OFFICERS};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::routes::{filled, renumber_order};
use crate::storage::{ImageFolder, ImageUpload};
use crate::AppState;

pub async fn list(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(OFFICERS, &Query::new().order_by("order", Direction::Asc))
        .await?;
    let officers: Vec<Officer> = decode_all(&docs)?;
    Ok(Json(officers))
}

#[derive(Deserialize)]
pub struct OfficerRequest {
    name: Option<String>,
    position: Option<String>,
    bio: Option<String>,
    image: Option<ImageUpload>,
}

pub async fn create(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    AppJson(req): AppJson<OfficerRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(name), Some(position), Some(bio)) = (filled(&req.name), filled(&req.position), filled(&req.bio)) else {
        return Err(AppError::validation("Name, position, and bio are required fields"));
    };

    let image = match &req.image {
        Some(upload) => state.images.upload(ImageFolder::Officers, upload).await?,
        None => String::new(),
    };

    let mut officer = Officer {
        id: String::new(),
        name,
        position,
        bio,
        image,
        order: state.db.count(OFFICERS).await? as u32,
    };

    match state.db.add(OFFICERS, to_data(&officer)?).await {
        Ok(id) => officer.id = id,
        Err(e) => {
            state.images.delete_by_url(&officer.image).await;
            return Err(e.into());
        }
    }

    tracing::info!(officer_id = %officer.id, "Officer created");
    Ok((StatusCode::CREATED, Json(officer)))
}

pub async fn update(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<OfficerRequest>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(OFFICERS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Officer not found"))?;
    let mut officer: Officer = doc.decode()?;

    if let Some(name) = filled(&req.name) {
        officer.name = name;
    }
    if let Some(position) = filled(&req.position) {
        officer.position = position;
    }
    if let Some(bio) = filled(&req.bio) {
        officer.bio = bio;
    }

    let mut replaced = None;
    if let Some(upload) = &req.image {
        let url = state.images.upload(ImageFolder::Officers, upload).await?;
        replaced = Some(std::mem::replace(&mut officer.image, url));
    }

    let mut patch = Map::new();
    patch.insert("name".into(), officer.name.clone().into());
    patch.insert("position".into(), officer.position.clone().into());
    patch.insert("bio".into(), officer.bio.clone().into());
    patch.insert("image".into(), officer.image.clone().into());
    let mut batch = WriteBatch::new();
    batch.update_if_version(OFFICERS, &id, patch, doc.version);
    if let Err(e) = state.db.commit(batch).await {
        if replaced.is_some() {
            state.images.delete_by_url(&officer.image).await;
        }
        return Err(e.into());
    }

    if let Some(old) = replaced {
        state.images.delete_by_url(&old).await;
    }

    tracing::info!(officer_id = %id, "Officer updated");
    Ok(Json(officer))
}

pub async fn delete(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(OFFICERS, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Officer not found"))?;
    let officer: Officer = doc.decode()?;

    let remaining: Vec<_> = state
        .db
        .query(OFFICERS, &Query::new().order_by("order", Direction::Asc))
        .await?
        .into_iter()
        .filter(|d| d.id != id)
        .collect();

    let mut batch = WriteBatch::new();
    batch.delete_if_version(OFFICERS, &id, doc.version);
    renumber_order(&mut batch, OFFICERS, &remaining);
    state.db.commit(batch).await?;
    state.images.delete_by_url(&officer.image).await;

    tracing::info!(officer_id = %id, remaining = remaining.len(), "Officer deleted");
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::AuthConfig;
    use crate::db::{Document, DocumentStore, SqliteStore, StoreError, StoreResult};
    use crate::resume::RetryPolicy;
    use crate::storage::ImageStore;

    /// Passes reads through and refuses commits while `down` is set.
    struct ReadOnlyStore {
        inner: SqliteStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for ReadOnlyStore {
        async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
            self.inner.get(collection, id).await
        }

        async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
            self.inner.query(collection, query).await
        }

        async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("write quota exhausted".into()));
            }
            self.inner.commit(batch).await
        }
    }

    fn staff() -> AuthenticatedUser {
        AuthenticatedUser {
            id: "staff-1".into(),
            email: "staff@example.org".into(),
            name: "Staff".into(),
            admin_claim: false,
        }
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_officer_image() {
        let store = Arc::new(ReadOnlyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            down: AtomicBool::new(false),
        });
        let state = AppState {
            db: store.clone(),
            images: ImageStore::in_memory("https://cdn.test").unwrap(),
            auth: Arc::new(AuthConfig {
                jwt_secret: "secret".into(),
                issuer: None,
                audience: None,
                dev_login: None,
            }),
            production: false,
            resume_retry: RetryPolicy::default(),
        };

        let upload = ImageUpload {
            name: "chair.png".into(),
            data: "aGVsbG8=".into(),
        };
        let url = state.images.upload(ImageFolder::Officers, &upload).await.unwrap();
        let key = state.images.key_for(&url).unwrap();
        let officer = Officer {
            id: String::new(),
            name: "Chair".into(),
            position: "President".into(),
            bio: "bio".into(),
            image: url,
            order: 0,
        };
        let id = store.add(OFFICERS, to_data(&officer).unwrap()).await.unwrap();

        store.down.store(true, Ordering::SeqCst);
        let result = delete(State(state.clone()), staff(), Path(id.clone())).await;
        assert!(matches!(result, Err(AppError::Storage(_))));
        assert!(store.get(OFFICERS, &id).await.unwrap().is_some());
        assert!(state.images.operator().stat(&key).await.is_ok());

        store.down.store(false, Ordering::SeqCst);
        assert!(delete(State(state.clone()), staff(), Path(id.clone())).await.is_ok());
        assert!(store.get(OFFICERS, &id).await.unwrap().is_none());
        assert!(state.images.operator().stat(&key).await.is_err());
    }
}

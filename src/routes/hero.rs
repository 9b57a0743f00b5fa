use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{json, Map};

use crate::auth::AuthenticatedUser;
use crate::db::models::HeroImage;
use crate::db::{decode_all, to_data, Direction, Query, WriteBatch, HERO_IMAGES};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::routes::renumber_order;
use crate::storage::{ImageFolder, ImageUpload};
use crate::AppState;

pub async fn list(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let docs = state
        .db
        .query(HERO_IMAGES, &Query::new().order_by("order", Direction::Asc))
        .await?;
    let images: Vec<HeroImage> = decode_all(&docs)?;
    Ok(Json(images))
}

#[derive(Deserialize)]
pub struct CreateHeroRequest {
    image: Option<ImageUpload>,
}

pub async fn create(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    AppJson(req): AppJson<CreateHeroRequest>,
) -> AppResult<impl IntoResponse> {
    let upload = req.image.ok_or_else(|| AppError::validation("image is required"))?;
    let url = state.images.upload(ImageFolder::Hero, &upload).await?;

    let mut hero = HeroImage {
        id: String::new(),
        url,
        order: state.db.count(HERO_IMAGES).await? as u32,
        active: true,
    };
    match state.db.add(HERO_IMAGES, to_data(&hero)?).await {
        Ok(id) => hero.id = id,
        Err(e) => {
            state.images.delete_by_url(&hero.url).await;
            return Err(e.into());
        }
    }

    tracing::info!(hero_id = %hero.id, "Hero image added");
    Ok((StatusCode::CREATED, Json(hero)))
}

#[derive(Deserialize)]
pub struct UpdateHeroRequest {
    active: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateHeroRequest>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(HERO_IMAGES, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Hero image not found"))?;
    let mut hero: HeroImage = doc.decode()?;
    let active = req.active.ok_or_else(|| AppError::validation("active is required"))?;
    hero.active = active;

    let mut patch = Map::new();
    patch.insert("active".into(), active.into());
    let mut batch = WriteBatch::new();
    batch.update_if_version(HERO_IMAGES, &id, patch, doc.version);
    state.db.commit(batch).await?;

    Ok(Json(hero))
}

pub async fn delete(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let doc = state
        .db
        .get(HERO_IMAGES, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Hero image not found"))?;
    let hero: HeroImage = doc.decode()?;

    let remaining: Vec<_> = state
        .db
        .query(HERO_IMAGES, &Query::new().order_by("order", Direction::Asc))
        .await?
        .into_iter()
        .filter(|d| d.id != id)
        .collect();

    let mut batch = WriteBatch::new();
    batch.delete_if_version(HERO_IMAGES, &id, doc.version);
    renumber_order(&mut batch, HERO_IMAGES, &remaining);
    state.db.commit(batch).await?;
    state.images.delete_by_url(&hero.url).await;

    tracing::info!(hero_id = %id, "Hero image deleted");
    Ok(Json(json!({ "success": true })))
}

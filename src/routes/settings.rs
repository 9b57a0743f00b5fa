use axum::{
    extract::{Json, State},
    response::IntoResponse,
};

use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::settings::{self, Settings, SettingsPatch};
use crate::AppState;

pub async fn get_settings(Settings(settings): Settings) -> impl IntoResponse {
    Json(settings)
}

pub async fn update_settings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(patch): AppJson<SettingsPatch>,
) -> AppResult<impl IntoResponse> {
    let updated = settings::update(state.db.as_ref(), patch).await?;
    tracing::info!(uid = %user.id, "Settings changed");
    Ok(Json(updated))
}

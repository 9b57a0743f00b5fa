use std::future::Future;

use axum::{
    extract::{FromRequestParts, Json, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AuthConfig;
use crate::db::models::StaffClaims;
use crate::db::{to_data, DocumentStore, STAFF_CLAIMS};
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::AppState;

const AUTH_COOKIE_NAME: &str = "auth_token";

#[derive(Deserialize)]
pub struct DevLoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct StaffProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    email: String,
    name: String,
    #[serde(default)]
    admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<String>,
}

/// A staff member whose bearer token verified.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    pub name: String,
    /// Custom claim carried by the token at issue time.
    pub admin_claim: bool,
}

/// A verified staff member holding the `admin` claim.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let result = authenticate(&parts.headers, &state.auth);
        async move { result }
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let user = authenticate(&parts.headers, &state.auth);
        let db = state.db.clone();
        async move {
            let user = user?;
            if is_admin(db.as_ref(), &user).await? {
                Ok(AdminUser(user))
            } else {
                tracing::warn!(uid = %user.id, "Admin route refused");
                Err(AppError::Forbidden("Admin access required".to_string()))
            }
        }
    }
}

fn authenticate(headers: &HeaderMap, auth: &AuthConfig) -> AppResult<AuthenticatedUser> {
    let token = extract_token_from_headers(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing auth token".to_string()))?;
    validate_token(auth, &token)
}

/// The stored claims document wins over the token so that revocations apply
/// before the token expires.
pub async fn is_admin(db: &dyn DocumentStore, user: &AuthenticatedUser) -> AppResult<bool> {
    match db.get(STAFF_CLAIMS, &user.id).await? {
        Some(doc) => Ok(doc.decode::<StaffClaims>()?.admin),
        None => Ok(user.admin_claim),
    }
}

pub fn validate_token(auth: &AuthConfig, token: &str) -> AppResult<AuthenticatedUser> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    if let Some(issuer) = &auth.issuer {
        validation.set_issuer(&[issuer.as_str()]);
    }
    if let Some(audience) = &auth.audience {
        validation.set_audience(&[audience.as_str()]);
    }

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_ref()),
        &validation,
    )
    .map_err(|e| {
        tracing::warn!("Token error: {}", e);
        AppError::Unauthorized("Invalid token".to_string())
    })?;

    Ok(AuthenticatedUser {
        id: token_data.claims.sub,
        email: token_data.claims.email,
        name: token_data.claims.name,
        admin_claim: token_data.claims.admin,
    })
}

pub fn create_token(auth: &AuthConfig, profile: &StaffProfile) -> anyhow::Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::days(1))
        .ok_or_else(|| anyhow::anyhow!("token expiry out of range"))?
        .timestamp();

    let claims = Claims {
        sub: profile.id.clone(),
        email: profile.email.clone(),
        name: profile.name.clone(),
        admin: profile.admin,
        exp: expiration as usize,
        iss: auth.issuer.clone(),
        aud: auth.audience.clone(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_ref()),
    )?;
    Ok(token)
}

pub fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|h| h.to_str().ok()) {
        for cookie in cookie_header.split(';') {
            if let Some((k, v)) = cookie.trim().split_once('=') {
                if k == AUTH_COOKIE_NAME {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

pub async fn dev_login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<DevLoginRequest>,
) -> AppResult<impl IntoResponse> {
    let Some(dev) = &state.auth.dev_login else {
        return Err(AppError::Forbidden("Dev login disabled".to_string()));
    };

    if payload.username != dev.username || payload.password != dev.password {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let user = StaffProfile {
        id: "dev-1".to_string(),
        email: "dev@local".to_string(),
        name: "Developer".to_string(),
        admin: true,
    };
    let token = create_token(&state.auth, &user).map_err(|e| AppError::Internal(e.to_string()))?;

    let cookie = build_auth_cookie(&token, state.production);
    let cookie = HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::info!(uid = %user.id, "Dev login");
    Ok(([(header::SET_COOKIE, cookie)], Json(json!({ "token": token, "user": user }))))
}

pub async fn logout(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let cookie = HeaderValue::from_str(&clear_auth_cookie(state.production))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(([(header::SET_COOKIE, cookie)], Json(json!({ "success": true }))))
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<StaffProfile>> {
    let admin = is_admin(state.db.as_ref(), &user).await?;
    Ok(Json(StaffProfile {
        id: user.id,
        email: user.email,
        name: user.name,
        admin,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAdminRequest {
    target_uid: String,
    is_admin: bool,
}

pub async fn set_admin(
    State(state): State<AppState>,
    AdminUser(caller): AdminUser,
    AppJson(req): AppJson<SetAdminRequest>,
) -> AppResult<impl IntoResponse> {
    let target = req.target_uid.trim();
    if target.is_empty() {
        return Err(AppError::validation("targetUid is required"));
    }

    let mut claims = match state.db.get(STAFF_CLAIMS, target).await? {
        Some(doc) => doc.decode::<StaffClaims>()?,
        None => StaffClaims::default(),
    };
    claims.admin = req.is_admin;
    claims.updated_at = Some(Utc::now());
    state.db.set(STAFF_CLAIMS, target, to_data(&claims)?).await?;

    tracing::info!(caller = %caller.id, target = %target, admin = req.is_admin, "Admin claim updated");
    Ok(Json(json!({ "success": true })))
}

fn build_auth_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age=86400",
        AUTH_COOKIE_NAME, token
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn clear_auth_cookie(secure: bool) -> String {
    let mut cookie = format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", AUTH_COOKIE_NAME);
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

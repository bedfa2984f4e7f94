use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use agora_shared::User;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, AppState};

// ── JWT Claims ──

/// Issued by the external identity provider; only decoded here.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,   // user id
    pub exp: usize, // expiry (unix timestamp)
}

// ── Extract authenticated user from Authorization header ──

/// Tokens are issued by the external identity provider; this service only
/// verifies and consumes them.
pub fn extract_user_id(headers: &HeaderMap, jwt_secret: &str) -> Result<i64, ApiError> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    Ok(data.claims.sub)
}

// ── Handlers ──

/// GET /api/auth/me — return current user
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, ApiError> {
    let user_id = extract_user_id(&headers, &state.jwt_secret)?;

    let pool = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        conn.query_row(
            "SELECT id, username, avatar_url FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    avatar_url: row.get(2)?,
                })
            },
        )
        .map_err(|_| ApiError::NotFound("user"))
    })
    .await??;

    Ok(Json(user))
}

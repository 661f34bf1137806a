use axum::{Extension, Json, extract::State, response::IntoResponse};

use leadhub_types::api::{Claims, SessionResponse};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};

/// The caller's profile and onboarding state.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let user = blocking(move || db.get_user_by_id(&id))
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    Ok(Json(SessionResponse {
        user_id: claims.sub,
        username: user.username,
        onboarding_complete: user.onboarding_complete,
    }))
}

pub async fn complete_onboarding(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let updated = blocking(move || db.set_onboarding_complete(&id, true)).await?;
    if !updated {
        return Err(ApiError::Unauthenticated);
    }

    Ok(Json(SessionResponse {
        user_id: claims.sub,
        username: claims.username,
        onboarding_complete: true,
    }))
}

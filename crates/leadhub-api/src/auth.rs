use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::SaltString,
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::info;
use uuid::Uuid;

use leadhub_connect::ChannelService;
use leadhub_db::Database;
use leadhub_gateway::dispatcher::Dispatcher;
use leadhub_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::{ApiError, blocking};

const TOKEN_LIFETIME_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    /// Shared secret for provider webhooks. `None` accepts unsigned
    /// deliveries and is only meant for local development.
    pub webhook_secret: Option<String>,
    pub dispatcher: Dispatcher,
    pub channels: ChannelService,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::invalid("username must be 3 to 32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::invalid("password must be at least 8 characters"));
    }

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let (id, name, password) = (user_id.to_string(), username.clone(), req.password);
    let created = blocking(move || {
        if db.get_user_by_username(&name)?.is_some() {
            return Ok(false);
        }

        // Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        // A concurrent registration may have taken the name since the check.
        db.create_user(&id, &name, &password_hash)
    })
    .await?;

    if !created {
        return Err(ApiError::Conflict {
            code: "username_taken",
            message: "username is already taken".into(),
        });
    }

    let token = create_token(&state.jwt_secret, user_id, &username)?;
    info!("Registered user {} ({})", username, user_id);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let name = req.username.trim().to_string();
    let password = req.password;
    let user = blocking(move || {
        let Some(user) = db.get_user_by_username(&name)? else {
            return Ok(None);
        };
        let parsed_hash =
            PasswordHash::new(&user.password).map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;
        let verified = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();
        Ok(verified.then_some(user))
    })
    .await?
    .ok_or(ApiError::BadCredentials)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("bad user id '{}': {}", user.id, e))?;
    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

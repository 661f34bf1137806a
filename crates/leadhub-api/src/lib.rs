pub mod auth;
pub mod channels;
pub mod conversations;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod session;
pub mod webhooks;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All HTTP and WebSocket routes. CORS and request tracing are layered on
/// by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/webhooks/whatsapp", post(webhooks::whatsapp_inbound))
        .route("/gateway", get(gateway::upgrade));

    let protected_routes = Router::new()
        .route("/me", get(session::me))
        .route("/me/onboarding", post(session::complete_onboarding))
        .route("/channels", get(channels::list_channels))
        .route("/channels/whatsapp/connect", post(channels::connect_whatsapp))
        .route("/channels/instagram/connect", post(channels::connect_instagram))
        .route("/channels/{channel_id}", get(channels::get_channel).delete(channels::remove_channel))
        .route("/channels/{channel_id}/disconnect", post(channels::disconnect_channel))
        .route("/channels/{channel_id}/retry", post(channels::retry_channel))
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

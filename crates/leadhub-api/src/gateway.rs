use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;
use tracing::debug;

use leadhub_gateway::connection;

use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::middleware::verify_token;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    pub token: Option<String>,
}

/// Authenticate, then hand the socket to the gateway. Rejected handshakes
/// never upgrade.
pub async fn upgrade(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let token = match (&bearer, &query.token) {
        (Some(TypedHeader(auth)), _) => auth.token().to_string(),
        (None, Some(token)) => token.clone(),
        (None, None) => return Err(ApiError::Unauthenticated),
    };
    let claims = verify_token(&state.jwt_secret, &token)?;

    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    if blocking(move || db.get_user_by_id(&user_id)).await?.is_none() {
        return Err(ApiError::Unauthenticated);
    }

    debug!("Gateway upgrade for {}", claims.username);
    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, claims.sub, claims.username)
    }))
}

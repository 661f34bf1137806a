use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use leadhub_connect::{ConnectRequest, Initiated};
use leadhub_types::api::{
    Claims, ConnectInstagramRequest, ConnectResponse, ConnectWhatsappRequest, DisconnectResponse,
};
use leadhub_types::models::ChannelType;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    #[serde(rename = "type")]
    pub channel_type: Option<String>,
}

pub async fn connect_whatsapp(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ConnectWhatsappRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let initiated = state
        .channels
        .initiate_connection(claims.sub, ConnectRequest::Whatsapp { phone: req.phone })
        .await?;
    Ok(connect_response(initiated))
}

pub async fn connect_instagram(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ConnectInstagramRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let initiated = state
        .channels
        .initiate_connection(claims.sub, ConnectRequest::Instagram { username: req.username })
        .await?;
    Ok(connect_response(initiated))
}

/// 201 for a new row, 200 when an existing row was re-issued.
fn connect_response(initiated: Initiated) -> impl IntoResponse {
    let status = if initiated.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let channel = initiated.channel;
    (
        status,
        Json(ConnectResponse {
            channel_id: channel.id,
            channel_type: channel.channel_type,
            status: channel.status,
            transient_credential: channel.transient_credential,
        }),
    )
}

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ChannelQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_type = query
        .channel_type
        .as_deref()
        .map(str::parse::<ChannelType>)
        .transpose()
        .map_err(|e| ApiError::invalid(e.to_string()))?;

    let channels = state.channels.list(claims.sub, channel_type).await?;
    Ok(Json(channels))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state.channels.check_status(claims.sub, channel_id).await?;
    Ok(Json(channel))
}

pub async fn disconnect_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.channels.disconnect(claims.sub, channel_id).await?;
    Ok(Json(DisconnectResponse {
        channel_id: result.channel.id,
        status: result.channel.status,
        changed: result.changed,
    }))
}

pub async fn retry_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state.channels.retry(claims.sub, channel_id).await?;
    Ok(Json(ConnectResponse {
        channel_id: channel.id,
        channel_type: channel.channel_type,
        status: channel.status,
        transient_credential: channel.transient_credential,
    }))
}

pub async fn remove_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.channels.remove(claims.sub, channel_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use leadhub_types::api::{ConnectResponse, DisconnectResponse, ErrorBody};
use leadhub_types::models::{Channel, ChannelType};

use crate::error::ClientError;
use crate::subscriber::ChannelSource;
use crate::ws::GatewayFeed;

/// Authenticated client for the channel endpoints. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start (or restart) a connection. `value` is the phone number or the
    /// Instagram handle depending on `channel_type`.
    pub async fn connect(&self, channel_type: ChannelType, value: &str) -> Result<ConnectResponse, ClientError> {
        let body = match channel_type {
            ChannelType::Whatsapp => json!({ "phone": value }),
            ChannelType::Instagram => json!({ "username": value }),
        };
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/connect", channel_type)))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn channel(&self, channel_id: Uuid) -> Result<Channel, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/channels/{}", channel_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn channels(&self, channel_type: Option<ChannelType>) -> Result<Vec<Channel>, ClientError> {
        let mut req = self.http.get(self.url("/channels")).bearer_auth(&self.token);
        if let Some(t) = channel_type {
            req = req.query(&[("type", t.as_str())]);
        }
        decode(req.send().await?).await
    }

    pub async fn disconnect(&self, channel_id: Uuid) -> Result<DisconnectResponse, ClientError> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/disconnect", channel_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn retry(&self, channel_id: Uuid) -> Result<ConnectResponse, ClientError> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{}/retry", channel_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn remove(&self, channel_id: Uuid) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(self.url(&format!("/channels/{}", channel_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    /// The realtime feed for this server and token.
    pub fn gateway_feed(&self) -> Result<GatewayFeed, ClientError> {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(ClientError::Url(self.base_url.clone()));
        };
        Ok(GatewayFeed::new(format!("{}/gateway?token={}", ws_base, self.token)))
    }
}

impl ChannelSource for ApiClient {
    async fn list_channels(&self, channel_type: Option<ChannelType>) -> Result<Vec<Channel>, ClientError> {
        self.channels(channel_type).await
    }
}

async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    // Fall back to the status text when the body is not ours.
    let body = resp.json::<ErrorBody>().await.unwrap_or_else(|_| ErrorBody {
        error: status.canonical_reason().unwrap_or("request failed").to_string(),
        code: "http_error".to_string(),
    });
    Err(ClientError::Api {
        status: status.as_u16(),
        code: body.code,
        message: body.error,
    })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    Ok(check(resp).await?.json::<T>().await?)
}

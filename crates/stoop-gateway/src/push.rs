//! Push-notification boundary for participants with no live connection.
//! Fire-and-forget: failures are logged by the Dispatch Engine and never
//! surface to the sender.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use stoop_types::{ChatError, SurfaceKind, SurfaceRef};

/// Preview length for push bodies, in characters.
const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub surface_kind: SurfaceKind,
    pub surface: SurfaceRef,
    /// Sender display name.
    pub title: String,
    /// Message preview, truncated.
    pub body: String,
}

impl PushPayload {
    pub fn new(surface: SurfaceRef, sender_name: &str, message_body: &str) -> Self {
        Self {
            surface_kind: surface.kind(),
            surface,
            title: sender_name.to_string(),
            body: preview(message_body),
        }
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() <= PREVIEW_CHARS {
        body.to_string()
    } else {
        let mut s: String = body.chars().take(PREVIEW_CHARS).collect();
        s.push('…');
        s
    }
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn notify(
        &self,
        user_id: i64,
        token: &str,
        payload: &PushPayload,
    ) -> Result<(), ChatError>;
}

/// Posts payloads to an external push gateway (FCM bridge, SMS relay, ...).
pub struct HttpPushProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushProvider {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    token: &'a str,
    #[serde(flatten)]
    payload: &'a PushPayload,
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn notify(
        &self,
        user_id: i64,
        token: &str,
        payload: &PushPayload,
    ) -> Result<(), ChatError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&PushRequest { token, payload })
            .send()
            .await
            .map_err(ChatError::storage)?;
        resp.error_for_status().map_err(ChatError::storage)?;
        debug!("push delivered to user {user_id}");
        Ok(())
    }
}

/// No-op provider for deployments without a push gateway.
pub struct NoopPushProvider;

#[async_trait]
impl PushProvider for NoopPushProvider {
    async fn notify(&self, _: i64, _: &str, _: &PushPayload) -> Result<(), ChatError> {
        Ok(())
    }
}

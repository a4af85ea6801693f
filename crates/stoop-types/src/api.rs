use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::UnreadBucket;

/// JWT claims shared by the REST middleware and the WebSocket upgrade layer.
/// Token issuance belongs to the auth subsystem; this core only decodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
    pub reply_to: Option<i64>,
}

/// Moderator-only system notice on an event or community thread.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnouncementRequest {
    pub body: String,
}

/// Mark-as-read request. `position` is a unix-millisecond timestamp on
/// event/community surfaces and a message id on private conversations.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub position: i64,
}

/// Mark-as-read acknowledgment: the number of messages that transitioned
/// from unread to read. Never a bare success boolean — the client reconciles
/// optimistic local state against this count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

/// Badge payload for the unread query. `count` is sparse (zero-count
/// surfaces omitted), keyed by room key, covering event-thread surfaces;
/// the per-surface values always sum to `EVENT + NOTIFICATION`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnreadBadge {
    pub count: BTreeMap<String, u64>,
    #[serde(rename = "EVENT")]
    pub event: u64,
    #[serde(rename = "NOTIFICATION")]
    pub notification: u64,
}

/// Full per-surface unread view across all participated surfaces, with
/// per-bucket totals. Sparse like the badge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnreadOverview {
    pub surfaces: BTreeMap<String, u64>,
    pub totals: BTreeMap<UnreadBucket, u64>,
}

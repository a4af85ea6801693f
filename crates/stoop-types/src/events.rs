use serde::{Deserialize, Serialize};

use crate::api::UnreadBadge;
use crate::error::ChatError;
use crate::models::{Message, SurfaceRef};

/// Frames sent from server to client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection is authenticated and joined to the personal room.
    Ready { user_id: i64 },

    /// A new message was committed on a surface the client can see.
    MessageCreate { message: Message },

    /// Acknowledgment of the caller's own send: the committed message,
    /// echoed back so optimistic local state can be reconciled.
    MessageAck { message: Message },

    /// Acknowledgment of the caller's own mark-as-read.
    ReadAck { surface: SurfaceRef, updated: u64 },

    /// Acknowledgment of an explicit room join/leave.
    RoomJoined { surface: SurfaceRef },
    RoomLeft { surface: SurfaceRef },

    /// Read receipt: another participant advanced their marker.
    MessageRead {
        surface: SurfaceRef,
        user_id: i64,
        position: i64,
    },

    /// A message was soft-deleted on an event/community thread.
    MessageDeleted { surface: SurfaceRef, message_id: i64 },

    /// Response to `QueryUnread`.
    Unread { badge: UnreadBadge },

    /// A command failed validation. Delivery failures are never reported
    /// here — a committed message stands regardless.
    Error { code: String, message: String },
}

impl GatewayEvent {
    pub fn error(err: &ChatError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Commands sent from client to server. Each maps 1:1 onto a Dispatch
/// Engine or Read-Marker Store call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    JoinEvent { event_id: i64 },
    LeaveEvent { event_id: i64 },
    JoinCommunity { community_id: i64 },
    LeaveCommunity { community_id: i64 },

    SendEventMessage {
        event_id: i64,
        body: String,
        reply_to: Option<i64>,
    },
    SendCommunityMessage {
        community_id: i64,
        body: String,
        reply_to: Option<i64>,
    },
    SendPrivateMessage {
        conversation_id: i64,
        body: String,
        reply_to: Option<i64>,
    },

    MarkEventRead { event_id: i64, last_read_at: i64 },
    MarkCommunityRead { community_id: i64, last_read_at: i64 },
    MarkPrivateRead {
        conversation_id: i64,
        last_read_message_id: i64,
    },

    QueryUnread,
}

use serde::{Deserialize, Serialize};

/// The three chat surface kinds. Closed set — the wire protocol, the unread
/// partitioning, and the per-kind policies (soft delete, marker granularity)
/// all key off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurfaceKind {
    Event,
    Community,
    Private,
}

impl SurfaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Community => "community",
            Self::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "event" => Some(Self::Event),
            "community" => Some(Self::Community),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// One addressable chat context: an event thread, a community thread, or a
/// private 1:1 conversation. The unit of addressing for rooms, messages, and
/// read markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurfaceRef {
    Event(i64),
    Community(i64),
    Private(i64),
}

impl SurfaceRef {
    pub fn kind(self) -> SurfaceKind {
        match self {
            Self::Event(_) => SurfaceKind::Event,
            Self::Community(_) => SurfaceKind::Community,
            Self::Private(_) => SurfaceKind::Private,
        }
    }

    pub fn surface_id(self) -> i64 {
        match self {
            Self::Event(id) | Self::Community(id) | Self::Private(id) => id,
        }
    }

    pub fn from_parts(kind: SurfaceKind, id: i64) -> Self {
        match kind {
            SurfaceKind::Event => Self::Event(id),
            SurfaceKind::Community => Self::Community(id),
            SurfaceKind::Private => Self::Private(id),
        }
    }

    /// Room key for the in-memory registry, e.g. `event:12`.
    pub fn room_key(self) -> String {
        format!("{}:{}", self.kind().as_str(), self.surface_id())
    }

    /// Private messages never soft-delete; event/community threads do.
    pub fn supports_soft_delete(self) -> bool {
        !matches!(self, Self::Private(_))
    }

    /// Private conversations track a message-id marker (exact); event and
    /// community threads track a timestamp marker (coarse).
    pub fn uses_message_marker(self) -> bool {
        matches!(self, Self::Private(_))
    }
}

/// Personal-room key for private-message delivery, joined automatically at
/// authentication time.
pub fn personal_room_key(user_id: i64) -> String {
    format!("user:{user_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A regular chat message authored by a user.
    Chat,
    /// A system notice (event updated, announcement, ...). Partitions into
    /// the NOTIFICATION unread bucket.
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Self::Chat),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A committed message. Immutable once created except for the `deleted`
/// flag. `created_at` is unix milliseconds; total order per surface is
/// (created_at, id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub surface: SurfaceRef,
    pub sender_id: i64,
    pub sender_name: String,
    pub kind: MessageKind,
    pub body: String,
    pub reply_to: Option<i64>,
    pub deleted: bool,
    pub created_at: i64,
}

impl Message {
    /// The read-marker position that covers this message.
    pub fn read_position(&self) -> ReadPosition {
        if self.surface.uses_message_marker() {
            ReadPosition::MessageId(self.id)
        } else {
            ReadPosition::Timestamp(self.created_at)
        }
    }
}

/// Durable per-user read boundary on one surface. Timestamp markers for
/// event/community threads, message-id markers for private conversations.
/// Monotonic: a marker only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ReadPosition {
    Timestamp(i64),
    MessageId(i64),
}

impl ReadPosition {
    pub fn value(self) -> i64 {
        match self {
            Self::Timestamp(v) | Self::MessageId(v) => v,
        }
    }

    /// Whether this position kind is valid for the given surface.
    pub fn matches(self, surface: SurfaceRef) -> bool {
        match self {
            Self::Timestamp(_) => !surface.uses_message_marker(),
            Self::MessageId(_) => surface.uses_message_marker(),
        }
    }
}

/// Unread partitioning buckets for client badge rendering. Every
/// (surface kind, message kind) pair lands in exactly one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnreadBucket {
    Event,
    Notification,
    Community,
    Private,
}

impl UnreadBucket {
    /// Bucket assignment: chat on event threads is EVENT; system notices on
    /// event and community threads are NOTIFICATION; community chat is
    /// COMMUNITY; everything private is PRIVATE.
    pub fn for_message(surface: SurfaceKind, kind: MessageKind) -> Self {
        match (surface, kind) {
            (SurfaceKind::Event, MessageKind::Chat) => Self::Event,
            (SurfaceKind::Event, MessageKind::System) => Self::Notification,
            (SurfaceKind::Community, MessageKind::Chat) => Self::Community,
            (SurfaceKind::Community, MessageKind::System) => Self::Notification,
            (SurfaceKind::Private, _) => Self::Private,
        }
    }
}

//! Message Store: durable append-only messages per surface.

use rusqlite::{Connection, OptionalExtension, params};

use stoop_types::{ChatError, Message, MessageKind, ReadPosition, SurfaceKind, SurfaceRef};

use crate::membership::{ensure_surface_exists, query_display_name};
use crate::models::MessageRow;
use crate::{Database, DbResultExt};

const MESSAGE_COLUMNS: &str = "m.id, m.surface_kind, m.surface_id, m.sender_id, u.display_name, \
                               m.kind, m.body, m.reply_to, m.deleted, m.created_at";

impl Database {
    /// Append a message. The caller stamps `created_at` (unix millis); the
    /// store never reads the clock. Fails with `InvalidReply` when the reply
    /// target is missing, soft-deleted, or on a different surface.
    pub fn append_message(
        &self,
        surface: SurfaceRef,
        sender_id: i64,
        kind: MessageKind,
        body: String,
        reply_to: Option<i64>,
        created_at: i64,
    ) -> Result<Message, ChatError> {
        self.with_conn(|conn| {
            ensure_surface_exists(conn, surface)?;
            let sender_name = query_display_name(conn, sender_id)?;

            if let Some(target) = reply_to {
                let target_surface: Option<(String, i64)> = conn
                    .query_row(
                        "SELECT surface_kind, surface_id FROM messages
                         WHERE id = ?1 AND deleted = 0",
                        [target],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .db()?;
                match target_surface {
                    Some((ref k, id))
                        if k == surface.kind().as_str() && id == surface.surface_id() => {}
                    _ => return Err(ChatError::InvalidReply),
                }
            }

            conn.execute(
                "INSERT INTO messages (surface_kind, surface_id, sender_id, kind, body, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    surface.kind().as_str(),
                    surface.surface_id(),
                    sender_id,
                    kind.as_str(),
                    body,
                    reply_to,
                    created_at
                ],
            )
            .db()?;

            Ok(Message {
                id: conn.last_insert_rowid(),
                surface,
                sender_id,
                sender_name,
                kind,
                body,
                reply_to,
                deleted: false,
                created_at,
            })
        })
    }

    /// Messages after `after` on a surface, ordered by (created_at, id)
    /// ascending. Soft-deleted rows are never returned; `exclude_user`
    /// drops that sender's own messages (unread computation).
    pub fn list_since(
        &self,
        surface: SurfaceRef,
        after: Option<ReadPosition>,
        exclude_user: Option<i64>,
    ) -> Result<Vec<Message>, ChatError> {
        let (after_ts, after_id) = split_position(after);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m JOIN users u ON u.id = m.sender_id
                 WHERE m.surface_kind = ?1 AND m.surface_id = ?2 AND m.deleted = 0
                   AND (?3 IS NULL OR m.created_at > ?3)
                   AND (?4 IS NULL OR m.id > ?4)
                   AND (?5 IS NULL OR m.sender_id != ?5)
                 ORDER BY m.created_at ASC, m.id ASC"
            );
            let mut stmt = conn.prepare(&sql).db()?;
            let rows = stmt
                .query_map(
                    params![
                        surface.kind().as_str(),
                        surface.surface_id(),
                        after_ts,
                        after_id,
                        exclude_user
                    ],
                    read_message_row,
                )
                .db()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .db()?;
            rows.into_iter().map(row_to_message).collect()
        })
    }

    /// Count with the same predicate as `list_since`.
    pub fn count_since(
        &self,
        surface: SurfaceRef,
        after: Option<ReadPosition>,
        exclude_user: Option<i64>,
    ) -> Result<u64, ChatError> {
        let by_kind = self.count_since_by_kind(surface, after, exclude_user)?;
        Ok(by_kind.chat + by_kind.system)
    }

    /// Unread counts split by message kind, for bucket partitioning.
    pub fn count_since_by_kind(
        &self,
        surface: SurfaceRef,
        after: Option<ReadPosition>,
        exclude_user: Option<i64>,
    ) -> Result<KindCounts, ChatError> {
        let (after_ts, after_id) = split_position(after);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT kind, COUNT(*) FROM messages
                     WHERE surface_kind = ?1 AND surface_id = ?2 AND deleted = 0
                       AND (?3 IS NULL OR created_at > ?3)
                       AND (?4 IS NULL OR id > ?4)
                       AND (?5 IS NULL OR sender_id != ?5)
                     GROUP BY kind",
                )
                .db()?;
            let rows = stmt
                .query_map(
                    params![
                        surface.kind().as_str(),
                        surface.surface_id(),
                        after_ts,
                        after_id,
                        exclude_user
                    ],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)),
                )
                .db()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .db()?;

            let mut counts = KindCounts::default();
            for (kind, n) in rows {
                match kind.as_str() {
                    "system" => counts.system = n,
                    _ => counts.chat += n,
                }
            }
            Ok(counts)
        })
    }

    /// History page, newest first. `before` is a message-id cursor: pass the
    /// id of the oldest message of the previous page to fetch older ones.
    pub fn list_page(
        &self,
        surface: SurfaceRef,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        self.with_conn(|conn| {
            let cursor: Option<(i64, i64)> = match before {
                Some(id) => conn
                    .query_row(
                        "SELECT created_at, id FROM messages WHERE id = ?1",
                        [id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .db()?,
                None => None,
            };
            let (cursor_ts, cursor_id) = match cursor {
                Some((ts, id)) => (Some(ts), Some(id)),
                None => (None, None),
            };

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m JOIN users u ON u.id = m.sender_id
                 WHERE m.surface_kind = ?1 AND m.surface_id = ?2 AND m.deleted = 0
                   AND (?3 IS NULL OR m.created_at < ?3
                        OR (m.created_at = ?3 AND m.id < ?4))
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?5"
            );
            let mut stmt = conn.prepare(&sql).db()?;
            let rows = stmt
                .query_map(
                    params![
                        surface.kind().as_str(),
                        surface.surface_id(),
                        cursor_ts,
                        cursor_id,
                        limit
                    ],
                    read_message_row,
                )
                .db()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .db()?;
            rows.into_iter().map(row_to_message).collect()
        })
    }

    pub fn get_message(&self, message_id: i64) -> Result<Option<Message>, ChatError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m JOIN users u ON u.id = m.sender_id
                 WHERE m.id = ?1"
            );
            let row = conn
                .query_row(&sql, [message_id], read_message_row)
                .optional()
                .db()?;
            row.map(row_to_message).transpose()
        })
    }

    /// Soft-delete a message. Author or surface moderator only; rejected
    /// outright on private surfaces. Idempotent once permitted.
    pub fn soft_delete(&self, message_id: i64, requester: i64) -> Result<Message, ChatError> {
        let message = self
            .get_message(message_id)?
            .ok_or(ChatError::NotFound("message"))?;

        if !message.surface.supports_soft_delete() {
            return Err(ChatError::UnsupportedOperation("soft delete"));
        }
        if message.sender_id != requester && !self.is_moderator(requester, message.surface)? {
            return Err(ChatError::Forbidden);
        }

        self.with_conn(|conn| {
            conn.execute("UPDATE messages SET deleted = 1 WHERE id = ?1", [message_id])
                .db()?;
            Ok(())
        })?;

        Ok(Message {
            deleted: true,
            ..message
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KindCounts {
    pub chat: u64,
    pub system: u64,
}

fn split_position(after: Option<ReadPosition>) -> (Option<i64>, Option<i64>) {
    match after {
        Some(ReadPosition::Timestamp(ts)) => (Some(ts), None),
        Some(ReadPosition::MessageId(id)) => (None, Some(id)),
        None => (None, None),
    }
}

fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        surface_kind: row.get(1)?,
        surface_id: row.get(2)?,
        sender_id: row.get(3)?,
        sender_name: row.get(4)?,
        kind: row.get(5)?,
        body: row.get(6)?,
        reply_to: row.get(7)?,
        deleted: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
    })
}

fn row_to_message(row: MessageRow) -> Result<Message, ChatError> {
    let kind_str = row.surface_kind;
    let surface_kind = SurfaceKind::from_str(&kind_str)
        .ok_or_else(|| ChatError::storage(format!("corrupt surface kind '{kind_str}'")))?;
    let message_kind = MessageKind::from_str(&row.kind)
        .ok_or_else(|| ChatError::storage(format!("corrupt message kind '{}'", row.kind)))?;
    Ok(Message {
        id: row.id,
        surface: SurfaceRef::from_parts(surface_kind, row.surface_id),
        sender_id: row.sender_id,
        sender_name: row.sender_name,
        kind: message_kind,
        body: row.body,
        reply_to: row.reply_to,
        deleted: row.deleted,
        created_at: row.created_at,
    })
}

//! Read-Marker Store: durable per-user read position for each surface.
//! Markers are monotonic and mark-as-read is idempotent; the returned count
//! is the number of messages that transitioned from unread to read.

use rusqlite::{OptionalExtension, params};

use stoop_types::{ChatError, ReadPosition, SurfaceRef};

use crate::membership::ensure_surface_exists;
use crate::{Database, DbResultExt};

impl Database {
    /// Advance the marker for (user, surface) to `position`. No-op with
    /// `updated = 0` when the stored position is already at or past the
    /// requested one. The compare-and-advance runs in one transaction, so
    /// concurrent calls from multiple devices serialize cleanly.
    pub fn mark_read(
        &self,
        user_id: i64,
        surface: SurfaceRef,
        position: ReadPosition,
    ) -> Result<u64, ChatError> {
        if !position.matches(surface) {
            return Err(ChatError::UnsupportedOperation("marker granularity"));
        }

        self.with_conn(|conn| {
            ensure_surface_exists(conn, surface)?;

            if let ReadPosition::MessageId(id) = position {
                let on_surface: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM messages
                         WHERE id = ?1 AND surface_kind = ?2 AND surface_id = ?3",
                        params![id, surface.kind().as_str(), surface.surface_id()],
                        |row| row.get(0),
                    )
                    .optional()
                    .db()?;
                if on_surface.is_none() {
                    return Err(ChatError::NotFound("message"));
                }
            }

            let tx = conn.unchecked_transaction().db()?;

            let current: Option<i64> = tx
                .query_row(
                    "SELECT position FROM read_markers
                     WHERE user_id = ?1 AND surface_kind = ?2 AND surface_id = ?3",
                    params![user_id, surface.kind().as_str(), surface.surface_id()],
                    |row| row.get(0),
                )
                .optional()
                .db()?;

            if current.is_some_and(|cur| cur >= position.value()) {
                return Ok(0);
            }

            // Messages crossing from unread to read: authored by someone
            // else, not deleted, past the old marker and covered by the new.
            let column = if surface.uses_message_marker() { "id" } else { "created_at" };
            let sql = format!(
                "SELECT COUNT(*) FROM messages
                 WHERE surface_kind = ?1 AND surface_id = ?2 AND deleted = 0
                   AND sender_id != ?3
                   AND (?4 IS NULL OR {column} > ?4)
                   AND {column} <= ?5"
            );
            let updated: u64 = tx
                .query_row(
                    &sql,
                    params![
                        surface.kind().as_str(),
                        surface.surface_id(),
                        user_id,
                        current,
                        position.value()
                    ],
                    |row| row.get(0),
                )
                .db()?;

            tx.execute(
                "INSERT INTO read_markers (user_id, surface_kind, surface_id, position, updated_at)
                 VALUES (?1, ?2, ?3, ?4, datetime('now'))
                 ON CONFLICT(user_id, surface_kind, surface_id)
                 DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at",
                params![
                    user_id,
                    surface.kind().as_str(),
                    surface.surface_id(),
                    position.value()
                ],
            )
            .db()?;

            tx.commit().db()?;
            Ok(updated)
        })
    }

    pub fn get_marker(
        &self,
        user_id: i64,
        surface: SurfaceRef,
    ) -> Result<Option<ReadPosition>, ChatError> {
        self.with_conn(|conn| {
            let value: Option<i64> = conn
                .query_row(
                    "SELECT position FROM read_markers
                     WHERE user_id = ?1 AND surface_kind = ?2 AND surface_id = ?3",
                    params![user_id, surface.kind().as_str(), surface.surface_id()],
                    |row| row.get(0),
                )
                .optional()
                .db()?;
            Ok(value.map(|v| {
                if surface.uses_message_marker() {
                    ReadPosition::MessageId(v)
                } else {
                    ReadPosition::Timestamp(v)
                }
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoop_types::MessageKind;

    fn event_fixture() -> (Database, i64, i64, SurfaceRef) {
        let db = Database::open_in_memory().unwrap();
        let reader = db.create_user("reader", None).unwrap();
        let sender = db.create_user("sender", None).unwrap();
        let event = db.create_event("swap meet").unwrap();
        db.add_event_participant(event, reader, "member").unwrap();
        db.add_event_participant(event, sender, "member").unwrap();
        (db, reader, sender, SurfaceRef::Event(event))
    }

    #[test]
    fn timestamp_marker_counts_transitions() {
        // Three messages from the sender at t1 < t2 < t3; no marker yet.
        let (db, reader, sender, surface) = event_fixture();
        for ts in [100, 200, 300] {
            db.append_message(surface, sender, MessageKind::Chat, format!("t{ts}"), None, ts)
                .unwrap();
        }
        assert_eq!(db.count_since(surface, None, Some(reader)).unwrap(), 3);

        // Marking up to t2 reads two of them ...
        let updated = db.mark_read(reader, surface, ReadPosition::Timestamp(200)).unwrap();
        assert_eq!(updated, 2);
        assert_eq!(
            db.count_since(surface, db.get_marker(reader, surface).unwrap(), Some(reader))
                .unwrap(),
            1
        );

        // ... and the rest moves on the next advance.
        let updated = db.mark_read(reader, surface, ReadPosition::Timestamp(300)).unwrap();
        assert_eq!(updated, 1);
    }

    #[test]
    fn marker_never_regresses() {
        let (db, reader, sender, surface) = event_fixture();
        db.append_message(surface, sender, MessageKind::Chat, "m".into(), None, 500)
            .unwrap();

        db.mark_read(reader, surface, ReadPosition::Timestamp(500)).unwrap();
        let updated = db.mark_read(reader, surface, ReadPosition::Timestamp(100)).unwrap();
        assert_eq!(updated, 0);
        assert_eq!(
            db.get_marker(reader, surface).unwrap(),
            Some(ReadPosition::Timestamp(500))
        );
    }

    #[test]
    fn repeated_mark_read_is_idempotent() {
        let (db, reader, sender, surface) = event_fixture();
        db.append_message(surface, sender, MessageKind::Chat, "m".into(), None, 50)
            .unwrap();

        assert_eq!(db.mark_read(reader, surface, ReadPosition::Timestamp(50)).unwrap(), 1);
        assert_eq!(db.mark_read(reader, surface, ReadPosition::Timestamp(50)).unwrap(), 0);
    }

    #[test]
    fn own_messages_never_count_as_transitions() {
        let (db, reader, sender, surface) = event_fixture();
        db.append_message(surface, reader, MessageKind::Chat, "mine".into(), None, 10)
            .unwrap();
        db.append_message(surface, sender, MessageKind::Chat, "theirs".into(), None, 20)
            .unwrap();

        assert_eq!(db.mark_read(reader, surface, ReadPosition::Timestamp(20)).unwrap(), 1);
    }

    #[test]
    fn message_id_marker_on_private_conversation() {
        // Interleaved senders in a 1:1 conversation; first mark-as-read by
        // one side covers exactly the other side's messages.
        let db = Database::open_in_memory().unwrap();
        let seven = db.create_user("seven", None).unwrap();
        let eight = db.create_user("eight", None).unwrap();
        let conv = db.create_conversation(seven, eight).unwrap();
        let surface = SurfaceRef::Private(conv);

        let mut last_id = 0;
        for (sender, body) in [
            (seven, "101"),
            (eight, "102"),
            (seven, "103"),
            (seven, "104"),
            (eight, "105"),
            (seven, "106"),
        ] {
            last_id = db
                .append_message(surface, sender, MessageKind::Chat, body.into(), None, 1_000)
                .unwrap()
                .id;
        }

        let updated = db.mark_read(eight, surface, ReadPosition::MessageId(last_id)).unwrap();
        assert_eq!(updated, 4);
        let updated = db.mark_read(eight, surface, ReadPosition::MessageId(last_id)).unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn marker_granularity_must_match_surface() {
        let (db, reader, _, surface) = event_fixture();
        let err = db.mark_read(reader, surface, ReadPosition::MessageId(1)).unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedOperation(_)));
    }

    #[test]
    fn message_id_marker_must_exist_on_the_surface() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user("a", None).unwrap();
        let b = db.create_user("b", None).unwrap();
        let conv = db.create_conversation(a, b).unwrap();

        let err = db
            .mark_read(a, SurfaceRef::Private(conv), ReadPosition::MessageId(999))
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound("message")));
    }

    #[test]
    fn marker_ends_at_max_position_regardless_of_call_order() {
        let (db, reader, sender, surface) = event_fixture();
        db.append_message(surface, sender, MessageKind::Chat, "m".into(), None, 400)
            .unwrap();

        for pos in [300, 100, 400, 200] {
            db.mark_read(reader, surface, ReadPosition::Timestamp(pos)).unwrap();
        }
        assert_eq!(
            db.get_marker(reader, surface).unwrap(),
            Some(ReadPosition::Timestamp(400))
        );
    }
}

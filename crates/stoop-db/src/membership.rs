//! Users and surface membership. Participation and moderator roles live in
//! the profile/community subsystem's tables; the messaging core only reads
//! them, plus the seed helpers tests and tooling need.

use rusqlite::{Connection, OptionalExtension, params};

use stoop_types::{ChatError, SurfaceRef};

use crate::{Database, DbResultExt};

pub const ROLE_MEMBER: &str = "member";
pub const ROLE_MODERATOR: &str = "moderator";

impl Database {
    pub fn create_user(
        &self,
        display_name: &str,
        push_token: Option<&str>,
    ) -> Result<i64, ChatError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (display_name, push_token) VALUES (?1, ?2)",
                params![display_name, push_token],
            )
            .db()?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn push_token(&self, user_id: i64) -> Result<Option<String>, ChatError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT push_token FROM users WHERE id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
            .db()?
            .ok_or(ChatError::NotFound("user"))
        })
    }

    pub fn display_name(&self, user_id: i64) -> Result<String, ChatError> {
        self.with_conn(|conn| query_display_name(conn, user_id))
    }

    pub fn create_event(&self, title: &str) -> Result<i64, ChatError> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO events (title) VALUES (?1)", [title]).db()?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn create_community(&self, name: &str) -> Result<i64, ChatError> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO communities (name) VALUES (?1)", [name]).db()?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn create_conversation(&self, a: i64, b: i64) -> Result<i64, ChatError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (participant_a, participant_b) VALUES (?1, ?2)",
                params![a, b],
            )
            .db()?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn add_event_participant(
        &self,
        event_id: i64,
        user_id: i64,
        role: &str,
    ) -> Result<(), ChatError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO event_participants (event_id, user_id, role)
                 VALUES (?1, ?2, ?3)",
                params![event_id, user_id, role],
            )
            .db()?;
            Ok(())
        })
    }

    pub fn add_community_member(
        &self,
        community_id: i64,
        user_id: i64,
        role: &str,
    ) -> Result<(), ChatError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO community_members (community_id, user_id, role)
                 VALUES (?1, ?2, ?3)",
                params![community_id, user_id, role],
            )
            .db()?;
            Ok(())
        })
    }

    pub fn is_participant(&self, user_id: i64, surface: SurfaceRef) -> Result<bool, ChatError> {
        self.with_conn(|conn| query_is_participant(conn, user_id, surface))
    }

    pub fn participants_of(&self, surface: SurfaceRef) -> Result<Vec<i64>, ChatError> {
        self.with_conn(|conn| match surface {
            SurfaceRef::Event(id) => collect_ids(
                conn,
                "SELECT user_id FROM event_participants WHERE event_id = ?1",
                id,
            ),
            SurfaceRef::Community(id) => collect_ids(
                conn,
                "SELECT user_id FROM community_members WHERE community_id = ?1",
                id,
            ),
            SurfaceRef::Private(id) => {
                let pair: Option<(i64, i64)> = conn
                    .query_row(
                        "SELECT participant_a, participant_b FROM conversations WHERE id = ?1",
                        [id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .db()?;
                match pair {
                    Some((a, b)) => Ok(vec![a, b]),
                    None => Ok(vec![]),
                }
            }
        })
    }

    /// All surfaces the user currently participates in.
    pub fn surfaces_of(&self, user_id: i64) -> Result<Vec<SurfaceRef>, ChatError> {
        self.with_conn(|conn| {
            let mut surfaces = Vec::new();
            for id in collect_ids(
                conn,
                "SELECT event_id FROM event_participants WHERE user_id = ?1",
                user_id,
            )? {
                surfaces.push(SurfaceRef::Event(id));
            }
            for id in collect_ids(
                conn,
                "SELECT community_id FROM community_members WHERE user_id = ?1",
                user_id,
            )? {
                surfaces.push(SurfaceRef::Community(id));
            }
            for id in collect_ids(
                conn,
                "SELECT id FROM conversations WHERE participant_a = ?1 OR participant_b = ?1",
                user_id,
            )? {
                surfaces.push(SurfaceRef::Private(id));
            }
            Ok(surfaces)
        })
    }

    /// Moderator role on event/community surfaces. Private conversations
    /// have no moderators.
    pub fn is_moderator(&self, user_id: i64, surface: SurfaceRef) -> Result<bool, ChatError> {
        self.with_conn(|conn| {
            let role: Option<String> = match surface {
                SurfaceRef::Event(id) => conn
                    .query_row(
                        "SELECT role FROM event_participants WHERE event_id = ?1 AND user_id = ?2",
                        params![id, user_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .db()?,
                SurfaceRef::Community(id) => conn
                    .query_row(
                        "SELECT role FROM community_members WHERE community_id = ?1 AND user_id = ?2",
                        params![id, user_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .db()?,
                SurfaceRef::Private(_) => None,
            };
            Ok(role.as_deref() == Some(ROLE_MODERATOR))
        })
    }
}

pub(crate) fn query_display_name(conn: &Connection, user_id: i64) -> Result<String, ChatError> {
    conn.query_row(
        "SELECT display_name FROM users WHERE id = ?1",
        [user_id],
        |row| row.get(0),
    )
    .optional()
    .db()?
    .ok_or(ChatError::NotFound("user"))
}

/// Fails with `NotFound` when the surface row does not exist.
pub(crate) fn ensure_surface_exists(
    conn: &Connection,
    surface: SurfaceRef,
) -> Result<(), ChatError> {
    let (sql, what) = match surface {
        SurfaceRef::Event(_) => ("SELECT 1 FROM events WHERE id = ?1", "event"),
        SurfaceRef::Community(_) => ("SELECT 1 FROM communities WHERE id = ?1", "community"),
        SurfaceRef::Private(_) => ("SELECT 1 FROM conversations WHERE id = ?1", "conversation"),
    };
    let found: Option<i64> = conn
        .query_row(sql, [surface.surface_id()], |row| row.get(0))
        .optional()
        .db()?;
    found.map(|_| ()).ok_or(ChatError::NotFound(what))
}

pub(crate) fn query_is_participant(
    conn: &Connection,
    user_id: i64,
    surface: SurfaceRef,
) -> Result<bool, ChatError> {
    let found: Option<i64> = match surface {
        SurfaceRef::Event(id) => conn
            .query_row(
                "SELECT 1 FROM event_participants WHERE event_id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()
            .db()?,
        SurfaceRef::Community(id) => conn
            .query_row(
                "SELECT 1 FROM community_members WHERE community_id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()
            .db()?,
        SurfaceRef::Private(id) => conn
            .query_row(
                "SELECT 1 FROM conversations
                 WHERE id = ?1 AND (participant_a = ?2 OR participant_b = ?2)",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()
            .db()?,
    };
    Ok(found.is_some())
}

fn collect_ids(conn: &Connection, sql: &str, key: i64) -> Result<Vec<i64>, ChatError> {
    let mut stmt = conn.prepare(sql).db()?;
    let rows = stmt
        .query_map([key], |row| row.get(0))
        .db()?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .db()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participation_covers_all_three_surface_kinds() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", None).unwrap();
        let bob = db.create_user("bob", None).unwrap();
        let carol = db.create_user("carol", None).unwrap();

        let event = db.create_event("block party").unwrap();
        db.add_event_participant(event, alice, ROLE_MODERATOR).unwrap();
        db.add_event_participant(event, bob, ROLE_MEMBER).unwrap();

        let conv = db.create_conversation(alice, bob).unwrap();

        assert!(db.is_participant(alice, SurfaceRef::Event(event)).unwrap());
        assert!(!db.is_participant(carol, SurfaceRef::Event(event)).unwrap());
        assert!(db.is_participant(bob, SurfaceRef::Private(conv)).unwrap());
        assert!(!db.is_participant(carol, SurfaceRef::Private(conv)).unwrap());

        let mut participants = db.participants_of(SurfaceRef::Event(event)).unwrap();
        participants.sort();
        assert_eq!(participants, vec![alice, bob]);

        assert!(db.is_moderator(alice, SurfaceRef::Event(event)).unwrap());
        assert!(!db.is_moderator(bob, SurfaceRef::Event(event)).unwrap());
        assert!(!db.is_moderator(alice, SurfaceRef::Private(conv)).unwrap());

        let surfaces = db.surfaces_of(alice).unwrap();
        assert!(surfaces.contains(&SurfaceRef::Event(event)));
        assert!(surfaces.contains(&SurfaceRef::Private(conv)));
    }
}

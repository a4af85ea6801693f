//! Database row types — these map directly to SQLite rows. Distinct from
//! the stoop-types wire models to keep the storage layer independent.

pub struct UserRow {
    pub id: i64,
    pub display_name: String,
    pub push_token: Option<String>,
}

pub struct MessageRow {
    pub id: i64,
    pub surface_kind: String,
    pub surface_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub kind: String,
    pub body: String,
    pub reply_to: Option<i64>,
    pub deleted: bool,
    pub created_at: i64,
}

//! Domain entities mirrored from persistent storage.

use bytes::Bytes;

/// Durable icon row. At most one exists per user.
#[derive(Debug, Clone, PartialEq)]
pub struct IconRecord {
    pub id: i64,
    pub user_id: i64,
    pub image: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeRecord {
    pub id: i64,
    pub user_id: i64,
    pub dark_mode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionRecord {
    pub id: i64,
    pub emoji_name: String,
    pub user_id: i64,
    pub livestream_id: i64,
    pub created_at: i64,
}

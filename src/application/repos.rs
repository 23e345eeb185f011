//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::entities::{IconRecord, ReactionRecord, ThemeRecord, UserRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Durable icon store. The authoritative copy of every custom icon.
#[async_trait]
pub trait IconsRepo: Send + Sync {
    async fn find_icon(&self, user_id: i64) -> Result<Option<IconRecord>, RepoError>;

    /// Fetch the icons of every listed user in one round trip. Users
    /// without an icon are simply absent from the result.
    async fn find_icons(&self, user_ids: &[i64]) -> Result<Vec<IconRecord>, RepoError>;

    /// Atomically drop any existing icon for `user_id` and insert `image`.
    /// Returns the new row id.
    async fn replace_icon(&self, user_id: i64, image: Bytes) -> Result<i64, RepoError>;
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserRecord>, RepoError>;

    async fn find_users_by_ids(&self, ids: &[i64]) -> Result<Vec<UserRecord>, RepoError>;
}

#[async_trait]
pub trait ThemesRepo: Send + Sync {
    async fn find_themes_by_user_ids(
        &self,
        user_ids: &[i64],
    ) -> Result<Vec<ThemeRecord>, RepoError>;
}

#[async_trait]
pub trait ReactionsRepo: Send + Sync {
    /// Newest first. `limit` of `None` returns every reaction.
    async fn list_reactions(
        &self,
        livestream_id: i64,
        limit: Option<u32>,
    ) -> Result<Vec<ReactionRecord>, RepoError>;
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}

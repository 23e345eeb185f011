use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    application::repos::{ReactionsRepo, RepoError},
    domain::entities::ReactionRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ReactionRow {
    id: i64,
    emoji_name: String,
    user_id: i64,
    livestream_id: i64,
    created_at: i64,
}

impl From<ReactionRow> for ReactionRecord {
    fn from(row: ReactionRow) -> Self {
        Self {
            id: row.id,
            emoji_name: row.emoji_name,
            user_id: row.user_id,
            livestream_id: row.livestream_id,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl ReactionsRepo for PostgresRepositories {
    async fn list_reactions(
        &self,
        livestream_id: i64,
        limit: Option<u32>,
    ) -> Result<Vec<ReactionRecord>, RepoError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT id, emoji_name, user_id, livestream_id, created_at FROM reactions WHERE livestream_id = ",
        );
        qb.push_bind(livestream_id);
        qb.push(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(limit));
        }

        let rows = qb
            .build_query_as::<ReactionRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ReactionRecord::from).collect())
    }
}

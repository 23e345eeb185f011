use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    application::repos::{IconsRepo, RepoError},
    domain::entities::IconRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct IconRow {
    id: i64,
    user_id: i64,
    image: Vec<u8>,
}

impl From<IconRow> for IconRecord {
    fn from(row: IconRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            image: Bytes::from(row.image),
        }
    }
}

#[async_trait]
impl IconsRepo for PostgresRepositories {
    async fn find_icon(&self, user_id: i64) -> Result<Option<IconRecord>, RepoError> {
        let row = sqlx::query_as::<_, IconRow>(
            r#"
            SELECT id, user_id, image
            FROM icons
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(IconRecord::from))
    }

    async fn find_icons(&self, user_ids: &[i64]) -> Result<Vec<IconRecord>, RepoError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, IconRow>(
            r#"
            SELECT id, user_id, image
            FROM icons
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(IconRecord::from).collect())
    }

    async fn replace_icon(&self, user_id: i64, image: Bytes) -> Result<i64, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            DELETE FROM icons
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO icons (user_id, image)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(image.as_ref())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(id)
    }
}

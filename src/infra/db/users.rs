use async_trait::async_trait;

use crate::{
    application::repos::{RepoError, ThemesRepo, UsersRepo},
    domain::entities::{ThemeRecord, UserRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    display_name: String,
    description: String,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            description: row.description,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ThemeRow {
    id: i64,
    user_id: i64,
    dark_mode: bool,
}

#[async_trait]
impl UsersRepo for PostgresRepositories {
    async fn find_user_by_name(&self, name: &str) -> Result<Option<UserRecord>, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, display_name, description
            FROM users
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(UserRecord::from))
    }

    async fn find_users_by_ids(&self, ids: &[i64]) -> Result<Vec<UserRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, display_name, description
            FROM users
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UserRecord::from).collect())
    }
}

#[async_trait]
impl ThemesRepo for PostgresRepositories {
    async fn find_themes_by_user_ids(
        &self,
        user_ids: &[i64],
    ) -> Result<Vec<ThemeRecord>, RepoError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ThemeRow>(
            r#"
            SELECT id, user_id, dark_mode
            FROM themes
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| ThemeRecord {
                id: row.id,
                user_id: row.user_id,
                dark_mode: row.dark_mode,
            })
            .collect())
    }
}

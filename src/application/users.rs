use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::application::icons::{IconError, IconService};
use crate::application::repos::{RepoError, ThemesRepo, UsersRepo};
use crate::domain::entities::{ThemeRecord, UserRecord};
use crate::domain::icons::IconHash;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Icon(#[from] IconError),
}

/// A user as exposed by list and detail payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user: UserRecord,
    pub theme: ThemeRecord,
    pub icon_hash: IconHash,
}

#[derive(Clone)]
pub struct UserProfileService {
    users: Arc<dyn UsersRepo>,
    themes: Arc<dyn ThemesRepo>,
    icons: IconService,
}

impl UserProfileService {
    pub fn new(
        users: Arc<dyn UsersRepo>,
        themes: Arc<dyn ThemesRepo>,
        icons: IconService,
    ) -> Self {
        Self {
            users,
            themes,
            icons,
        }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<UserRecord>, RepoError> {
        self.users.find_user_by_name(name).await
    }

    pub async fn profile_by_name(&self, name: &str) -> Result<Option<UserProfile>, ProfileError> {
        let Some(user) = self.users.find_user_by_name(name).await? else {
            return Ok(None);
        };
        let mut profiles = self.fill_profiles(vec![user]).await?;
        Ok(profiles.pop())
    }

    /// Load the users behind `ids` and fill their profiles.
    ///
    /// The result is keyed by user id; ids with no user row are omitted.
    pub async fn profiles_by_ids(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, UserProfile>, ProfileError> {
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let users = self.users.find_users_by_ids(&unique).await?;
        let profiles = self.fill_profiles(users).await?;
        Ok(profiles
            .into_iter()
            .map(|profile| (profile.user.id, profile))
            .collect())
    }

    /// Attach theme and icon hash to each user with one batched query per
    /// concern. Order of `users` is preserved.
    pub async fn fill_profiles(
        &self,
        users: Vec<UserRecord>,
    ) -> Result<Vec<UserProfile>, ProfileError> {
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids: Vec<i64> = users.iter().map(|user| user.id).collect();
        ids.sort_unstable();
        ids.dedup();

        let themes: HashMap<i64, ThemeRecord> = self
            .themes
            .find_themes_by_user_ids(&ids)
            .await?
            .into_iter()
            .map(|theme| (theme.user_id, theme))
            .collect();
        let hashes = self.icons.resolve_hashes(ids).await?;
        let fallback = self.icons.cache().fallback().hash().clone();

        Ok(users
            .into_iter()
            .map(|user| {
                let theme = themes.get(&user.id).copied().unwrap_or(ThemeRecord {
                    id: 0,
                    user_id: user.id,
                    dark_mode: false,
                });
                let icon_hash = hashes
                    .get(&user.id)
                    .cloned()
                    .unwrap_or_else(|| fallback.clone());
                UserProfile {
                    user,
                    theme,
                    icon_hash,
                }
            })
            .collect())
    }
}

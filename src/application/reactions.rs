use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::application::repos::{ReactionsRepo, RepoError};
use crate::application::users::{ProfileError, UserProfile, UserProfileService};
use crate::domain::entities::ReactionRecord;

#[derive(Debug, Error)]
pub enum ReactionFeedError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionView {
    pub reaction: ReactionRecord,
    pub user: UserProfile,
}

/// Reaction lists for a livestream, each entry carrying its author's profile.
#[derive(Clone)]
pub struct ReactionFeedService {
    reactions: Arc<dyn ReactionsRepo>,
    profiles: UserProfileService,
}

impl ReactionFeedService {
    pub fn new(reactions: Arc<dyn ReactionsRepo>, profiles: UserProfileService) -> Self {
        Self {
            reactions,
            profiles,
        }
    }

    pub async fn list(
        &self,
        livestream_id: i64,
        limit: Option<u32>,
    ) -> Result<Vec<ReactionView>, ReactionFeedError> {
        let records = self.reactions.list_reactions(livestream_id, limit).await?;
        let user_ids: Vec<i64> = records.iter().map(|reaction| reaction.user_id).collect();
        let profiles = self.profiles.profiles_by_ids(&user_ids).await?;

        let mut views = Vec::with_capacity(records.len());
        for reaction in records {
            let Some(user) = profiles.get(&reaction.user_id).cloned() else {
                warn!(
                    target = "usericon::application::reactions",
                    reaction_id = reaction.id,
                    user_id = reaction.user_id,
                    "reaction author no longer exists; skipping"
                );
                continue;
            };
            views.push(ReactionView { reaction, user });
        }
        Ok(views)
    }
}

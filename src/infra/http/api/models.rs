use usericon_api_types::{ReactionResponse, ThemeResponse, UserResponse};

use crate::application::reactions::ReactionView;
use crate::application::users::UserProfile;

pub fn user_response(profile: UserProfile) -> UserResponse {
    let UserProfile {
        user,
        theme,
        icon_hash,
    } = profile;
    UserResponse {
        id: user.id,
        name: user.name,
        display_name: user.display_name,
        description: user.description,
        theme: ThemeResponse {
            id: theme.id,
            dark_mode: theme.dark_mode,
        },
        icon_hash: icon_hash.into_string(),
    }
}

pub fn reaction_response(view: ReactionView) -> ReactionResponse {
    let ReactionView { reaction, user } = view;
    ReactionResponse {
        id: reaction.id,
        emoji_name: reaction.emoji_name,
        user: user_response(user),
        livestream_id: reaction.livestream_id,
        created_at: reaction.created_at,
    }
}

use super::{Address, FollowAggregate};
use serde::{Deserialize, Serialize};

/// Profile settings a user publishes on their site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
}

/// NFT-backed subscription badge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionBadge {
    pub nft_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub address: Address,
    pub username: String,
    #[serde(default)]
    pub settings: UserSettings,
    #[serde(default)]
    pub subscription: Option<SubscriptionBadge>,
}

impl User {
    pub fn new(address: Address, username: impl Into<String>) -> Self {
        Self {
            address,
            username: username.into(),
            settings: UserSettings::default(),
            subscription: None,
        }
    }

    /// Name shown on cards: display name when set, username otherwise
    pub fn display_name(&self) -> &str {
        self.settings
            .display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// Which follow control a viewer gets on someone's profile card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowAction {
    /// Viewer is looking at their own profile
    Hidden,
    /// Anonymous viewer; following requires signing in first
    LoginRequired,
    Follow,
    Unfollow,
}

impl FollowAction {
    pub fn for_viewer(viewer: Option<&Address>, profile: &Address, is_following: bool) -> Self {
        match viewer {
            None => FollowAction::LoginRequired,
            Some(viewer) if viewer == profile => FollowAction::Hidden,
            Some(_) if is_following => FollowAction::Unfollow,
            Some(_) => FollowAction::Follow,
        }
    }
}

/// Profile card data: the user, their counts and the viewer's follow state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub user: User,
    pub aggregate: FollowAggregate,
    /// `None` for anonymous viewers and for the user's own card
    pub viewer_is_following: Option<bool>,
    pub follow_action: FollowAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn test_display_name_fallback() {
        let mut user = User::new(addr("SP1"), "alice.id");
        assert_eq!(user.display_name(), "alice.id");

        user.settings.display_name = Some("  ".to_string());
        assert_eq!(user.display_name(), "alice.id");

        user.settings.display_name = Some("Alice".to_string());
        assert_eq!(user.display_name(), "Alice");
    }

    #[test]
    fn test_follow_action_for_viewer() {
        let me = addr("SP1");
        let other = addr("SP2");

        assert_eq!(
            FollowAction::for_viewer(None, &other, false),
            FollowAction::LoginRequired
        );
        assert_eq!(
            FollowAction::for_viewer(Some(&me), &me, false),
            FollowAction::Hidden
        );
        assert_eq!(
            FollowAction::for_viewer(Some(&me), &other, false),
            FollowAction::Follow
        );
        assert_eq!(
            FollowAction::for_viewer(Some(&me), &other, true),
            FollowAction::Unfollow
        );
    }

    #[test]
    fn test_user_deserializes_without_optional_fields() {
        let user: User =
            serde_json::from_str(r#"{"address":"SP1","username":"alice.id"}"#).unwrap();
        assert_eq!(user.settings, UserSettings::default());
        assert!(user.subscription.is_none());
    }
}

// Static demo feed, served in fallback mode and whenever acquisition fails
// with nothing cached.

use std::sync::{Arc, LazyLock};

use instafeed_common::{FeedSnapshot, Post, ProfileDetails};

use crate::clock::{Clock, SystemClock};
use crate::normalizer::extract_hashtags;

static FALLBACK_POSTS: LazyLock<Vec<Post>> = LazyLock::new(|| {
    serde_json::from_str(include_str!("../data/fallback_posts.json"))
        .expect("embedded fallback dataset must parse")
});

pub const FALLBACK_DISPLAY_NAME: &str = "Ram Charala";
pub const FALLBACK_AVATAR_URL: &str =
    "https://images.unsplash.com/photo-1472099645785-5658abf4ff4e?w=200&h=200&fit=crop&crop=face";
pub const FALLBACK_FOLLOWERS: u64 = 2400;
pub const FALLBACK_FOLLOWING: u64 = 890;

pub struct FallbackProvider {
    username: String,
    clock: Arc<dyn Clock>,
}

impl FallbackProvider {
    pub fn new(username: &str) -> Self {
        Self::with_clock(username, Arc::new(SystemClock))
    }

    pub fn with_clock(username: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            username: username.to_string(),
            clock,
        }
    }

    /// Same posts and profile every call; only `fetched_at` moves.
    pub fn snapshot(&self) -> FeedSnapshot {
        let posts = FALLBACK_POSTS
            .iter()
            .map(|p| Post {
                username: self.username.clone(),
                hashtags: extract_hashtags(&p.caption),
                ..p.clone()
            })
            .collect();

        FeedSnapshot::new(posts, self.profile(), self.clock.now())
    }

    /// Placeholder profile, also used by the normalizer when the dataset has none.
    pub fn profile(&self) -> ProfileDetails {
        ProfileDetails {
            username: self.username.clone(),
            display_name: FALLBACK_DISPLAY_NAME.to_string(),
            avatar_url: FALLBACK_AVATAR_URL.to_string(),
            follower_count: FALLBACK_FOLLOWERS,
            following_count: FALLBACK_FOLLOWING,
        }
    }
}

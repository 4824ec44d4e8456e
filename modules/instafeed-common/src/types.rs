use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Feed content ---

/// A normalized Instagram post, as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// 1-based position within its snapshot.
    pub id: u32,
    pub short_code: String,
    pub username: String,
    pub image_url: String,
    pub caption: String,
    pub like_count: u64,
    pub comment_count: u64,
    pub published_at: DateTime<Utc>,
    pub location: Option<String>,
    pub hashtags: Vec<String>,
}

/// Header block shown above the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub username: String,
    pub display_name: String,
    pub avatar_url: String,
    pub follower_count: u64,
    pub following_count: u64,
    /// Always the number of posts in the owning snapshot.
    pub post_count: usize,
}

/// Profile fields supplied by a data source. `post_count` is derived, never supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDetails {
    pub username: String,
    pub display_name: String,
    pub avatar_url: String,
    pub follower_count: u64,
    pub following_count: u64,
}

/// One complete acquisition result. Built once, then shared behind `Arc` and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    posts: Vec<Post>,
    profile: ProfileSummary,
    fetched_at: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn new(posts: Vec<Post>, details: ProfileDetails, fetched_at: DateTime<Utc>) -> Self {
        let profile = ProfileSummary {
            username: details.username,
            display_name: details.display_name,
            avatar_url: details.avatar_url,
            follower_count: details.follower_count,
            following_count: details.following_count,
            post_count: posts.len(),
        };
        Self {
            posts,
            profile,
            fetched_at,
        }
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn profile(&self) -> &ProfileSummary {
        &self.profile
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn post(&self, id: u32) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    /// Equality ignoring `fetched_at`.
    pub fn same_content(&self, other: &FeedSnapshot) -> bool {
        self.posts == other.posts && self.profile == other.profile
    }
}

// --- Acquisition policy knobs ---

/// What to put in like/comment counts the source left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingMetrics {
    /// Plausible random filler. Presentation only, not data.
    #[default]
    Synthesize,
    Zero,
}

impl FromStr for MissingMetrics {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthesize" | "random" => Ok(MissingMetrics::Synthesize),
            "zero" => Ok(MissingMetrics::Zero),
            other => Err(format!("unknown missing-metrics mode '{other}' (expected synthesize|zero)")),
        }
    }
}

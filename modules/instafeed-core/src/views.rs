// Derived, read-only views over a snapshot's posts. Nothing here mutates the
// snapshot; every view returns a fresh sequence.

use chrono::{DateTime, Utc};

use instafeed_common::Post;

/// Newest first. Ties keep their original order.
pub fn recent_posts(posts: &[Post], count: usize) -> Vec<&Post> {
    let mut sorted: Vec<&Post> = posts.iter().collect();
    sorted.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    sorted.truncate(count);
    sorted
}

/// Most liked first. Ties keep their original order.
pub fn popular_posts(posts: &[Post], count: usize) -> Vec<&Post> {
    let mut sorted: Vec<&Post> = posts.iter().collect();
    sorted.sort_by(|a, b| b.like_count.cmp(&a.like_count));
    sorted.truncate(count);
    sorted
}

pub fn posts_with_min_likes(posts: &[Post], min_likes: u64) -> Vec<&Post> {
    posts.iter().filter(|p| p.like_count >= min_likes).collect()
}

/// 1234 → "1.2K", 2_500_000 → "2.5M".
pub fn compact_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Short age label: "Just now", "5m ago", "3h ago", "2d ago", then the date.
pub fn relative_age(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(ts).max(chrono::Duration::zero());
    let mins = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if mins < 60 {
        if mins == 0 {
            "Just now".to_string()
        } else {
            format!("{mins}m ago")
        }
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        ts.format("%Y-%m-%d").to_string()
    }
}

//! Raw Apify dataset → `FeedSnapshot`.
//!
//! The scraper's records are loosely typed and their field names drift between
//! actor versions, so every field is looked up under a short list of aliases.
//! Records without an image or a caption are dropped. Ids are assigned by
//! position (1-based) after filtering, independent of the source's own ids.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use instafeed_common::{Config, FeedSnapshot, MissingMetrics, Post, ProfileDetails};

use crate::clock::{Clock, SystemClock};
use crate::fallback::FallbackProvider;

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[A-Za-z0-9_]+").expect("hashtag pattern is valid"));

const IMAGE_KEYS: &[&str] = &["displayUrl", "imageUrl", "display_url"];
const CAPTION_KEYS: &[&str] = &["caption", "text"];
const LIKES_KEYS: &[&str] = &["likesCount", "likeCount"];
const COMMENTS_KEYS: &[&str] = &["commentsCount", "commentCount"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "takenAt"];
const LOCATION_KEYS: &[&str] = &["locationName", "location"];
const SHORT_CODE_KEYS: &[&str] = &["shortCode", "code"];
const OWNER_KEYS: &[&str] = &["ownerUsername", "username"];

/// Epoch values above this are taken to be milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("dataset is not a list of records (got {0})")]
    NotASequence(&'static str),

    #[error("dataset is empty")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct NormalizerSettings {
    pub max_posts: usize,
    pub missing_metrics: MissingMetrics,
}

impl From<&Config> for NormalizerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_posts: config.max_posts as usize,
            missing_metrics: config.missing_metrics,
        }
    }
}

pub struct Normalizer {
    settings: NormalizerSettings,
    fallback: Arc<FallbackProvider>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl Normalizer {
    pub fn new(
        settings: NormalizerSettings,
        fallback: Arc<FallbackProvider>,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        Self {
            settings,
            fallback,
            clock,
            rng: Mutex::new(rng),
        }
    }

    /// Deterministic filler metrics, for tests and reproducible demos.
    pub fn seeded(settings: NormalizerSettings, fallback: Arc<FallbackProvider>, seed: u64) -> Self {
        Self::new(
            settings,
            fallback,
            Arc::new(SystemClock),
            StdRng::seed_from_u64(seed),
        )
    }

    pub fn from_config(config: &Config, fallback: Arc<FallbackProvider>) -> Self {
        let rng = match config.metrics_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::new(config.into(), fallback, Arc::new(SystemClock), rng)
    }

    /// Like `try_normalize`, but an empty or malformed dataset yields the fallback feed
    /// instead of an error. Never produces an empty feed from an empty upstream.
    pub fn normalize(&self, raw: &Value, username: &str) -> FeedSnapshot {
        self.try_normalize(raw, username).unwrap_or_else(|e| {
            warn!(username, error = %e, "Unusable dataset, using fallback feed");
            self.fallback.snapshot()
        })
    }

    pub fn try_normalize(&self, raw: &Value, username: &str) -> Result<FeedSnapshot, NormalizeError> {
        let records = match raw {
            Value::Array(records) => records,
            other => return Err(NormalizeError::NotASequence(json_kind(other))),
        };
        if records.is_empty() {
            return Err(NormalizeError::Empty);
        }

        let now = self.clock.now();
        let usable: Vec<UsableRecord<'_>> = records
            .iter()
            .filter_map(|r| UsableRecord::from_value(r))
            .take(self.settings.max_posts)
            .collect();

        debug!(
            username,
            total = records.len(),
            kept = usable.len(),
            "Normalized dataset"
        );

        let posts = usable
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.to_post(index, record, username, now))
            .collect();

        let profile = self.profile_from(records.first().and_then(Value::as_object), username);
        Ok(FeedSnapshot::new(posts, profile, now))
    }

    fn to_post(
        &self,
        index: usize,
        record: UsableRecord<'_>,
        username: &str,
        now: DateTime<Utc>,
    ) -> Post {
        let fields = record.fields;
        Post {
            id: (index + 1) as u32,
            short_code: text_field(fields, SHORT_CODE_KEYS)
                .map(String::from)
                .unwrap_or_else(|| format!("code_{index}")),
            username: text_field(fields, OWNER_KEYS).unwrap_or(username).to_string(),
            image_url: record.image_url.to_string(),
            caption: record.caption.to_string(),
            like_count: count_field(fields, LIKES_KEYS).unwrap_or_else(|| self.filler(100..5100)),
            comment_count: count_field(fields, COMMENTS_KEYS).unwrap_or_else(|| self.filler(10..510)),
            published_at: timestamp_field(fields, TIMESTAMP_KEYS).unwrap_or(now),
            location: text_field(fields, LOCATION_KEYS).map(String::from),
            hashtags: extract_hashtags(record.caption),
        }
    }

    fn filler(&self, range: std::ops::Range<u64>) -> u64 {
        match self.settings.missing_metrics {
            MissingMetrics::Zero => 0,
            MissingMetrics::Synthesize => self
                .rng
                .lock()
                .expect("normalizer rng lock poisoned")
                .random_range(range),
        }
    }

    fn profile_from(&self, first: Option<&Map<String, Value>>, username: &str) -> ProfileDetails {
        let defaults = self.fallback.profile();
        let Some(first) = first else {
            return ProfileDetails {
                username: username.to_string(),
                ..defaults
            };
        };

        ProfileDetails {
            username: username.to_string(),
            display_name: text_field(first, &["ownerFullName"])
                .map(String::from)
                .unwrap_or(defaults.display_name),
            avatar_url: text_field(first, &["ownerProfilePicUrl"])
                .map(String::from)
                .unwrap_or(defaults.avatar_url),
            follower_count: count_field(first, &["followersCount"]).unwrap_or(defaults.follower_count),
            following_count: count_field(first, &["followingCount"])
                .unwrap_or(defaults.following_count),
        }
    }
}

/// A record that passed the image + caption gate.
struct UsableRecord<'a> {
    fields: &'a Map<String, Value>,
    image_url: &'a str,
    caption: &'a str,
}

impl<'a> UsableRecord<'a> {
    fn from_value(value: &'a Value) -> Option<Self> {
        let fields = value.as_object()?;
        Some(Self {
            fields,
            image_url: text_field(fields, IMAGE_KEYS)?,
            caption: text_field(fields, CAPTION_KEYS)?,
        })
    }
}

/// Hashtags in order of first appearance, without repeats.
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    HASHTAG
        .find_iter(caption)
        .map(|m| m.as_str())
        .filter(|tag| seen.insert(*tag))
        .map(String::from)
        .collect()
}

fn text_field<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| fields.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Non-negative count from a JSON number or numeric string.
fn count_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().filter_map(|k| fields.get(*k)).find_map(|v| match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

/// RFC 3339 string, or epoch seconds / milliseconds.
fn timestamp_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().filter_map(|k| fields.get(*k)).find_map(|v| match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|epoch| {
            if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
                DateTime::from_timestamp_millis(epoch)
            } else {
                DateTime::from_timestamp(epoch, 0)
            }
        }),
        _ => None,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;
    use crate::testing::ManualClock;

    fn normalizer(max_posts: usize) -> Normalizer {
        normalizer_with(max_posts, MissingMetrics::Synthesize, 7)
    }

    fn normalizer_with(max_posts: usize, missing_metrics: MissingMetrics, seed: u64) -> Normalizer {
        Normalizer::new(
            NormalizerSettings {
                max_posts,
                missing_metrics,
            },
            Arc::new(FallbackProvider::new("ramcharala")),
            Arc::new(ManualClock::default()),
            StdRng::seed_from_u64(seed),
        )
    }

    fn record(i: usize) -> Value {
        json!({
            "shortCode": format!("SC{i}"),
            "displayUrl": format!("https://img/{i}.jpg"),
            "caption": format!("post {i} #tag{i}"),
            "likesCount": i * 10,
            "commentsCount": i,
            "timestamp": "2024-08-10T14:30:00.000Z",
        })
    }

    #[test]
    fn records_without_image_or_caption_are_dropped() {
        let raw = json!([
            record(1),
            { "caption": "no image" },
            { "displayUrl": "https://img/x.jpg" },
            { "displayUrl": "https://img/y.jpg", "caption": "" },
            "not even an object",
            record(2),
        ]);

        let snapshot = normalizer(50).try_normalize(&raw, "ramcharala").unwrap();

        let codes: Vec<&str> = snapshot.posts().iter().map(|p| p.short_code.as_str()).collect();
        assert_eq!(codes, vec!["SC1", "SC2"]);
        assert!(snapshot.posts().len() <= raw.as_array().unwrap().len());
    }

    #[test]
    fn output_never_exceeds_max_posts() {
        let raw = Value::Array((1..=20).map(record).collect());
        for max in [0, 1, 5, 20, 50] {
            let snapshot = normalizer(max).try_normalize(&raw, "ramcharala").unwrap();
            assert!(snapshot.posts().len() <= max);
            assert_eq!(snapshot.profile().post_count, snapshot.posts().len());
        }
    }

    #[test]
    fn ids_are_contiguous_from_one() {
        let raw = json!([record(5), { "caption": "dropped" }, record(9), record(3)]);
        let snapshot = normalizer(50).try_normalize(&raw, "ramcharala").unwrap();

        let ids: Vec<u32> = snapshot.posts().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let unique: HashSet<u32> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn empty_or_malformed_dataset_becomes_fallback() {
        let n = normalizer(50);
        let fallback = FallbackProvider::new("ramcharala").snapshot();

        for raw in [json!([]), json!(null), json!({ "error": "rate limited" }), json!("oops")] {
            assert!(n.normalize(&raw, "ramcharala").same_content(&fallback));
        }
        assert!(matches!(n.try_normalize(&json!([]), "u"), Err(NormalizeError::Empty)));
        assert!(matches!(
            n.try_normalize(&json!({}), "u"),
            Err(NormalizeError::NotASequence("object"))
        ));
    }

    #[test]
    fn fields_map_with_defaults() {
        let raw = json!([{
            "displayUrl": "https://img/a.jpg",
            "caption": "  Sunset #travel #sunset #travel ",
            "locationName": "Beach",
        }]);

        let snapshot = normalizer(50).try_normalize(&raw, "ramcharala").unwrap();
        let post = &snapshot.posts()[0];

        assert_eq!(post.id, 1);
        assert_eq!(post.short_code, "code_0");
        assert_eq!(post.username, "ramcharala");
        assert_eq!(post.caption, "Sunset #travel #sunset #travel");
        assert_eq!(post.location.as_deref(), Some("Beach"));
        assert_eq!(post.hashtags, vec!["#travel", "#sunset"]);
        assert_eq!(post.published_at, snapshot.fetched_at());
        assert!((100..5100).contains(&post.like_count));
        assert!((10..510).contains(&post.comment_count));
    }

    #[test]
    fn alternate_field_names_are_understood() {
        let raw = json!([{
            "imageUrl": "https://img/b.jpg",
            "text": "hello",
            "likeCount": "42",
            "commentCount": 3.0,
            "takenAt": 1_723_300_200,
            "code": "XYZ",
            "username": "other_owner",
        }]);

        let post = normalizer(50).try_normalize(&raw, "ramcharala").unwrap().posts()[0].clone();

        assert_eq!(post.image_url, "https://img/b.jpg");
        assert_eq!(post.like_count, 42);
        assert_eq!(post.comment_count, 3);
        assert_eq!(post.short_code, "XYZ");
        assert_eq!(post.username, "other_owner");
        assert_eq!(post.published_at.timestamp(), 1_723_300_200);
    }

    #[test]
    fn epoch_millis_are_detected() {
        let raw = json!([{ "displayUrl": "u", "caption": "c", "timestamp": 1_723_300_200_000_i64 }]);
        let post = normalizer(50).try_normalize(&raw, "u").unwrap().posts()[0].clone();
        assert_eq!(post.published_at.timestamp(), 1_723_300_200);
    }

    #[test]
    fn filler_metrics_are_reproducible_with_a_seed() {
        let raw = json!([{ "displayUrl": "u", "caption": "c" }, { "displayUrl": "v", "caption": "d" }]);
        let a = normalizer_with(50, MissingMetrics::Synthesize, 99)
            .try_normalize(&raw, "u")
            .unwrap();
        let b = normalizer_with(50, MissingMetrics::Synthesize, 99)
            .try_normalize(&raw, "u")
            .unwrap();
        assert_eq!(a.posts(), b.posts());
    }

    #[test]
    fn zero_fill_mode_uses_zero() {
        let raw = json!([{ "displayUrl": "u", "caption": "c" }]);
        let post = normalizer_with(50, MissingMetrics::Zero, 1)
            .try_normalize(&raw, "u")
            .unwrap()
            .posts()[0]
            .clone();
        assert_eq!(post.like_count, 0);
        assert_eq!(post.comment_count, 0);
    }

    #[test]
    fn negative_counts_are_treated_as_missing() {
        let raw = json!([{ "displayUrl": "u", "caption": "c", "likesCount": -5 }]);
        let post = normalizer_with(50, MissingMetrics::Zero, 1)
            .try_normalize(&raw, "u")
            .unwrap()
            .posts()[0]
            .clone();
        assert_eq!(post.like_count, 0);
    }

    #[test]
    fn profile_comes_from_first_raw_record() {
        let raw = json!([
            {
                "caption": "first record has no image",
                "ownerFullName": "Ram C.",
                "ownerProfilePicUrl": "https://avatar/ram.jpg",
                "followersCount": 1234,
                "followingCount": 56,
            },
            record(1),
        ]);

        let snapshot = normalizer(50).try_normalize(&raw, "ramcharala").unwrap();
        let profile = snapshot.profile();

        assert_eq!(profile.username, "ramcharala");
        assert_eq!(profile.display_name, "Ram C.");
        assert_eq!(profile.avatar_url, "https://avatar/ram.jpg");
        assert_eq!(profile.follower_count, 1234);
        assert_eq!(profile.following_count, 56);
        assert_eq!(profile.post_count, 1);
    }

    #[test]
    fn profile_defaults_to_placeholders() {
        let snapshot = normalizer(50)
            .try_normalize(&json!([record(1)]), "someone")
            .unwrap();
        let profile = snapshot.profile();

        assert_eq!(profile.username, "someone");
        assert_eq!(profile.display_name, crate::fallback::FALLBACK_DISPLAY_NAME);
        assert_eq!(profile.follower_count, crate::fallback::FALLBACK_FOLLOWERS);
    }

    #[test]
    fn hashtags_scan_word_characters_only() {
        assert_eq!(
            extract_hashtags("Hi #rust-lang and #async_await! #2024 # #"),
            vec!["#rust", "#async_await", "#2024"]
        );
        assert!(extract_hashtags("no tags here").is_empty());
    }
}

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use apify_client::JobError;
use instafeed_common::MissingMetrics;
use instafeed_core::testing::{raw_dataset, ManualClock, MockRawPostSource};
use instafeed_core::{
    Clock, FallbackProvider, FeedCache, FeedService, Normalizer, NormalizerSettings,
    RawPostSource, ServiceSettings,
};

const USER: &str = "ramcharala";

struct Harness {
    service: FeedService,
    source: Arc<MockRawPostSource>,
    clock: Arc<ManualClock>,
    cache: Arc<FeedCache>,
    fallback: Arc<FallbackProvider>,
}

fn harness(source: MockRawPostSource, fallback_mode: bool) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let source = Arc::new(source);

    let fallback = Arc::new(FallbackProvider::with_clock(USER, dyn_clock.clone()));
    let normalizer = Arc::new(Normalizer::new(
        NormalizerSettings {
            max_posts: 50,
            missing_metrics: MissingMetrics::Zero,
        },
        fallback.clone(),
        dyn_clock.clone(),
        StdRng::seed_from_u64(7),
    ));
    let cache = Arc::new(FeedCache::new(true, dyn_clock));

    let service = FeedService::new(
        cache.clone(),
        source.clone() as Arc<dyn RawPostSource>,
        normalizer,
        fallback.clone(),
        ServiceSettings {
            max_posts: 50,
            cache_key_prefix: "insta_feed_".into(),
            cache_max_age: Duration::from_secs(600),
            fallback_mode,
            fallback_latency: Duration::from_millis(5),
        },
    );

    Harness {
        service,
        source,
        clock,
        cache,
        fallback,
    }
}

#[tokio::test]
async fn fallback_mode_serves_demo_feed_without_remote_calls() {
    let h = harness(MockRawPostSource::new().then_return(raw_dataset(3)), true);

    let first = h.service.get_feed(USER).await;
    let second = h.service.get_feed(USER).await;

    assert_eq!(first.posts().len(), 12);
    assert!(first.same_content(&second));
    assert_eq!(h.source.calls(), 0);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn fresh_fetch_is_normalized_and_cached() {
    let h = harness(MockRawPostSource::new().then_return(raw_dataset(3)), false);

    let snapshot = h.service.get_feed(USER).await;

    let ids: Vec<u32> = snapshot.posts().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(snapshot.profile().post_count, 3);
    assert_eq!(snapshot.fetched_at(), h.clock.now());

    let entry = h.cache.get("insta_feed_ramcharala").expect("feed cached under prefixed key");
    assert!(Arc::ptr_eq(&entry.snapshot, &snapshot));
    assert_eq!(h.service.cache_key(USER), "insta_feed_ramcharala");
}

#[tokio::test]
async fn fresh_cache_entry_skips_remote_call() {
    let h = harness(MockRawPostSource::new().then_return(raw_dataset(3)), false);

    let first = h.service.get_feed(USER).await;
    h.clock.advance(Duration::from_secs(599));
    let second = h.service.get_feed(USER).await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn stale_cache_is_served_when_refetch_fails() {
    let h = harness(MockRawPostSource::new().then_return(raw_dataset(3)), false);

    let first = h.service.get_feed(USER).await;
    h.clock.advance(Duration::from_secs(11 * 60));
    let second = h.service.get_feed(USER).await;

    assert_eq!(h.source.calls(), 2);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn cold_failure_serves_demo_feed() {
    let h = harness(
        MockRawPostSource::new().then_fail(JobError::RunFailed {
            run_id: "run-1".into(),
            status: "FAILED".into(),
        }),
        false,
    );

    let snapshot = h.service.get_feed(USER).await;

    assert!(snapshot.same_content(&h.fallback.snapshot()));
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn empty_dataset_falls_back_and_is_not_cached() {
    let h = harness(MockRawPostSource::new().then_return(json!([])), false);

    let snapshot = h.service.get_feed(USER).await;

    assert_eq!(snapshot.posts().len(), 12);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn non_list_payload_falls_back() {
    let h = harness(
        MockRawPostSource::new().then_return(json!({"error": "rate limited"})),
        false,
    );

    let snapshot = h.service.get_feed(USER).await;

    assert!(snapshot.same_content(&h.fallback.snapshot()));
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn concurrent_misses_share_one_job() {
    let h = harness(
        MockRawPostSource::new()
            .then_return(raw_dataset(2))
            .with_delay(Duration::from_millis(50)),
        false,
    );

    let (a, b) = tokio::join!(h.service.get_feed(USER), h.service.get_feed(USER));

    assert_eq!(h.source.calls(), 1);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.service.health().in_flight, 0);
}

#[tokio::test]
async fn refresh_discards_cache_and_refetches() {
    let h = harness(
        MockRawPostSource::new()
            .then_return(raw_dataset(2))
            .then_return(raw_dataset(4)),
        false,
    );

    assert_eq!(h.service.get_feed(USER).await.posts().len(), 2);
    let refreshed = h.service.refresh(USER).await;

    assert_eq!(refreshed.posts().len(), 4);
    assert_eq!(h.source.calls(), 2);
    let cached = h.cache.get("insta_feed_ramcharala").unwrap();
    assert!(Arc::ptr_eq(&cached.snapshot, &refreshed));
}

#[tokio::test]
async fn refresh_hands_superseded_waiters_the_new_feed() {
    let h = harness(
        MockRawPostSource::new()
            .then_return(raw_dataset(3))
            .with_delay(Duration::from_millis(200)),
        false,
    );

    let service = h.service.clone();
    let superseded = tokio::spawn(async move { service.get_feed(USER).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let refreshed = h.service.refresh(USER).await;
    let superseded = superseded.await.unwrap();

    assert_eq!(h.source.calls(), 2);
    assert_eq!(refreshed.posts().len(), 3);
    assert!(Arc::ptr_eq(&superseded, &refreshed));
    assert_eq!(h.service.health().in_flight, 0);
}

#[tokio::test]
async fn abandoned_caller_does_not_strand_acquisition() {
    let h = harness(
        MockRawPostSource::new()
            .then_return(raw_dataset(2))
            .with_delay(Duration::from_millis(50)),
        false,
    );

    let gave_up = tokio::time::timeout(Duration::from_millis(10), h.service.get_feed(USER)).await;
    assert!(gave_up.is_err());
    assert_eq!(h.service.health().in_flight, 1);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.service.health().in_flight, 0);

    let snapshot = h.service.get_feed(USER).await;
    assert_eq!(snapshot.posts().len(), 2);
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn disabled_cache_fetches_every_time() {
    let h = harness(
        MockRawPostSource::new()
            .then_return(raw_dataset(1))
            .then_return(raw_dataset(2)),
        false,
    );
    h.service.set_cache_enabled(false);

    assert_eq!(h.service.get_feed(USER).await.posts().len(), 1);
    assert_eq!(h.service.get_feed(USER).await.posts().len(), 2);
    assert_eq!(h.source.calls(), 2);

    let health = h.service.health();
    assert!(!health.cache_enabled);
    assert_eq!(health.cached_entries, 0);
}

#[tokio::test]
async fn fallback_mode_toggles_at_runtime() {
    let h = harness(MockRawPostSource::new().then_return(raw_dataset(3)), false);

    h.service.set_fallback_mode(true);
    assert!(h.service.is_fallback_mode());
    assert_eq!(h.service.get_feed(USER).await.posts().len(), 12);

    h.service.set_fallback_mode(false);
    assert_eq!(h.service.get_feed(USER).await.posts().len(), 3);
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn post_lookup_by_id() {
    let h = harness(MockRawPostSource::new().then_return(raw_dataset(3)), false);

    let post = h.service.post_by_id(USER, 2).await.expect("post 2 exists");
    assert_eq!(post.short_code, "SC2");
    assert_eq!(post.hashtags, vec!["#feed".to_string(), "#n2".to_string()]);

    assert!(h.service.post_by_id(USER, 99).await.is_none());
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn health_reports_cache_state() {
    let h = harness(MockRawPostSource::new().then_return(raw_dataset(1)), false);

    let before = h.service.health();
    assert!(before.cache_enabled);
    assert!(!before.fallback_mode);
    assert_eq!(before.cached_entries, 0);

    h.service.get_feed(USER).await;
    assert_eq!(h.service.health().cached_entries, 1);

    h.service.clear_cache();
    assert_eq!(h.service.health().cached_entries, 0);
}

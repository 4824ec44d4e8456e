//! Feed acquisition: the one entry point the front end calls.
//!
//! Policy, in order:
//! 1. fallback mode → demo feed (after a short simulated latency)
//! 2. fresh cache entry → cached feed
//! 3. remote job → normalize → cache → new feed
//! 4. any failure in 3 → stale cache entry if one exists, else demo feed
//!
//! `get_feed` cannot fail. Errors end up in the log, never at the caller.
//! Concurrent misses for the same user share a single remote job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use apify_client::{ApifyClient, JobClient, JobError, PollPolicy};
use instafeed_common::{Config, FeedSnapshot, Post};

use crate::cache::FeedCache;
use crate::clock::{Clock, SystemClock};
use crate::fallback::FallbackProvider;
use crate::normalizer::{NormalizeError, Normalizer};
use crate::traits::RawPostSource;

/// Why a fresh acquisition produced nothing usable.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl AcquireError {
    fn phase(&self) -> &'static str {
        match self {
            AcquireError::Job(e) => e.phase(),
            AcquireError::Normalize(_) => "normalize",
        }
    }

    fn run_id(&self) -> Option<&str> {
        match self {
            AcquireError::Job(e) => e.run_id(),
            AcquireError::Normalize(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub max_posts: u32,
    pub cache_key_prefix: String,
    pub cache_max_age: Duration,
    pub fallback_mode: bool,
    pub fallback_latency: Duration,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_posts: config.max_posts,
            cache_key_prefix: config.cache_key_prefix.clone(),
            cache_max_age: config.cache_duration,
            fallback_mode: config.use_fallback,
            fallback_latency: config.fallback_latency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub cache_enabled: bool,
    pub fallback_mode: bool,
    pub cached_entries: usize,
    pub in_flight: usize,
}

type SharedFeed = Shared<BoxFuture<'static, Arc<FeedSnapshot>>>;

/// One remote acquisition that any number of callers can await.
struct Flight {
    id: u64,
    cancel: CancellationToken,
    result: SharedFeed,
}

struct Inner {
    cache: Arc<FeedCache>,
    source: Arc<dyn RawPostSource>,
    normalizer: Arc<Normalizer>,
    fallback: Arc<FallbackProvider>,
    settings: ServiceSettings,
    fallback_mode: AtomicBool,
    in_flight: Mutex<HashMap<String, Flight>>,
    next_flight_id: AtomicU64,
}

#[derive(Clone)]
pub struct FeedService {
    inner: Arc<Inner>,
}

impl FeedService {
    pub fn new(
        cache: Arc<FeedCache>,
        source: Arc<dyn RawPostSource>,
        normalizer: Arc<Normalizer>,
        fallback: Arc<FallbackProvider>,
        settings: ServiceSettings,
    ) -> Self {
        let fallback_mode = AtomicBool::new(settings.fallback_mode);
        Self {
            inner: Arc::new(Inner {
                cache,
                source,
                normalizer,
                fallback,
                settings,
                fallback_mode,
                in_flight: Mutex::new(HashMap::new()),
                next_flight_id: AtomicU64::new(0),
            }),
        }
    }

    /// Production wiring: Apify-backed job client, system clock, settings from `config`.
    pub fn from_config(config: &Config) -> Self {
        let api = ApifyClient::with_base_url(
            config.apify_token.clone().unwrap_or_default(),
            &config.apify_base_url,
        )
        .actor(&config.apify_actor_id)
        .run_timeout(config.apify_run_timeout_secs);
        let job_client = JobClient::new(
            api,
            PollPolicy {
                interval: config.poll_interval,
                max_attempts: config.poll_max_attempts,
                deadline: Some(config.job_deadline),
            },
        );

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fallback = Arc::new(FallbackProvider::with_clock(&config.username, clock.clone()));
        let normalizer = Arc::new(Normalizer::from_config(config, fallback.clone()));
        let cache = Arc::new(FeedCache::new(config.cache_enabled, clock));

        Self::new(
            cache,
            Arc::new(job_client),
            normalizer,
            fallback,
            ServiceSettings::from(config),
        )
    }

    pub fn cache_key(&self, username: &str) -> String {
        self.inner.cache_key(username)
    }

    /// Current feed for `username`. Always resolves to some snapshot.
    pub async fn get_feed(&self, username: &str) -> Arc<FeedSnapshot> {
        let inner = &self.inner;

        if inner.fallback_mode.load(Ordering::Relaxed) {
            info!(username, "Fallback mode on, serving demo feed");
            tokio::time::sleep(inner.settings.fallback_latency).await;
            return Arc::new(inner.fallback.snapshot());
        }

        let key = inner.cache_key(username);
        if let Some(entry) = inner.cache.get_fresh(&key, inner.settings.cache_max_age) {
            debug!(username, key = key.as_str(), stored_at = %entry.stored_at, "Serving cached feed");
            return entry.snapshot;
        }

        self.join_or_start(key, username).await
    }

    /// Drop every cached feed, abandon any acquisition already running for
    /// this user, and fetch again. Callers still waiting on the abandoned
    /// acquisition are handed the new one.
    pub async fn refresh(&self, username: &str) -> Arc<FeedSnapshot> {
        self.inner.cache.clear();
        if self.is_fallback_mode() {
            return self.get_feed(username).await;
        }

        let key = self.inner.cache_key(username);
        let replacement = {
            let mut flights = self
                .inner
                .in_flight
                .lock()
                .expect("in-flight map lock poisoned");
            let superseded = flights.remove(&key);
            let replacement = self.start_flight(&mut flights, key, username);
            // Cancel only once the replacement is registered, so the old flight can find it.
            if let Some(flight) = superseded {
                info!(username, flight = flight.id, "Cancelling superseded acquisition");
                flight.cancel.cancel();
            }
            replacement
        };

        replacement.await
    }

    pub async fn post_by_id(&self, username: &str, id: u32) -> Option<Post> {
        self.get_feed(username).await.post(id).cloned()
    }

    pub fn clear_cache(&self) {
        info!("Clearing feed cache");
        self.inner.cache.clear();
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        info!(enabled, "Cache toggled");
        self.inner.cache.set_enabled(enabled);
    }

    pub fn set_fallback_mode(&self, on: bool) {
        info!(on, "Fallback mode toggled");
        self.inner.fallback_mode.store(on, Ordering::Relaxed);
    }

    pub fn is_fallback_mode(&self) -> bool {
        self.inner.fallback_mode.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> ServiceHealth {
        ServiceHealth {
            cache_enabled: self.inner.cache.is_enabled(),
            fallback_mode: self.is_fallback_mode(),
            cached_entries: self.inner.cache.len(),
            in_flight: self
                .inner
                .in_flight
                .lock()
                .expect("in-flight map lock poisoned")
                .len(),
        }
    }

    fn join_or_start(&self, key: String, username: &str) -> SharedFeed {
        let mut flights = self
            .inner
            .in_flight
            .lock()
            .expect("in-flight map lock poisoned");

        if let Some(flight) = flights.get(&key) {
            debug!(username, flight = flight.id, "Joining in-flight acquisition");
            return flight.result.clone();
        }

        self.start_flight(&mut flights, key, username)
    }

    /// Spawn an acquisition and register it under `key`. The task runs to
    /// completion (and fills the cache) even if every waiter goes away.
    fn start_flight(
        &self,
        flights: &mut HashMap<String, Flight>,
        key: String,
        username: &str,
    ) -> SharedFeed {
        let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let task = {
            let inner = self.inner.clone();
            let key = key.clone();
            let username = username.to_string();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let snapshot = inner.acquire(&key, &username, id, &cancel).await;
                inner.finish_flight(&key, id);
                snapshot
            })
        };

        let result = {
            let fallback = self.inner.fallback.clone();
            async move {
                match task.await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        error!(flight = id, error = %e, "Acquisition task died, serving demo feed");
                        Arc::new(fallback.snapshot())
                    }
                }
            }
            .boxed()
            .shared()
        };

        flights.insert(
            key,
            Flight {
                id,
                cancel,
                result: result.clone(),
            },
        );
        result
    }
}

impl Inner {
    fn cache_key(&self, username: &str) -> String {
        format!("{}{}", self.settings.cache_key_prefix, username)
    }

    async fn acquire(
        &self,
        key: &str,
        username: &str,
        flight: u64,
        cancel: &CancellationToken,
    ) -> Arc<FeedSnapshot> {
        match self.try_acquire(key, username, cancel).await {
            Ok(snapshot) => snapshot,
            Err(e @ AcquireError::Job(JobError::Cancelled { .. })) => {
                match self.replacement_for(key, flight) {
                    Some(replacement) => {
                        debug!(username, flight, "Superseded, waiting on replacement acquisition");
                        replacement.await
                    }
                    None => self.degrade(key, username, e),
                }
            }
            Err(e) => self.degrade(key, username, e),
        }
    }

    /// The flight that took over `key` from `flight`, if any.
    fn replacement_for(&self, key: &str, flight: u64) -> Option<SharedFeed> {
        self.in_flight
            .lock()
            .expect("in-flight map lock poisoned")
            .get(key)
            .filter(|f| f.id != flight)
            .map(|f| f.result.clone())
    }

    async fn try_acquire(
        &self,
        key: &str,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<FeedSnapshot>, AcquireError> {
        info!(username, "Fetching fresh feed from Apify");

        let raw = self
            .source
            .fetch_raw_posts(username, self.settings.max_posts, cancel)
            .await?;
        let snapshot = Arc::new(self.normalizer.try_normalize(&raw, username)?);

        self.cache.put(key, snapshot.clone());
        info!(username, posts = snapshot.posts().len(), "Feed acquired");
        Ok(snapshot)
    }

    fn degrade(&self, key: &str, username: &str, err: AcquireError) -> Arc<FeedSnapshot> {
        error!(
            username,
            key,
            phase = err.phase(),
            run_id = err.run_id(),
            error = %err,
            "Feed acquisition failed"
        );

        if let Some(entry) = self.cache.get(key) {
            warn!(username, stored_at = %entry.stored_at, "Serving stale cached feed (degraded)");
            return entry.snapshot;
        }

        warn!(username, "No cached feed, serving demo feed (degraded)");
        Arc::new(self.fallback.snapshot())
    }

    /// Forget a finished flight, unless a refresh already replaced it.
    fn finish_flight(&self, key: &str, id: u64) {
        let mut flights = self.in_flight.lock().expect("in-flight map lock poisoned");
        if flights.get(key).is_some_and(|f| f.id == id) {
            flights.remove(key);
        }
    }
}

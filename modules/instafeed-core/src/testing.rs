// Test doubles for the feed pipeline.
//
// - ManualClock (Clock): time only moves when told to
// - MockRawPostSource (RawPostSource): replays queued datasets or errors
//
// Plus `raw_record` for building well-formed Apify records.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use apify_client::JobError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::traits::RawPostSource;

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Utc.with_ymd_and_hms(2024, 8, 11, 9, 0, 0).unwrap())
    }
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// MockRawPostSource
// ---------------------------------------------------------------------------

/// Queue of canned responses. Once drained, every call fails at submit with
/// a 503, which is how "the job service is down" looks from outside.
pub struct MockRawPostSource {
    responses: Mutex<VecDeque<Result<Value, JobError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockRawPostSource {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every call.
    pub fn failing() -> Self {
        Self::new()
    }

    pub fn then_return(self, dataset: Value) -> Self {
        self.responses.lock().unwrap().push_back(Ok(dataset));
        self
    }

    pub fn then_fail(self, err: JobError) -> Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    /// Simulated job duration. Cancellation is honoured while waiting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockRawPostSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RawPostSource for MockRawPostSource {
    async fn fetch_raw_posts(
        &self,
        _username: &str,
        _max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Value, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(JobError::Cancelled { run_id: Some("mock-run".into()) }),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(JobError::SubmitFailed {
                    status: Some(503),
                    message: "MockRawPostSource: service unavailable".into(),
                })
            })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A complete Apify instagram-scraper record.
pub fn raw_record(i: usize) -> Value {
    json!({
        "shortCode": format!("SC{i}"),
        "displayUrl": format!("https://scontent.cdninstagram.com/{i}.jpg"),
        "caption": format!("Post number {i} #feed #n{i}"),
        "ownerUsername": "ramcharala",
        "ownerFullName": "Ram Charala",
        "likesCount": 100 * i,
        "commentsCount": i,
        "timestamp": format!("2024-08-{:02}T12:00:00.000Z", (i % 28) + 1),
        "locationName": "Somewhere",
    })
}

pub fn raw_dataset(count: usize) -> Value {
    Value::Array((1..=count).map(raw_record).collect())
}

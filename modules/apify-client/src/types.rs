use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input for the apify/instagram-scraper actor.
#[derive(Debug, Clone, Serialize)]
pub struct InstagramScraperInput {
    pub username: Vec<String>,
    #[serde(rename = "resultsType")]
    pub results_type: String,
    #[serde(rename = "resultsLimit")]
    pub results_limit: u32,
    #[serde(rename = "searchType")]
    pub search_type: String,
}

impl InstagramScraperInput {
    /// Profile post scrape for a single user.
    pub fn profile_posts(username: &str, limit: u32) -> Self {
        Self {
            username: vec![username.to_string()],
            results_type: "posts".to_string(),
            results_limit: limit,
            search_type: "user".to_string(),
        }
    }
}

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId", default)]
    pub default_dataset_id: Option<String>,
    #[serde(rename = "startedAt", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt", default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunData {
    pub fn run_status(&self) -> RunStatus {
        RunStatus::from_apify(&self.status)
    }
}

/// Lifecycle state of one remote run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl RunStatus {
    /// Map an Apify status string. Transitional and unknown states count as running.
    pub fn from_apify(status: &str) -> Self {
        match status {
            "SUCCEEDED" => RunStatus::Succeeded,
            "FAILED" | "ABORTED" => RunStatus::Failed,
            "TIMED-OUT" => RunStatus::TimedOut,
            _ => RunStatus::Running,
        }
    }
}

/// One execution of the remote scraping job, tracked for the length of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub run_id: String,
    pub status: RunStatus,
}

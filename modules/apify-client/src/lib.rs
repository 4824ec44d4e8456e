pub mod error;
pub mod job;
pub mod types;

pub use error::{ApifyError, JobError, Result};
pub use job::{JobClient, PollPolicy};
pub use types::{ApiResponse, InstagramScraperInput, JobRun, RunData, RunStatus};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use types::ApiResponse as Envelope;

pub const BASE_URL: &str = "https://api.apify.com/v2";

/// Actor ID for apify/instagram-scraper.
pub const INSTAGRAM_SCRAPER: &str = "apify/instagram-scraper";

/// The three remote calls a job is built from. `ApifyClient` speaks HTTP;
/// tests script their own.
#[async_trait]
pub trait RunApi: Send + Sync {
    /// Create a run. Returns immediately with run metadata.
    async fn start_run(&self, input: &InstagramScraperInput) -> Result<RunData>;

    /// Current state of a run.
    async fn get_run(&self, run_id: &str) -> Result<RunData>;

    /// Raw dataset of a finished run, left loosely typed for the normalizer.
    async fn get_dataset_items(&self, run: &RunData) -> Result<serde_json::Value>;
}

pub struct ApifyClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    actor_id: String,
    run_timeout_secs: Option<u64>,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    pub fn with_base_url(token: String, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            actor_id: INSTAGRAM_SCRAPER.to_string(),
            run_timeout_secs: None,
        }
    }

    /// Use a different actor. `owner/name` ids are accepted.
    pub fn actor(mut self, actor_id: &str) -> Self {
        self.actor_id = actor_id.to_string();
        self
    }

    /// Ask Apify to kill the run after this many seconds.
    pub fn run_timeout(mut self, secs: u64) -> Self {
        self.run_timeout_secs = Some(secs);
        self
    }

    fn runs_url(&self) -> String {
        // The REST API addresses `owner/name` actors as `owner~name`.
        let actor = self.actor_id.replace('/', "~");
        match self.run_timeout_secs {
            Some(secs) => format!("{}/acts/{}/runs?timeout={}", self.base_url, actor, secs),
            None => format!("{}/acts/{}/runs", self.base_url, actor),
        }
    }

    fn dataset_url(&self, run: &RunData) -> String {
        match run.default_dataset_id.as_deref() {
            Some(dataset_id) => format!("{}/datasets/{}/items?format=json", self.base_url, dataset_id),
            None => format!(
                "{}/actor-runs/{}/dataset/items?format=json",
                self.base_url, run.id
            ),
        }
    }
}

/// Turn a non-2xx response into `ApifyError::Api`, keeping the body for the log.
async fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApifyError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(resp)
}

#[async_trait]
impl RunApi for ApifyClient {
    async fn start_run(&self, input: &InstagramScraperInput) -> Result<RunData> {
        let url = self.runs_url();
        tracing::debug!(url = url.as_str(), actor = self.actor_id.as_str(), "Creating Apify run");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;

        let body = resp.text().await?;
        let api_resp: Envelope<RunData> = serde_json::from_str(&body)?;
        Ok(api_resp.data)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunData> {
        let url = format!("{}/actor-runs/{}", self.base_url, run_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;

        let body = resp.text().await?;
        let api_resp: Envelope<RunData> = serde_json::from_str(&body)?;
        Ok(api_resp.data)
    }

    async fn get_dataset_items(&self, run: &RunData) -> Result<serde_json::Value> {
        let url = self.dataset_url(run);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(dataset: Option<&str>) -> RunData {
        RunData {
            id: "run-1".to_string(),
            status: "SUCCEEDED".to_string(),
            default_dataset_id: dataset.map(String::from),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn runs_url_encodes_owner_slash_name() {
        let client = ApifyClient::with_base_url("t".into(), "http://localhost:9/v2/");
        assert_eq!(
            client.runs_url(),
            "http://localhost:9/v2/acts/apify~instagram-scraper/runs"
        );
    }

    #[test]
    fn runs_url_carries_run_timeout() {
        let client = ApifyClient::with_base_url("t".into(), "http://x")
            .actor("someone/other-actor")
            .run_timeout(300);
        assert_eq!(client.runs_url(), "http://x/acts/someone~other-actor/runs?timeout=300");
    }

    #[test]
    fn dataset_url_prefers_default_dataset() {
        let client = ApifyClient::with_base_url("t".into(), "http://x");
        assert_eq!(
            client.dataset_url(&run(Some("ds-9"))),
            "http://x/datasets/ds-9/items?format=json"
        );
        assert_eq!(
            client.dataset_url(&run(None)),
            "http://x/actor-runs/run-1/dataset/items?format=json"
        );
    }
}

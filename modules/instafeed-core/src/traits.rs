// Trait seam between the feed service and the remote job.
//
// Production wires in `JobClient<ApifyClient>`; tests use MockRawPostSource
// from `crate::testing`.

use apify_client::{JobClient, JobError, RunApi};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait RawPostSource: Send + Sync {
    /// Unnormalized dataset of a user's recent posts.
    async fn fetch_raw_posts(
        &self,
        username: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, JobError>;
}

#[async_trait]
impl<A: RunApi> RawPostSource for JobClient<A> {
    async fn fetch_raw_posts(
        &self,
        username: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, JobError> {
        JobClient::fetch_raw_posts(self, username, max_results, cancel).await
    }
}

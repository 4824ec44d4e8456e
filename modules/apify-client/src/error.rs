use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

/// Transport-level failure of a single Apify API call.
#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApifyError {
    /// HTTP status of the failed call, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApifyError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        ApifyError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        ApifyError::Parse(err.to_string())
    }
}

/// Failure of one submit → poll → retrieve job, tagged with the phase it died in.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Submit failed (status {status:?}): {message}")]
    SubmitFailed {
        status: Option<u16>,
        message: String,
    },

    #[error("Status check for run {run_id} failed (status {status:?}): {message}")]
    StatusCheckFailed {
        run_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Run {run_id} still running after {attempts} status checks")]
    PollTimeout { run_id: String, attempts: u32 },

    #[error("Run {run_id} failed with status: {status}")]
    RunFailed { run_id: String, status: String },

    #[error("Run {run_id} timed out on the remote side")]
    RunTimedOut { run_id: String },

    #[error("Retrieving results of run {run_id} failed (status {status:?}): {message}")]
    RetrieveFailed {
        run_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Job cancelled (run {run_id:?})")]
    Cancelled { run_id: Option<String> },

    #[error("Job exceeded its {secs}s deadline")]
    DeadlineExceeded { secs: u64 },
}

impl JobError {
    /// Protocol phase the job was in when it failed.
    pub fn phase(&self) -> &'static str {
        match self {
            JobError::SubmitFailed { .. } => "submit",
            JobError::StatusCheckFailed { .. }
            | JobError::PollTimeout { .. }
            | JobError::RunFailed { .. }
            | JobError::RunTimedOut { .. } => "poll",
            JobError::RetrieveFailed { .. } => "retrieve",
            JobError::Cancelled { .. } | JobError::DeadlineExceeded { .. } => "any",
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            JobError::SubmitFailed { .. } | JobError::DeadlineExceeded { .. } => None,
            JobError::Cancelled { run_id } => run_id.as_deref(),
            JobError::StatusCheckFailed { run_id, .. }
            | JobError::PollTimeout { run_id, .. }
            | JobError::RunFailed { run_id, .. }
            | JobError::RunTimedOut { run_id }
            | JobError::RetrieveFailed { run_id, .. } => Some(run_id),
        }
    }
}

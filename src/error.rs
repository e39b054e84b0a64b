use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Invalid job state: job {job_id} is {state}, expected {expected}")]
    InvalidJobState {
        job_id: String,
        state: String,
        expected: String,
    },

    #[error("Invalid resource claims: {0}")]
    InvalidResources(String),

    #[error("Parameter parsing failed: {0}")]
    ParseError(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Malformed result file: {0}")]
    MalformedResultFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

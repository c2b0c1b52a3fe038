//! Error types for the incident workflow.
//!
//! Item-level failures (`AnalysisError`, `NotificationError`) are absorbed into
//! their result records and never reach `WorkflowError`.

use crate::pipeline::WorkflowStage;
use incident_schema::ValidationError;
use std::time::Duration;

/// Run-level failure. A run either yields a complete report or one of these.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: WorkflowStage,
        #[source]
        source: StageError,
    },

    #[error("{0} stage started without the outputs of the stages before it")]
    MissingStageOutput(WorkflowStage),

    #[error("policy lookup failed: {0}")]
    Policy(#[from] PolicyError),

    #[error("evidence storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Failure of an opaque reasoning stage to produce structured output.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage configuration error: {0}")]
    Config(String),

    #[error("stage execution error: {0}")]
    Execution(String),

    #[error("stage returned unusable output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Missing file or a path outside the storage root. Deliberately opaque.
    #[error("evidence not found")]
    NotFound,

    #[error("invalid incident id '{0}'")]
    InvalidIncidentId(String),

    #[error("evidence io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis timed out after {0:?}")]
    TimedOut(Duration),

    #[error("analysis task failed: {0}")]
    TaskFailed(String),

    #[error("evidence io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("policy metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("policy seed io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("policy query task failed: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification rejected: {0}")]
    Rejected(String),

    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("notification task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("journal store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("journal encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
}

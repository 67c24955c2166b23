use std::time::Duration;

use thiserror::Error;

/// Failures of the capture pipeline. Every variant is item-scoped: the batch
/// engine folds it into that item's result and moves on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("no profile document captured within {0:?}")]
    CaptureTimeout(Duration),

    #[error("profile extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("page automation failed at step `{step}`")]
    AutomationStepFailure { step: String },

    #[error("tab lifecycle failure: {0}")]
    TabLifecycle(String),

    #[error("browser host error: {0}")]
    Host(String),

    #[error("sourcing failed: {0}")]
    Sourcing(String),

    #[error("invalid capture payload: {0}")]
    Payload(String),
}

impl ScrapeError {
    pub fn host(err: impl std::fmt::Display) -> Self {
        ScrapeError::Host(err.to_string())
    }
}

/// Rejections of engine operations invoked by a caller.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("a run or sourcing pass is already in progress")]
    Busy,

    #[error("no result at index {0}")]
    NoSuchResult(usize),

    #[error("result {0} has already been reviewed")]
    AlreadyDecided(usize),

    #[error("result {0} carries no profile to accept")]
    NoProfile(usize),

    #[error("no scorecard is attached to the current results")]
    NoScorecard,

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

use thiserror::Error;

use super::selectors::ExtractionDebug;

pub type ScrapeResult<T> = Result<T, ScrapeError>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("scraper is not initialized; call initialize() first")]
    NotInitialized,
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("blocked at {url}: bot-defense marker {marker:?} matched")]
    Blocked {
        url: String,
        marker: String,
        debug: Box<ExtractionDebug>,
    },
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: Box<ScrapeError>,
    },
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for ScrapeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScrapeError::Unexpected(err.to_string())
    }
}

pub mod linkding;
pub mod wallabag;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::config::BackendConfig;

/// Result of asking the backend to store a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Stored; carries the URL the backend recorded.
    Saved(String),
    AlreadyExists(String),
    Failed(String),
}

/// A previously saved article, as returned by a tag query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
    #[error("backend authentication failed: {0}")]
    Auth(String),
}

/// The read-later service, seen only through the three operations the bot uses.
#[async_trait]
pub trait ReadLaterBackend: Send + Sync {
    /// Short name for logs and confirmation messages.
    fn name(&self) -> &str;

    /// Whether this URL (ignoring a trailing slash) is already saved.
    async fn exists(&self, url: &str) -> Result<bool, BackendError>;

    /// Save `url` tagged with `tag`. Call only after `exists` returned false.
    async fn save(&self, url: &str, tag: &str) -> SaveOutcome;

    /// Articles tagged `tag` created on or after `since`, in no particular order.
    async fn list_by_tag_since(
        &self,
        tag: &str,
        since: NaiveDate,
    ) -> Result<Vec<ArticleSummary>, BackendError>;
}

/// Build the backend selected in `[backend]`.
pub fn from_config(config: &BackendConfig, timeout: Duration) -> Result<Arc<dyn ReadLaterBackend>> {
    let backend: Arc<dyn ReadLaterBackend> = match config {
        BackendConfig::Linkding(c) => Arc::new(linkding::LinkdingBackend::new(c.clone(), timeout)?),
        BackendConfig::Wallabag(c) => Arc::new(wallabag::WallabagBackend::new(c.clone(), timeout)?),
    };
    Ok(backend)
}

/// The URL as given plus its trailing-slash twin.
pub fn url_variants(url: &str) -> [String; 2] {
    match url.strip_suffix('/') {
        Some(stripped) => [url.to_string(), stripped.to_string()],
        None => [url.to_string(), format!("{url}/")],
    }
}

/// Equality modulo one trailing slash.
pub fn urls_match(a: &str, b: &str) -> bool {
    a.strip_suffix('/').unwrap_or(a) == b.strip_suffix('/').unwrap_or(b)
}

/// Clock skew tolerated between us and the backend when judging whether a
/// returned record was created by our request.
const CREATION_SKEW_SECS: i64 = 120;

/// Whether a record returned from a create call already existed before the
/// call was made. Both backends answer a create for a known URL with the
/// original record.
pub(crate) fn predates_request(created_at: DateTime<Utc>, requested_at: DateTime<Utc>) -> bool {
    created_at < requested_at - chrono::Duration::seconds(CREATION_SKEW_SECS)
}

/// Keep only articles created on or after `since`.
pub(crate) fn retain_since(articles: &mut Vec<ArticleSummary>, since: NaiveDate) {
    articles.retain(|a| a.created_at.date_naive() >= since);
}

/// Turn a non-2xx response into `BackendError::Rejected`.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Rejected {
        status: status.as_u16(),
        body,
    })
}

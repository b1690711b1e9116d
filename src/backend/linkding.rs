use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{
    check_status, predates_request, retain_since, url_variants, urls_match, ArticleSummary,
    BackendError, ReadLaterBackend, SaveOutcome,
};
use crate::config::LinkdingConfig;

/// Pages followed when listing bookmarks for a tag.
const MAX_PAGES: usize = 10;

/// linkding bookmark manager, authenticated with a static API token.
pub struct LinkdingBackend {
    client: reqwest::Client,
    config: LinkdingConfig,
}

#[derive(Debug, Deserialize)]
struct Bookmark {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    website_title: Option<String>,
    date_added: DateTime<Utc>,
}

impl Bookmark {
    fn into_summary(self) -> ArticleSummary {
        let title = if !self.title.is_empty() {
            self.title
        } else {
            self.website_title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.url.clone())
        };
        ArticleSummary {
            title,
            url: self.url,
            created_at: self.date_added,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    bookmark: Option<CheckedBookmark>,
}

#[derive(Debug, Deserialize)]
struct CheckedBookmark {
    url: String,
}

#[derive(Debug, Deserialize)]
struct BookmarkPage {
    #[serde(default)]
    next: Option<String>,
    results: Vec<Bookmark>,
}

#[derive(Debug, Serialize)]
struct CreateBookmark<'a> {
    url: &'a str,
    tag_names: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreatedBookmark {
    url: String,
    #[serde(default)]
    date_added: Option<DateTime<Utc>>,
}

impl CreatedBookmark {
    /// linkding answers a create for a known URL with the existing bookmark.
    fn into_outcome(self, requested_at: DateTime<Utc>) -> SaveOutcome {
        match self.date_added {
            Some(added) if predates_request(added, requested_at) => {
                SaveOutcome::AlreadyExists(self.url)
            }
            _ => SaveOutcome::Saved(self.url),
        }
    }
}

impl LinkdingBackend {
    pub fn new(config: LinkdingConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build linkding HTTP client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.api_token)
    }

    async fn check(&self, url: &str) -> Result<bool, BackendError> {
        let response = self
            .client
            .get(self.endpoint("/api/bookmarks/check/"))
            .header("Authorization", self.auth_header())
            .query(&[("url", url)])
            .send()
            .await?;

        let body: CheckResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        Ok(body
            .bookmark
            .map(|b| urls_match(&b.url, url))
            .unwrap_or(false))
    }

    async fn create(&self, url: &str, tag: &str) -> Result<CreatedBookmark, BackendError> {
        let request = CreateBookmark {
            url,
            tag_names: vec![tag],
        };
        let response = self
            .client
            .post(self.endpoint("/api/bookmarks/"))
            .header("Authorization", self.auth_header())
            .json(&request)
            .send()
            .await?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl ReadLaterBackend for LinkdingBackend {
    fn name(&self) -> &str {
        "linkding"
    }

    async fn exists(&self, url: &str) -> Result<bool, BackendError> {
        for variant in url_variants(url) {
            if self.check(&variant).await? {
                debug!("linkding already has {}", variant);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn save(&self, url: &str, tag: &str) -> SaveOutcome {
        let requested_at = Utc::now();
        match self.create(url, tag).await.map(|c| c.into_outcome(requested_at)) {
            Ok(SaveOutcome::Saved(canonical)) => {
                info!("Saved {} to linkding with tag '{}'", canonical, tag);
                SaveOutcome::Saved(canonical)
            }
            Ok(other) => {
                info!("linkding already had {}", url);
                other
            }
            Err(e) => {
                error!("Failed to save {} to linkding: {}", url, e);
                SaveOutcome::Failed(e.to_string())
            }
        }
    }

    async fn list_by_tag_since(
        &self,
        tag: &str,
        since: NaiveDate,
    ) -> Result<Vec<ArticleSummary>, BackendError> {
        let query = format!("#{tag}");
        let mut request = self
            .client
            .get(self.endpoint("/api/bookmarks/"))
            .query(&[("q", query.as_str()), ("limit", "100")]);

        let mut articles = Vec::new();
        for page in 0..MAX_PAGES {
            let response = request
                .header("Authorization", self.auth_header())
                .send()
                .await?;
            let body: BookmarkPage = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

            debug!(
                "linkding page {} for tag '{}': {} bookmarks",
                page,
                tag,
                body.results.len()
            );
            articles.extend(body.results.into_iter().map(Bookmark::into_summary));

            match body.next {
                Some(next) => request = self.client.get(next),
                None => break,
            }
        }

        retain_since(&mut articles, since);
        Ok(articles)
    }
}

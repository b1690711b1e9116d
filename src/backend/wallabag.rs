use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    check_status, predates_request, retain_since, url_variants, ArticleSummary, BackendError,
    ReadLaterBackend, SaveOutcome,
};
use crate::config::WallabagConfig;

const MAX_PAGES: u32 = 10;

/// Tokens are renewed this long before the server-side expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_cached(self, now: Instant) -> CachedToken {
        let lifetime = Duration::from_secs(self.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        CachedToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now + lifetime,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Debug, Serialize)]
struct CreateEntry<'a> {
    url: &'a str,
    tags: &'a str,
}

#[derive(Debug, Deserialize)]
struct Entry {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntryPage {
    #[serde(default = "default_pages")]
    pages: u32,
    #[serde(rename = "_embedded")]
    embedded: EmbeddedEntries,
}

#[derive(Debug, Deserialize)]
struct EmbeddedEntries {
    #[serde(default)]
    items: Vec<Entry>,
}

fn default_pages() -> u32 {
    1
}

/// wallabag's timestamps look like `2024-01-02T03:04:05+0000`; RFC 3339 is accepted too.
fn parse_wallabag_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl Entry {
    /// wallabag answers a create for a known URL with the existing entry.
    fn into_outcome(self, requested_at: DateTime<Utc>) -> SaveOutcome {
        match self.created_at.as_deref().and_then(parse_wallabag_time) {
            Some(created) if predates_request(created, requested_at) => {
                SaveOutcome::AlreadyExists(self.url)
            }
            _ => SaveOutcome::Saved(self.url),
        }
    }

    fn into_summary(self) -> Option<ArticleSummary> {
        let created_at = match self.created_at.as_deref().and_then(parse_wallabag_time) {
            Some(ts) => ts,
            None => {
                warn!("Skipping wallabag entry with unreadable created_at: {}", self.url);
                return None;
            }
        };
        let title = self
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.url.clone());
        Some(ArticleSummary {
            title,
            url: self.url,
            created_at,
        })
    }
}

/// wallabag, authenticated with the OAuth2 password grant.
///
/// The access token is cached and renewed on expiry (refresh grant first,
/// password grant as fallback). Callers never see token state.
pub struct WallabagBackend {
    client: reqwest::Client,
    config: WallabagConfig,
    token: Mutex<Option<CachedToken>>,
}

impl WallabagBackend {
    pub fn new(config: WallabagConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build wallabag HTTP client")?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, BackendError> {
        let response = self
            .client
            .post(self.endpoint("/oauth/v2/token"))
            .form(form)
            .send()
            .await?;

        let response = match check_status(response).await {
            Ok(r) => r,
            Err(BackendError::Rejected { status, body }) => {
                return Err(BackendError::Auth(format!("token endpoint returned {status}: {body}")))
            }
            Err(e) => return Err(e),
        };

        response
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(format!("token response: {e}")))
    }

    async fn password_grant(&self) -> Result<TokenResponse, BackendError> {
        debug!("Requesting wallabag token with password grant");
        self.request_token(&[
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ])
        .await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenResponse, BackendError> {
        debug!("Refreshing wallabag token");
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// Current access token, fetching a new one when absent or expired.
    async fn access_token(&self) -> Result<String, BackendError> {
        let mut cached = self.token.lock().await;
        let now = Instant::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        let refresh_token = cached.as_ref().and_then(|t| t.refresh_token.clone());
        let fresh = match refresh_token {
            Some(refresh) => match self.refresh_grant(&refresh).await {
                Ok(token) => token,
                Err(e) => {
                    warn!("wallabag token refresh failed, falling back to password grant: {}", e);
                    self.password_grant().await?
                }
            },
            None => self.password_grant().await?,
        };

        let token = fresh.into_cached(Instant::now());
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send an authenticated request. A 401 drops the cached token so the
    /// next call re-authenticates.
    async fn send_authed(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        check_status(response).await
    }

    async fn exists_exact(&self, url: &str) -> Result<bool, BackendError> {
        let request = self
            .client
            .get(self.endpoint("/api/entries/exists.json"))
            .query(&[("url", url)]);
        let body: ExistsResponse = self
            .send_authed(request)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;
        Ok(body.exists)
    }

    async fn create(&self, url: &str, tag: &str) -> Result<Entry, BackendError> {
        let request = self
            .client
            .post(self.endpoint("/api/entries.json"))
            .json(&CreateEntry { url, tags: tag });
        self.send_authed(request)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl ReadLaterBackend for WallabagBackend {
    fn name(&self) -> &str {
        "wallabag"
    }

    async fn exists(&self, url: &str) -> Result<bool, BackendError> {
        for variant in url_variants(url) {
            if self.exists_exact(&variant).await? {
                debug!("wallabag already has {}", variant);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn save(&self, url: &str, tag: &str) -> SaveOutcome {
        let requested_at = Utc::now();
        match self.create(url, tag).await.map(|e| e.into_outcome(requested_at)) {
            Ok(SaveOutcome::Saved(canonical)) => {
                info!("Saved {} to wallabag with tag '{}'", canonical, tag);
                SaveOutcome::Saved(canonical)
            }
            Ok(other) => {
                info!("wallabag already had {}", url);
                other
            }
            Err(e) => {
                error!("Failed to save {} to wallabag: {}", url, e);
                SaveOutcome::Failed(e.to_string())
            }
        }
    }

    async fn list_by_tag_since(
        &self,
        tag: &str,
        since: NaiveDate,
    ) -> Result<Vec<ArticleSummary>, BackendError> {
        let since_unix = since.and_time(NaiveTime::default()).and_utc().timestamp().to_string();
        let mut articles = Vec::new();

        let mut page = 1;
        loop {
            let page_param = page.to_string();
            let request = self.client.get(self.endpoint("/api/entries.json")).query(&[
                ("tags", tag),
                ("since", since_unix.as_str()),
                ("sort", "created"),
                ("order", "desc"),
                ("perPage", "100"),
                ("page", page_param.as_str()),
            ]);
            let body: EntryPage = self
                .send_authed(request)
                .await?
                .json()
                .await
                .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

            let count = body.embedded.items.len();
            debug!("wallabag page {}/{} for tag '{}': {} entries", page, body.pages, tag, count);
            articles.extend(body.embedded.items.into_iter().filter_map(Entry::into_summary));

            if count == 0 || page >= body.pages || page >= MAX_PAGES {
                break;
            }
            page += 1;
        }

        retain_since(&mut articles, since);
        Ok(articles)
    }
}

//! In-memory doubles for the backend and chat platform traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::backend::{
    retain_since, url_variants, ArticleSummary, BackendError, ReadLaterBackend, SaveOutcome,
};
use crate::platform::{ChatPlatform, Message};

#[derive(Default)]
struct BackendState {
    existing: Vec<String>,
    saves: Vec<(String, String)>,
    canonical: Option<String>,
    save_error: Option<String>,
    exists_error: bool,
    hang_saves: bool,
    duplicate_of: Option<String>,
    articles: Vec<(String, ArticleSummary)>,
}

#[derive(Default)]
pub struct RecordingBackend {
    state: Mutex<BackendState>,
    exists_calls: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_existing(&self, url: &str) {
        self.state.lock().unwrap().existing.push(url.to_string());
    }

    /// URL to report from `save` instead of echoing the input.
    pub fn set_canonical(&self, url: &str) {
        self.state.lock().unwrap().canonical = Some(url.to_string());
    }

    pub fn fail_saves(&self, reason: &str) {
        self.state.lock().unwrap().save_error = Some(reason.to_string());
    }

    pub fn fail_exists(&self) {
        self.state.lock().unwrap().exists_error = true;
    }

    /// Make `save` answer `AlreadyExists` with this URL.
    pub fn report_duplicates(&self, existing: &str) {
        self.state.lock().unwrap().duplicate_of = Some(existing.to_string());
    }

    pub fn hang_saves(&self) {
        self.state.lock().unwrap().hang_saves = true;
    }

    pub fn add_article(&self, tag: &str, article: ArticleSummary) {
        self.state
            .lock()
            .unwrap()
            .articles
            .push((tag.to_string(), article));
    }

    pub fn saves(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().saves.clone()
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadLaterBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn exists(&self, url: &str) -> Result<bool, BackendError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.exists_error {
            return Err(BackendError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(url_variants(url)
            .iter()
            .any(|variant| state.existing.contains(variant)))
    }

    async fn save(&self, url: &str, tag: &str) -> SaveOutcome {
        let hang = self.state.lock().unwrap().hang_saves;
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.save_error {
            return SaveOutcome::Failed(reason.clone());
        }
        if let Some(existing) = &state.duplicate_of {
            return SaveOutcome::AlreadyExists(existing.clone());
        }
        state.saves.push((url.to_string(), tag.to_string()));
        state.existing.push(url.to_string());
        SaveOutcome::Saved(state.canonical.clone().unwrap_or_else(|| url.to_string()))
    }

    async fn list_by_tag_since(
        &self,
        tag: &str,
        since: NaiveDate,
    ) -> Result<Vec<ArticleSummary>, BackendError> {
        let mut articles: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .articles
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, a)| a.clone())
            .collect();
        retain_since(&mut articles, since);
        Ok(articles)
    }
}

#[derive(Default)]
pub struct RecordingPlatform {
    message: Option<Message>,
    fail_fetch: bool,
    hang_fetch: bool,
    fail_replies: bool,
    fetches: AtomicUsize,
    replies: Mutex<Vec<(String, String, String)>>,
}

impl RecordingPlatform {
    pub fn with_message(message: Message) -> Self {
        Self {
            message: Some(message),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_fetch: true,
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang_fetch: true,
            ..Default::default()
        }
    }

    /// Make every `post_thread_reply` fail.
    pub fn failing_replies(mut self) -> Self {
        self.fail_replies = true;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// `(channel, thread_ts, text)` for every posted reply.
    pub fn replies(&self) -> Vec<(String, String, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn fetch_message(&self, _channel: &str, _ts: &str) -> Result<Option<Message>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hang_fetch {
            std::future::pending::<()>().await;
        }
        if self.fail_fetch {
            anyhow::bail!("conversations.history failed: channel_not_found");
        }
        Ok(self.message.clone())
    }

    async fn post_thread_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()> {
        if self.fail_replies {
            anyhow::bail!("chat.postMessage failed: not_in_channel");
        }
        self.replies.lock().unwrap().push((
            channel.to_string(),
            thread_ts.to_string(),
            text.to_string(),
        ));
        Ok(())
    }
}

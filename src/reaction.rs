use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::backend::{BackendError, ReadLaterBackend, SaveOutcome};
use crate::config::{Config, EmojiConfig};
use crate::dedup::{Deduplicator, EventKey};
use crate::extract;
use crate::platform::{ChatPlatform, InboundReactionEvent};

/// Terminal state of one reaction event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    DuplicateRejected,
    UntriggeredEmoji,
    NoMessageFound,
    NoUrlFound,
    AlreadyExists(String),
    Saved { url: String, notified: bool },
    SaveFailed(String),
}

/// Which emojis trigger a save, and how each one is labelled and confirmed.
#[derive(Debug, Clone)]
pub struct ReactionRules {
    pub triggers: HashSet<String>,
    pub emojis: HashMap<String, EmojiConfig>,
    pub fallback_label: String,
}

impl ReactionRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            triggers: config.trigger_emojis().into_iter().collect(),
            emojis: config.emojis.clone(),
            fallback_label: config.reactions.fallback_label.clone(),
        }
    }

    pub fn is_trigger(&self, emoji: &str) -> bool {
        self.triggers.contains(emoji)
    }

    pub fn label_for(&self, emoji: &str) -> &str {
        self.emojis
            .get(emoji)
            .map(|e| e.label.as_str())
            .unwrap_or(&self.fallback_label)
    }

    /// Tag for every emoji that can save: configured emojis and bare triggers.
    pub fn labels(&self) -> HashMap<String, String> {
        self.emojis
            .keys()
            .chain(self.triggers.iter())
            .map(|emoji| (emoji.clone(), self.label_for(emoji).to_string()))
            .collect()
    }

    /// Confirmation text for a saved URL.
    ///
    /// `{url}`/`{label}` in the emoji's template are substituted; a template
    /// without `{url}` gets the URL appended.
    pub fn confirmation(&self, emoji: &str, backend: &str, url: &str) -> String {
        let label = self.label_for(emoji);
        match self.emojis.get(emoji) {
            Some(cfg) => {
                let text = cfg.message.replace("{label}", label);
                if text.contains("{url}") {
                    text.replace("{url}", url)
                } else {
                    format!("{text}: {url}")
                }
            }
            None => format!("Saved URL to {backend} with label '{label}': {url}"),
        }
    }
}

/// Runs a reaction event through dedup, extraction, the existence check,
/// the save and the confirmation reply.
pub struct ReactionOrchestrator {
    dedup: Arc<Deduplicator>,
    backend: Arc<dyn ReadLaterBackend>,
    platform: Arc<dyn ChatPlatform>,
    rules: ReactionRules,
    call_timeout: Duration,
}

impl ReactionOrchestrator {
    pub fn new(
        dedup: Arc<Deduplicator>,
        backend: Arc<dyn ReadLaterBackend>,
        platform: Arc<dyn ChatPlatform>,
        rules: ReactionRules,
        call_timeout: Duration,
    ) -> Self {
        Self {
            dedup,
            backend,
            platform,
            rules,
            call_timeout,
        }
    }

    /// Process one event to a terminal outcome. Never returns an error.
    pub async fn process(&self, event: InboundReactionEvent) -> ReactionOutcome {
        let span = info_span!(
            "reaction",
            channel = %event.channel_id,
            message_ts = %event.message_ts,
            emoji = %event.emoji
        );

        async move {
            match self.handle(&event).await {
                Ok(outcome) => {
                    debug!("Reaction finished: {:?}", outcome);
                    outcome
                }
                Err(e) => {
                    error!("Error handling reaction: {:#}", e);
                    ReactionOutcome::SaveFailed(e.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle(&self, event: &InboundReactionEvent) -> Result<ReactionOutcome> {
        let key = EventKey::from(event);
        if !self.dedup.should_process(&key, Instant::now()).await {
            info!("Duplicate reaction event ignored");
            return Ok(ReactionOutcome::DuplicateRejected);
        }

        if !self.rules.is_trigger(&event.emoji) {
            info!("Reaction {} is not in the trigger list. Ignoring.", event.emoji);
            return Ok(ReactionOutcome::UntriggeredEmoji);
        }

        let fetched = self
            .bounded(
                self.platform
                    .fetch_message(&event.channel_id, &event.message_ts),
            )
            .await;

        let message = match fetched {
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => {
                warn!("No message found in the conversation history");
                return Ok(ReactionOutcome::NoMessageFound);
            }
            Ok(Err(e)) => {
                warn!("Could not fetch the reacted message: {:#}", e);
                return Ok(ReactionOutcome::NoMessageFound);
            }
            Err(e) => {
                warn!("Could not fetch the reacted message: {}", e);
                return Ok(ReactionOutcome::NoMessageFound);
            }
        };

        let Some(url) = extract::extract_and_validate(&message) else {
            info!("No URL found in the message. Remaining silent.");
            return Ok(ReactionOutcome::NoUrlFound);
        };
        info!("URL extracted: {}", url);

        match self.bounded(self.backend.exists(url.as_str())).await {
            Ok(Ok(true)) => {
                info!("{} already saved in {}; not notifying", url, self.backend.name());
                return Ok(ReactionOutcome::AlreadyExists(url.to_string()));
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) | Err(e) => {
                error!("Existence check for {} failed: {}", url, e);
                return Ok(ReactionOutcome::SaveFailed(e.to_string()));
            }
        }

        let label = self.rules.label_for(&event.emoji);
        let outcome = match self.bounded(self.backend.save(url.as_str(), label)).await {
            Ok(outcome) => outcome,
            Err(e) => SaveOutcome::Failed(e.to_string()),
        };

        let canonical = match outcome {
            SaveOutcome::Saved(canonical) => canonical,
            SaveOutcome::AlreadyExists(existing) => {
                info!("{} reported {} as already saved", self.backend.name(), existing);
                return Ok(ReactionOutcome::AlreadyExists(existing));
            }
            SaveOutcome::Failed(reason) => {
                error!("Failed to save {} to {}: {}", url, self.backend.name(), reason);
                return Ok(ReactionOutcome::SaveFailed(reason));
            }
        };

        let reply = self
            .rules
            .confirmation(&event.emoji, self.backend.name(), &canonical);
        let notified = match self
            .bounded(
                self.platform
                    .post_thread_reply(&event.channel_id, &event.message_ts, &reply),
            )
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Saved {} but failed to post confirmation: {:#}", canonical, e);
                false
            }
            Err(e) => {
                error!("Saved {} but failed to post confirmation: {}", canonical, e);
                false
            }
        };

        Ok(ReactionOutcome::Saved {
            url: canonical,
            notified,
        })
    }

    /// Run a network call under the per-call timeout.
    async fn bounded<F, T>(&self, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| BackendError::Timeout(self.call_timeout))
    }
}

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::backend::ReadLaterBackend;
use crate::config::{Config, RetrievalConfig};
use crate::dedup::Deduplicator;
use crate::platform::slack::{verify_signature, EventEnvelope, SlackEvent};
use crate::platform::ChatPlatform;
use crate::reaction::{ReactionOrchestrator, ReactionRules};
use crate::retrieval::{self, RetrievalQuery};

/// Shared application state
pub struct AppState {
    orchestrator: Arc<ReactionOrchestrator>,
    backend: Arc<dyn ReadLaterBackend>,
    /// Emoji to tag, for every emoji the slash command accepts.
    labels: HashMap<String, String>,
    retrieval: RetrievalConfig,
    signing_secret: Option<String>,
    limiter: DefaultDirectRateLimiter,
    http: reqwest::Client,
    call_timeout: Duration,
}

impl AppState {
    pub fn new(
        config: &Config,
        backend: Arc<dyn ReadLaterBackend>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Result<Self> {
        let call_timeout = config.reactions.call_timeout();
        let dedup = Arc::new(Deduplicator::new(config.reactions.dedup_ttl()));
        let rules = ReactionRules::from_config(config);
        let labels = rules.labels();
        let orchestrator = Arc::new(ReactionOrchestrator::new(
            dedup,
            Arc::clone(&backend),
            platform,
            rules,
            call_timeout,
        ));

        let per_minute = NonZeroU32::new(config.server.rate_limit_per_minute)
            .context("server.rate_limit_per_minute must be greater than zero")?;

        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .context("Failed to build response_url HTTP client")?;

        Ok(Self {
            orchestrator,
            backend,
            labels,
            retrieval: config.retrieval.clone(),
            signing_secret: config.slack.signing_secret.clone(),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            http,
            call_timeout,
        })
    }

    /// Rate limit and signature check shared by the Slack endpoints.
    fn authorize(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), StatusCode> {
        if self.limiter.check().is_err() {
            warn!("Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }

        if let Some(secret) = &self.signing_secret {
            let timestamp = header_str(headers, "x-slack-request-timestamp");
            let signature = header_str(headers, "x-slack-signature");
            if !verify_signature(secret, timestamp, body, signature, Utc::now().timestamp()) {
                warn!("Rejected request: invalid Slack signature");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .route("/slack/commands", post(slack_commands))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve the Slack endpoints until Ctrl-C.
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;

    info!("Listening for Slack events on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn slack_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(status) = state.authorize(&headers, &body) {
        return status.into_response();
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Failed to parse Slack event payload: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match envelope {
        EventEnvelope::UrlVerification { challenge } => {
            info!("Answering Slack URL verification");
            Json(json!({ "challenge": challenge })).into_response()
        }
        EventEnvelope::EventCallback { event_id, event } => {
            match event {
                SlackEvent::ReactionAdded(reaction) => {
                    let user = reaction.user.clone().unwrap_or_else(|| "unknown".to_string());
                    match reaction.into_inbound() {
                        Some(inbound) => {
                            info!(
                                "Received reaction_added {:?} from {}: {} on {}/{}",
                                event_id,
                                user,
                                inbound.emoji,
                                inbound.channel_id,
                                inbound.message_ts
                            );
                            let orchestrator = Arc::clone(&state.orchestrator);
                            tokio::spawn(async move {
                                orchestrator.process(inbound).await;
                            });
                        }
                        None => debug!("Ignoring reaction by {} on a non-message item", user),
                    }
                }
                SlackEvent::Unsupported => debug!("Ignoring unsupported Slack event"),
            }
            StatusCode::OK.into_response()
        }
        EventEnvelope::Unsupported => StatusCode::OK.into_response(),
    }
}

fn ephemeral(text: impl Into<String>) -> Response {
    Json(json!({ "response_type": "ephemeral", "text": text.into() })).into_response()
}

async fn slack_commands(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(status) = state.authorize(&headers, &body) {
        return status.into_response();
    }

    let form: HashMap<String, String> = url::form_urlencoded::parse(&body)
        .into_owned()
        .collect();
    let text = form.get("text").map(String::as_str).unwrap_or("");
    let user = form.get("user_id").map(String::as_str).unwrap_or("unknown");
    info!("Retrieval command from {}: {}", user, text);

    let today = Local::now().date_naive();
    let query = match retrieval::parse_command(
        text,
        &state.labels,
        today,
        state.retrieval.max_age_days,
    ) {
        Ok(query) => query,
        Err(e) => {
            info!("Rejected retrieval command: {}", e);
            return ephemeral(e.to_string());
        }
    };

    let Some(response_url) = form.get("response_url").filter(|u| !u.is_empty()).cloned() else {
        warn!("Slash command without response_url; cannot deliver results");
        return ephemeral("Unable to deliver results for this command.");
    };

    info!(
        "Retrieval for :{}: (tag '{}') since {}",
        query.emoji, query.label, query.since
    );
    let ack = format!(
        "Looking up articles tagged '{}' since {}…",
        query.label, query.since
    );
    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let (response_type, text) = match lookup(&task_state, &query).await {
            Ok(text) => ("in_channel", text),
            Err(text) => ("ephemeral", text),
        };
        deliver(&task_state, &response_url, response_type, &text).await;
    });

    ephemeral(ack)
}

/// Run a tag query under the call timeout and format the result.
/// The error side is user-facing text.
async fn lookup(state: &AppState, query: &RetrievalQuery) -> Result<String, String> {
    let call = state.backend.list_by_tag_since(&query.label, query.since);
    match tokio::time::timeout(state.call_timeout, call).await {
        Ok(Ok(articles)) => {
            info!(
                "Found {} articles tagged '{}' since {}",
                articles.len(),
                query.label,
                query.since
            );
            Ok(retrieval::format_articles(
                &query.label,
                query.since,
                articles,
                state.retrieval.max_results,
            ))
        }
        Ok(Err(e)) => {
            error!("Listing articles for '{}' failed: {}", query.label, e);
            Err(format!("Could not fetch articles from {}.", state.backend.name()))
        }
        Err(_) => {
            error!(
                "Listing articles for '{}' timed out after {:?}",
                query.label, state.call_timeout
            );
            Err(format!("{} did not respond in time.", state.backend.name()))
        }
    }
}

async fn deliver(state: &AppState, response_url: &str, response_type: &str, text: &str) {
    let body = json!({ "response_type": response_type, "text": text });
    match state.http.post(response_url).json(&body).send().await {
        Ok(resp) if resp.status().is_success() => debug!("Delivered command response"),
        Ok(resp) => error!("response_url rejected command response: {}", resp.status()),
        Err(e) => error!("Failed to deliver command response: {}", e),
    }
}

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use super::{ChatPlatform, InboundReactionEvent, Message};
use crate::config::normalize_emoji;

type HmacSha256 = Hmac<Sha256>;

const SLACK_API: &str = "https://slack.com/api";

/// Requests whose timestamp is further than this from now are rejected as replays.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

/// Outer Events API payload.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        event_id: Option<String>,
        event: SlackEvent,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    ReactionAdded(ReactionAdded),
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct ReactionAdded {
    pub reaction: String,
    pub item: ReactionItem,
    pub event_ts: String,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReactionItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

impl ReactionAdded {
    /// Returns `None` for reactions on files and other non-message items.
    pub fn into_inbound(self) -> Option<InboundReactionEvent> {
        if !self.item.kind.is_empty() && self.item.kind != "message" {
            return None;
        }
        Some(InboundReactionEvent {
            emoji: normalize_emoji(&self.reaction),
            channel_id: self.item.channel?,
            message_ts: self.item.ts?,
            event_ts: self.event_ts,
        })
    }
}

/// Check `X-Slack-Signature` against HMAC-SHA256 of `v0:<timestamp>:<body>`.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now_unix: i64,
) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if now_unix.abs_diff(ts) > MAX_REQUEST_AGE_SECS.unsigned_abs() {
        return false;
    }

    let Some(provided) = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ApiAck {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Slack Web API client for the two calls the bot makes.
pub struct SlackClient {
    client: reqwest::Client,
    bot_token: String,
    api_base: String,
}

impl SlackClient {
    pub fn new(bot_token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Slack HTTP client")?;
        Ok(Self {
            client,
            bot_token,
            api_base: SLACK_API.to_string(),
        })
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Option<Message>> {
        let url = format!("{}/conversations.history", self.api_base);
        debug!("Fetching message {} from channel {}", ts, channel);

        let response: HistoryResponse = self
            .client
            .get(&url)
            .bearer_auth(&self.bot_token)
            .query(&[
                ("channel", channel),
                ("latest", ts),
                ("limit", "1"),
                ("inclusive", "true"),
            ])
            .send()
            .await
            .context("Failed to call conversations.history")?
            .error_for_status()
            .context("conversations.history returned an error status")?
            .json()
            .await
            .context("Failed to parse conversations.history response")?;

        if !response.ok {
            anyhow::bail!(
                "conversations.history failed: {}",
                response.error.unwrap_or_else(|| "unknown".to_string())
            );
        }

        Ok(response.messages.into_iter().next())
    }

    async fn post_thread_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()> {
        let url = format!("{}/chat.postMessage", self.api_base);
        let body = json!({
            "channel": channel,
            "thread_ts": thread_ts,
            "text": text,
        });

        let ack: ApiAck = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(&body)
            .send()
            .await
            .context("Failed to call chat.postMessage")?
            .error_for_status()
            .context("chat.postMessage returned an error status")?
            .json()
            .await
            .context("Failed to parse chat.postMessage response")?;

        if !ack.ok {
            anyhow::bail!(
                "chat.postMessage failed: {}",
                ack.error.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{timestamp}:").as_bytes());
        mac.update(body);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"type":"event_callback"}"#;
        let sig = sign("s3cret", "1700000000", body);
        assert!(verify_signature("s3cret", "1700000000", body, &sig, 1_700_000_010));
    }

    #[test]
    fn test_signature_wrong_secret_or_body() {
        let body = b"payload";
        let sig = sign("s3cret", "1700000000", body);
        assert!(!verify_signature("other", "1700000000", body, &sig, 1_700_000_000));
        assert!(!verify_signature("s3cret", "1700000000", b"tampered", &sig, 1_700_000_000));
        assert!(!verify_signature("s3cret", "1700000000", body, "garbage", 1_700_000_000));
    }

    #[test]
    fn test_signature_stale_timestamp() {
        let body = b"payload";
        let sig = sign("s3cret", "1700000000", body);
        assert!(!verify_signature("s3cret", "1700000000", body, &sig, 1_700_000_301));
        assert!(!verify_signature("s3cret", "not-a-number", body, &sig, 1_700_000_000));
    }

    #[test]
    fn test_signature_extreme_timestamps_rejected() {
        let body = b"payload";
        let sig = sign("s3cret", "1700000000", body);
        assert!(!verify_signature("s", "-9223372036854775808", body, &sig, 1_700_000_000));
        assert!(!verify_signature("s", "9223372036854775807", body, &sig, -1_700_000_000));
        assert!(!verify_signature("s", "-9223372036854775808", body, &sig, i64::MAX));
    }

    #[test]
    fn test_parse_url_verification() {
        let envelope: EventEnvelope =
            serde_json::from_str(r#"{"type":"url_verification","token":"t","challenge":"abc"}"#)
                .unwrap();
        match envelope {
            EventEnvelope::UrlVerification { challenge } => assert_eq!(challenge, "abc"),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_parse_reaction_added() {
        let raw = r#"{
            "type": "event_callback",
            "event_id": "Ev123",
            "event": {
                "type": "reaction_added",
                "user": "U1",
                "reaction": "bookmark",
                "item": {"type": "message", "channel": "C1", "ts": "1700000000.000100"},
                "event_ts": "1700000005.000200"
            }
        }"#;
        let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
        let EventEnvelope::EventCallback { event, event_id } = envelope else {
            panic!("expected event_callback");
        };
        assert_eq!(event_id.as_deref(), Some("Ev123"));
        let SlackEvent::ReactionAdded(reaction) = event else {
            panic!("expected reaction_added");
        };
        assert_eq!(reaction.user.as_deref(), Some("U1"));
        assert_eq!(
            reaction.into_inbound(),
            Some(InboundReactionEvent {
                emoji: "bookmark".to_string(),
                channel_id: "C1".to_string(),
                message_ts: "1700000000.000100".to_string(),
                event_ts: "1700000005.000200".to_string(),
            })
        );
    }

    #[test]
    fn test_other_events_are_unsupported() {
        let raw = r#"{"type":"event_callback","event":{"type":"message","text":"hi"}}"#;
        let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            envelope,
            EventEnvelope::EventCallback {
                event: SlackEvent::Unsupported,
                ..
            }
        ));

        let raw = r#"{"type":"app_rate_limited","minute_rate_limited":1}"#;
        let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(envelope, EventEnvelope::Unsupported));
    }

    #[test]
    fn test_file_reaction_ignored() {
        let reaction = ReactionAdded {
            reaction: "bookmark".to_string(),
            item: ReactionItem {
                kind: "file".to_string(),
                channel: None,
                ts: None,
            },
            event_ts: "1".to_string(),
            user: None,
        };
        assert_eq!(reaction.into_inbound(), None);
    }

    #[test]
    fn test_history_message_shape() {
        let raw = r#"{
            "ok": true,
            "messages": [{
                "type": "message",
                "text": "",
                "attachments": [{"fallback": "x", "text": "see http://foo.io"}],
                "blocks": [{"type": "section", "text": {"type": "mrkdwn", "text": "hi"}},
                           {"type": "divider"}]
            }]
        }"#;
        let history: HistoryResponse = serde_json::from_str(raw).unwrap();
        let message = &history.messages[0];
        assert_eq!(message.attachments[0].text, "see http://foo.io");
        assert_eq!(message.blocks[0].text.as_ref().unwrap().text, "hi");
        assert!(message.blocks[1].text.is_none());
    }
}

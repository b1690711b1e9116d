pub mod slack;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// A reaction added to a chat message, reduced to what the save workflow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReactionEvent {
    /// Emoji name without surrounding colons (e.g. "bookmark")
    pub emoji: String,
    pub channel_id: String,
    /// Timestamp of the message that was reacted to
    pub message_ts: String,
    /// Timestamp of the reaction event itself
    pub event_ts: String,
}

/// A chat message as fetched from channel history.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Attachment {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Block {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextObject>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TextObject {
    #[serde(default)]
    pub text: String,
}

/// What the orchestrator needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Look up a single message by channel and timestamp.
    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Option<Message>>;

    /// Post `text` as a threaded reply to the message at `thread_ts`.
    async fn post_thread_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()>;
}

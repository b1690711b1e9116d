use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::platform::Message;

/// A validated absolute http(s) URL, in the form it was written (not re-serialised).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedUrl(String);

impl ExtractedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExtractedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token pattern for http(s) URLs. The `$-_` range admits `<` and `>`, so
/// Slack's `<https://...>` auto-link syntax can carry the closing `>` and any
/// punctuation after it into the match; [`validate_and_normalize`] cuts the
/// candidate at the first `>`. `|` is outside the class, so the `<url|label>`
/// form stops at the label separator.
fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"https?://(?:[a-zA-Z0-9$-_@.&+!*(),]|%[0-9a-fA-F]{2})+")
            .expect("URL pattern is a valid regex")
    })
}

fn first_url(text: &str) -> Option<&str> {
    url_pattern().find(text).map(|m| m.as_str())
}

/// Find the first URL-looking token in a message.
///
/// Sources are searched in order and the first hit wins:
/// 1. the message text
/// 2. each attachment's text
/// 3. each `section` block's text
pub fn extract(message: &Message) -> Option<String> {
    if let Some(url) = first_url(&message.text) {
        return Some(url.to_string());
    }

    for attachment in &message.attachments {
        if let Some(url) = first_url(&attachment.text) {
            return Some(url.to_string());
        }
    }

    message
        .blocks
        .iter()
        .filter(|block| block.kind == "section")
        .filter_map(|block| block.text.as_ref())
        .find_map(|text| first_url(&text.text))
        .map(str::to_string)
}

/// Clean up a raw candidate and check that it is an absolute http(s) URL.
///
/// Anything from the first `>` on is dropped. Input without a scheme is
/// coerced to `http://` rather than rejected.
pub fn validate_and_normalize(raw: &str) -> Option<ExtractedUrl> {
    let cleaned = raw
        .split('>')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');

    if cleaned.is_empty() {
        return None;
    }

    let candidate = if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
        cleaned.to_string()
    } else {
        format!("http://{cleaned}")
    };

    let parsed = Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(ExtractedUrl(candidate)),
        _ => None,
    }
}

/// [`extract`] followed by [`validate_and_normalize`].
pub fn extract_and_validate(message: &Message) -> Option<ExtractedUrl> {
    extract(message).and_then(|raw| validate_and_normalize(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Attachment, Block, TextObject};

    fn text_message(text: &str) -> Message {
        Message {
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn section(text: &str) -> Block {
        Block {
            kind: "section".to_string(),
            text: Some(TextObject {
                text: text.to_string(),
            }),
        }
    }

    #[test]
    fn test_trailing_angle_bracket_stripped() {
        let msg = text_message("Check this out https://example.com/a>");
        assert_eq!(
            extract_and_validate(&msg).unwrap().as_str(),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_autolink_followed_by_punctuation() {
        let msg = text_message("<https://example.com/a>, thoughts?");
        assert_eq!(
            extract_and_validate(&msg).unwrap().as_str(),
            "https://example.com/a"
        );

        let msg = text_message("Read <https://a.com>.");
        assert_eq!(extract_and_validate(&msg).unwrap().as_str(), "https://a.com");
    }

    #[test]
    fn test_slack_autolink_with_label() {
        let msg = text_message("see <https://example.com/post|example.com/post> now");
        assert_eq!(
            extract_and_validate(&msg).unwrap().as_str(),
            "https://example.com/post"
        );
    }

    #[test]
    fn test_first_url_in_text_wins() {
        let msg = text_message("http://first.io and https://second.io");
        assert_eq!(extract(&msg).as_deref(), Some("http://first.io"));
    }

    #[test]
    fn test_attachment_used_when_text_has_no_url() {
        let msg = Message {
            text: String::new(),
            attachments: vec![Attachment {
                text: "see http://foo.io".to_string(),
            }],
            blocks: vec![],
        };
        assert_eq!(extract_and_validate(&msg).unwrap().as_str(), "http://foo.io");
    }

    #[test]
    fn test_text_beats_attachments_and_blocks() {
        let msg = Message {
            text: "read https://text.example".to_string(),
            attachments: vec![Attachment {
                text: "https://attachment.example".to_string(),
            }],
            blocks: vec![section("https://block.example")],
        };
        assert_eq!(extract(&msg).as_deref(), Some("https://text.example"));
    }

    #[test]
    fn test_only_section_blocks_are_searched() {
        let msg = Message {
            text: "nothing here".to_string(),
            attachments: vec![Attachment {
                text: "no link".to_string(),
            }],
            blocks: vec![
                Block {
                    kind: "header".to_string(),
                    text: Some(TextObject {
                        text: "https://header.example".to_string(),
                    }),
                },
                section("plain words"),
                section("look https://section.example/x"),
            ],
        };
        assert_eq!(
            extract(&msg).as_deref(),
            Some("https://section.example/x")
        );
    }

    #[test]
    fn test_no_url_anywhere() {
        let msg = Message {
            text: "just chatting".to_string(),
            attachments: vec![Attachment::default()],
            blocks: vec![Block {
                kind: "section".to_string(),
                text: None,
            }],
        };
        assert_eq!(extract(&msg), None);
        assert_eq!(extract_and_validate(&msg), None);
    }

    // Scheme-less input is accepted and coerced to http:// on purpose.
    #[test]
    fn test_schemeless_input_coerced_to_http() {
        assert_eq!(
            validate_and_normalize("example.com/x").unwrap().as_str(),
            "http://example.com/x"
        );
    }

    #[test]
    fn test_not_a_url_rejected() {
        assert_eq!(validate_and_normalize("not a url"), None);
        assert_eq!(validate_and_normalize("   "), None);
        assert_eq!(validate_and_normalize(">"), None);
    }

    #[test]
    fn test_whitespace_and_quotes_trimmed() {
        assert_eq!(
            validate_and_normalize("  \"https://example.com/q?a=1\"  ")
                .unwrap()
                .as_str(),
            "https://example.com/q?a=1"
        );
    }

    #[test]
    fn test_url_not_reserialised() {
        // Url::parse would add a trailing slash; the original form is kept.
        assert_eq!(
            validate_and_normalize("https://example.com").unwrap().as_str(),
            "https://example.com"
        );
    }
}

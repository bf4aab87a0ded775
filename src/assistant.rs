//! Chat relay to a hosted, OpenAI-compatible completion endpoint.
//!
//! The store never calls this directly; handlers call it and then write the
//! outcome back through an ordinary store mutation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{ChatMessage, ChatRole, ModelId, NoteRecord, Settings};

pub const MIN_API_KEY_LEN: usize = 20;

const LESSON_DESIGN_PROMPT: &str = "You are a lesson-planning assistant for classroom teachers. \
Suggest practical, age-appropriate lesson designs, activities and assessment ideas. \
Be concise, use short headings and bullet points, and ask one clarifying question when the request is ambiguous.";

const NOTE_SUMMARY_PROMPT: &str = "Summarise these teacher observation notes in three bullet points or fewer. \
Keep names and concrete observations; drop filler.";

pub fn is_valid_api_key(key: &str) -> bool {
    key.trim().len() >= MIN_API_KEY_LEN
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("no API key configured")]
    Configuration,
    #[error("provider returned an error: {0}")]
    Upstream(String),
    #[error("provider returned no text")]
    EmptyResponse,
    #[error("request failed: {0}")]
    Transport(String),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Configuration => "configuration_error",
            ChatError::Upstream(_) => "upstream_error",
            ChatError::EmptyResponse => "empty_response",
            ChatError::Transport(_) => "transport_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            system_prompt: LESSON_DESIGN_PROMPT.to_string(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

impl ChatOptions {
    pub fn summary() -> Self {
        Self {
            system_prompt: NOTE_SUMMARY_PROMPT.to_string(),
            max_tokens: 300,
            temperature: 0.3,
        }
    }
}

/// One fully-formed completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub api_key: String,
    pub model: ModelId,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub trait ChatService {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError>;
}

/// Sends `messages` after the options' system prompt. Fails before any
/// network traffic when no API key is set.
pub fn send_chat(
    service: &dyn ChatService,
    settings: &Settings,
    messages: &[ChatMessage],
    options: &ChatOptions,
) -> Result<String, ChatError> {
    let api_key = settings.api_key.trim();
    if api_key.is_empty() {
        return Err(ChatError::Configuration);
    }

    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(ChatMessage::new(ChatRole::System, options.system_prompt.clone()));
    wire.extend(messages.iter().filter(|m| m.role != ChatRole::System).cloned());

    let request = CompletionRequest {
        api_key: api_key.to_string(),
        model: settings.model,
        messages: wire,
        max_tokens: options.max_tokens,
        temperature: options.temperature,
    };
    tracing::debug!(model = %request.model, messages = request.messages.len(), "sending chat");

    let text = service.complete(&request)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::EmptyResponse);
    }
    Ok(text.to_string())
}

pub fn summarize_notes(
    service: &dyn ChatService,
    settings: &Settings,
    notes: &[NoteRecord],
) -> Result<String, ChatError> {
    let body = notes
        .iter()
        .map(|n| format!("- [{}] {}", n.created_at.format("%Y-%m-%d"), n.text))
        .collect::<Vec<_>>()
        .join("\n");
    send_chat(
        service,
        settings,
        &[ChatMessage::new(ChatRole::User, body)],
        &ChatOptions::summary(),
    )
}

//
// HTTP implementation
//

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireMessage>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpChatService {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpChatService {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl ChatService for HttpChatService {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = WireRequest {
            model: request.model.as_str(),
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", request.api_key))
            .set("Content-Type", "application/json")
            .send_json(&body);

        let response = match response {
            Ok(r) => r,
            Err(ureq::Error::Status(status, r)) => {
                let text = r.into_string().unwrap_or_default();
                return Err(ChatError::Upstream(upstream_message(status, &text)));
            }
            Err(ureq::Error::Transport(t)) => return Err(ChatError::Transport(t.to_string())),
        };

        let parsed: WireResponse = response
            .into_json()
            .map_err(|e| ChatError::Transport(format!("unreadable response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or(ChatError::EmptyResponse)
    }
}

/// Pulls the provider's own message out of an error body when there is one.
fn upstream_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::cell::RefCell;

    struct CannedChat {
        reply: Result<String, ChatError>,
        seen: RefCell<Vec<CompletionRequest>>,
    }

    impl CannedChat {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChatService for CannedChat {
        fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
            self.seen.borrow_mut().push(request.clone());
            self.reply.clone()
        }
    }

    fn keyed() -> Settings {
        Settings {
            api_key: "sk-test-0123456789abcdef".into(),
            ..Settings::default()
        }
    }

    #[test]
    fn api_key_validation_trims() {
        assert!(is_valid_api_key("  sk-0123456789abcdefghij  "));
        assert!(!is_valid_api_key("short"));
        assert!(!is_valid_api_key("                         "));
    }

    #[test]
    fn missing_key_fails_without_calling_out() {
        let chat = CannedChat::replying("hello");
        let err = send_chat(&chat, &Settings::default(), &[], &ChatOptions::default()).unwrap_err();
        assert_eq!(err, ChatError::Configuration);
        assert!(chat.seen.borrow().is_empty());
    }

    #[test]
    fn system_prompt_leads_and_caller_system_messages_drop() {
        let chat = CannedChat::replying("  Try a jigsaw activity.  ");
        let history = vec![
            ChatMessage::new(ChatRole::System, "ignore me"),
            ChatMessage::new(ChatRole::User, "Ideas for fractions?"),
        ];
        let out = send_chat(&chat, &keyed(), &history, &ChatOptions::default()).unwrap();
        assert_eq!(out, "Try a jigsaw activity.");

        let seen = chat.seen.borrow();
        let sent = &seen[0].messages;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, ChatRole::System);
        assert_eq!(sent[0].content, LESSON_DESIGN_PROMPT);
        assert_eq!(sent[1].content, "Ideas for fractions?");
        assert_eq!(seen[0].max_tokens, 1024);
    }

    #[test]
    fn summary_uses_condensed_bounds() {
        let chat = CannedChat::replying("- works well in pairs");
        let notes = vec![NoteRecord::new("Amy led the group today", Utc::now())];
        summarize_notes(&chat, &keyed(), &notes).unwrap();
        let seen = chat.seen.borrow();
        assert_eq!(seen[0].max_tokens, 300);
        assert_eq!(seen[0].temperature, 0.3);
        assert_eq!(seen[0].messages[0].content, NOTE_SUMMARY_PROMPT);
        assert!(seen[0].messages[1].content.contains("Amy led the group today"));
    }

    #[test]
    fn blank_reply_is_empty_response() {
        let chat = CannedChat::replying("   ");
        let err = send_chat(&chat, &keyed(), &[], &ChatOptions::default()).unwrap_err();
        assert_eq!(err, ChatError::EmptyResponse);
    }

    #[test]
    fn upstream_message_prefers_provider_text() {
        assert_eq!(
            upstream_message(401, r#"{"error":{"message":"Incorrect API key provided"}}"#),
            "Incorrect API key provided"
        );
        assert_eq!(upstream_message(429, r#"{"error":"rate limited"}"#), "rate limited");
        assert_eq!(upstream_message(502, "<html>bad gateway</html>"), "HTTP 502");
    }
}

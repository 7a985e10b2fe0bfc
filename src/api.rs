use crate::models::{Message, ModelConfig, Role};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

// Alias for the stream of content deltas a streaming request yields
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Provider-side failures. Both kinds are caught per model by the dispatch
/// loop and rendered as a visible inline message; they never abort the
/// remaining models in a selection.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    RequestFailed(String),
    #[error("provider response malformed: {0}")]
    ResponseMalformed(String),
}

// Trait defining the interface for chat completion providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Single request/response exchange. `Ok(None)` means the response
    /// parsed but carried no reply text (unrecognized shape).
    async fn send_chat_request(
        &self,
        config: &ModelConfig,
        api_key: &str,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Result<Option<String>, ProviderError>;

    // Returns a stream of content deltas.
    async fn send_chat_stream_request(
        &self,
        config: &ModelConfig,
        api_key: &str,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Result<DeltaStream, ProviderError>;
}

// --- OpenAI Compatible Provider Implementation ---

#[derive(Serialize, Debug)]
struct ChatRequestBody {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireMessage {
    role: String,
    content: String,
}

impl WireMessage {
    fn from_message(message: &Message) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
        }
    }
}

// Response structure for a complete (non-streaming) exchange. Every field
// is tolerant of absence so shape drift degrades to "no content" instead
// of a parse failure.
#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionChoice {
    message: Option<ChatCompletionMessage>,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionMessage {
    content: Option<String>,
}

// Response structure for STREAMING chunks
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// One parsed server-sent event from the completion stream.
#[derive(Debug, PartialEq)]
pub(crate) enum StreamEvent {
    Delta(String),
    Done,
    Skip,
}

/// Extracts the reply text from a complete response body. An undecodable
/// body is a malformed-response error; a decodable body without content
/// yields `None`.
pub(crate) fn extract_reply(body: &str) -> Result<Option<String>, ProviderError> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ResponseMalformed(e.to_string()))?;
    Ok(response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content))
}

/// Parses the data field of one SSE event. `[DONE]` terminates the stream;
/// ping events and content-free chunks are skipped.
pub(crate) fn parse_stream_event(data: &str) -> Result<StreamEvent, ProviderError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let delta = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content);
            Ok(match delta {
                Some(content) => StreamEvent::Delta(content),
                None => StreamEvent::Skip,
            })
        }
        Err(e) => {
            // Some providers interleave keep-alive events; skip known ones
            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(value) if value.get("type") == Some(&serde_json::Value::String("ping".into())) => {
                    log::debug!("Received stream ping event, skipping");
                    Ok(StreamEvent::Skip)
                }
                _ => {
                    log::warn!("Failed to parse stream chunk: {} - Data: {}", e, data);
                    Err(ProviderError::ResponseMalformed(e.to_string()))
                }
            }
        }
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
}

impl OpenAICompatibleProvider {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    fn build_body(
        config: &ModelConfig,
        system_prompt: Option<&str>,
        messages: &[Message],
        stream: bool,
    ) -> ChatRequestBody {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = system_prompt {
            wire_messages.push(WireMessage {
                role: "system".to_string(),
                content: prompt.to_string(),
            });
        }
        wire_messages.extend(messages.iter().map(WireMessage::from_message));
        ChatRequestBody {
            model: config.model.clone(),
            messages: wire_messages,
            stream,
        }
    }

    async fn post_chat(
        &self,
        config: &ModelConfig,
        api_key: &str,
        body: &ChatRequestBody,
    ) -> Result<reqwest::Response, ProviderError> {
        let request_url = format!("{}/chat/completions", config.api_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&request_url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            log::error!("Chat request failed with status {}: {}", status, error_body);
            return Err(ProviderError::RequestFailed(format!(
                "status {}: {}",
                status, error_body
            )));
        }
        Ok(response)
    }
}

impl Default for OpenAICompatibleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for OpenAICompatibleProvider {
    async fn send_chat_request(
        &self,
        config: &ModelConfig,
        api_key: &str,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Result<Option<String>, ProviderError> {
        log::info!(
            "Sending request to {} using model: {}",
            config.api_url,
            config.model
        );
        let body = Self::build_body(config, system_prompt, messages, false);
        let response = self.post_chat(config, api_key, &body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        extract_reply(&text)
    }

    async fn send_chat_stream_request(
        &self,
        config: &ModelConfig,
        api_key: &str,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Result<DeltaStream, ProviderError> {
        log::info!(
            "Sending STREAM request to {} using model: {}",
            config.api_url,
            config.model
        );
        let body = Self::build_body(config, system_prompt, messages, true);
        let response = self.post_chat(config, api_key, &body).await?;

        // Process the SSE stream: stop at [DONE], drop pings and empty
        // deltas, surface parse failures as stream items
        let delta_stream = response
            .bytes_stream()
            .eventsource()
            .map(|event_result| match event_result {
                Ok(event) => parse_stream_event(&event.data),
                Err(e) => Err(ProviderError::RequestFailed(e.to_string())),
            })
            .take_while(|parsed| future::ready(!matches!(parsed, Ok(StreamEvent::Done))))
            .filter_map(|parsed| {
                future::ready(match parsed {
                    Ok(StreamEvent::Delta(content)) => Some(Ok(content)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Box::pin(delta_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_reply_text() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}}]}"#;
        assert_eq!(extract_reply(body).unwrap(), Some("Hi there".to_string()));
    }

    #[test]
    fn unrecognized_shape_yields_none() {
        assert_eq!(extract_reply("{}").unwrap(), None);
        assert_eq!(extract_reply(r#"{"choices":[]}"#).unwrap(), None);
        assert_eq!(
            extract_reply(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap(),
            None
        );
    }

    #[test]
    fn undecodable_body_is_malformed() {
        assert!(matches!(
            extract_reply("<html>oops</html>"),
            Err(ProviderError::ResponseMalformed(_))
        ));
    }

    #[test]
    fn parses_stream_events_in_order() {
        let mut acc = String::new();
        for data in [
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
        ] {
            if let StreamEvent::Delta(piece) = parse_stream_event(data).unwrap() {
                acc.push_str(&piece);
            }
        }
        assert_eq!(acc, "Hello");
    }

    #[test]
    fn done_sentinel_terminates() {
        assert_eq!(parse_stream_event(" [DONE] ").unwrap(), StreamEvent::Done);
    }

    #[test]
    fn ping_events_are_skipped() {
        assert_eq!(
            parse_stream_event(r#"{"type":"ping"}"#).unwrap(),
            StreamEvent::Skip
        );
    }

    #[test]
    fn garbage_chunk_is_malformed() {
        assert!(matches!(
            parse_stream_event("not json"),
            Err(ProviderError::ResponseMalformed(_))
        ));
    }

    #[test]
    fn system_prompt_is_prepended() {
        let config = ModelConfig {
            model: "gpt-4o-mini".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            api_key_ref: None,
        };
        let body = OpenAICompatibleProvider::build_body(
            &config,
            Some("You are helpful."),
            &[Message::user("Hello")],
            false,
        );
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(body.messages[1].content, "Hello");
    }
}

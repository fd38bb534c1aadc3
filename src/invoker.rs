//! Model invocation capability consumed by the pattern engines.
//!
//! The engines never talk to a model backend directly. They build an
//! [`InvokeRequest`] and hand it to a [`ModelInvoker`], which returns the
//! generated text or a classified [`InvokeError`](crate::error::InvokeError).
//! Retry policy belongs to the invoker implementation, not to the engines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InvokeResult;

/// Message in a model conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions for the model.
    System,
    /// Caller-supplied content.
    User,
    /// Prior model output.
    Assistant,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeOptions {
    /// Model or pipe identifier the invoker routes the call to.
    pub model: String,
    /// Sampling temperature override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl InvokeOptions {
    /// Options targeting the given model or pipe.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            stop: Vec::new(),
        }
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Add a stop sequence
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// A single prompt sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Conversation, system prompt first.
    pub messages: Vec<Message>,
    /// Model configuration for this call.
    pub options: InvokeOptions,
}

impl InvokeRequest {
    /// Create a request from messages and options.
    pub fn new(messages: Vec<Message>, options: InvokeOptions) -> Self {
        Self { messages, options }
    }

    /// Content of the last user message, or an empty string.
    pub fn last_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Prompt in, text out. Fallible.
///
/// Implementations must be safe to call concurrently: sibling tree
/// expansions share one invoker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run the request and return the generated text.
    async fn invoke(&self, request: InvokeRequest) -> InvokeResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("s").role, MessageRole::System);
        assert_eq!(Message::user("u").role, MessageRole::User);
        assert_eq!(Message::assistant("a").role, MessageRole::Assistant);
        assert_eq!(Message::user("hello").content, "hello");
    }

    #[test]
    fn test_message_role_serialize() {
        let json = serde_json::to_string(&Message::system("x")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"x"}"#);
    }

    #[test]
    fn test_invoke_options_builder() {
        let options = InvokeOptions::new("tot-pipe")
            .with_temperature(0.3)
            .with_max_tokens(512)
            .with_stop("END");
        assert_eq!(options.model, "tot-pipe");
        assert_eq!(options.temperature, Some(0.3));
        assert_eq!(options.max_tokens, Some(512));
        assert_eq!(options.stop, vec!["END".to_string()]);
    }

    #[test]
    fn test_invoke_options_serialize_skips_empty() {
        let json = serde_json::to_string(&InvokeOptions::new("m")).unwrap();
        assert_eq!(json, r#"{"model":"m"}"#);
    }

    #[test]
    fn test_last_user_content() {
        let request = InvokeRequest::new(
            vec![
                Message::system("sys"),
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
            ],
            InvokeOptions::new("m"),
        );
        assert_eq!(request.last_user_content(), "second");

        let request = InvokeRequest::new(vec![Message::system("sys")], InvokeOptions::new("m"));
        assert_eq!(request.last_user_content(), "");
    }

    #[tokio::test]
    async fn test_mock_invoker_returns_scripted_text() {
        let mut mock = MockModelInvoker::new();
        mock.expect_invoke()
            .times(1)
            .returning(|req| Ok(format!("echo: {}", req.last_user_content())));

        let text = mock
            .invoke(InvokeRequest::new(
                vec![Message::user("ping")],
                InvokeOptions::new("m"),
            ))
            .await
            .unwrap();
        assert_eq!(text, "echo: ping");
    }
}

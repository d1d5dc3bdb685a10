//! Slash-command wire types.
//!
//! The chat platform posts a form-encoded payload for every `/vagrant ...`
//! invocation and expects a JSON body back.

use serde::{Deserialize, Serialize};

/// Decoded slash-command payload.
///
/// Only `text` and `token` are interpreted; the remaining fields are carried
/// for logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPayload {
    pub text: String,
    pub token: Option<String>,
    pub command: Option<String>,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub team_id: Option<String>,
    pub team_domain: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub response_url: Option<String>,
}

impl CommandPayload {
    /// Payload carrying only command text.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Command text split into whitespace tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    tokens: Vec<String>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens = text.split_whitespace().map(str::to_string).collect();
        Self { text, tokens }
    }

    /// Raw text as received.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// First token, if any.
    pub fn word(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Tokens after the command word.
    pub fn args(&self) -> &[String] {
        self.tokens.get(1..).unwrap_or(&[])
    }
}

impl From<&CommandPayload> for Command {
    fn from(payload: &CommandPayload) -> Self {
        Self::new(payload.text.clone())
    }
}

/// Where the chat platform shows the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Visible to the whole channel.
    #[default]
    InChannel,
}

/// Response body sent back to the chat platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub response_type: ResponseType,
    pub text: String,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line of text, terminated with a newline.
    pub fn push_line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    pub fn push_str(&mut self, text: &str) {
        self.text.push_str(text);
    }
}

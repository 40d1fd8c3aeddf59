//! Typed chat over the non-streaming `generateContent` REST endpoint.

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::TransportError;
use crate::tools::{ToolDispatcher, ToolInvocation};

/// REST base shared by every text model.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Shown to the user when the text request fails for any reason.
pub const TEXT_UNAVAILABLE: &str = "Text service unavailable. Check your connection.";

/// What the model sent back for one message.
#[derive(Debug, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub function_calls: Vec<ToolInvocation>,
}

pub struct TextChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    system_instruction: String,
}

impl TextChat {
    /// Snapshot the settings needed for one conversation turn.
    pub fn from_settings(settings: &Settings) -> Result<Self, TransportError> {
        let api_key = settings.api_key().ok_or(TransportError::MissingApiKey)?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: settings.text_model().to_string(),
            system_instruction: super::system_instruction(settings),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self) -> String {
        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    /// Send one user message and return the raw reply.
    pub async fn generate(&self, message: &str) -> anyhow::Result<ModelReply> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": message }] }],
            "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
            "tools": [{ "functionDeclarations": crate::tools::declarations() }]
        });
        debug!(model = %self.model, chars = message.len(), "Sending text message");
        let json = self.post(&body).await?;
        parse_reply(&json)
    }

    /// POST a `generateContent` body and return the decoded response.
    pub(super) async fn post(&self, body: &Value) -> anyhow::Result<Value> {
        let resp = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .context("text request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("generateContent error {}: {}", status, body);
        }

        resp.json().await.context("invalid generateContent body")
    }

    /// Send a message, run any function calls, and compose the reply text.
    pub async fn send(&self, message: &str, dispatcher: &ToolDispatcher) -> anyhow::Result<String> {
        let reply = self.generate(message).await?;
        Ok(compose_reply(reply, dispatcher))
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<ToolInvocation>,
}

/// Pull the text and function calls out of the first candidate.
pub fn parse_reply(json: &Value) -> anyhow::Result<ModelReply> {
    let candidates: Vec<Candidate> = match json.get("candidates") {
        Some(c) => serde_json::from_value(c.clone()).context("malformed candidates")?,
        None => Vec::new(),
    };

    let mut reply = ModelReply::default();
    let parts = candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();
    for part in parts {
        if let Some(text) = part.text {
            reply.text.push_str(&text);
        }
        if let Some(call) = part.function_call {
            reply.function_calls.push(call);
        }
    }
    Ok(reply)
}

/// Run the reply's function calls in order. Each result is appended as
/// `[Action: ...]`, or becomes the reply when the model sent no text.
pub fn compose_reply(reply: ModelReply, dispatcher: &ToolDispatcher) -> String {
    let mut text = reply.text;
    for call in &reply.function_calls {
        let result = dispatcher.dispatch(call);
        if text.is_empty() {
            text = result.text;
        } else {
            text.push_str(&format!("\n\n[Action: {}]", result.text));
        }
    }
    text
}

/// One typed-chat turn. Failures become [`TEXT_UNAVAILABLE`].
pub async fn reply_to(settings: &Settings, dispatcher: &ToolDispatcher, message: &str) -> String {
    let chat = match TextChat::from_settings(settings) {
        Ok(chat) => chat,
        Err(e) => return e.to_string(),
    };
    match chat.send(message, dispatcher).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Text chat failed: {:#}", e);
            TEXT_UNAVAILABLE.to_string()
        }
    }
}

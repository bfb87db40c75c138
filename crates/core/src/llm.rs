use crate::error::SearchError;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

/// One credential for the text-generation service.
#[derive(Clone)]
pub struct ApiKey(Arc<SecretString>);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(raw.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Short prefix safe to put in logs.
    pub fn fingerprint(&self) -> String {
        let prefix: String = self.expose().chars().take(6).collect();
        format!("{prefix}...")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.fingerprint())
    }
}

/// Outcome class of a failed model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Credential exhausted, rate limited or rejected; another key may succeed.
    Retriable(String),
    /// Anything else; rotating keys will not help.
    Fatal(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Retriable(message) => write!(f, "retriable model error: {message}"),
            ModelError::Fatal(message) => write!(f, "model error: {message}"),
        }
    }
}

impl std::error::Error for ModelError {}

impl ModelError {
    /// Sorts a free-form failure message into the retry classes.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let exhausted = ["api key", "token", "rate limit", "rate_limit", "quota", "unauthorized"]
            .iter()
            .any(|marker| lowered.contains(marker));

        if exhausted {
            ModelError::Retriable(message)
        } else {
            ModelError::Fatal(message)
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, ModelError::Retriable(_))
    }
}

/// Text-generation collaborator constrained to JSON replies.
#[async_trait]
pub trait TextModel {
    async fn complete_json(
        &self,
        credential: &ApiKey,
        prompt: &str,
        temperature: f32,
    ) -> Result<Value, ModelError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatModel {
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl ChatModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            endpoint: format!("{}/chat/completions", base.as_str().trim_end_matches('/')),
            model: model.into(),
            timeout,
        })
    }

    /// A fresh HTTP client per attempt, so no connection state leaks from a rejected key.
    fn client(&self) -> Result<Client, ModelError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| ModelError::Fatal(error.to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextModel for ChatModel {
    async fn complete_json(
        &self,
        credential: &ApiKey,
        prompt: &str,
        temperature: f32,
    ) -> Result<Value, ModelError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(credential.expose())
            .json(&request)
            .send()
            .await
            .map_err(|error| ModelError::classify(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|error| ModelError::Fatal(format!("malformed completion envelope: {error}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        parse_json_reply(&content)
    }
}

fn classify_status(status: StatusCode, body: String) -> ModelError {
    let message = format!("{status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            ModelError::Retriable(message)
        }
        _ => ModelError::classify(message),
    }
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok())
        .as_ref()
}

/// Pulls a JSON document out of a model reply, tolerating markdown fences and
/// prose around the object.
pub fn parse_json_reply(content: &str) -> Result<Value, ModelError> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = fenced_block()
        .and_then(|fence| fence.captures(trimmed))
        .and_then(|captures| captures.get(1))
    {
        if let Ok(value) = serde_json::from_str::<Value>(inner.as_str().trim()) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(ModelError::Fatal(format!(
        "reply is not valid json: {}",
        trimmed.chars().take(120).collect::<String>()
    )))
}

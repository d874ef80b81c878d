//! Conversational oracle.
//!
//! The oracle proposes what to say or which tool to call next. It never
//! executes anything itself: every tool call it returns goes through the
//! verification gate before dispatch.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use frontdesk_core::config::{LlmConfig, LlmProvider};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleMessage {
    pub role: Role,
    pub content: String,
    /// Set on assistant messages that requested a tool, and on the tool
    /// message carrying its result.
    pub tool_call: Option<OracleToolCall>,
}

impl OracleMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), tool_call: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub messages: Vec<OracleMessage>,
    /// Function schemas for the tools the current state permits.
    pub tools: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleReply {
    Text { text: String },
    ToolCall { id: String, name: String, arguments: Value },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    #[error("oracle authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("oracle rate limit exceeded")]
    RateLimited,
    #[error("oracle rejected request: {0}")]
    InvalidRequest(String),
    #[error("oracle network error: {0}")]
    Network(String),
    #[error("oracle call timed out")]
    Timeout,
    #[error("oracle reply could not be parsed: {0}")]
    Parse(String),
}

impl OracleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Network(_) | Self::Timeout | Self::Unavailable(_))
    }
}

#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;
    async fn respond(&self, request: &OracleRequest) -> Result<OracleReply, OracleError>;
}

/// Any OpenAI-style `/chat/completions` endpoint, hosted or local (Ollama
/// serves the same API under `/v1`).
pub struct OpenAiCompatibleOracle {
    client: reqwest::Client,
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleOracle {
    pub fn from_config(config: &LlmConfig) -> Result<Self, OracleError> {
        if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
            return Err(OracleError::AuthenticationFailed("llm.api_key is not set".to_owned()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| OracleError::Unavailable(error.to_string()))?;
        Ok(Self {
            client,
            provider: config.provider,
            endpoint: completions_endpoint(
                config.provider,
                config.base_url.as_deref().unwrap_or(default_base_url(config.provider)),
            ),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Oracle for OpenAiCompatibleOracle {
    fn name(&self) -> &str {
        match self.provider {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Ollama => "ollama",
        }
    }

    async fn respond(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let payload = completion_payload(&self.model, request);

        let mut builder = self.client.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                OracleError::Timeout
            } else if error.is_connect() {
                OracleError::Unavailable(error.to_string())
            } else {
                OracleError::Network(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => OracleError::AuthenticationFailed(body),
                429 => OracleError::RateLimited,
                500..=599 => OracleError::Unavailable(format!("status {status}")),
                _ => OracleError::InvalidRequest(body),
            });
        }

        let data: Value =
            response.json().await.map_err(|error| OracleError::Parse(error.to_string()))?;
        parse_completion(&data)
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com/v1",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}

pub fn completions_endpoint(provider: LlmProvider, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    match provider {
        LlmProvider::Ollama if !base.ends_with("/v1") => format!("{base}/v1/chat/completions"),
        _ => format!("{base}/chat/completions"),
    }
}

pub fn completion_payload(model: &str, request: &OracleRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| match (&message.role, &message.tool_call) {
            (Role::Assistant, Some(call)) => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments.to_string() },
                }],
            }),
            (Role::Tool, Some(call)) => json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": message.content,
            }),
            (role, _) => json!({ "role": role.as_str(), "content": message.content }),
        })
        .collect();

    let mut payload = json!({ "model": model, "messages": messages, "stream": false });
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(request.tools.clone());
        payload["tool_choice"] = json!("auto");
    }
    payload
}

/// Reads the first choice. A tool call wins over accompanying text.
pub fn parse_completion(data: &Value) -> Result<OracleReply, OracleError> {
    let message = data
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| OracleError::Parse("no message in first choice".to_owned()))?;

    if let Some(call) =
        message.get("tool_calls").and_then(Value::as_array).and_then(|calls| calls.first())
    {
        let function = call
            .get("function")
            .ok_or_else(|| OracleError::Parse("tool call without function".to_owned()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| OracleError::Parse("tool call without name".to_owned()))?;
        // OpenAI sends arguments as a JSON string; Ollama sometimes sends an object.
        let arguments = match function.get("arguments") {
            Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
            Some(Value::String(raw)) => serde_json::from_str(raw)
                .map_err(|error| OracleError::Parse(format!("tool arguments: {error}")))?,
            Some(other) => other.clone(),
            None => json!({}),
        };
        let id = call.get("id").and_then(Value::as_str).unwrap_or("call_0").to_owned();
        return Ok(OracleReply::ToolCall { id, name: name.to_owned(), arguments });
    }

    match message.get("content").and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => Ok(OracleReply::Text { text: text.to_owned() }),
        _ => Err(OracleError::Parse("empty content".to_owned())),
    }
}

/// Replays canned replies in order. Used by tests and local demos.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<OracleReply, OracleError>>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: impl IntoIterator<Item = OracleReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Result<OracleReply, OracleError>) {
        lock(&self.replies).push_back(reply);
    }

    pub fn say(text: &str) -> OracleReply {
        OracleReply::Text { text: text.to_owned() }
    }

    pub fn call(name: &str, arguments: Value) -> OracleReply {
        OracleReply::ToolCall { id: format!("call_{name}"), name: name.to_owned(), arguments }
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<OracleRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn respond(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        lock(&self.requests).push(request.clone());
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Unavailable("script exhausted".to_owned())))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use frontdesk_core::config::LlmProvider;
    use serde_json::json;

    use super::{
        completion_payload, completions_endpoint, parse_completion, OracleError, OracleMessage,
        OracleReply, OracleRequest, OracleToolCall, Role,
    };

    #[test]
    fn ollama_endpoint_gains_v1_prefix_once() {
        assert_eq!(
            completions_endpoint(LlmProvider::Ollama, "http://localhost:11434/"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint(LlmProvider::Ollama, "http://localhost:11434/v1"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint(LlmProvider::OpenAi, "https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn payload_pairs_tool_calls_with_results() {
        let call = OracleToolCall {
            id: "call_1".to_owned(),
            name: "search_knowledge_base".to_owned(),
            arguments: json!({ "query": "hours" }),
        };
        let request = OracleRequest {
            messages: vec![
                OracleMessage::new(Role::System, "be brief"),
                OracleMessage { role: Role::Assistant, content: String::new(), tool_call: Some(call.clone()) },
                OracleMessage { role: Role::Tool, content: "{\"answer\":\"9-5\"}".to_owned(), tool_call: Some(call) },
            ],
            tools: vec![json!({ "type": "function", "function": { "name": "end_call" } })],
        };

        let payload = completion_payload("llama3.1", &request);

        assert_eq!(payload["model"], "llama3.1");
        assert_eq!(payload["messages"][1]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"hours\"}");
        assert_eq!(payload["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(payload["tool_choice"], "auto");
    }

    #[test]
    fn payload_omits_tools_when_none_are_offered() {
        let request = OracleRequest { messages: vec![OracleMessage::new(Role::User, "hi")], tools: Vec::new() };
        let payload = completion_payload("m", &request);
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn parses_string_and_object_tool_arguments() {
        let openai = json!({ "choices": [{ "message": { "tool_calls": [{
            "id": "call_9",
            "function": { "name": "verify_identity", "arguments": "{\"name\":\"Jordan Rivera\",\"date_of_birth\":\"1985-04-12\"}" }
        }]}}]});
        let ollama = json!({ "choices": [{ "message": { "content": "", "tool_calls": [{
            "function": { "name": "end_call", "arguments": {} }
        }]}}]});

        assert_eq!(
            parse_completion(&openai).expect("openai"),
            OracleReply::ToolCall {
                id: "call_9".to_owned(),
                name: "verify_identity".to_owned(),
                arguments: json!({ "name": "Jordan Rivera", "date_of_birth": "1985-04-12" }),
            }
        );
        assert!(matches!(
            parse_completion(&ollama).expect("ollama"),
            OracleReply::ToolCall { ref name, .. } if name == "end_call"
        ));
    }

    #[test]
    fn empty_content_is_a_parse_error() {
        let data = json!({ "choices": [{ "message": { "content": "   " } }] });
        assert!(matches!(parse_completion(&data), Err(OracleError::Parse(_))));
        assert!(matches!(parse_completion(&json!({})), Err(OracleError::Parse(_))));
    }

    #[test]
    fn text_reply_is_trimmed() {
        let data = json!({ "choices": [{ "message": { "content": " We open at 8. " } }] });
        assert_eq!(
            parse_completion(&data).expect("text"),
            OracleReply::Text { text: "We open at 8.".to_owned() }
        );
    }
}

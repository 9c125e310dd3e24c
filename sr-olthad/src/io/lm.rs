//! Instruct-LM abstraction.
//!
//! The [`InstructLm`] trait decouples the agents from the actual LM backend
//! (an OpenAI-compatible chat completions API). Tests use scripted LMs that
//! return predetermined responses without any network traffic.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::agents::AgentName;
use crate::io::config::OpenAiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LmError {
    #[error("LM request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("LM API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed LM response: {0}")]
    Malformed(String),
    #[error("no API key: set `openai.api_key` or the {0} environment variable")]
    MissingApiKey(String),
    /// Failure reported by a non-HTTP backend.
    #[error("{0}")]
    Backend(String),
}

/// Receives streamed LM output.
///
/// When several generations run concurrently (voting), `stream_idx` tells
/// the streams apart; a lone generation passes `None`.
pub trait LmStreamsHandler: Send + Sync {
    fn handle(&self, chunk: &str, stream_idx: Option<usize>);
}

/// A stream handler bound to one generation.
#[derive(Clone, Copy)]
pub struct StreamSink<'a> {
    handler: &'a dyn LmStreamsHandler,
    stream_idx: Option<usize>,
}

impl<'a> StreamSink<'a> {
    pub fn new(handler: &'a dyn LmStreamsHandler, stream_idx: Option<usize>) -> Self {
        Self {
            handler,
            stream_idx,
        }
    }

    pub fn stream_idx(&self) -> Option<usize> {
        self.stream_idx
    }

    pub fn emit(&self, chunk: &str) {
        self.handler.handle(chunk, self.stream_idx);
    }
}

/// Abstraction over instruct (chat) LM backends.
#[async_trait]
pub trait InstructLm: Send + Sync {
    /// Generate a reply to `messages`, streaming chunks to `stream` if given.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        stream: Option<StreamSink<'_>>,
    ) -> Result<String, LmError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiInstructLm {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiInstructLm {
    pub fn new(config: &OpenAiConfig, model: impl Into<String>) -> Result<Self, LmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env::var(&config.api_key_env).ok())
            .ok_or_else(|| LmError::MissingApiKey(config.api_key_env.clone()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[async_trait]
impl InstructLm for OpenAiInstructLm {
    #[instrument(skip_all, fields(model = %self.model, streaming = stream.is_some()))]
    async fn generate(
        &self,
        messages: &[ChatMessage],
        stream: Option<StreamSink<'_>>,
    ) -> Result<String, LmError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            stream: stream.is_some(),
        };
        debug!(n_messages = messages.len(), "sending chat completion request");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat completion request failed");
            return Err(LmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match stream {
            Some(sink) => read_event_stream(response, sink).await,
            None => {
                let completion: Completion = response.json().await?;
                completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| LmError::Malformed("completion has no content".to_string()))
            }
        }
    }
}

enum EventLine {
    Delta(String),
    Done,
    Ignore,
}

/// Read a server-sent event stream, forwarding each content delta.
async fn read_event_stream(
    response: reqwest::Response,
    sink: StreamSink<'_>,
) -> Result<String, LmError> {
    let mut bytes = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();
    let mut full = String::new();
    while let Some(chunk) = bytes.next().await {
        pending.extend_from_slice(&chunk?);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            match parse_event_line(&String::from_utf8_lossy(&line))? {
                EventLine::Delta(text) => {
                    sink.emit(&text);
                    full.push_str(&text);
                }
                EventLine::Done => return Ok(full),
                EventLine::Ignore => {}
            }
        }
    }
    // Stream ended without a trailing newline.
    if let EventLine::Delta(text) = parse_event_line(&String::from_utf8_lossy(&pending))? {
        sink.emit(&text);
        full.push_str(&text);
    }
    Ok(full)
}

fn parse_event_line(line: &str) -> Result<EventLine, LmError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(EventLine::Ignore);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(EventLine::Done);
    }
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|err| LmError::Malformed(format!("bad stream event: {err}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .map_or(EventLine::Ignore, EventLine::Delta))
}

/// Hands each agent the LM it should talk to.
pub trait LmProvider: Send + Sync {
    fn lm_for(&self, agent: AgentName, model: &str) -> Result<Arc<dyn InstructLm>, LmError>;
}

/// Provides [`OpenAiInstructLm`] clients sharing one API configuration.
#[derive(Debug, Clone)]
pub struct OpenAiLmProvider {
    config: OpenAiConfig,
}

impl OpenAiLmProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self { config }
    }
}

impl LmProvider for OpenAiLmProvider {
    fn lm_for(&self, agent: AgentName, model: &str) -> Result<Arc<dyn InstructLm>, LmError> {
        debug!(%agent, model, "creating OpenAI client");
        Ok(Arc::new(OpenAiInstructLm::new(&self.config, model)?))
    }
}

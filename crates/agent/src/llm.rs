use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use salesdesk_core::config::{LlmConfig, LlmProvider};
use salesdesk_core::errors::{PipelineError, UpstreamStage};

const TEMPERATURE: f32 = 0.2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self { system: system.into(), user: user.into() }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(error.to_string())
        }
    }
}

/// Opaque prompt-to-text function. Callers never see provider specifics.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError>;
}

#[async_trait]
impl LlmClient for Arc<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        (**self).complete(request).await
    }
}

/// Chat client for the configured provider: OpenAI-compatible chat completions,
/// Google `generateContent`, or a local Ollama `/api/chat`.
pub struct HttpLlmClient {
    client: reqwest::Client,
    provider: LlmProvider,
    endpoint_base: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if matches!(config.provider, LlmProvider::OpenAi | LlmProvider::Google)
            && config.api_key.is_none()
        {
            return Err(LlmError::Configuration(format!(
                "{} provider requires an api key",
                config.provider.as_str()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Http(error.to_string()))?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint_base: config.endpoint_base(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| LlmError::Configuration("missing api key".to_string()))
    }

    async fn post_json<B: Serialize>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<String, LlmError> {
        let response = self.client.post(url).headers(headers).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Response(format!("HTTP {status}: {}", truncate(&text, 300))));
        }

        Ok(response.text().await?)
    }

    async fn complete_openai(&self, request: LlmRequest) -> Result<String, LlmError> {
        let mut headers = json_headers();
        let bearer = format!("Bearer {}", self.api_key()?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|error| LlmError::Http(error.to_string()))?,
        );

        let body = ChatRequest {
            model: &self.model,
            messages: chat_messages(&request),
            temperature: TEMPERATURE,
        };
        let url = format!("{}/chat/completions", self.endpoint_base);
        let text = self.post_json(&url, headers, &body).await?;

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|error| LlmError::Serialization(error.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Response("missing choices".to_string()))
    }

    async fn complete_google(&self, request: LlmRequest) -> Result<String, LlmError> {
        let mut headers = json_headers();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(self.api_key()?)
                .map_err(|error| LlmError::Http(error.to_string()))?,
        );

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: &request.user }],
            }],
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiPart { text: &request.system }],
            },
            generation_config: GeminiGenerationConfig { temperature: TEMPERATURE },
        };
        let url = format!("{}/models/{}:generateContent", self.endpoint_base, self.model);
        let text = self.post_json(&url, headers, &body).await?;

        let parsed: GeminiResponse = serde_json::from_str(&text)
            .map_err(|error| LlmError::Serialization(error.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(LlmError::Response(error.message));
        }
        let content = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|candidate| {
                candidate.content.parts.into_iter().map(|part| part.text).collect::<String>()
            })
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::Response("empty candidate".to_string()));
        }
        Ok(content)
    }

    async fn complete_ollama(&self, request: LlmRequest) -> Result<String, LlmError> {
        let body = OllamaChatRequest {
            model: &self.model,
            messages: chat_messages(&request),
            stream: false,
            options: OllamaOptions { temperature: TEMPERATURE },
        };
        let url = format!("{}/api/chat", self.endpoint_base);
        let text = self.post_json(&url, json_headers(), &body).await?;

        let parsed: OllamaChatResponse = serde_json::from_str(&text)
            .map_err(|error| LlmError::Serialization(error.to_string()))?;
        Ok(parsed.message.content)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        debug!(
            event_name = "upstream.llm.request",
            provider = self.provider.as_str(),
            model = %self.model,
            prompt_chars = request.system.len() + request.user.len(),
            "sending llm request"
        );
        match self.provider {
            LlmProvider::OpenAi => self.complete_openai(request).await,
            LlmProvider::Google => self.complete_google(request).await,
            LlmProvider::Ollama => self.complete_ollama(request).await,
        }
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn chat_messages(request: &LlmRequest) -> Vec<ChatMessage<'_>> {
    vec![
        ChatMessage { role: "system", content: &request.system },
        ChatMessage { role: "user", content: &request.user },
    ]
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "systemInstruction")]
    system_instruction: GeminiSystemInstruction<'a>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContentResponse,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessageResponse,
}

enum AttemptFailure {
    Timeout,
    Failed(String),
}

/// Per-call bound on an upstream model call: each attempt is cut off after
/// `timeout`, and a failed attempt is repeated at most `max_retries` times.
/// Retries never leave the stage that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundedCall {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl BoundedCall {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self { timeout, max_retries: max_retries.min(1) }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(Duration::from_secs(config.timeout_secs.max(1)), config.max_retries)
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub async fn complete(
        &self,
        client: &dyn LlmClient,
        stage: UpstreamStage,
        request: &LlmRequest,
    ) -> Result<String, PipelineError> {
        self.complete_with(client, stage, request, |text| Ok(text.to_string())).await
    }

    /// `accept` turning the text down counts as a failed attempt of the same stage.
    pub async fn complete_with<T, F>(
        &self,
        client: &dyn LlmClient,
        stage: UpstreamStage,
        request: &LlmRequest,
        accept: F,
    ) -> Result<T, PipelineError>
    where
        F: Fn(&str) -> Result<T, String> + Send + Sync,
    {
        let attempts = self.attempts();
        let mut last_failure = AttemptFailure::Failed("no attempt made".to_string());

        for attempt in 1..=attempts {
            let failure = match tokio::time::timeout(self.timeout, client.complete(request.clone()))
                .await
            {
                Err(_) | Ok(Err(LlmError::Timeout)) => AttemptFailure::Timeout,
                Ok(Err(error)) => AttemptFailure::Failed(error.to_string()),
                Ok(Ok(text)) => match accept(&text) {
                    Ok(value) => return Ok(value),
                    Err(reason) => AttemptFailure::Failed(reason),
                },
            };

            warn!(
                event_name = "pipeline.upstream.attempt_failed",
                stage = %stage,
                attempt,
                max_attempts = attempts,
                timed_out = matches!(failure, AttemptFailure::Timeout),
                "upstream call attempt failed"
            );
            last_failure = failure;
        }

        Err(match last_failure {
            AttemptFailure::Timeout => PipelineError::UpstreamTimeout { stage, attempts },
            AttemptFailure::Failed(message) => {
                PipelineError::UpstreamCallFailed { stage, attempts, message }
            }
        })
    }
}

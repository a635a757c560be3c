use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const TEMPERATURE: f32 = 0.2;
const SYSTEM_PROMPT: &str = "You are a professional literary translator. Provide only the translated text, preserving paragraph breaks and inline emphasis.";

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation request failed with status {0}")]
    RequestFailed(StatusCode),
    #[error("translation response contained no text")]
    EmptyTranslation,
    #[error("malformed translation response: {0}")]
    MalformedResponse(String),
    #[error("translation request could not be sent")]
    Transport(#[source] reqwest::Error),
    #[error("translation cancelled")]
    Cancelled,
}

/// One chapter's worth of text plus where and how to translate it.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub language_label: String,
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Issues exactly one remote call. Never retries.
    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError>;
}

/// Client for OpenAI-compatible chat-completions endpoints.
#[derive(Debug, Clone, Default)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn send(&self, request: &TranslationRequest) -> Result<String, TranslateError> {
        let body = request_body(request);
        let response = self
            .http
            .post(&request.endpoint)
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(TranslateError::Transport)?;

        let status = response.status();
        let raw = response.text().await.map_err(TranslateError::Transport)?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or(raw);
            tracing::warn!(%status, endpoint = %request.endpoint, %message, "translation API error");
            return Err(TranslateError::RequestFailed(status));
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| TranslateError::MalformedResponse(err.to_string()))?;
        extract_message_content(&value)
    }
}

#[async_trait]
impl Translator for ChatCompletionsClient {
    async fn translate(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, TranslateError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TranslateError::Cancelled),
            result = self.send(request) => result,
        }
    }
}

pub fn request_body(request: &TranslationRequest) -> serde_json::Value {
    serde_json::json!({
        "model": request.model,
        "temperature": TEMPERATURE,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user_prompt(&request.language_label, &request.text) },
        ],
    })
}

fn user_prompt(language_label: &str, text: &str) -> String {
    format!("Translate the following passage into {language_label}.\n\n{text}")
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_message_content(value: &serde_json::Value) -> Result<String, TranslateError> {
    let choices = value
        .get("choices")
        .and_then(|v| v.as_array())
        .ok_or_else(|| TranslateError::MalformedResponse("missing `choices` array".to_owned()))?;

    let content = choices
        .first()
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(TranslateError::EmptyTranslation);
    }
    Ok(content.to_owned())
}

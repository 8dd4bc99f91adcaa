//! Decision oracle backed by an OpenAI-compatible chat completions API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::imageops::FilterType;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::actions::{smart_resize, ResizeBounds};
use crate::agent::{DecisionOracle, OracleError, OracleRequest};
use crate::device::Screenshot;
use crate::retry::RetryPolicy;

/// Default number of retry attempts for failed requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between retry attempts in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Configuration for the AI model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub extra_body: HashMap<String, Value>,
    /// Maximum number of retry attempts for failed requests.
    pub max_retries: u32,
    /// Delay between retry attempts in seconds.
    pub retry_delay_secs: u64,
    pub request_timeout: Duration,
    /// Images are resized to this grid before upload; `None` sends them as captured.
    pub resize_bounds: Option<ResizeBounds>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "qwen2.5-vl-7b-instruct".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            top_p: 0.85,
            extra_body: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            request_timeout: Duration::from_secs(120),
            resize_bounds: Some(ResizeBounds::default()),
        }
    }
}

impl ModelConfig {
    /// Create a new ModelConfig with custom base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Create a new ModelConfig with custom API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Create a new ModelConfig with custom model name.
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Set the maximum number of retry attempts for failed requests.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between retry attempts in seconds.
    pub fn with_retry_delay(mut self, delay_secs: u64) -> Self {
        self.retry_delay_secs = delay_secs;
        self
    }

    pub fn with_resize_bounds(mut self, bounds: Option<ResizeBounds>) -> Self {
        self.resize_bounds = bounds;
        self
    }

    /// Attempts (initial plus retries) and the fixed delay between them.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.max_retries + 1,
            Duration::from_secs(self.retry_delay_secs),
        )
    }
}

/// OpenAI API response structures.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// Client for interacting with OpenAI-compatible vision-language models.
pub struct ModelClient {
    config: ModelConfig,
    client: Client,
}

impl ModelClient {
    /// Create a new ModelClient with the given configuration.
    pub fn new(config: ModelConfig) -> Result<Self, OracleError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Send one chat request, retrying transport errors, 429 and 5xx.
    pub async fn request(&self, messages: &[Value]) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut body = json!({
            "messages": messages,
            "model": self.config.model_name,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
        });

        // Merge extra_body
        if let Value::Object(ref mut map) = body {
            for (key, value) in &self.config.extra_body {
                map.insert(key.clone(), value.clone());
            }
        }

        let policy = self.config.retry_policy();
        let mut last_error = None;

        for attempt in 1..=policy.max_attempts {
            match self.send_request(&url, &body).await {
                Ok(content) => return Ok(content),
                Err(e) if !Self::is_retryable_error(&e) => return Err(e),
                Err(e) => {
                    if policy.should_retry(attempt) {
                        tracing::warn!(
                            attempt,
                            max_attempts = policy.max_attempts,
                            error = %e,
                            "model request failed, retrying"
                        );
                        policy.wait(attempt).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(OracleError::MaxRetriesExceeded {
            attempts: policy.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    /// Check if an error is retryable (network errors, rate limits, server errors).
    fn is_retryable_error(error: &OracleError) -> bool {
        match error {
            OracleError::Request(_) => true,
            OracleError::Api { status, .. } => *status == 429 || (500..600).contains(status),
            OracleError::Parse(_) | OracleError::Image(_) | OracleError::MaxRetriesExceeded { .. } => false,
        }
    }

    /// Send a single request to the API.
    async fn send_request(&self, url: &str, body: &Value) -> Result<String, OracleError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Parse("No choices in response".to_string()))?;

        Ok(strip_reasoning(&content))
    }

    /// Base64 PNGs in the oracle's image space.
    async fn encode_images(&self, images: &[Screenshot]) -> Result<Vec<String>, OracleError> {
        let Some(bounds) = self.config.resize_bounds else {
            return Ok(images.iter().map(Screenshot::base64).collect());
        };
        let images = images.to_vec();
        tokio::task::spawn_blocking(move || {
            images
                .iter()
                .map(|shot| resize_for_model(shot, bounds))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| OracleError::Image(e.to_string()))?
    }
}

#[async_trait]
impl DecisionOracle for ModelClient {
    async fn invoke(&self, request: &OracleRequest<'_>) -> Result<String, OracleError> {
        let images = self.encode_images(request.images).await?;
        let message = MessageBuilder::create_user_message(request.prompt, &images);
        tracing::debug!(stage = %request.stage, model = %self.config.model_name, images = images.len(), "sending model request");
        self.request(&[message]).await
    }
}

fn resize_for_model(shot: &Screenshot, bounds: ResizeBounds) -> Result<String, OracleError> {
    let (width, height) = smart_resize(shot.width, shot.height, bounds)
        .map_err(|e| OracleError::Image(e.to_string()))?;
    if (width, height) == (shot.width, shot.height) {
        return Ok(shot.base64());
    }

    let img = shot.to_image().map_err(|e| OracleError::Image(e.to_string()))?;
    let resized = img.resize_exact(width, height, FilterType::Triangle);
    let mut buffer = std::io::Cursor::new(Vec::new());
    resized
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| OracleError::Image(e.to_string()))?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

/// Drop `<think>` reasoning and unwrap `<answer>` tags.
pub fn strip_reasoning(content: &str) -> String {
    if let Some((_, answer)) = content.split_once("<answer>") {
        return answer.replace("</answer>", "").trim().to_string();
    }
    match content.split_once("</think>") {
        Some((_, rest)) => rest.trim().to_string(),
        None => content.replace("<think>", "").trim().to_string(),
    }
}

/// Helper for building conversation messages.
pub struct MessageBuilder;

impl MessageBuilder {
    /// User message with base64 PNG images first, then the text.
    pub fn create_user_message(text: &str, images_base64: &[String]) -> Value {
        let mut content: Vec<Value> = images_base64
            .iter()
            .map(|data| {
                json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/png;base64,{}", data)
                    }
                })
            })
            .collect();

        content.push(json!({
            "type": "text",
            "text": text
        }));

        json!({
            "role": "user",
            "content": content
        })
    }
}

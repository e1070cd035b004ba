//! Generation Provider Abstraction
//!
//! Unified interface for the text-generation services that produce mapping records
//! (OpenAI chat completions, Google Gemini). The run driver only sees
//! [`GenerationClient`]; the concrete client is picked once at startup by
//! [`ProviderFactory`] from the configured [`ModelOrigin`].

use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Which provider family serves the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelOrigin {
    #[default]
    OpenAI,
    Google,
}

impl ModelOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelOrigin::OpenAI => "openai",
            ModelOrigin::Google => "google",
        }
    }

    fn api_key_env(self) -> &'static str {
        match self {
            ModelOrigin::OpenAI => "OPENAI_API_KEY",
            ModelOrigin::Google => "GOOGLE_API_KEY",
        }
    }
}

/// Model provider configuration (`[model]` section)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub origin: ModelOrigin,

    /// Model identifier as the provider knows it
    #[serde(default)]
    pub model: String,

    /// API key; falls back to OPENAI_API_KEY / GOOGLE_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override the provider base URL (proxies, Azure-style gateways)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Send the system instruction as a separate system message
    #[serde(default)]
    pub use_system_instruction: bool,

    /// Input token limit; required for token-limit queries on OpenAI
    #[serde(default)]
    pub input_token_limit: Option<u64>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    /// Google only
    #[serde(default)]
    pub top_k: Option<u32>,

    /// Check at startup that the model is listed by the provider
    #[serde(default)]
    pub verify_model: bool,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name is required".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(format!("Endpoint must be an http(s) URL: {}", endpoint));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(format!("Temperature out of range 0.0-2.0: {}", temperature));
            }
        }
        Ok(())
    }

    /// Resolve the API key from config, then from the origin's environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ApiError> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        let var = self.origin.api_key_env();
        std::env::var(var)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ApiError::ProviderNotConfigured(format!(
                    "No API key for {}: set model.api_key or {}",
                    self.origin.as_str(),
                    var
                ))
            })
    }
}

/// Why the provider stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// Normal stop or a reason this pipeline does not act on
    #[default]
    None,
    /// Output truncated by the token limit
    MaxTokens,
    /// Output blocked for overlapping with training data
    Recitation,
}

/// One completed generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub response: String,
    pub prompt_token_count: Option<u64>,
    pub response_token_count: Option<u64>,
    /// Seconds spent waiting on the provider
    pub time_taken: f64,
    pub finish_reason: FinishReason,
}

/// Generation provider client trait
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate one response for a prompt and optional system instruction
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<GenerationOutput, ApiError>;

    /// Count tokens of `text` with the model's tokenizer
    async fn count_tokens(&self, text: &str) -> Result<u64, ApiError>;

    /// Maximum input tokens the model accepts
    async fn token_limit(&self) -> Result<u64, ApiError>;

    /// List models usable for generation
    async fn list_models(&self) -> Result<Vec<String>, ApiError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Whether the system instruction is actually sent to the model
    fn uses_system_instruction(&self) -> bool;
}

/// Fail unless the configured model appears in the provider's model list.
pub async fn verify_model(client: &dyn GenerationClient) -> Result<(), ApiError> {
    let models = client.list_models().await?;
    if models.iter().any(|m| m == client.model_name()) {
        Ok(())
    } else {
        Err(ApiError::ProviderModelNotFound(format!(
            "Model '{}' is not available from {}",
            client.model_name(),
            client.provider_name()
        )))
    }
}

fn map_http_error(error: reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        map_status_error(status, &error.to_string())
    } else if error.is_timeout() {
        ApiError::ProviderRequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ApiError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        ApiError::ProviderError(format!("HTTP error: {}", error))
    }
}

fn map_status_error(status: StatusCode, body: &str) -> ApiError {
    match status.as_u16() {
        401 | 403 => ApiError::ProviderAuthFailed(format!("Authentication failed: {}", body)),
        429 => ApiError::ProviderRateLimit(format!("Rate limit exceeded: {}", body)),
        404 => ApiError::ProviderModelNotFound(format!("Model not found: {}", body)),
        _ => ApiError::ProviderRequestFailed(format!(
            "Request failed with status {}: {}",
            status, body
        )),
    }
}

/// Turn a non-success response into an error, passing successful ones through.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(map_status_error(status, &error_text))
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

fn build_provider_http_client() -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .timeout(PROVIDER_HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

/// Count tokens with the model's tiktoken encoding. Unknown model names use `o200k_base`.
pub fn count_tiktoken_tokens(model: &str, text: &str) -> Result<u64, ApiError> {
    let bpe = tiktoken_rs::get_bpe_from_model(model)
        .or_else(|_| tiktoken_rs::o200k_base())
        .map_err(|e| ApiError::ProviderError(format!("Failed to load tokenizer: {}", e)))?;
    Ok(bpe.encode_with_special_tokens(text).len() as u64)
}

// OpenAI-compatible API request/response structures
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

fn openai_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::MaxTokens,
        _ => FinishReason::None,
    }
}

/// OpenAI provider client
pub struct OpenAIClient {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
    use_system_instruction: bool,
    input_token_limit: Option<u64>,
    temperature: Option<f32>,
    top_p: Option<f32>,
}

impl OpenAIClient {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self, ApiError> {
        let client = build_provider_http_client()?;
        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            use_system_instruction: config.use_system_instruction,
            input_token_limit: config.input_token_limit,
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }
}

#[async_trait]
impl GenerationClient for OpenAIClient {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<GenerationOutput, ApiError> {
        let mut messages = Vec::with_capacity(2);
        if self.use_system_instruction {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: Some(system_instruction.to_string()),
            });
        }
        messages.push(OpenAIMessage {
            role: "user".to_string(),
            content: Some(prompt.to_string()),
        });

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            stream: false,
        };

        let begin = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ProviderError(format!("Failed to parse response: {}", e)))?;
        let time_taken = begin.elapsed().as_secs_f64();

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::ProviderError("No choices in response".to_string()))?;

        Ok(GenerationOutput {
            response: choice.message.content.unwrap_or_default(),
            prompt_token_count: completion.usage.as_ref().map(|u| u.prompt_tokens),
            response_token_count: completion.usage.as_ref().map(|u| u.completion_tokens),
            time_taken,
            finish_reason: openai_finish_reason(choice.finish_reason.as_deref()),
        })
    }

    async fn count_tokens(&self, text: &str) -> Result<u64, ApiError> {
        count_tiktoken_tokens(&self.model, text)
    }

    async fn token_limit(&self) -> Result<u64, ApiError> {
        self.input_token_limit.ok_or_else(|| {
            ApiError::ConfigError(
                "model.input_token_limit must be set; OpenAI does not report input limits"
                    .to_string(),
            )
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        #[derive(Deserialize)]
        struct ModelsResponse {
            data: Vec<ModelInfo>,
        }
        #[derive(Deserialize)]
        struct ModelInfo {
            id: String,
        }

        let models: ModelsResponse = response.json().await.map_err(|e| {
            ApiError::ProviderError(format!("Failed to parse models response: {}", e))
        })?;

        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn uses_system_instruction(&self) -> bool {
        self.use_system_instruction
    }
}

// Gemini REST API structures
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

fn gemini_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("MAX_TOKENS") | Some("2") => FinishReason::MaxTokens,
        Some("RECITATION") | Some("4") => FinishReason::Recitation,
        _ => FinishReason::None,
    }
}

/// Google Gemini provider client
pub struct GoogleClient {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
    use_system_instruction: bool,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
}

impl GoogleClient {
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self, ApiError> {
        let client = build_provider_http_client()?;
        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());

        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            use_system_instruction: config.use_system_instruction,
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
        })
    }

    fn model_url(&self, action: Option<&str>) -> String {
        match action {
            Some(action) => format!("{}/models/{}:{}", self.base_url, self.model, action),
            None => format!("{}/models/{}", self.base_url, self.model),
        }
    }

    fn request_body(&self, prompt: &str, system_instruction: &str) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        if self.use_system_instruction && !system_instruction.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_instruction }] });
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = self.temperature {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = self.top_p {
            generation_config.insert("topP".to_string(), json!(top_p));
        }
        if let Some(top_k) = self.top_k {
            generation_config.insert("topK".to_string(), json!(top_k));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        body
    }
}

#[async_trait]
impl GenerationClient for GoogleClient {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<GenerationOutput, ApiError> {
        let begin = Instant::now();
        let response = self
            .client
            .post(self.model_url(Some("generateContent")))
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt, system_instruction))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        let completion: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ProviderError(format!("Failed to parse response: {}", e)))?;
        let time_taken = begin.elapsed().as_secs_f64();

        let candidate = completion
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::ProviderError("No candidates in response".to_string()))?;

        let text = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        Ok(GenerationOutput {
            response: text,
            prompt_token_count: completion
                .usage_metadata
                .as_ref()
                .and_then(|u| u.prompt_token_count),
            response_token_count: completion
                .usage_metadata
                .as_ref()
                .and_then(|u| u.candidates_token_count),
            time_taken,
            finish_reason: gemini_finish_reason(candidate.finish_reason.as_deref()),
        })
    }

    async fn count_tokens(&self, text: &str) -> Result<u64, ApiError> {
        let response = self
            .client
            .post(self.model_url(Some("countTokens")))
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({ "contents": [{ "role": "user", "parts": [{ "text": text }] }] }))
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CountResponse {
            total_tokens: u64,
        }

        let count: CountResponse = response.json().await.map_err(|e| {
            ApiError::ProviderError(format!("Failed to parse count response: {}", e))
        })?;
        Ok(count.total_tokens)
    }

    async fn token_limit(&self) -> Result<u64, ApiError> {
        let response = self
            .client
            .get(self.model_url(None))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ModelInfo {
            input_token_limit: u64,
        }

        let info: ModelInfo = response.json().await.map_err(|e| {
            ApiError::ProviderError(format!("Failed to parse model response: {}", e))
        })?;
        Ok(info.input_token_limit)
    }

    async fn list_models(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/models?pageSize=1000", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        #[derive(Deserialize)]
        struct ModelsResponse {
            #[serde(default)]
            models: Vec<ModelInfo>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ModelInfo {
            name: String,
            #[serde(default)]
            supported_generation_methods: Vec<String>,
        }

        let models: ModelsResponse = response.json().await.map_err(|e| {
            ApiError::ProviderError(format!("Failed to parse models response: {}", e))
        })?;

        Ok(models
            .models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent")
            })
            .map(|m| {
                m.name
                    .strip_prefix("models/")
                    .map(str::to_string)
                    .unwrap_or(m.name)
            })
            .collect())
    }

    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn uses_system_instruction(&self) -> bool {
        self.use_system_instruction
    }
}

/// Provider factory for creating generation clients
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_client(config: &ModelConfig) -> Result<Box<dyn GenerationClient>, ApiError> {
        config.validate().map_err(ApiError::ConfigError)?;
        let api_key = config.resolve_api_key()?;
        match config.origin {
            ModelOrigin::OpenAI => Ok(Box::new(OpenAIClient::new(config, api_key)?)),
            ModelOrigin::Google => Ok(Box::new(GoogleClient::new(config, api_key)?)),
        }
    }
}

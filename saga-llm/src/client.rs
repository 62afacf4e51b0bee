//! LLM Client: unified interface for OpenAI-compatible and Ollama backends.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse, ModelRole};

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama {
        /// e.g. `http://localhost:11434`
        base_url: String,
    },
    /// OpenAI-compatible API.
    OpenAiCompatible {
        /// e.g. `https://api.openai.com`
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No LLM available; every call fails with `Unavailable`.
    None,
}

/// Model name per role.
#[derive(Debug, Clone, Default)]
pub struct RoleModels {
    /// Plan drafting.
    pub planner: String,
    /// Script writing.
    pub generator: String,
    /// Script review.
    pub critic: String,
    /// Delta extraction.
    pub extractor: String,
}

impl RoleModels {
    /// The model configured for `role`.
    #[must_use]
    pub fn for_role(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Planner => &self.planner,
            ModelRole::Generator => &self.generator,
            ModelRole::Critic => &self.critic,
            ModelRole::Extractor => &self.extractor,
        }
    }
}

/// Running totals for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageStats {
    /// Successful generate calls.
    pub calls: u64,
    /// Failed generate calls (after retries).
    pub failures: u64,
    /// Tokens generated across successful calls.
    pub tokens_generated: u64,
    /// Summed latency of successful calls.
    pub total_latency_ms: u64,
}

/// The main LLM client that routes requests to the configured backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    models: RoleModels,
    max_retries: u32,
    usage: Mutex<UsageStats>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.provider {
            LlmProvider::Ollama { base_url } => format!("ollama@{base_url}"),
            LlmProvider::OpenAiCompatible { base_url, .. } => format!("openai@{base_url}"),
            LlmProvider::None => "none".to_string(),
        };
        f.debug_struct("LlmClient")
            .field("backend", &backend)
            .field("models", &self.models)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(provider: LlmProvider, models: RoleModels, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            models,
            max_retries,
            usage: Mutex::new(UsageStats::default()),
        }
    }

    /// Create a client with no LLM backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, RoleModels::default(), 0)
    }

    /// Build a provider from config-style strings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an unknown provider name, or for an
    /// OpenAI-compatible provider without an API key.
    pub fn provider_from_parts(
        provider: &str,
        base_url: &str,
        api_key: Option<String>,
    ) -> Result<LlmProvider, LlmError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        match provider.to_ascii_lowercase().as_str() {
            "openai" => {
                let api_key = api_key
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| LlmError::ConfigError("OpenAI provider needs an API key".into()))?;
                Ok(LlmProvider::OpenAiCompatible { base_url, api_key })
            }
            "ollama" => Ok(LlmProvider::Ollama { base_url }),
            "none" => Ok(LlmProvider::None),
            other => Err(LlmError::ConfigError(format!("unknown LLM provider '{other}'"))),
        }
    }

    /// Generate a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` with no backend, `Timeout` when the request's
    /// deadline passes, or the backend failure. With retries configured,
    /// persistent retryable failures become `RetriesExhausted`.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = self.models.for_role(request.role).to_string();
        let result = match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                self.generate_ollama(base_url, &model, request).await
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                self.generate_openai(base_url, api_key, &model, request).await
            }
        };

        let mut usage = self.usage.lock();
        match &result {
            Ok(resp) => {
                usage.calls += 1;
                usage.tokens_generated += u64::from(resp.tokens_generated);
                usage.total_latency_ms += resp.latency_ms;
                info!(
                    role = %request.role,
                    model = %resp.model,
                    tokens = resp.tokens_generated,
                    latency_ms = resp.latency_ms,
                    "LLM call completed"
                );
            }
            Err(e) => {
                usage.failures += 1;
                warn!(role = %request.role, error = %e, "LLM call failed");
            }
        }
        result
    }

    /// Generate using Ollama's API.
    async fn generate_ollama(
        &self,
        base_url: &str,
        model: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{base_url}/api/generate");
        let mut body = json!({
            "model": model,
            "system": request.system,
            "prompt": request.user,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        if request.json_mode {
            body["format"] = json!("json");
        }

        let (json, latency_ms) = self.post_json(&url, None, &body, request.timeout_ms).await?;
        Ok(LlmResponse {
            text: json["response"].as_str().unwrap_or("").to_string(),
            tokens_generated: token_count(&json["eval_count"]),
            latency_ms,
            model: model.to_string(),
        })
    }

    /// Generate using OpenAI-compatible API.
    async fn generate_openai(
        &self,
        base_url: &str,
        api_key: &str,
        model: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{base_url}/v1/chat/completions");
        let mut body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let (json, latency_ms) = self
            .post_json(&url, Some(api_key), &body, request.timeout_ms)
            .await?;
        Ok(LlmResponse {
            text: json["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or("")
                .to_string(),
            tokens_generated: token_count(&json["usage"]["completion_tokens"]),
            latency_ms,
            model: model.to_string(),
        })
    }

    /// Embed `text` with the backend's embeddings endpoint.
    ///
    /// `dimensions` asks OpenAI-compatible backends for a shortened vector;
    /// Ollama ignores it.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` with no backend, `SchemaValidation` when the
    /// response carries no vector, or the transport failure.
    pub async fn embed(
        &self,
        model: &str,
        text: &str,
        dimensions: Option<usize>,
        timeout_ms: u64,
    ) -> Result<Vec<f32>, LlmError> {
        let (json, pointer) = match &self.provider {
            LlmProvider::None => {
                return Err(LlmError::Unavailable("No LLM provider configured".into()));
            }
            LlmProvider::Ollama { base_url } => {
                let url = format!("{base_url}/api/embeddings");
                let body = json!({ "model": model, "prompt": text });
                (self.post_json(&url, None, &body, timeout_ms).await?.0, "/embedding")
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{base_url}/v1/embeddings");
                let mut body = json!({ "model": model, "input": text });
                if let Some(dimensions) = dimensions {
                    body["dimensions"] = json!(dimensions);
                }
                (
                    self.post_json(&url, Some(api_key), &body, timeout_ms).await?.0,
                    "/data/0/embedding",
                )
            }
        };

        let values = json
            .pointer(pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::SchemaValidation("embedding response has no vector".into()))?;
        #[allow(clippy::cast_possible_truncation)]
        let vector: Vec<f32> = values
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect();
        if vector.len() != values.len() {
            return Err(LlmError::SchemaValidation(
                "embedding vector contains non-numeric values".into(),
            ));
        }
        Ok(vector)
    }

    /// POST a JSON body and decode the JSON reply, retrying retryable
    /// failures up to `max_retries` times.
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
        timeout_ms: u64,
    ) -> Result<(Value, u64), LlmError> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!("Retrying LLM call (attempt {}/{})", attempt + 1, self.max_retries + 1);
            }

            let start = Instant::now();
            let mut builder = self
                .http
                .post(url)
                .json(body)
                .timeout(Duration::from_millis(timeout_ms));
            if let Some(key) = bearer {
                builder = builder.bearer_auth(key);
            }

            let outcome = match builder.send().await {
                Ok(resp) if resp.status().is_success() => resp
                    .json::<Value>()
                    .await
                    .map_err(|e| LlmError::ParseError(e.to_string())),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let mut body = resp.text().await.unwrap_or_default();
                    body.truncate(500);
                    Err(LlmError::Http { status, body })
                }
                Err(e) if e.is_timeout() => Err(LlmError::Timeout(timeout_ms)),
                Err(e) => Err(LlmError::from(e)),
            };

            #[allow(clippy::cast_possible_truncation)]
            let latency_ms = start.elapsed().as_millis() as u64;
            match outcome {
                Ok(json) => return Ok((json, latency_ms)),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(url, error = %e, "LLM request failed; will retry");
                    last_error = Some(e);
                }
                Err(e) if attempt == 0 => return Err(e),
                Err(e) => {
                    return Err(LlmError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error: last_error.map_or_else(String::new, |e| e.to_string()),
        })
    }

    /// Parse a raw LLM response text as structured JSON.
    ///
    /// Surrounding prose or Markdown code fences are ignored; the outermost
    /// `{ ... }` object is decoded.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if no JSON object can be decoded as `T`.
    pub fn parse_structured<T: serde::de::DeserializeOwned>(
        response: &LlmResponse,
    ) -> Result<T, LlmError> {
        let text = extract_json_object(&response.text);
        serde_json::from_str(text).map_err(|e| {
            let mut raw = response.text.clone();
            raw.truncate(200);
            LlmError::ParseError(format!("JSON parse error: {e}; raw text: '{raw}'"))
        })
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Snapshot of the usage counters.
    #[must_use]
    pub fn usage(&self) -> UsageStats {
        *self.usage.lock()
    }

    /// Model names per role.
    #[must_use]
    pub fn models(&self) -> &RoleModels {
        &self.models
    }
}

#[allow(clippy::cast_possible_truncation)]
fn token_count(value: &Value) -> u32 {
    value.as_u64().map_or(0, |v| v.min(u64::from(u32::MAX)) as u32)
}

/// The outermost `{ ... }` span of `text`, or `text` itself if there is none.
#[must_use]
pub fn extract_json_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(text: &str) -> LlmResponse {
        LlmResponse {
            text: text.to_string(),
            tokens_generated: 0,
            latency_ms: 0,
            model: "test".into(),
        }
    }

    #[derive(Debug, serde::Deserialize)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn parses_fenced_json() {
        let parsed: Sample =
            LlmClient::parse_structured(&response("Sure!\n```json\n{\"value\": 7}\n```")).expect("parse");
        assert_eq!(parsed.value, 7);
    }

    #[test]
    fn non_json_is_a_parse_error() {
        let err = LlmClient::parse_structured::<Sample>(&response("no json here")).expect_err("fail");
        assert!(matches!(err, LlmError::ParseError(_)));
    }

    #[test]
    fn provider_parsing() {
        assert!(matches!(
            LlmClient::provider_from_parts("ollama", "http://localhost:11434/", None),
            Ok(LlmProvider::Ollama { base_url }) if base_url == "http://localhost:11434"
        ));
        assert!(LlmClient::provider_from_parts("openai", "https://api.openai.com", None).is_err());
        assert!(LlmClient::provider_from_parts("carrier-pigeon", "", None).is_err());
    }

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        let err = client
            .generate(&LlmRequest::new(ModelRole::Planner, "s", "u"))
            .await
            .expect_err("no backend");
        assert!(matches!(err, LlmError::Unavailable(_)));
        assert_eq!(client.usage().failures, 1);
        assert!(client.embed("m", "text", None, 1000).await.is_err());
    }

    #[test]
    fn role_models_route_by_role() {
        let models = RoleModels {
            planner: "big".into(),
            generator: "big".into(),
            critic: "big".into(),
            extractor: "small".into(),
        };
        assert_eq!(models.for_role(ModelRole::Extractor), "small");
        assert_eq!(models.for_role(ModelRole::Critic), "big");
    }
}

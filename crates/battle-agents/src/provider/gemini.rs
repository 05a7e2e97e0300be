//! Gemini generateContent adapter.
//!
//! Gemini's conventions differ from the chat-completions family: one fused
//! prompt, search grounding via a built-in `google_search` tool, and no JSON
//! response mode worth relying on — structured output degrades to
//! prompt-engineered extraction with code-fence stripping.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    extract_json, Capability, CapabilitySet, NormalizedResponse, ProviderAdapter, ProviderError,
    ProviderRequest,
};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Adapter for the Gemini generateContent API.
#[derive(Debug)]
pub struct GeminiAdapter {
    api_key: String,
    model: String,
    base_url: String,
    capabilities: CapabilitySet,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::Unavailable("gemini".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport {
                provider: "gemini".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            capabilities: CapabilitySet::of(&[Capability::SearchGrounding]),
            timeout,
            client,
        })
    }

    fn build_body(&self, request: &ProviderRequest) -> Value {
        // Gemini takes one fused prompt; declared function tools are dropped
        // (no ToolCalling capability) and the caller pre-runs its research.
        let mut text = format!("{}\n\n{}", request.system, request.prompt);
        if request.response_schema.is_some() {
            text.push_str("\n\nRespond with valid JSON only.");
        }

        let mut body = json!({
            "contents": [{
                "parts": [{ "text": text }]
            }],
            "generationConfig": {
                "temperature": 0.3,
                "maxOutputTokens": 2048
            }
        });

        if self.capabilities.supports(Capability::SearchGrounding) {
            body["tools"] = json!([{ "google_search": {} }]);
        }

        body
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn call(&self, request: &ProviderRequest) -> Result<NormalizedResponse, ProviderError> {
        let body = self.build_body(request);
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        debug!(model = %self.model, "generateContent call");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        provider: "gemini".to_string(),
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    ProviderError::Transport {
                        provider: "gemini".to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: "gemini".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await.map_err(|e| ProviderError::Parse {
            provider: "gemini".to_string(),
            reason: e.to_string(),
        })?;

        let content = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::Parse {
                provider: "gemini".to_string(),
                reason: "missing candidate text".to_string(),
            })?
            .trim()
            .to_string();

        if request.response_schema.is_some() {
            let json = extract_json("gemini", &content)?;
            return Ok(NormalizedResponse::Structured { json });
        }

        Ok(NormalizedResponse::Text { content })
    }
}

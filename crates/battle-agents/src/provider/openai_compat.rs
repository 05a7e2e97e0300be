//! OpenAI-compatible chat completions adapter.
//!
//! OpenAI, Groq, and xAI all speak the same `/chat/completions` wire shape
//! with different base URLs, so one adapter covers all three. Tool calls and
//! JSON response format are used natively where the configured capability
//! set allows; otherwise the adapter appends a JSON-only instruction and
//! extracts the payload from plain text.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    extract_json, Capability, CapabilitySet, NormalizedResponse, ProviderAdapter, ProviderError,
    ProviderRequest,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const XAI_BASE_URL: &str = "https://api.x.ai/v1";

/// Adapter for any OpenAI-compatible chat completions backend.
#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    provider: String,
    base_url: String,
    api_key: String,
    model: String,
    capabilities: CapabilitySet,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// OpenAI proper: native tools and JSON response format.
    pub fn openai(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Self::custom(
            "openai",
            OPENAI_BASE_URL,
            api_key,
            model,
            CapabilitySet::of(&[Capability::ToolCalling, Capability::StructuredOutput]),
            timeout,
        )
    }

    /// Groq's OpenAI-compatible endpoint.
    pub fn groq(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Self::custom(
            "groq",
            GROQ_BASE_URL,
            api_key,
            model,
            CapabilitySet::of(&[Capability::ToolCalling, Capability::StructuredOutput]),
            timeout,
        )
    }

    /// xAI: tool calling, but JSON comes back as fenced text.
    pub fn xai(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Self::custom(
            "xai",
            XAI_BASE_URL,
            api_key,
            model,
            CapabilitySet::of(&[Capability::ToolCalling]),
            timeout,
        )
    }

    /// Any other OpenAI-compatible endpoint (local vLLM, proxies).
    pub fn custom(
        provider: &str,
        base_url: &str,
        api_key: &str,
        model: &str,
        capabilities: CapabilitySet,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::Unavailable(provider.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport {
                provider: provider.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            provider: provider.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            capabilities,
            timeout,
            client,
        })
    }

    fn build_body(&self, request: &ProviderRequest) -> Value {
        let structured = request.response_schema.is_some()
            && self.capabilities.supports(Capability::StructuredOutput);
        let degraded_json =
            request.response_schema.is_some() && !structured;

        let mut user_content = request.prompt.clone();
        if degraded_json {
            // No native JSON mode — lean on the prompt instead.
            user_content.push_str("\n\nRespond with valid JSON only.");
        }

        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": user_content},
            ],
        });

        if !request.tools.is_empty() && self.capabilities.supports(Capability::ToolCalling) {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }

        if structured {
            body["response_format"] = json!({"type": "json_object"});
        }

        body
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: self.provider.clone(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            ProviderError::Transport {
                provider: self.provider.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn call(&self, request: &ProviderRequest) -> Result<NormalizedResponse, ProviderError> {
        let body = self.build_body(request);
        debug!(provider = %self.provider, model = %self.model, "chat completions call");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: self.provider.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await.map_err(|e| ProviderError::Parse {
            provider: self.provider.clone(),
            reason: e.to_string(),
        })?;

        let message = &payload["choices"][0]["message"];

        // Tool call takes precedence over content.
        if let Some(call) = message["tool_calls"].get(0) {
            let name = call["function"]["name"].as_str().unwrap_or_default();
            let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(raw_args).map_err(|e| ProviderError::Parse {
                    provider: self.provider.clone(),
                    reason: format!("tool arguments: {}", e),
                })?;
            return Ok(NormalizedResponse::ToolInvocation {
                name: name.to_string(),
                arguments,
            });
        }

        let content = message["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Parse {
                provider: self.provider.clone(),
                reason: "missing message content".to_string(),
            })?
            .trim()
            .to_string();

        if request.response_schema.is_some() {
            let json = extract_json(&self.provider, &content)?;
            return Ok(NormalizedResponse::Structured { json });
        }

        Ok(NormalizedResponse::Text { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolSpec;

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::openai("sk-test-key-abcdef", "gpt-4o", Duration::from_secs(30))
            .unwrap()
    }

    #[test]
    fn empty_key_is_unavailable() {
        let err =
            OpenAiCompatAdapter::openai("", "gpt-4o", Duration::from_secs(30)).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(p) if p == "openai"));
    }

    #[test]
    fn builds_plain_body() {
        let req = ProviderRequest::new("be rigorous", "will it ship?");
        let body = adapter().build_body(&req);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body.get("tools").is_none());
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn builds_tool_body() {
        let req = ProviderRequest::new("s", "p").with_tools(vec![ToolSpec {
            name: "web_search".into(),
            description: "search the web".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]);
        let body = adapter().build_body(&req);
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn builds_structured_body_with_native_json_mode() {
        let req = ProviderRequest::new("s", "p")
            .with_schema(serde_json::json!({"type": "object"}));
        let body = adapter().build_body(&req);
        assert_eq!(body["response_format"]["type"], "json_object");
        // No prompt mutation needed when native JSON mode exists.
        assert!(!body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("valid JSON only"));
    }

    #[test]
    fn xai_degrades_to_prompted_json() {
        let xai =
            OpenAiCompatAdapter::xai("xai-test-key-abc", "grok-2-latest", Duration::from_secs(30))
                .unwrap();
        let req = ProviderRequest::new("s", "p")
            .with_schema(serde_json::json!({"type": "object"}));
        let body = xai.build_body(&req);
        assert!(body.get("response_format").is_none());
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("Respond with valid JSON only."));
    }

    #[test]
    fn tools_dropped_without_capability() {
        let bare = OpenAiCompatAdapter::custom(
            "local",
            "http://localhost:8080/v1",
            "local-key",
            "test-model",
            CapabilitySet::default(),
            Duration::from_secs(30),
        )
        .unwrap();
        let req = ProviderRequest::new("s", "p").with_tools(vec![ToolSpec {
            name: "web_search".into(),
            description: "d".into(),
            parameters: serde_json::json!({}),
        }]);
        let body = bare.build_body(&req);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn provider_identity() {
        let groq = OpenAiCompatAdapter::groq(
            "gsk_test_key_abc",
            "llama-3.3-70b-versatile",
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(groq.provider_name(), "groq");
        assert_eq!(groq.model(), "llama-3.3-70b-versatile");
        assert!(groq.capabilities().supports(Capability::ToolCalling));
        assert!(!groq.capabilities().supports(Capability::SearchGrounding));
    }
}

//! Provider normalization — one capability-based interface over
//! heterogeneous model backends.
//!
//! Each backend (OpenAI-compatible chat completions, Gemini generateContent)
//! has its own tool-calling, search-grounding, and structured-output
//! conventions. Adapters translate a single [`ProviderRequest`] shape into
//! the native wire format and normalize every reply into a
//! [`NormalizedResponse`] variant, so callers never see a backend's native
//! call shape.
//!
//! A backend advertises its [`CapabilitySet`]; when a capability is absent
//! the adapter degrades rather than fails — structured output without native
//! JSON mode falls back to prompt-engineered extraction, declared tools are
//! dropped for backends that cannot call them (the caller pre-runs research
//! instead).

pub mod gemini;
pub mod openai_compat;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// What a backend can natively do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Native function/tool calling.
    ToolCalling,
    /// Search-grounded generation (the backend retrieves on its own).
    SearchGrounding,
    /// Native schema-constrained JSON output.
    StructuredOutput,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolCalling => write!(f, "tool_calling"),
            Self::SearchGrounding => write!(f, "search_grounding"),
            Self::StructuredOutput => write!(f, "structured_output"),
        }
    }
}

/// The set of capabilities a concrete backend advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    caps: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn of(caps: &[Capability]) -> Self {
        Self {
            caps: caps.iter().copied().collect(),
        }
    }

    pub fn supports(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.caps.iter().copied()
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.caps.iter().map(|c| c.to_string()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// A tool declared to the backend: name plus a JSON-schema parameter shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: Value,
}

/// One normalized request, independent of the backend's native shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// System/role instruction.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// Tools offered to the model, if any.
    pub tools: Vec<ToolSpec>,
    /// When set, the caller wants JSON conforming to this schema.
    pub response_schema: Option<Value>,
}

impl ProviderRequest {
    pub fn new(system: &str, prompt: &str) -> Self {
        Self {
            system: system.to_string(),
            prompt: prompt.to_string(),
            tools: Vec::new(),
            response_schema: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Normalized reply from any backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedResponse {
    /// Plain text completion.
    Text { content: String },
    /// The model asked for a tool to be executed.
    ToolInvocation { name: String, arguments: Value },
    /// JSON matching the requested schema.
    Structured { json: Value },
}

impl NormalizedResponse {
    /// The structured payload, if this is one.
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured { json } => Some(json),
            _ => None,
        }
    }

    /// The text content, if this is plain text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            _ => None,
        }
    }
}

/// Errors from provider adapters.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Credentials absent — the agent should be skipped, not the battle.
    #[error("credentials missing for provider {0}")]
    Unavailable(String),

    /// Non-success HTTP status from the backend.
    #[error("{provider} API error ({status}): {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// The call exceeded its deadline.
    #[error("request to {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    /// Transport-level failure (DNS, connection reset, TLS).
    #[error("transport error calling {provider}: {reason}")]
    Transport { provider: String, reason: String },

    /// The backend replied with something we could not interpret.
    #[error("failed to parse {provider} response: {reason}")]
    Parse { provider: String, reason: String },

    /// The reply did not satisfy the requested response schema.
    #[error("response violates the requested schema: {reason}")]
    SchemaViolation { reason: String },
}

impl ProviderError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Unavailable(_) | Self::Parse { .. } | Self::SchemaViolation { .. } => false,
        }
    }
}

/// Uniform interface every backend implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short provider name ("openai", "groq", "xai", "gemini").
    fn provider_name(&self) -> &str;

    /// Model identifier sent to the backend.
    fn model(&self) -> &str;

    /// What this backend can natively do.
    fn capabilities(&self) -> &CapabilitySet;

    /// Issue one normalized call.
    async fn call(&self, request: &ProviderRequest) -> Result<NormalizedResponse, ProviderError>;
}

/// Bounded retry with linear backoff for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base backoff; attempt n waits n × base.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Call an adapter, retrying transient failures per the policy.
///
/// Non-retryable errors (missing credentials, schema violations, parse
/// failures) surface immediately.
pub async fn call_with_retry(
    adapter: &dyn ProviderAdapter,
    request: &ProviderRequest,
    policy: &RetryPolicy,
) -> Result<NormalizedResponse, ProviderError> {
    let mut attempt = 1u32;
    loop {
        match adapter.call(request).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.backoff * attempt;
                warn!(
                    provider = adapter.provider_name(),
                    attempt,
                    wait_secs = wait.as_secs(),
                    error = %err,
                    "transient provider failure, backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Strip markdown code fences that models love to wrap JSON in.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        return rest.split("```").next().unwrap_or("").trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split("```").next().unwrap_or("").trim();
    }
    trimmed
}

/// Best-effort JSON extraction from model text output.
///
/// Tries the fence-stripped text first, then the outermost brace span.
pub fn extract_json(provider: &str, content: &str) -> Result<Value, ProviderError> {
    let stripped = strip_code_fences(content);
    if let Ok(value) = serde_json::from_str(stripped) {
        return Ok(value);
    }
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&stripped[start..=end]) {
                return Ok(value);
            }
        }
    }
    let preview: String = content.chars().take(120).collect();
    Err(ProviderError::Parse {
        provider: provider.to_string(),
        reason: format!("expected JSON, got: {}", preview),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_membership() {
        let caps = CapabilitySet::of(&[Capability::ToolCalling, Capability::StructuredOutput]);
        assert!(caps.supports(Capability::ToolCalling));
        assert!(!caps.supports(Capability::SearchGrounding));
        assert_eq!(caps.iter().count(), 2);
    }

    #[test]
    fn capability_display() {
        assert_eq!(Capability::ToolCalling.to_string(), "tool_calling");
        let caps = CapabilitySet::of(&[Capability::SearchGrounding]);
        assert_eq!(caps.to_string(), "{search_grounding}");
    }

    #[test]
    fn request_builder() {
        let req = ProviderRequest::new("system", "prompt")
            .with_schema(serde_json::json!({"type": "object"}));
        assert!(req.response_schema.is_some());
        assert!(req.tools.is_empty());
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Timeout {
            provider: "openai".into(),
            seconds: 120
        }
        .is_retryable());
        assert!(ProviderError::Http {
            provider: "groq".into(),
            status: 429,
            body: "rate limited".into()
        }
        .is_retryable());
        assert!(ProviderError::Http {
            provider: "groq".into(),
            status: 503,
            body: "overloaded".into()
        }
        .is_retryable());
        assert!(!ProviderError::Http {
            provider: "openai".into(),
            status: 401,
            body: "bad key".into()
        }
        .is_retryable());
        assert!(!ProviderError::Unavailable("xai".into()).is_retryable());
        assert!(!ProviderError::SchemaViolation {
            reason: "missing field".into()
        }
        .is_retryable());
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn extract_json_from_prose() {
        let value = extract_json("test", "Here you go: {\"verdict\": \"YES\"} hope that helps")
            .unwrap();
        assert_eq!(value["verdict"], "YES");
    }

    #[test]
    fn extract_json_fenced() {
        let value = extract_json("test", "```json\n{\"probability\": 0.8}\n```").unwrap();
        assert_eq!(value["probability"], 0.8);
    }

    #[test]
    fn extract_json_failure() {
        let err = extract_json("test", "no json here at all").unwrap_err();
        assert!(matches!(err, ProviderError::Parse { .. }));
    }

    #[test]
    fn normalized_response_accessors() {
        let text = NormalizedResponse::Text {
            content: "hello".into(),
        };
        assert_eq!(text.as_text(), Some("hello"));
        assert!(text.as_structured().is_none());

        let structured = NormalizedResponse::Structured {
            json: serde_json::json!({"x": 1}),
        };
        assert!(structured.as_structured().is_some());
    }

    struct FlakyAdapter {
        caps: CapabilitySet,
        failures_left: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl ProviderAdapter for FlakyAdapter {
        fn provider_name(&self) -> &str {
            "flaky"
        }
        fn model(&self) -> &str {
            "test-model"
        }
        fn capabilities(&self) -> &CapabilitySet {
            &self.caps
        }
        async fn call(
            &self,
            _request: &ProviderRequest,
        ) -> Result<NormalizedResponse, ProviderError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ProviderError::Transport {
                    provider: "flaky".into(),
                    reason: "connection reset".into(),
                });
            }
            Ok(NormalizedResponse::Text {
                content: "recovered".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let adapter = FlakyAdapter {
            caps: CapabilitySet::default(),
            failures_left: std::sync::Mutex::new(2),
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        };
        let req = ProviderRequest::new("s", "p");
        let response = call_with_retry(&adapter, &req, &policy).await.unwrap();
        assert_eq!(response.as_text(), Some("recovered"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_surfaces_last_error() {
        let adapter = FlakyAdapter {
            caps: CapabilitySet::default(),
            failures_left: std::sync::Mutex::new(10),
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        };
        let req = ProviderRequest::new("s", "p");
        let err = call_with_retry(&adapter, &req, &policy).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        struct Unauthorized;

        #[async_trait]
        impl ProviderAdapter for Unauthorized {
            fn provider_name(&self) -> &str {
                "openai"
            }
            fn model(&self) -> &str {
                "gpt-4o"
            }
            fn capabilities(&self) -> &CapabilitySet {
                static CAPS: std::sync::OnceLock<CapabilitySet> = std::sync::OnceLock::new();
                CAPS.get_or_init(CapabilitySet::default)
            }
            async fn call(
                &self,
                _request: &ProviderRequest,
            ) -> Result<NormalizedResponse, ProviderError> {
                Err(ProviderError::Http {
                    provider: "openai".into(),
                    status: 401,
                    body: "invalid key".into(),
                })
            }
        }

        let policy = RetryPolicy::default();
        let req = ProviderRequest::new("s", "p");
        let err = call_with_retry(&Unauthorized, &req, &policy).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 401, .. }));
    }
}

//! Research client — web evidence gathering behind a narrow interface.
//!
//! The core never talks to a search backend directly; agents call
//! [`ResearchClient::search`] and keep the resulting [`ResearchContext`]
//! strictly private. A Tavily-backed implementation ships here; tests and
//! keyless runs use [`NoResearch`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::provider::ToolSpec;

const TAVILY_URL: &str = "https://api.tavily.com/search";

/// One retrieved evidence item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Content snippet from the source.
    pub snippet: String,
    /// URL of the source.
    pub citation: String,
}

/// Per-agent bundle of retrieved evidence.
///
/// Owned exclusively by the agent that produced it and never shared across
/// agents — this is the isolation invariant's unit of enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    /// The agent that gathered this context.
    pub agent_id: String,
    /// The event it was gathered for.
    pub event_id: String,
    /// The query that was issued.
    pub query: String,
    /// Retrieved evidence, in rank order.
    pub hits: Vec<SearchHit>,
    /// When the research completed.
    pub gathered_at: DateTime<Utc>,
}

impl ResearchContext {
    pub fn new(agent_id: &str, event_id: &str, query: &str, hits: Vec<SearchHit>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            event_id: event_id.to_string(),
            query: query.to_string(),
            hits,
            gathered_at: Utc::now(),
        }
    }

    /// Render the evidence as a prompt block.
    pub fn as_prompt_block(&self) -> String {
        if self.hits.is_empty() {
            return "No research results available.".to_string();
        }
        self.hits
            .iter()
            .map(|h| format!("Source: {}\nContent: {}", h.citation, h.snippet))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Error from a research backend.
#[derive(Debug, Clone, Error)]
pub enum ResearchError {
    #[error("search API error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("search transport error: {0}")]
    Transport(String),

    #[error("failed to parse search response: {0}")]
    Parse(String),
}

/// Narrow interface to the external web-search collaborator.
///
/// Each call is finite and non-restartable; callers own the results.
#[async_trait]
pub trait ResearchClient: Send + Sync {
    /// Run one search. `archetype_hint` lets backends bias ranking.
    async fn search(&self, query: &str, archetype_hint: &str)
        -> Result<Vec<SearchHit>, ResearchError>;
}

/// The `web_search` tool declared to tool-calling backends.
pub fn web_search_tool() -> ToolSpec {
    ToolSpec {
        name: "web_search".to_string(),
        description: "Search the web for current, real-time information about a topic. \
                      Use this to find facts, news, data, and evidence to support your analysis."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to find relevant information"
                }
            },
            "required": ["query"]
        }),
    }
}

/// Tavily-backed research client.
pub struct TavilySearch {
    api_key: String,
    max_results: usize,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: &str, max_results: usize) -> Self {
        Self {
            api_key: api_key.to_string(),
            max_results,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ResearchClient for TavilySearch {
    async fn search(
        &self,
        query: &str,
        archetype_hint: &str,
    ) -> Result<Vec<SearchHit>, ResearchError> {
        debug!(query, hint = archetype_hint, "tavily search");
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "advanced",
            "max_results": self.max_results,
        });

        let response = self
            .client
            .post(TAVILY_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResearchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ResearchError::Parse(e.to_string()))?;

        let hits = payload["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .take(self.max_results)
                    .filter_map(|r| {
                        let url = r["url"].as_str()?;
                        let content = r["content"].as_str()?;
                        Some(SearchHit {
                            snippet: content.chars().take(300).collect(),
                            citation: url.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }
}

/// No-op research client for keyless runs and tests. Research is skipped,
/// not failed.
pub struct NoResearch;

#[async_trait]
impl ResearchClient for NoResearch {
    async fn search(
        &self,
        _query: &str,
        _archetype_hint: &str,
    ) -> Result<Vec<SearchHit>, ResearchError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_block_renders_hits() {
        let ctx = ResearchContext::new(
            "precision",
            "e-1",
            "launch official sources",
            vec![
                SearchHit {
                    snippet: "Launch confirmed for Q3".to_string(),
                    citation: "https://example.com/press".to_string(),
                },
                SearchHit {
                    snippet: "Regulatory filing posted".to_string(),
                    citation: "https://example.com/sec".to_string(),
                },
            ],
        );
        let block = ctx.as_prompt_block();
        assert!(block.contains("Source: https://example.com/press"));
        assert!(block.contains("Regulatory filing posted"));
    }

    #[test]
    fn prompt_block_empty() {
        let ctx = ResearchContext::new("a", "e-1", "q", vec![]);
        assert_eq!(ctx.as_prompt_block(), "No research results available.");
    }

    #[test]
    fn web_search_tool_schema() {
        let tool = web_search_tool();
        assert_eq!(tool.name, "web_search");
        assert_eq!(tool.parameters["required"][0], "query");
    }

    #[tokio::test]
    async fn no_research_returns_empty() {
        let hits = NoResearch.search("anything", "hint").await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn context_json_roundtrip() {
        let ctx = ResearchContext::new(
            "a",
            "e-1",
            "q",
            vec![SearchHit {
                snippet: "s".to_string(),
                citation: "c".to_string(),
            }],
        );
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: ResearchContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}

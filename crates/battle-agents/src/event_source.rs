//! Event source — resolves an event identifier to its metadata.
//!
//! The core only consumes the resulting [`EventRecord`]; resolution itself is
//! this external collaborator's job. A Polymarket Gamma API client ships as
//! the default implementation and accepts a numeric id, a slug, or a full
//! event URL.

use arena::EventRecord;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const GAMMA_BASE_URL: &str = "https://gamma-api.polymarket.com";

/// Error resolving an event.
#[derive(Debug, Clone, Error)]
pub enum EventSourceError {
    #[error("event not found: {0}")]
    NotFound(String),

    #[error("event API error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("event transport error: {0}")]
    Transport(String),

    #[error("failed to parse event response: {0}")]
    Parse(String),
}

/// Narrow interface to the external event-metadata fetcher.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Resolve an id, slug, or URL to its event record.
    async fn resolve(&self, identifier: &str) -> Result<EventRecord, EventSourceError>;

    /// Discover trending events, most liquid first.
    async fn discover(&self, limit: usize) -> Result<Vec<EventRecord>, EventSourceError>;
}

/// How an identifier should be queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventQuery {
    Id(String),
    Slug(String),
}

/// Normalize an id / slug / URL into a query.
pub fn parse_identifier(identifier: &str) -> EventQuery {
    let mut ident = identifier.trim().to_string();
    if let Some(rest) = ident.split("polymarket.com/event/").nth(1) {
        ident = rest
            .split('?')
            .next()
            .unwrap_or("")
            .trim_matches('/')
            .to_string();
    }
    if !ident.is_empty() && ident.chars().all(|c| c.is_ascii_digit()) {
        EventQuery::Id(ident)
    } else {
        EventQuery::Slug(ident)
    }
}

/// Polymarket Gamma API client.
pub struct GammaClient {
    base_url: String,
    client: reqwest::Client,
}

impl GammaClient {
    pub fn new() -> Self {
        Self::with_base_url(GAMMA_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, EventSourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EventSourceError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EventSourceError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| EventSourceError::Parse(e.to_string()))
    }

    fn record_from(data: &Value) -> EventRecord {
        EventRecord {
            id: match &data["id"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            title: data["title"].as_str().unwrap_or_default().to_string(),
            description: data["description"].as_str().unwrap_or_default().to_string(),
            resolution_rules: data["rules"].as_str().unwrap_or_default().to_string(),
            resolution_date: data["ends_at"].as_str().unwrap_or_default().to_string(),
            market_probability: data["market_probability"].as_f64(),
            liquidity: data["liquidity"].as_f64(),
        }
    }
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for GammaClient {
    async fn resolve(&self, identifier: &str) -> Result<EventRecord, EventSourceError> {
        let data = match parse_identifier(identifier) {
            EventQuery::Id(id) => {
                debug!(id, "resolving event by id");
                self.get_json(&format!("{}/events/{}", self.base_url, id))
                    .await?
            }
            EventQuery::Slug(slug) => {
                debug!(slug, "resolving event by slug");
                let listed = self
                    .get_json(&format!("{}/events?slug={}", self.base_url, slug))
                    .await?;
                match listed.as_array().and_then(|a| a.first()) {
                    Some(first) => first.clone(),
                    None => return Err(EventSourceError::NotFound(identifier.to_string())),
                }
            }
        };
        Ok(Self::record_from(&data))
    }

    async fn discover(&self, limit: usize) -> Result<Vec<EventRecord>, EventSourceError> {
        let url = format!(
            "{}/events?active=true&closed=false&limit={}&search=AI&order=liquidity&ascending=false",
            self.base_url, limit
        );
        let listed = self.get_json(&url).await?;
        Ok(listed
            .as_array()
            .map(|events| events.iter().map(Self::record_from).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_identifier_is_id() {
        assert_eq!(parse_identifier("74949"), EventQuery::Id("74949".into()));
    }

    #[test]
    fn slug_identifier() {
        assert_eq!(
            parse_identifier("gpt-6-launch-2026"),
            EventQuery::Slug("gpt-6-launch-2026".into())
        );
    }

    #[test]
    fn full_url_is_reduced_to_slug() {
        assert_eq!(
            parse_identifier("https://polymarket.com/event/gpt-6-launch-2026?tid=123"),
            EventQuery::Slug("gpt-6-launch-2026".into())
        );
        assert_eq!(
            parse_identifier("https://polymarket.com/event/gpt-6-launch-2026/"),
            EventQuery::Slug("gpt-6-launch-2026".into())
        );
    }

    #[test]
    fn url_with_numeric_tail_is_id() {
        assert_eq!(
            parse_identifier("https://polymarket.com/event/74949"),
            EventQuery::Id("74949".into())
        );
    }

    #[test]
    fn record_mapping_handles_numeric_id() {
        let data = serde_json::json!({
            "id": 74949,
            "title": "Will it ship?",
            "description": "desc",
            "rules": "resolves YES if shipped",
            "ends_at": "2026-12-31T00:00:00Z",
            "liquidity": 120000.5
        });
        let record = GammaClient::record_from(&data);
        assert_eq!(record.id, "74949");
        assert_eq!(record.title, "Will it ship?");
        assert_eq!(record.liquidity, Some(120000.5));
        assert!(record.market_probability.is_none());
    }
}

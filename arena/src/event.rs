//! Event metadata — the question under prediction.

use serde::{Deserialize, Serialize};

/// A real-world event fetched from an external market source.
///
/// Immutable once constructed. Agents, the ledger, and the scheduler hold it
/// by reference (`Arc<EventRecord>`); nothing in the core ever mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stable identifier assigned by the event source.
    pub id: String,
    /// The question text ("Will X happen by Y?").
    pub title: String,
    /// Longer description of the event.
    pub description: String,
    /// How the event resolves YES or NO.
    pub resolution_rules: String,
    /// Deadline by which the event resolves (source-provided timestamp).
    pub resolution_date: String,
    /// Market-implied probability, when the source provides one.
    pub market_probability: Option<f64>,
    /// Market liquidity, when the source provides it.
    pub liquidity: Option<f64>,
}

impl EventRecord {
    /// Minimal constructor for events without market metadata.
    pub fn new(id: &str, title: &str, rules: &str, resolution_date: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            resolution_rules: rules.to_string(),
            resolution_date: resolution_date.to_string(),
            market_probability: None,
            liquidity: None,
        }
    }
}

impl std::fmt::Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.id, self.title)
    }
}

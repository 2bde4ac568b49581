//! Shared data models.

use serde::{Deserialize, Serialize};

/// One prior turn forwarded by the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat request payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Option<Vec<ChatTurn>>,
}

/// Chat response payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Search request payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<Vec<ChatTurn>>,
}

/// Search response payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// Conversational search response payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct LibrarianResponse {
    pub message: String,
    pub suggestions: Vec<SearchResult>,
}

/// A dataset suggested for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub dataset_id: String,
    pub title: String,
    pub description: String,
    /// Always within `[0, 1]`
    pub relevance_score: f64,
    pub metadata: SearchResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultMetadata {
    pub concept_scheme_id: String,
    #[serde(default)]
    pub dataflow_identifier: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_key: Option<String>,
}

/// Derive a display title from a dataset identifier.
///
/// Underscores become spaces and camel-case boundaries are split, so
/// `LabourForce_MONTHLY` reads `Labour Force MONTHLY`.
pub fn title_from_id(dataset_id: &str) -> String {
    let mut title = String::with_capacity(dataset_id.len() + 8);
    let mut prev: Option<char> = None;

    for c in dataset_id.chars() {
        let c = if c == '_' { ' ' } else { c };
        if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
            title.push(' ');
        }
        title.push(c);
        prev = Some(c);
    }

    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        "ABS Dataset".to_string()
    } else {
        title
    }
}

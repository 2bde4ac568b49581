//! Chat session: transcript plus current search results, driven by user input.

use tracing::{error, warn};

use crate::client::ScannerBackend;
use crate::models::SearchResult;
use crate::transcript::{ChatMessage, Role, Transcript};

pub const SEND_FAILED: &str = "Failed to get response from AI assistant";
const NO_RESULTS_REPLY: &str = "I couldn't find any datasets matching your query. Please try rephrasing your question or using different keywords.";
const SUMMARY_DESCRIPTION_CHARS: usize = 100;

/// Reply summarising suggested datasets.
pub fn summarize_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS_REPLY.to_string();
    }

    let lines: Vec<String> = results
        .iter()
        .map(|r| {
            let excerpt: String = r.description.chars().take(SUMMARY_DESCRIPTION_CHARS).collect();
            format!("• {}: {}...", r.title, excerpt)
        })
        .collect();

    format!(
        "I found {} relevant datasets for your query. Here are the recommendations:\n\n{}\n\nPlease select a dataset to explore the data further.",
        results.len(),
        lines.join("\n")
    )
}

pub struct ChatSession<B> {
    backend: B,
    transcript: Transcript,
    results: Vec<SearchResult>,
    busy: bool,
}

impl<B: ScannerBackend> ChatSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            transcript: Transcript::new(),
            results: Vec::new(),
            busy: false,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn error(&self) -> Option<&str> {
        self.transcript.error()
    }

    pub fn clear_error(&mut self) {
        self.transcript.clear_error();
    }

    /// Handle one user input. Returns false when the input was ignored.
    ///
    /// Searches first and summarises the suggestions; when search fails the whole
    /// conversation goes to chat instead. If both fail the pending reply is dropped and
    /// the error banner is set.
    pub async fn send(&mut self, content: &str) -> bool {
        let content = content.trim();
        if self.busy || content.is_empty() {
            return false;
        }

        self.busy = true;
        self.transcript.clear_error();
        self.transcript.push(ChatMessage::new(Role::User, content));
        let pending = self.transcript.push(ChatMessage::pending());

        let reply = match self.backend.search(content).await {
            Ok(results) => {
                let summary = summarize_results(&results);
                self.results = results;
                Ok(summary)
            }
            Err(e) => {
                warn!("Search failed, falling back to chat: {}", e);
                self.backend.chat(&self.transcript.turns()).await
            }
        };

        match reply {
            Ok(text) => {
                self.transcript.complete(pending, text);
            }
            Err(e) => {
                error!("Send message error: {}", e);
                self.transcript.set_error(SEND_FAILED);
                self.transcript.remove_pending();
            }
        }

        self.busy = false;
        true
    }

    pub fn set_results(&mut self, results: Vec<SearchResult>) {
        self.results = results;
    }

    pub fn clear_conversation(&mut self) {
        self.transcript.clear();
        self.results.clear();
        self.busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{QueryDefinition, QueryOptions};
    use crate::models::{ChatTurn, SearchResultMetadata};
    use crate::sdmx::DatasetData;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        search: Option<Vec<SearchResult>>,
        chat: Option<String>,
        chat_turns: Mutex<Vec<ChatTurn>>,
    }

    fn failure() -> Error {
        Error::Upstream {
            status: 500,
            body: "down".to_string(),
        }
    }

    #[async_trait]
    impl ScannerBackend for FakeBackend {
        async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
            self.search.clone().ok_or_else(failure)
        }

        async fn chat(&self, turns: &[ChatTurn]) -> Result<String> {
            *self.chat_turns.lock().unwrap() = turns.to_vec();
            self.chat.clone().ok_or_else(failure)
        }

        async fn catalog(&self) -> Result<Vec<QueryDefinition>> {
            Ok(Vec::new())
        }

        async fn fetch_dataset(
            &self,
            _query: &QueryDefinition,
            _overrides: &QueryOptions,
        ) -> Result<DatasetData> {
            Ok(DatasetData::default())
        }
    }

    fn result(id: &str, description: &str) -> SearchResult {
        SearchResult {
            dataset_id: id.to_string(),
            title: id.to_string(),
            description: description.to_string(),
            relevance_score: 0.9,
            metadata: SearchResultMetadata {
                concept_scheme_id: id.to_string(),
                dataflow_identifier: id.to_string(),
                last_updated: String::new(),
                tags: vec![],
                data_key: None,
            },
        }
    }

    #[tokio::test]
    async fn test_blank_or_busy_input_ignored() {
        let mut session = ChatSession::new(FakeBackend::default());
        assert!(!session.send("   ").await);

        session.busy = true;
        assert!(!session.send("jobs").await);
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_search_success_summarises_results() {
        let backend = FakeBackend {
            search: Some(vec![result("CPI", &"x".repeat(150))]),
            ..Default::default()
        };
        let mut session = ChatSession::new(backend);
        assert!(session.send("  prices  ").await);

        let messages = session.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "prices");
        assert!(messages[1].content.starts_with("I found 1 relevant datasets"));
        assert!(messages[1].content.contains(&format!("• CPI: {}...", "x".repeat(100))));
        assert!(!messages[1].is_loading);
        assert_eq!(session.results().len(), 1);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_empty_search_reply() {
        let backend = FakeBackend {
            search: Some(vec![]),
            ..Default::default()
        };
        let mut session = ChatSession::new(backend);
        session.send("unicorns").await;
        assert_eq!(session.transcript().messages()[1].content, NO_RESULTS_REPLY);
    }

    #[tokio::test]
    async fn test_search_failure_falls_back_to_chat() {
        let backend = FakeBackend {
            chat: Some("Try the labour force survey.".to_string()),
            ..Default::default()
        };
        let mut session = ChatSession::new(backend);
        session.send("jobs").await;

        let messages = session.transcript().messages();
        assert_eq!(messages[1].content, "Try the labour force survey.");
        assert_eq!(
            *session.backend.chat_turns.lock().unwrap(),
            vec![ChatTurn::user("jobs")]
        );
        assert!(session.error().is_none());
    }

    #[tokio::test]
    async fn test_total_failure_sets_error_and_drops_pending() {
        let mut session = ChatSession::new(FakeBackend::default());
        session.send("jobs").await;

        assert_eq!(session.error(), Some(SEND_FAILED));
        let messages = session.transcript().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);

        session.clear_conversation();
        assert!(session.transcript().is_empty());
        assert!(session.error().is_none());
        assert!(session.results().is_empty());
    }
}

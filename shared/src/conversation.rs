//! Conversation flows run against the assistant backend.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::assistant::{AssistantApi, RunRequest, ToolCall};
use crate::models::{title_from_id, ChatTurn, SearchResult, SearchResultMetadata};
use crate::poller::{poll_run, CancelToken, PollMode, PollPolicy, RunOutcome};
use crate::Result;

/// Name of the function the assistant calls to suggest datasets.
pub const SUGGEST_DATASETS: &str = "suggest_datasets";

/// Relevance given to every assistant suggestion.
pub const SUGGESTION_RELEVANCE: f64 = 0.9;

/// Reply of the conversational search flow.
#[derive(Debug, Clone, PartialEq)]
pub struct LibrarianReply {
    pub message: String,
    pub suggestions: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SuggestDatasetsArgs {
    #[serde(default)]
    datasets: Vec<SuggestedDataset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestedDataset {
    id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    data_key: Option<String>,
}

/// Runs chat, search and librarian conversations for one assistant.
pub struct Conversation<'a, A: AssistantApi + ?Sized> {
    api: &'a A,
    assistant_id: &'a str,
    policy: &'a PollPolicy,
    cancel: CancelToken,
}

impl<'a, A: AssistantApi + ?Sized> Conversation<'a, A> {
    pub fn new(api: &'a A, assistant_id: &'a str, policy: &'a PollPolicy) -> Self {
        Self {
            api,
            assistant_id,
            policy,
            cancel: CancelToken::new(),
        }
    }

    /// Use a caller-owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Free-text reply to the last user turn.
    pub async fn chat(&self, turns: &[ChatTurn]) -> Result<String> {
        let thread_id = self.api.create_thread().await?;

        if let Some(last_user) = turns.iter().rev().find(|t| t.role == "user") {
            self.api.add_message(&thread_id, &last_user.content).await?;
        }

        let outcome = self
            .run(&thread_id, 800, 0.7, None, PollMode::SubmitPlaceholders)
            .await?;

        Ok(match outcome {
            RunOutcome::Completed { message, .. } => message,
            RunOutcome::ToolCalls(_) => String::new(),
        })
    }

    /// Datasets the assistant suggests for a query.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let thread_id = self.api.create_thread().await?;
        self.api
            .add_message(&thread_id, &search_prompt(query))
            .await?;

        let outcome = self
            .run(
                &thread_id,
                1000,
                0.3,
                Some("required"),
                PollMode::ReturnToolCalls,
            )
            .await?;

        let calls = match outcome {
            RunOutcome::ToolCalls(calls) => calls,
            RunOutcome::Completed { message, tool_calls } => {
                if tool_calls.is_empty() {
                    info!(chars = message.len(), "Search run completed without tool calls");
                }
                tool_calls
            }
        };

        Ok(tool_calls_to_results(&calls))
    }

    /// Conversational search: a short reply plus suggestions, aware of prior turns.
    pub async fn librarian(&self, query: &str, history: &[ChatTurn]) -> Result<LibrarianReply> {
        let thread_id = self.api.create_thread().await?;
        self.api
            .add_message(&thread_id, &librarian_prompt(query, history))
            .await?;

        let outcome = self
            .run(
                &thread_id,
                1000,
                0.5,
                Some("auto"),
                PollMode::SubmitPlaceholders,
            )
            .await?;

        let (message, calls) = match outcome {
            RunOutcome::Completed {
                message,
                tool_calls,
            } => (message, tool_calls),
            RunOutcome::ToolCalls(calls) => (String::new(), calls),
        };

        Ok(LibrarianReply {
            message,
            suggestions: tool_calls_to_results(&calls),
        })
    }

    async fn run(
        &self,
        thread_id: &str,
        max_completion_tokens: u32,
        temperature: f32,
        tool_choice: Option<&str>,
        mode: PollMode,
    ) -> Result<RunOutcome> {
        let request = RunRequest {
            assistant_id: self.assistant_id.to_string(),
            max_completion_tokens,
            temperature,
            tool_choice: tool_choice.map(String::from),
        };
        let run = self.api.create_run(thread_id, &request).await?;
        info!(thread_id, run_id = %run.id, ?mode, "Run started");

        poll_run(self.api, thread_id, &run.id, mode, self.policy, &self.cancel).await
    }
}

/// Prompt asking the assistant to call `suggest_datasets` for a query.
pub fn search_prompt(query: &str) -> String {
    format!(
        r#"User query: "{query}"

Based on this query, search through the Australian government dataset information in selections.json and suggest the most relevant datasets by calling the {SUGGEST_DATASETS} function. Consider:
1. The user's intent and what type of data they might need
2. Keywords and domain areas mentioned in the dataset descriptions
3. Potential use cases and applications
4. Match against dataset IDs and descriptions in the selections.json file

Respond with human-like conversation (1-2 sentences). The {SUGGEST_DATASETS} function will display the relevant datasets and must be called

Call the {SUGGEST_DATASETS} function with up to 5 most relevant datasets from selections.json, providing their exact IDs and descriptions as they appear in the file."#
    )
}

/// Prompt for the conversational flow, with prior turns rendered as a text block.
pub fn librarian_prompt(query: &str, history: &[ChatTurn]) -> String {
    let mut prompt = String::new();

    let prior: Vec<String> = history
        .iter()
        .filter(|t| !t.content.trim().is_empty())
        .map(|t| {
            let speaker = if t.role == "assistant" { "Assistant" } else { "User" };
            format!("{}: {}", speaker, t.content.trim())
        })
        .collect();

    if !prior.is_empty() {
        prompt.push_str("Previous conversation:\n");
        prompt.push_str(&prior.join("\n"));
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        r#"Current request: "{query}"

Reply conversationally in 1-2 sentences. When datasets from selections.json fit the request, call the {SUGGEST_DATASETS} function with up to 5 of them, using their exact IDs and descriptions."#
    ));
    prompt
}

/// Convert `suggest_datasets` calls into search results.
///
/// Calls to other functions are ignored. Calls whose arguments cannot be decoded are
/// skipped with a warning; the remaining calls still produce results.
pub fn tool_calls_to_results(calls: &[ToolCall]) -> Vec<SearchResult> {
    let last_updated = Utc::now().to_rfc3339();
    let mut results = Vec::new();

    for call in calls.iter().filter(|c| c.function.name == SUGGEST_DATASETS) {
        let args: SuggestDatasetsArgs = match call.function.decode_arguments() {
            Ok(args) => args,
            Err(e) => {
                warn!(call_id = %call.id, "Skipping undecodable {} arguments: {}", SUGGEST_DATASETS, e);
                continue;
            }
        };

        results.extend(args.datasets.into_iter().map(|dataset| SearchResult {
            title: title_from_id(&dataset.id),
            description: dataset.description,
            relevance_score: SUGGESTION_RELEVANCE,
            metadata: SearchResultMetadata {
                concept_scheme_id: dataset.id.clone(),
                dataflow_identifier: dataset.id.clone(),
                last_updated: last_updated.clone(),
                tags: vec!["ABS".to_string(), "suggested".to_string()],
                data_key: dataset.data_key,
            },
            dataset_id: dataset.id,
        }));
    }

    results
}

//! Assistant backend client.
//!
//! Speaks the OpenAI Assistants v2 thread/run protocol. The [`AssistantApi`] trait is the
//! seam the poller and the conversation flows are written against.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, error, instrument};

use crate::{Error, Result};

/// Lifecycle status of an assistant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A run as reported by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
}

impl Run {
    /// Tool calls waiting for outputs, if the run exposes any.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        match &self.required_action {
            Some(action) if action.action_type == "submit_tool_outputs" => action
                .submit_tool_outputs
                .as_ref()
                .map(|s| s.tool_calls.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// A structured call the assistant wants executed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionCall {
    pub name: String,
    /// Either a pre-parsed object or a JSON string
    #[serde(default)]
    pub arguments: Value,
}

impl FunctionCall {
    /// Decode the call arguments, parsing them first when they arrive as a string.
    pub fn decode_arguments<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.arguments {
            Value::String(raw) => Ok(serde_json::from_str(raw)?),
            other => Ok(serde_json::from_value(other.clone())?),
        }
    }
}

/// Output handed back for one tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// A message stored on a thread.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    #[serde(default)]
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    /// Concatenated text parts of the message.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.text.as_ref().map(|t| t.value.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<TextContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    pub value: String,
}

/// Body used to start a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub assistant_id: String,
    pub max_completion_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Operations on the assistant backend.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_thread(&self) -> Result<String>;
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<()>;
    async fn create_run(&self, thread_id: &str, request: &RunRequest) -> Result<Run>;
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run>;
}

#[derive(Deserialize)]
struct ThreadCreated {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Serialize)]
struct NewMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ToolOutputsBody<'a> {
    tool_outputs: &'a [ToolOutput],
}

/// HTTP client for the assistant backend.
#[derive(Clone)]
pub struct AssistantClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl AssistantClient {
    /// Create a new assistant client.
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorized(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!("Assistant API error: {} - {}", status, body);
    Err(Error::Upstream { status, body })
}

#[async_trait]
impl AssistantApi for AssistantClient {
    #[instrument(skip(self))]
    async fn create_thread(&self) -> Result<String> {
        let created: ThreadCreated = self
            .send(self.http.post(self.url("threads")).json(&serde_json::json!({})))
            .await?;
        debug!(thread_id = %created.id, "Thread created");
        Ok(created.id)
    }

    #[instrument(skip(self, content))]
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<()> {
        let _: Value = self
            .send(
                self.http
                    .post(self.url(&format!("threads/{}/messages", thread_id)))
                    .json(&NewMessage {
                        role: "user",
                        content,
                    }),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, request))]
    async fn create_run(&self, thread_id: &str, request: &RunRequest) -> Result<Run> {
        self.send(
            self.http
                .post(self.url(&format!("threads/{}/runs", thread_id)))
                .json(request),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.send(
            self.http
                .get(self.url(&format!("threads/{}/runs/{}", thread_id, run_id))),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let list: MessageList = self
            .send(
                self.http
                    .get(self.url(&format!("threads/{}/messages", thread_id))),
            )
            .await?;
        Ok(list.data)
    }

    #[instrument(skip(self, outputs))]
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        self.send(
            self.http
                .post(self.url(&format!(
                    "threads/{}/runs/{}/submit_tool_outputs",
                    thread_id, run_id
                )))
                .json(&ToolOutputsBody {
                    tool_outputs: outputs,
                }),
        )
        .await
    }
}

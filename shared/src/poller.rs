//! Assistant run poller.
//!
//! Runs are created on the backend and then polled until they settle. Each fetched run is
//! folded into a [`RunState`]; the loop reacts to the state according to the
//! [`PollMode`] the caller picked:
//!
//! - [`PollMode::ReturnToolCalls`] hands pending tool calls straight back (search flow).
//! - [`PollMode::SubmitPlaceholders`] answers each tool call with a no-op output and keeps
//!   polling so the run can still produce a trailing message (conversational flow).
//!
//! The schedule comes from a [`PollPolicy`]; its default is one poll per second for at most
//! thirty attempts.

use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assistant::{AssistantApi, Run, RunStatus, ThreadMessage, ToolCall, ToolOutput};
use crate::{Error, Result};

/// Output submitted for tool calls the conversational flow does not execute.
pub const PLACEHOLDER_OUTPUT: &str = r#"{"status":"ok"}"#;

/// Where a run stands after one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// Queued, in progress, cancelling or an unrecognised status
    Pending,
    /// The assistant is waiting on tool outputs
    RequiresAction(Vec<ToolCall>),
    /// Finished; may still expose a pending tool submission
    Completed { pending_calls: Vec<ToolCall> },
    /// Terminal failure
    Failed(RunStatus),
}

impl From<&Run> for RunState {
    fn from(run: &Run) -> Self {
        match run.status {
            RunStatus::Queued
            | RunStatus::InProgress
            | RunStatus::Cancelling
            | RunStatus::Unknown => RunState::Pending,
            RunStatus::RequiresAction => RunState::RequiresAction(run.pending_tool_calls()),
            RunStatus::Completed => RunState::Completed {
                pending_calls: run.pending_tool_calls(),
            },
            status @ (RunStatus::Failed
            | RunStatus::Cancelled
            | RunStatus::Expired
            | RunStatus::Incomplete) => RunState::Failed(status),
        }
    }
}

/// How the poller reacts to pending tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    ReturnToolCalls,
    SubmitPlaceholders,
}

/// What a settled run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Tool calls returned without waiting for a text message
    ToolCalls(Vec<ToolCall>),
    /// Run completed; `message` is empty when no assistant text exists
    Completed {
        message: String,
        tool_calls: Vec<ToolCall>,
    },
}

/// Polling schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first unsettled poll
    pub interval: Duration,
    /// Number of polls before giving up
    pub max_attempts: u32,
    /// Multiplier applied to the delay after each poll, `1.0` keeps it fixed
    pub backoff_factor: f64,
    /// Ceiling for the delay once backoff applies
    pub max_interval: Duration,
    /// Extra random delay, as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
            backoff_factor: 1.0,
            max_interval: Duration::from_secs(5),
            jitter: 0.0,
        }
    }
}

impl PollPolicy {
    /// Policy without any sleeping, for tests and local tooling.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts,
            backoff_factor: 1.0,
            max_interval: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("poll max attempts must be positive".into()));
        }
        if !(self.backoff_factor >= 1.0 && self.backoff_factor.is_finite()) {
            return Err(Error::Config("poll backoff factor must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::Config("poll jitter must be within [0, 1]".into()));
        }
        Ok(())
    }

    /// Delay before poll number `attempt + 1`, without jitter.
    ///
    /// Never shorter than `interval`; backoff only grows it up to `max_interval`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if self.backoff_factor <= 1.0 {
            return self.interval;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = self.interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        let ceiling = self.max_interval.max(self.interval).as_secs_f64();
        Duration::from_secs_f64(grown.min(ceiling))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(extra)
    }
}

/// Cooperative cancellation shared between a poll loop and its caller.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Poll a run until it settles.
pub async fn poll_run<A: AssistantApi + ?Sized>(
    api: &A,
    thread_id: &str,
    run_id: &str,
    mode: PollMode,
    policy: &PollPolicy,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    let mut collected: Vec<ToolCall> = Vec::new();
    let mut submitted: HashSet<String> = HashSet::new();

    for attempt in 0..policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let run = api.get_run(thread_id, run_id).await?;
        debug!(attempt = attempt + 1, status = %run.status, "Polled run");

        match RunState::from(&run) {
            RunState::Pending => {}
            RunState::RequiresAction(calls) => match mode {
                PollMode::ReturnToolCalls => {
                    info!(calls = calls.len(), "Run requires action, returning tool calls");
                    return Ok(RunOutcome::ToolCalls(calls));
                }
                PollMode::SubmitPlaceholders => {
                    let fresh: Vec<ToolCall> = calls
                        .into_iter()
                        .filter(|c| submitted.insert(c.id.clone()))
                        .collect();
                    if !fresh.is_empty() {
                        let outputs = placeholder_outputs(&fresh);
                        info!(calls = fresh.len(), "Submitting placeholder tool outputs");
                        api.submit_tool_outputs(thread_id, run_id, &outputs).await?;
                        collected.extend(fresh);
                    }
                }
            },
            RunState::Completed { pending_calls } => {
                if !pending_calls.is_empty() && mode == PollMode::ReturnToolCalls {
                    return Ok(RunOutcome::ToolCalls(pending_calls));
                }
                collected.extend(
                    pending_calls
                        .into_iter()
                        .filter(|c| submitted.insert(c.id.clone())),
                );
                let messages = api.list_messages(thread_id).await?;
                let message = latest_assistant_text(&messages);
                info!(attempt = attempt + 1, chars = message.len(), "Run completed");
                return Ok(RunOutcome::Completed {
                    message,
                    tool_calls: collected,
                });
            }
            RunState::Failed(status) => {
                warn!(%status, "Run ended without completing");
                return Err(Error::RunFailed(status));
            }
        }

        if attempt + 1 < policy.max_attempts {
            let delay = policy.delay(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }
    }

    warn!(attempts = policy.max_attempts, "Run polling timed out");
    Err(Error::PollingTimedOut {
        attempts: policy.max_attempts,
    })
}

/// No-op outputs for each call, used to unblock a run.
pub fn placeholder_outputs(calls: &[ToolCall]) -> Vec<ToolOutput> {
    calls
        .iter()
        .map(|call| ToolOutput {
            tool_call_id: call.id.clone(),
            output: PLACEHOLDER_OUTPUT.to_string(),
        })
        .collect()
}

/// Text of the most recent assistant-authored message, or an empty string.
pub fn latest_assistant_text(messages: &[ThreadMessage]) -> String {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == "assistant")
        // Listing is newest first; ties on created_at go to the earlier entry.
        .max_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ib.cmp(ia)))
        .map(|(_, m)| m.text())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted assistant backend shared by the poller, flow and endpoint tests.

    use super::*;
    use crate::assistant::{FunctionCall, MessageContent, RunRequest, TextContent};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn run(status: RunStatus, calls: Vec<ToolCall>) -> Run {
        let required_action = (!calls.is_empty()).then(|| crate::assistant::RequiredAction {
            action_type: "submit_tool_outputs".to_string(),
            submit_tool_outputs: Some(crate::assistant::SubmitToolOutputs { tool_calls: calls }),
        });
        Run {
            id: "run_1".to_string(),
            status,
            required_action,
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }

    pub fn message(role: &str, created_at: i64, text: &str) -> ThreadMessage {
        ThreadMessage {
            id: format!("msg_{}", created_at),
            role: role.to_string(),
            created_at,
            content: vec![MessageContent {
                content_type: "text".to_string(),
                text: Some(TextContent {
                    value: text.to_string(),
                }),
            }],
        }
    }

    /// Replays a fixed sequence of runs; the last one repeats once the script runs out.
    #[derive(Default)]
    pub struct ScriptedAssistant {
        pub runs: Mutex<VecDeque<Run>>,
        pub messages: Vec<ThreadMessage>,
        pub posted: Mutex<Vec<String>>,
        pub run_requests: Mutex<Vec<RunRequest>>,
        pub submitted: Mutex<Vec<ToolOutput>>,
        pub polls: AtomicUsize,
        pub calls: AtomicUsize,
    }

    impl ScriptedAssistant {
        pub fn new(runs: Vec<Run>, messages: Vec<ThreadMessage>) -> Self {
            Self {
                runs: Mutex::new(runs.into()),
                messages,
                ..Self::default()
            }
        }

        pub fn total_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn touch(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AssistantApi for ScriptedAssistant {
        async fn create_thread(&self) -> Result<String> {
            self.touch();
            Ok("thread_1".to_string())
        }

        async fn add_message(&self, _thread_id: &str, content: &str) -> Result<()> {
            self.touch();
            self.posted.lock().unwrap().push(content.to_string());
            Ok(())
        }

        async fn create_run(&self, _thread_id: &str, request: &RunRequest) -> Result<Run> {
            self.touch();
            self.run_requests.lock().unwrap().push(request.clone());
            Ok(run(RunStatus::Queued, vec![]))
        }

        async fn get_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run> {
            self.touch();
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut runs = self.runs.lock().unwrap();
            let next = if runs.len() > 1 {
                runs.pop_front()
            } else {
                runs.front().cloned()
            };
            next.ok_or_else(|| Error::Internal("script exhausted".into()))
        }

        async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>> {
            self.touch();
            Ok(self.messages.clone())
        }

        async fn submit_tool_outputs(
            &self,
            _thread_id: &str,
            _run_id: &str,
            outputs: &[ToolOutput],
        ) -> Result<Run> {
            self.touch();
            self.submitted.lock().unwrap().extend_from_slice(outputs);
            Ok(run(RunStatus::Queued, vec![]))
        }
    }
}

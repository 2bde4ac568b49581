//! Endpoint handlers behind the HTTP gateway.
//!
//! Each handler takes the function's state and the incoming request and always answers
//! with a response carrying CORS headers; failures become `{error, details?}` bodies.

pub mod catalog;
pub mod chat;
pub mod data;
pub mod search;

use lambda_http::{Body, Request, RequestExt, Response};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::assistant::{AssistantApi, AssistantClient};
use crate::config::Config;
use crate::conversation::Conversation;
use crate::http::error_response;
use crate::poller::{CancelToken, PollPolicy};
use crate::{Error, Result};

pub const CONFIGURATION_MISSING: &str = "OpenAI configuration missing";
pub const REQUEST_TIMED_OUT: &str = "Request timed out";

/// Time kept back from the invocation deadline to write the response.
const DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// Assistant access shared by the chat and search functions.
///
/// Credentials are optional here: their absence is reported per request, before any
/// network call, rather than failing the cold start.
pub struct AssistantGateway<A> {
    api: Option<A>,
    assistant_id: Option<String>,
    poll: PollPolicy,
}

impl AssistantGateway<AssistantClient> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let api = config
            .openai_api_key
            .as_ref()
            .map(|key| AssistantClient::new(http, config.openai_base_url.clone(), key.clone()));

        Ok(Self::new(api, config.assistant_id.clone(), config.poll.clone()))
    }
}

impl<A: AssistantApi> AssistantGateway<A> {
    pub fn new(api: Option<A>, assistant_id: Option<String>, poll: PollPolicy) -> Self {
        Self {
            api,
            assistant_id: assistant_id.filter(|id| !id.is_empty()),
            poll,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api.is_some()
    }

    pub fn has_assistant_id(&self) -> bool {
        self.assistant_id.is_some()
    }

    pub fn log_configuration(&self) {
        info!(
            has_api_key = self.has_api_key(),
            has_assistant_id = self.has_assistant_id(),
            assistant_id_length = self.assistant_id.as_deref().map_or(0, str::len),
            "Assistant configuration"
        );
    }

    /// Conversation against the configured assistant, or `ConfigurationMissing`.
    pub fn conversation(&self) -> Result<Conversation<'_, A>> {
        match (&self.api, &self.assistant_id) {
            (Some(api), Some(assistant_id)) => Ok(Conversation::new(api, assistant_id, &self.poll)),
            _ => Err(Error::ConfigurationMissing("OpenAI")),
        }
    }
}

/// Cancels a conversation shortly before the invocation runs out of time.
///
/// The timer is aborted when the guard is dropped.
pub(crate) struct DeadlineGuard {
    cancel: CancelToken,
    timer: Option<JoinHandle<()>>,
}

impl DeadlineGuard {
    pub(crate) fn for_request(event: &Request) -> Self {
        let deadline = event
            .lambda_context_ref()
            .filter(|context| context.deadline > 0)
            .map(|context| context.deadline());
        Self::until(deadline, SystemTime::now())
    }

    fn until(deadline: Option<SystemTime>, now: SystemTime) -> Self {
        let cancel = CancelToken::new();
        let Some(deadline) = deadline else {
            return Self { cancel, timer: None };
        };

        let remaining = deadline
            .duration_since(now)
            .unwrap_or_default()
            .saturating_sub(DEADLINE_MARGIN);
        if remaining.is_zero() {
            warn!("Invocation deadline already reached");
            cancel.cancel();
            return Self { cancel, timer: None };
        }

        let token = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            warn!("Invocation deadline approaching, cancelling assistant run");
            token.cancel();
        });
        Self {
            cancel,
            timer: Some(timer),
        }
    }

    pub(crate) fn token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Map an assistant flow failure to the endpoint's error body.
///
/// Timeouts read "Request timed out"; other run failures only show `generic`, the cause
/// stays in the logs.
pub(crate) fn assistant_failure(
    err: Error,
    generic: &str,
) -> std::result::Result<Response<Body>, lambda_http::Error> {
    error!("Assistant request failed: {}", err);
    match err {
        Error::BadRequest(message) => error_response(400, message),
        Error::ConfigurationMissing(_) => error_response(500, CONFIGURATION_MISSING),
        Error::PollingTimedOut { .. } | Error::Cancelled => error_response(500, REQUEST_TIMED_OUT),
        _ => error_response(500, generic),
    }
}

//! `POST /api/chat`: free-text reply from the assistant.

use lambda_http::http::Method;
use lambda_http::{Body, Error, Request, Response};
use tracing::{info, warn};

use super::{assistant_failure, AssistantGateway, DeadlineGuard, CONFIGURATION_MISSING};
use crate::assistant::AssistantApi;
use crate::http::{error_response, json_response, method_not_allowed, parse_json_body, preflight_response};
use crate::models::{ChatRequest, ChatResponse};

pub const CHAT_FAILED: &str = "Failed to get response from AI assistant";
const MESSAGES_REQUIRED: &str = "Messages array is required";

pub async fn handle<A: AssistantApi>(
    gateway: &AssistantGateway<A>,
    event: Request,
) -> Result<Response<Body>, Error> {
    match event.method() {
        &Method::OPTIONS => return preflight_response(),
        &Method::POST => {}
        _ => return method_not_allowed(),
    }

    gateway.log_configuration();
    let conversation = match gateway.conversation() {
        Ok(conversation) => conversation,
        Err(_) => {
            warn!(
                has_api_key = gateway.has_api_key(),
                has_assistant_id = gateway.has_assistant_id(),
                "Assistant configuration missing"
            );
            return error_response(500, CONFIGURATION_MISSING);
        }
    };

    let turns = match parse_json_body::<ChatRequest>(event.body()) {
        Ok(ChatRequest {
            messages: Some(turns),
        }) => turns,
        Ok(_) => return error_response(400, MESSAGES_REQUIRED),
        Err(e) => {
            warn!("Invalid chat request body: {}", e);
            return error_response(400, MESSAGES_REQUIRED);
        }
    };
    info!(turns = turns.len(), "Chat request");

    let deadline = DeadlineGuard::for_request(&event);
    let conversation = conversation.with_cancel(deadline.token());

    match conversation.chat(&turns).await {
        Ok(response) => json_response(200, &ChatResponse { response }),
        Err(e) => assistant_failure(e, CHAT_FAILED),
    }
}

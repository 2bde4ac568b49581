//! `POST /api/search`: dataset suggestions for a query.
//!
//! A body with `conversationHistory` gets the conversational variant, answering
//! `{message, suggestions}` instead of `{results}`.

use lambda_http::http::Method;
use lambda_http::{Body, Error, Request, Response};
use serde_json::json;
use tracing::{info, warn};

use super::{assistant_failure, AssistantGateway, DeadlineGuard, CONFIGURATION_MISSING};
use crate::assistant::AssistantApi;
use crate::http::{
    error_response, error_response_with_details, json_response, method_not_allowed,
    parse_json_body, preflight_response,
};
use crate::models::{LibrarianResponse, SearchRequest, SearchResponse};

pub const SEARCH_FAILED: &str = "Failed to search datasets";
const QUERY_REQUIRED: &str = "Search query is required";

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
            return error_response_with_details(
                500,
                CONFIGURATION_MISSING,
                json!({
                    "hasApiKey": gateway.has_api_key(),
                    "hasAssistantId": gateway.has_assistant_id(),
                }),
            );
        }
    };

    let request = match parse_json_body::<SearchRequest>(event.body()) {
        Ok(request) => request,
        Err(e) => {
            warn!("Invalid search request body: {}", e);
            return error_response(400, QUERY_REQUIRED);
        }
    };
    let query = match request.query.as_deref().map(str::trim) {
        Some(query) if !query.is_empty() => query,
        _ => return error_response(400, QUERY_REQUIRED),
    };

    let deadline = DeadlineGuard::for_request(&event);
    let conversation = conversation.with_cancel(deadline.token());

    match request.conversation_history.as_deref() {
        Some(history) => {
            info!(query, turns = history.len(), "Conversational search request");
            match conversation.librarian(query, history).await {
                Ok(reply) => json_response(
                    200,
                    &LibrarianResponse {
                        message: reply.message,
                        suggestions: reply.suggestions,
                    },
                ),
                Err(e) => assistant_failure(e, SEARCH_FAILED),
            }
        }
        None => {
            info!(query, "Search request");
            match conversation.search(query).await {
                Ok(results) => {
                    info!(results = results.len(), "Search completed");
                    json_response(200, &SearchResponse { results })
                }
                Err(e) => assistant_failure(e, SEARCH_FAILED),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::RunStatus;
    use crate::poller::testing::{message, run, tool_call, ScriptedAssistant};
    use crate::poller::PollPolicy;
    use crate::proxy::testing::{body_json, request};

    fn configured(api: ScriptedAssistant) -> AssistantGateway<ScriptedAssistant> {
        AssistantGateway::new(Some(api), Some("asst_1".into()), PollPolicy::immediate(3))
    }

    fn suggestion() -> crate::assistant::ToolCall {
        tool_call(
            "call_1",
            "suggest_datasets",
            json!({"datasets": [{"id": "LabourForce", "description": "Monthly jobs"}]}),
        )
    }

    #[tokio::test]
    async fn test_missing_configuration_reports_flags() {
        let unconfigured: AssistantGateway<ScriptedAssistant> =
            AssistantGateway::new(None, None, PollPolicy::immediate(3));
        let response = handle(&unconfigured, request(Method::POST, r#"{"query":"jobs"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
        let body = body_json(&response);
        assert_eq!(body["error"], CONFIGURATION_MISSING);
        assert_eq!(body["details"]["hasApiKey"], false);
        assert_eq!(body["details"]["hasAssistantId"], false);
    }

    #[tokio::test]
    async fn test_missing_key_reports_assistant_id() {
        let gateway = AssistantGateway::new(None, Some("asst_1".into()), PollPolicy::immediate(3));
        let response = handle::<ScriptedAssistant>(&gateway, request(Method::POST, r#"{"query":"jobs"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        assert_eq!(body_json(&response)["details"]["hasAssistantId"], true);
    }

    #[tokio::test]
    async fn test_missing_assistant_id_makes_no_calls() {
        let gateway = AssistantGateway::new(
            Some(ScriptedAssistant::default()),
            None,
            PollPolicy::immediate(3),
        );
        let response = handle(&gateway, request(Method::POST, r#"{"query":"jobs"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
        let body = body_json(&response);
        assert_eq!(body["error"], CONFIGURATION_MISSING);
        assert_eq!(body["details"]["hasApiKey"], true);
        assert_eq!(body["details"]["hasAssistantId"], false);
        assert_eq!(gateway.api.as_ref().unwrap().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_query_required() {
        let gateway = configured(ScriptedAssistant::default());
        for body in [
            "",
            "{}",
            r#"{"query":"   "}"#,
            r#"{"query":7}"#,
            r#"{"query":"jobs","conversationHistory":"not a list"}"#,
        ] {
            let response = handle(&gateway, request(Method::POST, body)).await.unwrap();
            assert_eq!(response.status(), 400, "body {:?}", body);
            assert_eq!(body_json(&response)["error"], QUERY_REQUIRED);
        }
        assert_eq!(gateway.api.as_ref().unwrap().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_search_returns_results() {
        let gateway = configured(ScriptedAssistant::new(
            vec![run(RunStatus::RequiresAction, vec![suggestion()])],
            vec![],
        ));
        let response = handle(&gateway, request(Method::POST, r#"{"query":"jobs"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = body_json(&response);
        assert_eq!(body["results"][0]["datasetId"], "LabourForce");
        assert_eq!(body["results"][0]["title"], "Labour Force");
        assert!(body.get("message").is_none());

        let requests = gateway.api.as_ref().unwrap().run_requests.lock().unwrap().clone();
        assert_eq!(requests[0].tool_choice.as_deref(), Some("required"));
    }

    #[tokio::test]
    async fn test_history_selects_conversational_variant() {
        let gateway = configured(ScriptedAssistant::new(
            vec![
                run(RunStatus::RequiresAction, vec![suggestion()]),
                run(RunStatus::Completed, vec![]),
            ],
            vec![message("assistant", 3, "The labour force survey fits.")],
        ));
        let body = r#"{"query":"and by state?","conversationHistory":[
            {"role":"user","content":"jobs"},{"role":"assistant","content":"Sure"}
        ]}"#;
        let response = handle(&gateway, request(Method::POST, body)).await.unwrap();

        assert_eq!(response.status(), 200);
        let body = body_json(&response);
        assert_eq!(body["message"], "The labour force survey fits.");
        assert_eq!(body["suggestions"][0]["datasetId"], "LabourForce");
        assert!(body.get("results").is_none());

        let api = gateway.api.as_ref().unwrap();
        assert_eq!(api.submitted.lock().unwrap().len(), 1);
        assert!(api.posted.lock().unwrap()[0].contains("Previous conversation:"));
    }

    #[tokio::test]
    async fn test_run_failure_is_generic() {
        let gateway = configured(ScriptedAssistant::new(vec![run(RunStatus::Expired, vec![])], vec![]));
        let response = handle(&gateway, request(Method::POST, r#"{"query":"jobs"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        assert_eq!(body_json(&response)["error"], SEARCH_FAILED);
    }
}

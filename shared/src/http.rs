//! HTTP helpers for Lambda functions.

use lambda_http::http::response::Builder;
use lambda_http::{Body, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::Error;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET,OPTIONS,PATCH,DELETE,POST,PUT";
pub const ALLOW_HEADERS: &str = "X-CSRF-Token, X-Requested-With, Accept, Accept-Version, \
Content-Length, Content-MD5, Content-Type, Date, X-Api-Version";

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Response builder carrying the permissive CORS headers.
pub fn cors_builder(status: u16) -> Builder {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Credentials", "true")
        .header("Access-Control-Allow-Origin", ALLOW_ORIGIN)
        .header("Access-Control-Allow-Methods", ALLOW_METHODS)
        .header("Access-Control-Allow-Headers", ALLOW_HEADERS)
}

/// Empty 200 answer to a CORS preflight.
pub fn preflight_response() -> Result<Response<Body>, lambda_http::Error> {
    Ok(cors_builder(200).body(Body::Empty).map_err(Box::new)?)
}

/// Create a JSON response with the given status code and data.
pub fn json_response<T: Serialize>(
    status: u16,
    data: &T,
) -> Result<Response<Body>, lambda_http::Error> {
    Ok(cors_builder(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(data)?))
        .map_err(Box::new)?)
}

/// Create a response with a raw body and content type.
pub fn raw_response(
    status: u16,
    content_type: &str,
    body: String,
) -> Result<Response<Body>, lambda_http::Error> {
    Ok(cors_builder(status)
        .header("content-type", content_type)
        .body(Body::from(body))
        .map_err(Box::new)?)
}

/// Create an error response with the given status code and message.
pub fn error_response(
    status: u16,
    message: impl Into<String>,
) -> Result<Response<Body>, lambda_http::Error> {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
            details: None,
        },
    )
}

/// Error response carrying a `details` payload.
pub fn error_response_with_details(
    status: u16,
    message: impl Into<String>,
    details: Value,
) -> Result<Response<Body>, lambda_http::Error> {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
            details: Some(details),
        },
    )
}

/// 405 for methods an endpoint does not serve.
pub fn method_not_allowed() -> Result<Response<Body>, lambda_http::Error> {
    error_response(405, "Method not allowed")
}

/// Parse request body as JSON.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<T, Error> {
    let bytes: &[u8] = body.as_ref();
    if bytes.is_empty() {
        return Err(Error::BadRequest("Missing request body".to_string()));
    }
    serde_json::from_slice(bytes).map_err(Error::Serialization)
}

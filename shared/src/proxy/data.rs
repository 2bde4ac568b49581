//! `GET /api/abs-data?path=...`: pass-through to the statistics API.

use async_trait::async_trait;
use lambda_http::http::header::ACCEPT;
use lambda_http::http::Method;
use lambda_http::{Body, Error, Request, RequestExt, Response};
use reqwest::{Client, Url};
use tracing::{error, info, instrument};

use crate::http::{
    error_response, error_response_with_details, method_not_allowed, preflight_response,
    raw_response,
};

const DEFAULT_ACCEPT: &str = "application/vnd.sdmx.data+json";
const DEFAULT_CONTENT_TYPE: &str = "text/plain";
const USER_AGENT: &str = "AU-Dataset-Scanner/1.0";

/// What came back from the statistics API.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub reason: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport to the statistics API.
#[async_trait]
pub trait SdmxUpstream: Send + Sync {
    async fn fetch(&self, url: &Url, accept: &str) -> crate::Result<UpstreamReply>;
}

/// reqwest-backed upstream.
pub struct HttpUpstream {
    http: Client,
}

impl HttpUpstream {
    pub fn new() -> crate::Result<Self> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl SdmxUpstream for HttpUpstream {
    #[instrument(skip(self, url), fields(url = %url))]
    async fn fetch(&self, url: &Url, accept: &str) -> crate::Result<UpstreamReply> {
        let response = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.text().await?;

        Ok(UpstreamReply {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            content_type,
            body,
        })
    }
}

/// `<base>/<path>` with `params` appended in order.
pub fn build_upstream_url(base: &str, path: &str, params: &[(String, String)]) -> crate::Result<Url> {
    let raw = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url = Url::parse(&raw)
        .map_err(|e| crate::Error::BadRequest(format!("Invalid path {}: {}", path, e)))?;

    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

/// Pairs of a raw query string other than `path`, in the order the client sent them.
pub fn forwarded_pairs(raw_query: &str) -> Vec<(String, String)> {
    raw_query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .filter(|(key, _)| key != "path")
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

pub struct DataProxy<U> {
    upstream: U,
    base_url: String,
}

impl<U: SdmxUpstream> DataProxy<U> {
    pub fn new(upstream: U, base_url: impl Into<String>) -> Self {
        Self {
            upstream,
            base_url: base_url.into(),
        }
    }

    pub async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        match event.method() {
            &Method::OPTIONS => return preflight_response(),
            &Method::GET => {}
            _ => return method_not_allowed(),
        }

        let query = event.query_string_parameters();
        let path = match query.first("path").filter(|p| !p.is_empty()) {
            Some(path) => path.to_string(),
            None => {
                error!("Missing path parameter");
                return error_response(400, "Path parameter is required");
            }
        };

        let params = match event.uri().query().filter(|q| !q.is_empty()) {
            Some(raw) => forwarded_pairs(raw),
            None => {
                let mut params: Vec<(String, String)> = query
                    .iter()
                    .filter(|(key, _)| *key != "path")
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                // No raw query to follow; stable on key so repeated keys keep their order.
                params.sort_by(|a, b| a.0.cmp(&b.0));
                params
            }
        };

        let url = match build_upstream_url(&self.base_url, &path, &params) {
            Ok(url) => url,
            Err(e) => return error_response(e.status_code(), e.to_string()),
        };

        let accept = event
            .headers()
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_ACCEPT);

        info!(path = %path, params = ?params, upstream = %url, accept, "Proxying statistics request");

        let reply = match self.upstream.fetch(&url, accept).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Error proxying statistics request: {}", e);
                return error_response(500, e.to_string());
            }
        };

        if !reply.is_success() {
            error!(status = reply.status, body = %reply.body, "Statistics API error");
            let message = format!("ABS API error: {} {}", reply.status, reply.reason);
            return error_response_with_details(
                reply.status,
                message.trim_end(),
                serde_json::Value::String(reply.body),
            );
        }

        let content_type = reply
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        info!(status = reply.status, bytes = reply.body.len(), content_type = %content_type, "Statistics request succeeded");

        raw_response(reply.status, &content_type, reply.body)
    }
}

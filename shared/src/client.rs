//! Client for the scanner's own proxy endpoints.
//!
//! This is what a front end talks to: search, chat, catalog and dataset fetches, all
//! through the gateway, never directly against the upstream APIs.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{error, instrument};

use crate::catalog::{QueryDefinition, QueryOptions};
use crate::models::{ChatRequest, ChatResponse, ChatTurn, SearchRequest, SearchResponse, SearchResult};
use crate::sdmx::{self, DatasetData, ResponseFormat};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "AU-Dataset-Scanner/1.0";

pub const CHAT_FALLBACK_REPLY: &str =
    "I apologize, but I was unable to generate a response. Please try rephrasing your question.";

/// Operations the chat session needs from the backend.
#[async_trait]
pub trait ScannerBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
    async fn chat(&self, turns: &[ChatTurn]) -> Result<String>;
    async fn catalog(&self) -> Result<Vec<QueryDefinition>>;
    async fn fetch_dataset(
        &self,
        query: &QueryDefinition,
        overrides: &QueryOptions,
    ) -> Result<DatasetData>;
}

#[derive(serde::Deserialize)]
struct CatalogResponse {
    queries: Vec<QueryDefinition>,
}

/// Message shown for a failed dataset fetch.
pub fn dataset_error_message(status: u16) -> &'static str {
    match status {
        404 => "Dataset not found. Please check the dataflow identifier and data key.",
        400 => "Invalid request parameters. Please check your query parameters.",
        429 => "API rate limit exceeded. Please try again later.",
        _ => "Failed to fetch dataset data. Please try again.",
    }
}

/// Dataset from a data proxy reply: friendly error on failure, normalized table otherwise.
pub fn dataset_from_reply(status: u16, body: &str, format: ResponseFormat) -> Result<DatasetData> {
    if !(200..300).contains(&status) {
        error!(status, "Dataset fetch failed");
        return Err(Error::Upstream {
            status,
            body: dataset_error_message(status).to_string(),
        });
    }
    sdmx::normalize(body, format)
}

/// Chat reply shown to the user; blank replies become the apology.
pub fn chat_reply_or_fallback(reply: String) -> String {
    if reply.trim().is_empty() {
        CHAT_FALLBACK_REPLY.to_string()
    } else {
        reply
    }
}

/// HTTP client for the gateway.
#[derive(Clone)]
pub struct ScannerClient {
    http: Client,
    base_url: String,
}

impl ScannerClient {
    /// Create a client against the gateway at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Data proxy request for `query` with `overrides` merged over its defaults.
    fn dataset_request(
        &self,
        query: &QueryDefinition,
        overrides: &QueryOptions,
    ) -> Result<(reqwest::Request, ResponseFormat)> {
        let (params, format) = query.proxy_query(overrides);
        let request = self
            .http
            .get(self.url("abs-data"))
            .query(&params)
            .header(reqwest::header::ACCEPT, query.accept_header(format))
            .build()?;
        Ok((request, format))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!("Gateway error: {} - {}", status, body);
    Err(Error::Upstream { status, body })
}

#[async_trait]
impl ScannerBackend for ScannerClient {
    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let request = SearchRequest {
            query: Some(query.to_string()),
            conversation_history: None,
        };
        let response: SearchResponse = self.post_json("search", &request).await?;
        Ok(response.results)
    }

    #[instrument(skip(self, turns), fields(turns = turns.len()))]
    async fn chat(&self, turns: &[ChatTurn]) -> Result<String> {
        let request = ChatRequest {
            messages: Some(turns.to_vec()),
        };
        let response: ChatResponse = self.post_json("chat", &request).await?;
        Ok(chat_reply_or_fallback(response.response))
    }

    #[instrument(skip(self))]
    async fn catalog(&self) -> Result<Vec<QueryDefinition>> {
        let response = self.http.get(self.url("catalog")).send().await?;
        let catalog: CatalogResponse = check_status(response).await?.json().await?;
        Ok(catalog.queries)
    }

    #[instrument(skip(self, query, overrides), fields(dataset = %query.id))]
    async fn fetch_dataset(
        &self,
        query: &QueryDefinition,
        overrides: &QueryOptions,
    ) -> Result<DatasetData> {
        let (request, format) = self.dataset_request(query, overrides)?;
        let response = self.http.execute(request).await?;
        let status = response.status().as_u16();
        let payload = response.text().await?;
        dataset_from_reply(status, &payload, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Detail;

    #[test]
    fn test_dataset_error_messages() {
        assert!(dataset_error_message(404).starts_with("Dataset not found"));
        assert!(dataset_error_message(400).starts_with("Invalid request parameters"));
        assert!(dataset_error_message(429).starts_with("API rate limit exceeded"));
        assert_eq!(
            dataset_error_message(502),
            "Failed to fetch dataset data. Please try again."
        );
    }

    #[test]
    fn test_failed_dataset_reply_gets_friendly_message() {
        for (status, prefix) in [
            (404, "Dataset not found"),
            (400, "Invalid request parameters"),
            (429, "API rate limit exceeded"),
            (503, "Failed to fetch dataset data"),
        ] {
            match dataset_from_reply(status, "<html>upstream page</html>", ResponseFormat::Json) {
                Err(Error::Upstream { status: code, body }) => {
                    assert_eq!(code, status);
                    assert!(body.starts_with(prefix), "status {}: {}", status, body);
                }
                other => panic!("status {}: unexpected {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_dataset_reply_normalized_in_requested_format() {
        let data = dataset_from_reply(200, "REGION,OBS_VALUE\nNSW,7.5\n", ResponseFormat::CsvLabels).unwrap();
        assert_eq!(data.structure.dimensions[0].id, "REGION");
        assert_eq!(data.observations[0].value.as_f64(), Some(7.5));

        let err = dataset_from_reply(200, "REGION,OBS_VALUE\n", ResponseFormat::Json).unwrap_err();
        assert!(matches!(err, Error::ResponseParseFailed));
    }

    #[test]
    fn test_blank_chat_reply_becomes_apology() {
        assert_eq!(chat_reply_or_fallback("  \n".to_string()), CHAT_FALLBACK_REPLY);
        assert_eq!(chat_reply_or_fallback(String::new()), CHAT_FALLBACK_REPLY);
        assert_eq!(chat_reply_or_fallback("Try the CPI.".to_string()), "Try the CPI.");
    }

    #[test]
    fn test_dataset_request_merges_overrides() {
        let client = ScannerClient::new("https://scanner.example.com").unwrap();
        let query = QueryDefinition {
            id: "CPI".into(),
            name: "Consumer Price Index".into(),
            description: "Quarterly".into(),
            endpoint: "/data/ABS,CPI,1.0.0/all".into(),
            default_options: QueryOptions {
                detail: Some(Detail::Dataonly),
                format: Some(ResponseFormat::CsvLabels),
                ..Default::default()
            },
        };
        let overrides = QueryOptions {
            start_period: Some("2020-Q1".into()),
            format: Some(ResponseFormat::Json),
            ..Default::default()
        };

        let (request, format) = client.dataset_request(&query, &overrides).unwrap();
        assert_eq!(format, ResponseFormat::Json);
        assert_eq!(
            request.headers()[reqwest::header::ACCEPT],
            "application/vnd.sdmx.data+json"
        );
        let url = request.url();
        assert_eq!(url.path(), "/api/abs-data");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("path".to_string(), "data/ABS,CPI,1.0.0/all".to_string())));
        assert!(pairs.contains(&("startPeriod".to_string(), "2020-Q1".to_string())));
        assert!(pairs.contains(&("detail".to_string(), "dataonly".to_string())));

        let (request, format) = client.dataset_request(&query, &QueryOptions::default()).unwrap();
        assert_eq!(format, ResponseFormat::CsvLabels);
        assert_eq!(
            request.headers()[reqwest::header::ACCEPT],
            "application/vnd.sdmx.data+csv;labels=both"
        );
    }

    #[test]
    fn test_urls_are_rooted_at_api() {
        let client = ScannerClient::new("https://scanner.example.com/").unwrap();
        assert_eq!(client.url("chat"), "https://scanner.example.com/api/chat");
        assert_eq!(client.url("abs-data"), "https://scanner.example.com/api/abs-data");
    }
}

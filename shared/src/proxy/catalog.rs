//! `GET /api/catalog`: the ranked dataset catalog.
//!
//! `?view=selections` returns every dataflow's `(id, description)` pair as CSV instead.

use lambda_http::http::Method;
use lambda_http::{Body, Error, Request, RequestExt, Response};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::catalog::{
    fallback_queries, parse_dataflows_to_queries, read_document, selections_to_csv, to_selections,
    QueryDefinition, Selection,
};
use crate::http::{error_response, json_response, method_not_allowed, preflight_response, raw_response};

#[derive(Serialize)]
struct CatalogBody<'a> {
    queries: &'a [QueryDefinition],
}

/// Catalog built once per cold start.
pub struct CatalogService {
    queries: Vec<QueryDefinition>,
    selections: Vec<Selection>,
}

impl CatalogService {
    pub fn new(queries: Vec<QueryDefinition>, selections: Vec<Selection>) -> Self {
        Self {
            queries,
            selections,
        }
    }

    /// Load from the dataflows document, or serve the fallback catalog without selections.
    pub async fn load(path: impl AsRef<Path>, top_n: Option<usize>) -> Self {
        let path = path.as_ref();
        match read_document(path).await {
            Ok(document) => {
                let service = Self::new(
                    parse_dataflows_to_queries(&document, top_n),
                    to_selections(&document),
                );
                info!(
                    path = %path.display(),
                    queries = service.queries.len(),
                    selections = service.selections.len(),
                    "Catalog loaded"
                );
                service
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to load dataflows, using fallback catalog: {}", e);
                Self::new(fallback_queries(), Vec::new())
            }
        }
    }

    pub fn queries(&self) -> &[QueryDefinition] {
        &self.queries
    }

    pub async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        match event.method() {
            &Method::OPTIONS => return preflight_response(),
            &Method::GET => {}
            _ => return method_not_allowed(),
        }

        let params = event.query_string_parameters();
        match params.first("view") {
            None | Some("queries") => json_response(
                200,
                &CatalogBody {
                    queries: &self.queries,
                },
            ),
            Some("selections") => raw_response(
                200,
                "text/csv; charset=utf-8",
                selections_to_csv(&self.selections),
            ),
            Some(other) => error_response(400, format!("Unknown view: {}", other)),
        }
    }
}

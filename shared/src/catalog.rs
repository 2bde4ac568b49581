//! Dataflow catalog: loading, filtering and relevance ranking.
//!
//! The catalog is a static dataflows document. Score decides which entries make the cut;
//! the survivors are returned alphabetically by name.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

use crate::delimited;
use crate::sdmx::ResponseFormat;
use crate::Result;

const HIGH_PRIORITY_KEYWORDS: [&str; 5] = ["CPI", "LABOUR", "EMPLOYMENT", "POPULATION", "RETAIL"];
const MEDIUM_PRIORITY_KEYWORDS: [&str; 5] = ["GDP", "CENSUS", "HOUSING", "INCOME", "BUSINESS"];
const RECENT_YEARS: [&str; 2] = ["2024", "2023"];
const EARLIER_YEARS: [&str; 2] = ["2022", "2021"];
const SHORT_NAME_LIMIT: usize = 100;

/// Upstream paths that return structural metadata rather than data.
const METADATA_PREFIXES: [&str; 3] = ["/dataflow", "/datastructure", "/codelist"];

/// Static dataflows document, as published by the statistics API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataflowsDocument {
    #[serde(default)]
    pub data: DataflowsData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataflowsData {
    #[serde(default)]
    pub dataflows: Vec<Dataflow>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataflow {
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "agencyID", default)]
    pub agency_id: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub structure: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    Full,
    Dataonly,
    Serieskeysonly,
    Nodata,
}

impl Detail {
    pub fn as_str(self) -> &'static str {
        match self {
            Detail::Full => "full",
            Detail::Dataonly => "dataonly",
            Detail::Serieskeysonly => "serieskeysonly",
            Detail::Nodata => "nodata",
        }
    }
}

/// Options for one dataset query. Unset fields fall through to the definition's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Detail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ResponseFormat>,
}

impl QueryOptions {
    /// Overlay `overrides` on top of `self`.
    pub fn merged(&self, overrides: &QueryOptions) -> QueryOptions {
        QueryOptions {
            start_period: overrides.start_period.clone().or_else(|| self.start_period.clone()),
            end_period: overrides.end_period.clone().or_else(|| self.end_period.clone()),
            detail: overrides.detail.or(self.detail),
            format: overrides.format.or(self.format),
        }
    }
}

/// One queryable dataset and how to query it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub endpoint: String,
    #[serde(default)]
    pub default_options: QueryOptions,
}

impl QueryDefinition {
    pub fn from_dataflow(dataflow: &Dataflow) -> Self {
        Self {
            id: dataflow.id.clone(),
            name: dataflow.name.clone(),
            description: dataflow.description.clone(),
            endpoint: format!("/data/ABS,{},{}/all", dataflow.id, dataflow.version),
            default_options: QueryOptions {
                detail: Some(Detail::Dataonly),
                format: Some(ResponseFormat::CsvLabels),
                ..Default::default()
            },
        }
    }

    pub fn is_metadata(&self) -> bool {
        METADATA_PREFIXES
            .iter()
            .any(|prefix| self.endpoint.starts_with(prefix))
    }

    /// Query parameters for the data proxy, with `overrides` applied over the defaults.
    ///
    /// Returns the pairs in proxy order and the format the payload will come back in.
    pub fn proxy_query(&self, overrides: &QueryOptions) -> (Vec<(String, String)>, ResponseFormat) {
        let options = self.default_options.merged(overrides);

        let mut params = vec![(
            "path".to_string(),
            self.endpoint.trim_start_matches('/').to_string(),
        )];
        if let Some(start) = options.start_period.filter(|s| !s.is_empty()) {
            params.push(("startPeriod".to_string(), start));
        }
        if let Some(end) = options.end_period.filter(|s| !s.is_empty()) {
            params.push(("endPeriod".to_string(), end));
        }
        if let Some(detail) = options.detail {
            params.push(("detail".to_string(), detail.as_str().to_string()));
        }

        (params, options.format.unwrap_or_default())
    }

    /// Accept header for this definition's query in `format`.
    pub fn accept_header(&self, format: ResponseFormat) -> &'static str {
        format.accept_header(self.is_metadata())
    }
}

/// Layout and annotation entries are not real dataflows.
pub fn should_include(dataflow: &Dataflow) -> bool {
    !dataflow.id.starts_with("LAYOUT_")
        && !dataflow.name.is_empty()
        && !dataflow.description.is_empty()
}

/// Heuristic score from the fixed keyword and recency table.
pub fn relevance_score(dataflow: &Dataflow) -> u32 {
    let mut score = 0;
    let name = dataflow.name.to_uppercase();

    if contains_any(&dataflow.id, &HIGH_PRIORITY_KEYWORDS) {
        score += 10;
    } else if contains_any(&dataflow.id, &MEDIUM_PRIORITY_KEYWORDS) {
        score += 5;
    }

    if contains_any(&name, &HIGH_PRIORITY_KEYWORDS) {
        score += 8;
    } else if contains_any(&name, &MEDIUM_PRIORITY_KEYWORDS) {
        score += 4;
    }

    if contains_any(&dataflow.description, &RECENT_YEARS) {
        score += 3;
    }
    if contains_any(&dataflow.description, &EARLIER_YEARS) {
        score += 2;
    }

    if dataflow.name.chars().count() < SHORT_NAME_LIMIT {
        score += 1;
    }

    score
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn by_name(a: &QueryDefinition, b: &QueryDefinition) -> Ordering {
    a.name
        .to_lowercase()
        .cmp(&b.name.to_lowercase())
        .then_with(|| a.name.cmp(&b.name))
}

/// Filter, score, cut to `top_n` (when set) and return alphabetically by name.
pub fn parse_dataflows_to_queries(
    document: &DataflowsDocument,
    top_n: Option<usize>,
) -> Vec<QueryDefinition> {
    let mut scored: Vec<(u32, &Dataflow)> = document
        .data
        .dataflows
        .iter()
        .filter(|d| should_include(d))
        .map(|d| (relevance_score(d), d))
        .collect();

    // Stable, so equal scores keep document order at the cut.
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    if let Some(n) = top_n {
        scored.truncate(n);
    }

    let mut queries: Vec<QueryDefinition> = scored
        .into_iter()
        .map(|(_, d)| QueryDefinition::from_dataflow(d))
        .collect();
    queries.sort_by(by_name);
    queries
}

/// Catalog served when the dataflows document cannot be read.
pub fn fallback_queries() -> Vec<QueryDefinition> {
    vec![
        QueryDefinition {
            id: "cpi".to_string(),
            name: "Consumer Price Index (CPI)".to_string(),
            description: "Latest CPI data for Australia".to_string(),
            endpoint: "/data/ABS,CPI,1.0.0/1.50.10001.10.Q".to_string(),
            default_options: QueryOptions {
                end_period: Some("2024-Q4".to_string()),
                detail: Some(Detail::Dataonly),
                format: Some(ResponseFormat::Json),
                ..Default::default()
            },
        },
        QueryDefinition {
            id: "dataflows".to_string(),
            name: "Available Dataflows".to_string(),
            description: "List all available ABS dataflows".to_string(),
            endpoint: "/dataflow/ABS".to_string(),
            default_options: QueryOptions {
                format: Some(ResponseFormat::Json),
                ..Default::default()
            },
        },
    ]
}

/// Read and decode the dataflows document at `path`.
pub async fn read_document(path: impl AsRef<Path>) -> Result<DataflowsDocument> {
    let raw = tokio::fs::read_to_string(path.as_ref())
        .await
        .map_err(|e| crate::Error::Internal(format!("Failed to read dataflows: {}", e)))?;
    Ok(serde_json::from_str(&raw)?)
}

/// `(id, description)` pair exported for offline review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub id: String,
    pub description: String,
}

impl From<&Dataflow> for Selection {
    fn from(dataflow: &Dataflow) -> Self {
        Self {
            id: dataflow.id.clone(),
            description: dataflow.description.clone(),
        }
    }
}

/// Every dataflow in the document, unfiltered.
pub fn to_selections(document: &DataflowsDocument) -> Vec<Selection> {
    document.data.dataflows.iter().map(Selection::from).collect()
}

pub fn find_dataflow<'a>(selection: &Selection, document: &'a DataflowsDocument) -> Option<&'a Dataflow> {
    document.data.dataflows.iter().find(|d| d.id == selection.id)
}

pub fn selections_to_csv(selections: &[Selection]) -> String {
    let mut lines = vec![delimited::write_row(["id", "description"])];
    lines.extend(
        selections
            .iter()
            .map(|s| delimited::write_row([s.id.as_str(), s.description.as_str()])),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataflow(id: &str, name: &str, description: &str) -> Dataflow {
        Dataflow {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            agency_id: "ABS".to_string(),
            is_final: true,
            name: name.to_string(),
            description: description.to_string(),
            structure: String::new(),
        }
    }

    fn document(dataflows: Vec<Dataflow>) -> DataflowsDocument {
        DataflowsDocument {
            data: DataflowsData { dataflows },
        }
    }

    fn names(queries: &[QueryDefinition]) -> Vec<&str> {
        queries.iter().map(|q| q.name.as_str()).collect()
    }

    #[test]
    fn test_layout_entries_never_returned() {
        let doc = document(vec![
            dataflow("LAYOUT_FOO", "CPI Labour Population 2024", "Retail 2024 2022"),
            dataflow("WAGES", "Wages", "Wage price index"),
        ]);
        let queries = parse_dataflows_to_queries(&doc, None);
        assert_eq!(names(&queries), vec!["Wages"]);
    }

    #[test]
    fn test_missing_name_or_description_excluded() {
        assert!(!should_include(&dataflow("X", "", "desc")));
        assert!(!should_include(&dataflow("X", "name", "")));
        assert!(should_include(&dataflow("X", "name", "desc")));
    }

    #[test]
    fn test_final_order_is_alphabetical() {
        let doc = document(vec![dataflow("B1", "B", "x"), dataflow("A1", "A", "x")]);
        let queries = parse_dataflows_to_queries(&doc, Some(100));
        assert_eq!(names(&queries), vec!["A", "B"]);

        let doc = document(vec![
            dataflow("CPI", "zeta prices", "2024"),
            dataflow("MISC", "alpha", "x"),
        ]);
        let queries = parse_dataflows_to_queries(&doc, None);
        assert_eq!(names(&queries), vec!["alpha", "zeta prices"]);
    }

    #[test]
    fn test_score_decides_inclusion_at_cut() {
        let doc = document(vec![
            dataflow("MISC", "Aardvarks", "x"),
            dataflow("CPI", "Zebra prices", "x"),
        ]);
        let queries = parse_dataflows_to_queries(&doc, Some(1));
        assert_eq!(names(&queries), vec!["Zebra prices"]);
    }

    #[test]
    fn test_relevance_score_table() {
        // id high (+10), name high (+8), 2024 (+3), 2021 (+2), short (+1)
        assert_eq!(
            relevance_score(&dataflow("CPI_M", "Labour force", "Data for 2024 and 2021")),
            24
        );
        // id medium (+5), name medium (+4), short (+1)
        assert_eq!(relevance_score(&dataflow("GDP_Q", "Housing", "none")), 10);
        // id matching is case sensitive, name matching is not
        assert_eq!(relevance_score(&dataflow("cpi", "cpi", "none")), 9);
        assert_eq!(relevance_score(&dataflow("X", &"n".repeat(100), "none")), 0);
    }

    #[test]
    fn test_definition_from_dataflow() {
        let query = QueryDefinition::from_dataflow(&dataflow("ALC", "Alcohol", "Apparent consumption"));
        assert_eq!(query.endpoint, "/data/ABS,ALC,1.0.0/all");
        assert_eq!(query.default_options.detail, Some(Detail::Dataonly));
        assert_eq!(query.default_options.format, Some(ResponseFormat::CsvLabels));
        assert!(!query.is_metadata());
    }

    #[test]
    fn test_proxy_query_merges_overrides() {
        let cpi = &fallback_queries()[0];
        let overrides = QueryOptions {
            start_period: Some("2020-Q1".to_string()),
            format: Some(ResponseFormat::Csv),
            ..Default::default()
        };
        let (params, format) = cpi.proxy_query(&overrides);
        assert_eq!(
            params,
            vec![
                ("path".to_string(), "data/ABS,CPI,1.0.0/1.50.10001.10.Q".to_string()),
                ("startPeriod".to_string(), "2020-Q1".to_string()),
                ("endPeriod".to_string(), "2024-Q4".to_string()),
                ("detail".to_string(), "dataonly".to_string()),
            ]
        );
        assert_eq!(format, ResponseFormat::Csv);
        assert_eq!(cpi.accept_header(format), "text/csv");
    }

    #[test]
    fn test_metadata_endpoint_accept_header() {
        let listing = &fallback_queries()[1];
        assert!(listing.is_metadata());
        let (params, format) = listing.proxy_query(&QueryOptions::default());
        assert_eq!(params, vec![("path".to_string(), "dataflow/ABS".to_string())]);
        assert_eq!(listing.accept_header(format), "application/vnd.sdmx.structure+json");
    }

    #[test]
    fn test_document_decoding_tolerates_missing_fields() {
        let raw = r#"{"data":{"dataflows":[
            {"id":"CPI","version":"2.0.0","agencyID":"ABS","isFinal":true,
             "name":"Consumer Price Index","names":{"en":"Consumer Price Index"},
             "description":"Quarterly 2024","annotations":[],"structure":"urn:x"},
            {"id":"LAYOUT_X"}
        ]}}"#;
        let doc: DataflowsDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.data.dataflows.len(), 2);
        assert_eq!(doc.data.dataflows[0].agency_id, "ABS");
        assert_eq!(parse_dataflows_to_queries(&doc, Some(100)).len(), 1);
    }

    #[tokio::test]
    async fn test_read_document_missing_file_is_error() {
        assert!(read_document("/nonexistent/abs-dataflows.json").await.is_err());
    }

    #[test]
    fn test_selections_csv() {
        let doc = document(vec![
            dataflow("A", "A", "Plain"),
            dataflow("B", "B", "Has \"quotes\", and commas"),
        ]);
        let selections = to_selections(&doc);
        assert_eq!(find_dataflow(&selections[1], &doc).map(|d| d.id.as_str()), Some("B"));
        assert_eq!(
            selections_to_csv(&selections),
            "id,description\nA,Plain\nB,\"Has \"\"quotes\"\", and commas\""
        );
    }
}

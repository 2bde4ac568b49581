//! Normalization of statistical payloads into one tabular shape.
//!
//! Two wire formats are understood: SDMX-JSON (1.0 and 2.0 envelopes) and SDMX-CSV
//! (plain, with labels, or as a file download). XML can be requested upstream but has no
//! normalizer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};

use crate::delimited;
use crate::{Error, Result};

/// Format a payload was requested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Csv,
    CsvLabels,
    CsvFile,
    Xml,
}

impl ResponseFormat {
    /// Accept header for data or structure (metadata) requests.
    pub fn accept_header(self, metadata: bool) -> &'static str {
        if metadata {
            return match self {
                ResponseFormat::Json => "application/vnd.sdmx.structure+json",
                _ => "application/xml",
            };
        }
        match self {
            ResponseFormat::Json => "application/vnd.sdmx.data+json",
            ResponseFormat::Csv => "text/csv",
            ResponseFormat::CsvLabels => "application/vnd.sdmx.data+csv;labels=both",
            ResponseFormat::CsvFile => "application/vnd.sdmx.data+csv;file=true;labels=both",
            ResponseFormat::Xml => "application/xml",
        }
    }

    pub fn is_csv(self) -> bool {
        matches!(
            self,
            ResponseFormat::Csv | ResponseFormat::CsvLabels | ResponseFormat::CsvFile
        )
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Csv => "csv",
            ResponseFormat::CsvLabels => "csv-labels",
            ResponseFormat::CsvFile => "csv-file",
            ResponseFormat::Xml => "xml",
        };
        f.write_str(s)
    }
}

impl FromStr for ResponseFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "csv" => Ok(ResponseFormat::Csv),
            "csv-labels" => Ok(ResponseFormat::CsvLabels),
            "csv-file" => Ok(ResponseFormat::CsvFile),
            "xml" => Ok(ResponseFormat::Xml),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Normalized dataset: structure plus observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetData {
    pub structure: DataStructure,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataStructure {
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<Attribute>,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub id: String,
    pub name: String,
    pub key_position: usize,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub id: String,
    pub name: String,
    pub assignment_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub id: String,
    pub name: String,
}

/// One observation.
///
/// `key` holds one coordinate per dimension. Payloads are not required to honour that,
/// so callers should not index dimensions by key position blindly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub key: Vec<String>,
    pub value: ObservationValue,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationValue {
    Number(f64),
    Text(String),
    Null,
}

impl ObservationValue {
    /// Parse a text cell: numbers when they parse cleanly, text otherwise.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ObservationValue::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => ObservationValue::Number(n),
            _ => ObservationValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ObservationValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ObservationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationValue::Number(n) => write!(f, "{}", n),
            ObservationValue::Text(s) => f.write_str(s),
            ObservationValue::Null => Ok(()),
        }
    }
}

impl DatasetData {
    /// Render as CSV: dimension names, `Value`, then attribute names.
    pub fn to_csv(&self) -> String {
        let header = self
            .structure
            .dimensions
            .iter()
            .map(|d| d.name.clone())
            .chain(std::iter::once("Value".to_string()))
            .chain(self.structure.attributes.iter().map(|a| a.name.clone()));

        let mut lines = vec![delimited::write_row(header)];
        for obs in &self.observations {
            let attributes = self.structure.attributes.iter().map(|a| {
                obs.attributes.get(&a.id).cloned().unwrap_or_default()
            });
            let row = obs
                .key
                .iter()
                .cloned()
                .chain(std::iter::once(obs.value.to_string()))
                .chain(attributes);
            lines.push(delimited::write_row(row));
        }
        lines.join("\n")
    }
}

/// Normalize a payload fetched in `format`.
///
/// Failures inside either parser surface as [`Error::ResponseParseFailed`]; the cause is
/// only logged.
pub fn normalize(payload: &str, format: ResponseFormat) -> Result<DatasetData> {
    let parsed = match format {
        ResponseFormat::Json => parse_json(payload),
        f if f.is_csv() => parse_csv(payload),
        other => return Err(Error::UnsupportedFormat(other.to_string())),
    };

    parsed.map_err(|e| {
        error!(%format, "Failed to normalize response: {}", e);
        Error::ResponseParseFailed
    })
}

// ---------- SDMX-JSON ----------

/// Declared attribute plus its coded values, used to resolve index-valued positions.
struct DeclaredAttribute {
    attribute: Attribute,
    values: Vec<String>,
}

fn parse_json(payload: &str) -> Result<DatasetData> {
    let doc: Value = serde_json::from_str(payload)?;

    let root = match doc.get("data") {
        Some(data) if data.is_object() => data,
        _ => &doc,
    };
    let structure = root
        .get("structure")
        .or_else(|| root.get("structures").and_then(|s| s.get(0)));
    let data_set = root.get("dataSets").and_then(|d| d.get(0));

    if structure.is_none() && data_set.is_none() {
        debug!("Payload has no structure or dataSets, returning empty dataset");
        return Ok(DatasetData::default());
    }

    let empty = Value::Null;
    let structure = structure.unwrap_or(&empty);

    let dimensions = array_at(structure, &["dimensions", "observation"])
        .iter()
        .enumerate()
        .map(|(i, dim)| {
            let id = str_field(dim, "id").unwrap_or_else(|| format!("dim_{}", i));
            Dimension {
                name: display_name(dim).unwrap_or_else(|| id.clone()),
                key_position: dim
                    .get("keyPosition")
                    .and_then(Value::as_u64)
                    .map(|p| p as usize)
                    .unwrap_or(i),
                role: role_of(dim).unwrap_or_else(|| "dimension".to_string()),
                id,
            }
        })
        .collect();

    let declared: Vec<DeclaredAttribute> = array_at(structure, &["attributes", "observation"])
        .iter()
        .enumerate()
        .map(|(i, attr)| {
            let id = str_field(attr, "id").unwrap_or_else(|| format!("attr_{}", i));
            let values = attr
                .get("values")
                .and_then(Value::as_array)
                .map(|vals| {
                    vals.iter()
                        .map(|v| {
                            str_field(v, "id")
                                .or_else(|| display_name(v))
                                .unwrap_or_else(|| scalar_text(v))
                        })
                        .collect()
                })
                .unwrap_or_default();
            DeclaredAttribute {
                attribute: Attribute {
                    name: display_name(attr).unwrap_or_else(|| id.clone()),
                    assignment_status: str_field(attr, "assignmentStatus")
                        .unwrap_or_else(|| "conditional".to_string()),
                    id,
                },
                values,
            }
        })
        .collect();

    let mut measure_source = array_at(structure, &["dimensions", "series"]);
    if measure_source.is_empty() {
        measure_source = array_at(structure, &["measures", "observation"]);
    }
    if measure_source.is_empty() {
        measure_source = structure
            .get("measures")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
    }
    let measures = measure_source
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let id = str_field(m, "id").unwrap_or_else(|| format!("measure_{}", i));
            Measure {
                name: display_name(m).unwrap_or_else(|| id.clone()),
                id,
            }
        })
        .collect();

    let mut observations = Vec::new();
    if let Some(data_set) = data_set {
        if let Some(flat) = data_set.get("observations") {
            collect_observations(flat, &[], &declared, &mut observations);
        }
        if let Some(series) = data_set.get("series").and_then(Value::as_object) {
            for (series_key, series_value) in series {
                let prefix: Vec<String> = split_key(series_key);
                if let Some(obs) = series_value.get("observations") {
                    collect_observations(obs, &prefix, &declared, &mut observations);
                }
            }
        }
    }
    observations.sort_by(|a, b| compare_keys(&a.key, &b.key));

    Ok(DatasetData {
        structure: DataStructure {
            dimensions,
            attributes: declared.into_iter().map(|d| d.attribute).collect(),
            measures,
        },
        observations,
    })
}

fn collect_observations(
    raw: &Value,
    prefix: &[String],
    declared: &[DeclaredAttribute],
    out: &mut Vec<Observation>,
) {
    match raw {
        Value::Object(map) => {
            for (key, value) in map {
                let mut full_key = prefix.to_vec();
                full_key.extend(split_key(key));
                out.push(observation_from(full_key, value, declared));
            }
        }
        // Already flattened: [{key, value, attributes}]
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let key = match item.get("key") {
                    Some(Value::Array(parts)) => parts.iter().map(scalar_text).collect(),
                    Some(Value::String(s)) => split_key(s),
                    _ => vec![format!("obs_{}", i)],
                };
                let mut full_key = prefix.to_vec();
                full_key.extend(key);
                out.push(observation_from(full_key, item, declared));
            }
        }
        _ => {}
    }
}

fn observation_from(key: Vec<String>, raw: &Value, declared: &[DeclaredAttribute]) -> Observation {
    let mut attributes = BTreeMap::new();

    let value = match raw {
        Value::Array(items) => {
            match items.get(1) {
                Some(Value::Object(map)) => {
                    collect_attribute_map(map, declared, &mut attributes);
                }
                Some(_) => {
                    for (pos, item) in items.iter().skip(1).enumerate() {
                        if item.is_null() {
                            continue;
                        }
                        let (id, text) = match declared.get(pos) {
                            Some(decl) => {
                                let text = item
                                    .as_u64()
                                    .and_then(|idx| decl.values.get(idx as usize).cloned())
                                    .unwrap_or_else(|| scalar_text(item));
                                (decl.attribute.id.clone(), text)
                            }
                            None => (format!("attr_{}", pos), scalar_text(item)),
                        };
                        attributes.insert(id, text);
                    }
                }
                None => {}
            }
            items.first().map(scalar_value).unwrap_or(ObservationValue::Null)
        }
        Value::Object(map) if map.contains_key("value") => {
            if let Some(Value::Object(attrs)) = map.get("attributes") {
                collect_attribute_map(attrs, declared, &mut attributes);
            }
            map.get("value").map(scalar_value).unwrap_or(ObservationValue::Null)
        }
        other => scalar_value(other),
    };

    Observation {
        key,
        value,
        attributes,
    }
}

/// Attribute maps are keyed by declared position or by attribute id.
fn collect_attribute_map(
    map: &Map<String, Value>,
    declared: &[DeclaredAttribute],
    attributes: &mut BTreeMap<String, String>,
) {
    for (k, v) in map {
        if v.is_null() {
            continue;
        }
        let id = k
            .parse::<usize>()
            .ok()
            .and_then(|i| declared.get(i))
            .map(|d| d.attribute.id.clone())
            .unwrap_or_else(|| k.clone());
        attributes.insert(id, scalar_text(v));
    }
}

fn scalar_value(v: &Value) -> ObservationValue {
    match v {
        Value::Null => ObservationValue::Null,
        Value::Number(n) => n
            .as_f64()
            .map(ObservationValue::Number)
            .unwrap_or_else(|| ObservationValue::Text(n.to_string())),
        Value::String(s) => ObservationValue::Text(s.clone()),
        other => ObservationValue::Text(other.to_string()),
    }
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn array_at<'a>(value: &'a Value, path: &[&str]) -> &'a [Value] {
    let mut current = value;
    for segment in path {
        match current.get(*segment) {
            Some(next) => current = next,
            None => return &[],
        }
    }
    current.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// `name` as a plain string, or the English entry of a localized `name`/`names` object.
fn display_name(value: &Value) -> Option<String> {
    match value.get("name") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Object(localized)) => localized.get("en").and_then(Value::as_str).map(String::from),
        _ => value
            .get("names")
            .and_then(|n| n.get("en"))
            .and_then(Value::as_str)
            .map(String::from),
    }
}

fn role_of(value: &Value) -> Option<String> {
    match value.get("role") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Array(roles)) => roles.first().and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn split_key(key: &str) -> Vec<String> {
    key.split(':').map(String::from).collect()
}

/// Orders keys coordinate by coordinate, numerically when both coordinates are numbers.
fn compare_keys(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

// ---------- SDMX-CSV ----------

const VALUE_COLUMNS: [&str; 2] = ["OBS_VALUE", "VALUE"];
const TIME_COLUMNS: [&str; 2] = ["TIME_PERIOD", "TIME"];

struct Column {
    id: String,
    name: String,
}

/// `labels=both` headers read `ID: Label`.
fn parse_header(cell: &str) -> Column {
    let cell = cell.trim();
    match cell.split_once(": ") {
        Some((id, name)) if !id.is_empty() => Column {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
        },
        _ => Column {
            id: cell.to_string(),
            name: cell.to_string(),
        },
    }
}

fn is_one_of(id: &str, names: &[&str]) -> bool {
    names.iter().any(|n| id.eq_ignore_ascii_case(n))
}

fn parse_csv(payload: &str) -> Result<DatasetData> {
    let mut records = delimited::read_records(payload)?.into_iter();

    let Some(header) = records.next() else {
        return Ok(DatasetData::default());
    };
    let columns: Vec<Column> = header.iter().map(|c| parse_header(c)).collect();

    let value_idx = columns
        .iter()
        .position(|c| is_one_of(&c.id, &VALUE_COLUMNS))
        .unwrap_or(columns.len() - 1);
    let time_idx = columns
        .iter()
        .position(|c| is_one_of(&c.id, &TIME_COLUMNS))
        .filter(|i| *i != value_idx);

    let dimension_idx: Vec<usize> = (0..value_idx).filter(|i| Some(*i) != time_idx).collect();
    let attribute_idx: Vec<usize> = time_idx
        .into_iter()
        .chain(value_idx + 1..columns.len())
        .collect();

    let dimensions = dimension_idx
        .iter()
        .enumerate()
        .map(|(pos, &i)| Dimension {
            id: columns[i].id.clone(),
            name: columns[i].name.clone(),
            key_position: pos,
            role: "dimension".to_string(),
        })
        .collect();

    let attributes: Vec<Attribute> = attribute_idx
        .iter()
        .map(|&i| Attribute {
            id: columns[i].id.clone(),
            name: columns[i].name.clone(),
            assignment_status: if Some(i) == time_idx {
                "mandatory".to_string()
            } else {
                "conditional".to_string()
            },
        })
        .collect();

    let measures = vec![Measure {
        id: columns[value_idx].id.clone(),
        name: "Value".to_string(),
    }];

    let observations = records
        .enumerate()
        .map(|(row, record)| {
            if record.len() != columns.len() {
                debug!(
                    row = row + 1,
                    expected = columns.len(),
                    found = record.len(),
                    "Ragged CSV record, padding or truncating to header"
                );
            }
            let cell = |i: usize| record.get(i).cloned().unwrap_or_default();
            Observation {
                key: dimension_idx.iter().map(|&i| cell(i)).collect(),
                value: ObservationValue::parse(&cell(value_idx)),
                attributes: attribute_idx
                    .iter()
                    .filter(|&&i| !cell(i).is_empty())
                    .map(|&i| (columns[i].id.clone(), cell(i)))
                    .collect(),
            }
        })
        .collect();

    Ok(DatasetData {
        structure: DataStructure {
            dimensions,
            attributes,
            measures,
        },
        observations,
    })
}

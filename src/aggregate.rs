//! Structured numeric queries over flattened JSON fields.
//!
//! The index stores each JSON leaf as its own point with a dotted path
//! (`line_items.0.price`). Aggregation scrolls a document's field
//! payloads out of the index, matches the requested path with array
//! positions ignored, applies equality filters against sibling fields in
//! the same array element, and reduces the surviving values.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::index::{build_filter, FilterArgs, VectorCollection};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Max,
    Min,
    Sum,
    Avg,
    Count,
}

impl FromStr for Aggregation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            "sum" => Ok(Aggregation::Sum),
            "avg" => Ok(Aggregation::Avg),
            "count" => Ok(Aggregation::Count),
            other => Err(AppError::validation(format!(
                "unknown aggregation '{other}'"
            ))),
        }
    }
}

/// Equality constraint on a sibling field, e.g. `category == "food"`
/// restricting which array elements contribute values.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldFilter {
    pub path: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateRequest {
    pub document_id: Uuid,
    pub path: String,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    #[serde(default)]
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateValue {
    pub result: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateOutcome {
    #[serde(flatten)]
    pub total: AggregateValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeMap<String, AggregateValue>>,
}

/// One flattened leaf as stored in the index payload.
#[derive(Debug, Clone)]
pub struct FieldRow {
    pub path: String,
    pub value: String,
    pub value_type: String,
}

pub async fn structured_query(
    state: &Arc<AppState>,
    request: &AggregateRequest,
) -> AppResult<AggregateOutcome> {
    if request.path.trim().is_empty() {
        return Err(AppError::validation("aggregation path must not be empty"));
    }

    let args = FilterArgs::for_document(request.document_id);
    let filter = build_filter(&args).ok_or_else(|| {
        AppError::validation("aggregation requires a document filter")
    })?;

    let payloads = state
        .index
        .scroll_payloads(
            VectorCollection::JsonFields,
            Some(filter),
            state.config.aggregation_scan_limit,
        )
        .await?;

    let rows: Vec<FieldRow> = payloads
        .into_iter()
        .filter_map(|payload| {
            let path = payload.get("path")?.as_str()?.to_string();
            let value = payload.get("value")?.as_str()?.to_string();
            let value_type = payload
                .get("value_type")
                .and_then(Value::as_str)
                .unwrap_or("string")
                .to_string();
            Some(FieldRow {
                path,
                value,
                value_type,
            })
        })
        .collect();

    Ok(aggregate_rows(&rows, request))
}

/// Dotted path with purely numeric segments removed, so `items.2.price`
/// and `items.17.price` both match a query for `items.price`.
fn normalized_path(path: &str) -> String {
    path.split('.')
        .filter(|segment| !is_numeric_segment(segment))
        .collect::<Vec<_>>()
        .join(".")
}

fn is_numeric_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// The concrete path up to and including the last array position:
/// `items.2.price` yields `items.2`, a root scalar yields `""`. Two rows
/// describe the same array element when their prefixes are compatible.
fn element_prefix(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    let last_numeric = segments
        .iter()
        .rposition(|segment| is_numeric_segment(segment));
    match last_numeric {
        Some(pos) => segments[..=pos].join("."),
        None => String::new(),
    }
}

/// Whether one element prefix contains the other. Row pairs from the same
/// array element (or from nesting levels above it) are compatible; rows
/// from sibling elements are not.
fn prefixes_compatible(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() || a == b {
        return true;
    }
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    longer.starts_with(shorter)
        && longer.as_bytes().get(shorter.len()) == Some(&b'.')
}

pub fn aggregate_rows(rows: &[FieldRow], request: &AggregateRequest) -> AggregateOutcome {
    let target = normalized_path(&request.path);

    let filter_rows: Vec<Vec<&FieldRow>> = request
        .filters
        .iter()
        .map(|filter| {
            let wanted = normalized_path(&filter.path);
            rows.iter()
                .filter(|row| normalized_path(&row.path) == wanted && row.value == filter.value)
                .collect()
        })
        .collect();

    let mut matched: Vec<&FieldRow> = Vec::new();
    for row in rows {
        if normalized_path(&row.path) != target {
            continue;
        }
        let prefix = element_prefix(&row.path);
        let passes = filter_rows.iter().all(|candidates| {
            candidates
                .iter()
                .any(|f| prefixes_compatible(&prefix, &element_prefix(&f.path)))
        });
        if passes {
            matched.push(row);
        }
    }

    let total = reduce(&matched, request.aggregation);

    let groups = request.group_by.as_ref().map(|group_path| {
        let wanted = normalized_path(group_path);
        let mut grouped: BTreeMap<String, Vec<&FieldRow>> = BTreeMap::new();
        for row in &matched {
            let prefix = element_prefix(&row.path);
            let key = rows
                .iter()
                .filter(|candidate| normalized_path(&candidate.path) == wanted)
                .filter(|candidate| {
                    prefixes_compatible(&prefix, &element_prefix(&candidate.path))
                })
                .max_by_key(|candidate| element_prefix(&candidate.path).len())
                .map(|candidate| candidate.value.clone())
                .unwrap_or_else(|| "null".to_string());
            grouped.entry(key).or_default().push(row);
        }
        grouped
            .into_iter()
            .map(|(key, members)| (key, reduce(&members, request.aggregation)))
            .collect()
    });

    AggregateOutcome { total, groups }
}

fn reduce(rows: &[&FieldRow], aggregation: Aggregation) -> AggregateValue {
    if aggregation == Aggregation::Count {
        return AggregateValue {
            result: Some(rows.len() as f64),
            count: rows.len(),
        };
    }

    let values: Vec<f64> = rows
        .iter()
        .filter(|row| row.value_type == "number")
        .filter_map(|row| row.value.parse::<f64>().ok())
        .collect();

    if values.is_empty() {
        return AggregateValue {
            result: None,
            count: 0,
        };
    }

    let count = values.len();
    let result = match aggregation {
        Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Avg => values.iter().sum::<f64>() / count as f64,
        // Handled by the early return; kept correct if ever reached.
        Aggregation::Count => count as f64,
    };

    AggregateValue {
        result: Some(result),
        count,
    }
}

use serde_json::{json, Value};
use uuid::Uuid;

/// Optional predicates combined into a single must-match filter.
#[derive(Debug, Clone, Default)]
pub struct FilterArgs {
    pub document_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub path: Option<String>,
    pub value_type: Option<String>,
}

impl FilterArgs {
    pub fn for_document(document_id: Uuid) -> Self {
        Self {
            document_id: Some(document_id),
            ..Default::default()
        }
    }

    pub fn for_job(job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
            ..Default::default()
        }
    }
}

pub fn build_filter(args: &FilterArgs) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();

    if let Some(document_id) = args.document_id {
        must.push(json!({
            "key": "document_id",
            "match": { "value": document_id.to_string() }
        }));
    }

    if let Some(job_id) = args.job_id {
        must.push(json!({
            "key": "job_id",
            "match": { "value": job_id.to_string() }
        }));
    }

    if let Some(path) = args.path.as_deref().filter(|value| !value.is_empty()) {
        must.push(json!({
            "key": "path",
            "match": { "value": path }
        }));
    }

    if let Some(value_type) = args
        .value_type
        .as_deref()
        .filter(|value| !value.is_empty())
    {
        must.push(json!({
            "key": "value_type",
            "match": { "value": value_type }
        }));
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

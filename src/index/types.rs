use serde::Deserialize;
use serde_json::{Map, Value};

/// One point staged for upload: the derived point id, the embedding, and
/// the payload carried alongside it.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A nearest-neighbor hit. `distance` is normalized so that lower means
/// more similar, regardless of the index's native score direction.
#[derive(Debug, Clone)]
pub struct ScoredHit {
    pub distance: f32,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    pub result: QueryResult,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResult {
    #[serde(default)]
    pub points: Vec<RawScoredPoint>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawScoredPoint {
    pub score: f32,
    pub payload: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollResponse {
    pub result: ScrollResult,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollResult {
    #[serde(default)]
    pub points: Vec<RawScrollPoint>,
    pub next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawScrollPoint {
    pub payload: Option<Map<String, Value>>,
}

//! Semantic retrieval across both index collections.
//!
//! The query text is embedded once and run against the chunk and JSON
//! field collections; the two result sets are merged into a single
//! ranking by distance. A collection that errors degrades to an empty
//! slice so one bad collection never blanks the whole search.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::AppResult;
use crate::index::{build_filter, FilterArgs, ScoredHit, VectorCollection};
use crate::state::AppState;

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Restrict hits to a single document.
    pub document_id: Option<Uuid>,
    /// Maximum merged hits to return; defaults to [`DEFAULT_SEARCH_LIMIT`].
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub collection: VectorCollection,
    pub distance: f32,
    pub payload: Map<String, Value>,
}

pub async fn semantic_search(
    state: &Arc<AppState>,
    query: &str,
    options: SearchOptions,
) -> AppResult<Vec<SearchHit>> {
    let limit = options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if limit == 0 || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Retrieval never hard-fails on a provider outage; an unembeddable
    // query degrades to an empty result like an unreachable collection.
    let vector = match state.embeddings.embed(query).await {
        Ok(vector) => vector,
        Err(err) => {
            warn!(error = %err, "query embedding failed; returning no hits");
            return Ok(Vec::new());
        }
    };
    let max_distance = state.config.search_max_distance;

    let filter = options.document_id.map(|document_id| {
        let args = FilterArgs::for_document(document_id);
        build_filter(&args)
    });

    let mut per_collection = Vec::with_capacity(VectorCollection::ALL.len());
    for collection in VectorCollection::ALL {
        let hits = match state
            .index
            .search_points(
                collection,
                &vector,
                limit,
                max_distance,
                filter.clone().flatten(),
            )
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(
                    collection = collection.name(),
                    error = %err,
                    "collection search failed; omitting its results"
                );
                Vec::new()
            }
        };
        per_collection.push((collection, hits));
    }

    Ok(merge_ranked(per_collection, limit))
}

/// Merge per-collection hits into one ranking, nearest first. The sort is
/// stable, so hits at equal distance keep their collection order (chunks
/// before JSON fields).
fn merge_ranked(
    per_collection: Vec<(VectorCollection, Vec<ScoredHit>)>,
    limit: usize,
) -> Vec<SearchHit> {
    let mut merged: Vec<SearchHit> = per_collection
        .into_iter()
        .flat_map(|(collection, hits)| {
            hits.into_iter().map(move |hit| SearchHit {
                collection,
                distance: hit.distance,
                payload: hit.payload,
            })
        })
        .collect();

    merged.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(limit);
    merged
}

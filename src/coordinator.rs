use std::sync::Arc;

use diesel::prelude::*;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::task;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extract::{IndexUnit, UnitKind};
use crate::index::{build_filter, FilterArgs, IndexPoint, VectorCollection};
use crate::models::{Document, Job, NewAiProvider, NewVectorRecord, VECTOR_STATUS_SUCCESS};
use crate::schema::{ai_providers, jobs, vectors};
use crate::state::AppState;

/// Index uploads are batched for throughput; a failed batch fails the
/// whole pipeline rather than leaving a silent partial upload.
const UPSERT_BATCH_SIZE: usize = 100;

struct EmbeddedUnit {
    unit: IndexUnit,
    ordinal: u32,
    embedding: Vec<f32>,
    vector_id: String,
    point_id: Uuid,
}

/// Content-addressed identity for one unit: a sha-256 over the document,
/// job, ordinal and text. The hex digest is the relational join key; the
/// leading bytes double as the index point id. Independent of any
/// sequential id so external identifiers cannot be enumerated.
fn vector_identity(
    document_id: Uuid,
    job_id: Uuid,
    ordinal: u32,
    text: &str,
) -> (String, Uuid) {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(job_id.as_bytes());
    hasher.update(ordinal.to_be_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let vector_id = hex::encode(digest);
    let mut point_bytes = [0u8; 16];
    point_bytes.copy_from_slice(&digest[..16]);
    (vector_id, Uuid::from_bytes(point_bytes))
}

fn unit_collection(unit: &IndexUnit) -> VectorCollection {
    match unit.kind {
        UnitKind::TextChunk => VectorCollection::Chunks,
        UnitKind::JsonField => VectorCollection::JsonFields,
    }
}

fn unit_metadata(unit: &IndexUnit, document_id: Uuid) -> Value {
    match unit.kind {
        UnitKind::TextChunk => json!({
            "document_id": document_id.to_string(),
            "chunk_index": unit.chunk_index,
            "page_number": unit.page_number,
        }),
        UnitKind::JsonField => json!({
            "document_id": document_id.to_string(),
            "path": unit.path,
            "value": unit.value,
            "value_type": unit.value_type,
        }),
    }
}

fn unit_payload(embedded: &EmbeddedUnit, job_id: Uuid, document_id: Uuid) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("text".into(), Value::String(embedded.unit.text.clone()));
    payload.insert("job_id".into(), Value::String(job_id.to_string()));
    payload.insert(
        "document_id".into(),
        Value::String(document_id.to_string()),
    );
    payload.insert(
        "vector_id".into(),
        Value::String(embedded.vector_id.clone()),
    );

    match embedded.unit.kind {
        UnitKind::TextChunk => {
            payload.insert("chunk_index".into(), json!(embedded.unit.chunk_index));
            payload.insert("page_number".into(), json!(embedded.unit.page_number));
        }
        UnitKind::JsonField => {
            payload.insert("path".into(), json!(embedded.unit.path));
            payload.insert("value".into(), json!(embedded.unit.value));
            payload.insert("value_type".into(), json!(embedded.unit.value_type));
        }
    }

    payload
}

/// Embed each unit, record active vector rows, and upload matching points
/// to the index. Status transitions are committed outside this call so no
/// relational transaction stays open across provider I/O.
pub async fn persist_units(
    state: &Arc<AppState>,
    job: &Job,
    document: &Document,
    units: Vec<IndexUnit>,
) -> AppResult<usize> {
    if units.is_empty() {
        return Ok(0);
    }

    let mut embedded = Vec::with_capacity(units.len());
    for (ordinal, unit) in units.into_iter().enumerate() {
        let ordinal = ordinal as u32;
        let embedding = state.embeddings.embed(&unit.text).await?;
        let (vector_id, point_id) = vector_identity(document.id, job.id, ordinal, &unit.text);
        embedded.push(EmbeddedUnit {
            unit,
            ordinal,
            embedding,
            vector_id,
            point_id,
        });
    }

    let unit_count = embedded.len();
    let job_id = job.id;
    let document_id = document.id;
    let provider = state.embeddings.provider().to_string();
    let model = state.embeddings.model().to_string();

    let points: Vec<(VectorCollection, IndexPoint)> = embedded
        .iter()
        .map(|item| {
            (
                unit_collection(&item.unit),
                IndexPoint {
                    id: item.point_id.to_string(),
                    vector: item.embedding.clone(),
                    payload: unit_payload(item, job_id, document_id),
                },
            )
        })
        .collect();

    let state_clone = state.clone();
    task::spawn_blocking(move || {
        let mut conn = state_clone.db()?;
        conn.transaction(|conn| {
            let provider_id = ensure_embedding_provider(conn, &provider, &model)?;

            let rows: Vec<NewVectorRecord> = embedded
                .iter()
                .map(|item| {
                    Ok(NewVectorRecord {
                        id: Uuid::new_v4(),
                        job_id,
                        vector_id: item.vector_id.clone(),
                        provider_id: Some(provider_id),
                        text_content: item.unit.text.clone(),
                        embedding: serde_json::to_value(&item.embedding)?,
                        metadata: unit_metadata(&item.unit, document_id),
                        is_active: true,
                        status: VECTOR_STATUS_SUCCESS.to_string(),
                    })
                })
                .collect::<AppResult<Vec<_>>>()?;

            diesel::insert_into(vectors::table)
                .values(&rows)
                .execute(conn)?;
            Ok::<(), AppError>(())
        })
    })
    .await
    .map_err(|err| AppError::internal(format!("vector persist task panicked: {err}")))??;

    for collection in VectorCollection::ALL {
        let staged: Vec<IndexPoint> = points
            .iter()
            .filter(|(c, _)| *c == collection)
            .map(|(_, point)| point.clone())
            .collect();

        for batch in staged.chunks(UPSERT_BATCH_SIZE) {
            state.index.upsert_points(collection, batch.to_vec()).await?;
        }
    }

    debug!(job_id = %job_id, document_id = %document_id, units = unit_count, "vectors persisted");
    Ok(unit_count)
}

fn ensure_embedding_provider(
    conn: &mut PgConnection,
    provider: &str,
    model: &str,
) -> AppResult<Uuid> {
    let existing: Option<Uuid> = ai_providers::table
        .filter(ai_providers::provider.eq(provider))
        .filter(ai_providers::task.eq("embedding"))
        .filter(ai_providers::model.eq(model))
        .select(ai_providers::id)
        .first(conn)
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let row = NewAiProvider {
        id: Uuid::new_v4(),
        provider: provider.to_string(),
        task: "embedding".to_string(),
        model: model.to_string(),
    };

    diesel::insert_into(ai_providers::table)
        .values(&row)
        .on_conflict_do_nothing()
        .execute(conn)?;

    let id = ai_providers::table
        .filter(ai_providers::provider.eq(provider))
        .filter(ai_providers::task.eq("embedding"))
        .filter(ai_providers::model.eq(model))
        .select(ai_providers::id)
        .first(conn)?;

    Ok(id)
}

/// Deactivate a job's vectors and delete their index counterparts. Safe to
/// call when nothing matches. An index-side failure is logged as a
/// consistency warning, never rolled back: an orphaned index object beats
/// a job stuck mid-purge, and a repeated purge will retry the delete.
pub async fn purge_job(state: &Arc<AppState>, job_id: Uuid) -> AppResult<usize> {
    let state_clone = state.clone();
    let deactivated = task::spawn_blocking(move || {
        let mut conn = state_clone.db()?;
        let count = diesel::update(
            vectors::table
                .filter(vectors::job_id.eq(job_id))
                .filter(vectors::is_active.eq(true)),
        )
        .set(vectors::is_active.eq(false))
        .execute(&mut conn)?;
        Ok::<usize, AppError>(count)
    })
    .await
    .map_err(|err| AppError::internal(format!("purge task panicked: {err}")))??;

    delete_from_index(state, FilterArgs::for_job(job_id)).await;

    debug!(job_id = %job_id, deactivated, "job vectors purged");
    Ok(deactivated)
}

/// Purge every vector belonging to any job of a document.
pub async fn purge_document(state: &Arc<AppState>, document_id: Uuid) -> AppResult<usize> {
    let state_clone = state.clone();
    let deactivated = task::spawn_blocking(move || {
        let mut conn = state_clone.db()?;
        let job_ids = jobs::table
            .filter(jobs::document_id.eq(document_id))
            .select(jobs::id);
        let count = diesel::update(
            vectors::table
                .filter(vectors::job_id.eq_any(job_ids))
                .filter(vectors::is_active.eq(true)),
        )
        .set(vectors::is_active.eq(false))
        .execute(&mut conn)?;
        Ok::<usize, AppError>(count)
    })
    .await
    .map_err(|err| AppError::internal(format!("purge task panicked: {err}")))??;

    delete_from_index(state, FilterArgs::for_document(document_id)).await;

    debug!(document_id = %document_id, deactivated, "document vectors purged");
    Ok(deactivated)
}

async fn delete_from_index(state: &Arc<AppState>, args: FilterArgs) {
    let Some(filter) = build_filter(&args) else {
        return;
    };

    for collection in VectorCollection::ALL {
        if let Err(err) = state.index.delete_by_filter(collection, filter.clone()).await {
            warn!(
                collection = collection.name(),
                error = %err,
                "index delete failed; relational purge stands, index object orphaned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_identity_is_content_addressed() {
        let document = Uuid::new_v4();
        let job = Uuid::new_v4();

        let (first, point_first) = vector_identity(document, job, 0, "same text");
        let (again, point_again) = vector_identity(document, job, 0, "same text");
        assert_eq!(first, again);
        assert_eq!(point_first, point_again);

        let (other, _) = vector_identity(document, job, 1, "same text");
        assert_ne!(first, other);

        assert_eq!(first.len(), 64);
    }

    #[test]
    fn chunk_and_json_units_target_their_collections() {
        let chunk = IndexUnit::text_chunk("body".into(), 0, Some(1));
        let field = IndexUnit::json_field("a.b".into(), "1".into(), "number");
        assert_eq!(unit_collection(&chunk), VectorCollection::Chunks);
        assert_eq!(unit_collection(&field), VectorCollection::JsonFields);
    }

    #[test]
    fn json_metadata_carries_path_value_and_type() {
        let document_id = Uuid::new_v4();
        let field = IndexUnit::json_field("invoice.total".into(), "41.5".into(), "number");
        let metadata = unit_metadata(&field, document_id);

        assert_eq!(metadata["path"], "invoice.total");
        assert_eq!(metadata["value"], "41.5");
        assert_eq!(metadata["value_type"], "number");
        assert_eq!(metadata["document_id"], document_id.to_string());
    }
}

//! HTTP client for the external nearest-neighbor index.
//!
//! The relational store is the source of truth; the index is a derived
//! projection kept in sync by explicit persist/purge calls from the
//! vector coordinator. Two fixed collections exist, selected through
//! [`VectorCollection`] rather than by string comparison at call sites.

mod client;
mod filters;
mod types;

pub use client::VectorIndexService;
pub use filters::{build_filter, FilterArgs};
pub use types::{IndexPoint, ScoredHit};

/// The two index collections: document text chunks and flattened JSON
/// fields. Closed on purpose; every unit kind maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorCollection {
    Chunks,
    JsonFields,
}

impl VectorCollection {
    pub const ALL: [VectorCollection; 2] = [VectorCollection::Chunks, VectorCollection::JsonFields];

    pub fn name(&self) -> &'static str {
        match self {
            VectorCollection::Chunks => "document_chunks",
            VectorCollection::JsonFields => "json_fields",
        }
    }

    /// Payload fields that get a keyword index for filtered queries.
    pub(crate) fn indexed_fields(&self) -> &'static [&'static str] {
        match self {
            VectorCollection::Chunks => &["document_id", "job_id", "vector_id"],
            VectorCollection::JsonFields => {
                &["document_id", "job_id", "vector_id", "path", "value_type"]
            }
        }
    }
}

use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const DOCUMENT_STATUS_ACTIVE: &str = "active";
pub const DOCUMENT_STATUS_DELETED: &str = "deleted";

pub const VECTOR_STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub file_type: String,
    pub filename: String,
    pub filesize: i64,
    pub page_count: i32,
    pub owner_id: Uuid,
    pub storage_key: Option<String>,
    pub status: String,
    pub deleted_at: Option<NaiveDateTime>,
    pub uploaded_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub file_type: String,
    pub filename: String,
    pub filesize: i64,
    pub page_count: i32,
    pub owner_id: Uuid,
    pub storage_key: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = jobs)]
#[diesel(belongs_to(Document))]
pub struct Job {
    pub id: Uuid,
    pub document_id: Uuid,
    pub job_type: String,
    pub status: String,
    pub metadata: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub document_id: Uuid,
    pub job_type: String,
    pub status: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = vectors)]
#[diesel(belongs_to(Job))]
pub struct VectorRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub vector_id: String,
    pub provider_id: Option<Uuid>,
    pub text_content: String,
    pub embedding: serde_json::Value,
    pub metadata: serde_json::Value,
    pub is_active: bool,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = vectors)]
pub struct NewVectorRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub vector_id: String,
    pub provider_id: Option<Uuid>,
    pub text_content: String,
    pub embedding: serde_json::Value,
    pub metadata: serde_json::Value,
    pub is_active: bool,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = ai_providers)]
pub struct AiProvider {
    pub id: Uuid,
    pub provider: String,
    pub task: String,
    pub model: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ai_providers)]
pub struct NewAiProvider {
    pub id: Uuid,
    pub provider: String,
    pub task: String,
    pub model: String,
}

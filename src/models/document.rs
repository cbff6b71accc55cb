use serde::{ Serialize, Deserialize };

/// A document indexed into a conversation's knowledge base.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document_id: String,
    pub file_name: String,
    pub content_hash: String,
    pub chunk_count: usize,
    pub created_at: i64,
}

/// One embedded slice of a document, as stored in the knowledge store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub user_id: String,
    pub conversation_id: String,
    pub document_id: String,
    pub file_name: String,
    pub chunk_index: usize,
    pub text: String,
    pub content_hash: String,
    pub created_at: i64,
}

/// A retrieved chunk together with its cosine similarity to the query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub score: f32,
    pub file_name: String,
    pub chunk_index: usize,
    pub text: String,
}

/// Outcome of ingesting one uploaded file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub file_name: String,
    pub chunk_count: usize,
    /// True when identical content was already indexed in this conversation;
    /// `document_id` then refers to the existing document.
    pub duplicate: bool,
}

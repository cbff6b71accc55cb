pub mod chunk;
pub mod extract;
pub mod store;

use std::error::Error;
use std::sync::Arc;

use chrono::Utc;
use log::info;
use sha2::{ Digest, Sha256 };
use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::llm::embedding::EmbeddingClient;
use crate::models::document::{ DocumentChunk, DocumentInfo, IngestReport, ScoredChunk };
use self::chunk::ChunkConfig;
use self::store::KnowledgeStore;

#[derive(Debug, ThisError)]
pub enum RagError {
    #[error("unsupported document format: '{0}'")] UnsupportedFormat(String),

    #[error("document '{0}' contains no extractable text")] EmptyDocument(String),

    #[error("failed to extract text from '{file_name}': {reason}")] Extraction {
        file_name: String,
        reason: String,
    },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")] DimensionMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("document '{0}' not found")] DocumentNotFound(String),
}

/// The document pipeline: extraction, chunking, deduplication, embedding,
/// vector storage, and retrieval with prompt-context assembly. Every
/// operation is scoped to one (user, conversation) pair.
pub struct RagEngine {
    store: KnowledgeStore,
    embedding_client: Arc<dyn EmbeddingClient>,
    chunk_config: ChunkConfig,
    top_k: usize,
    min_score: f32,
    context_char_budget: usize,
    ocr_command: String,
}

impl RagEngine {
    pub fn new(
        store: KnowledgeStore,
        embedding_client: Arc<dyn EmbeddingClient>,
        chunk_config: ChunkConfig,
        top_k: usize,
        min_score: f32,
        context_char_budget: usize,
        ocr_command: String
    ) -> Self {
        Self {
            store,
            embedding_client,
            chunk_config,
            top_k,
            min_score,
            context_char_budget,
            ocr_command,
        }
    }

    /// Index one uploaded file into a conversation's knowledge base.
    /// Identical content re-uploaded into the same conversation is detected
    /// by hash and short-circuits to the existing document.
    pub async fn ingest_document(
        &self,
        user_id: &str,
        conversation_id: &str,
        file_name: &str,
        data: Vec<u8>
    ) -> Result<IngestReport, Box<dyn Error + Send + Sync>> {
        let name = file_name.to_string();
        let ocr_command = self.ocr_command.clone();
        let text = tokio::task
            ::spawn_blocking(move || extract::extract_text(&name, &data, &ocr_command)).await??;

        let content_hash = hash_content(&text);

        if
            let Some(existing) = self.store.find_document_by_hash(
                user_id,
                conversation_id,
                &content_hash
            ).await?
        {
            info!(
                "Duplicate upload '{}' in conversation {} matches document {}",
                file_name,
                conversation_id,
                existing
            );
            return Ok(IngestReport {
                document_id: existing,
                file_name: file_name.to_string(),
                chunk_count: 0,
                duplicate: true,
            });
        }

        let pieces = chunk::split_text(&text, &self.chunk_config);
        if pieces.is_empty() {
            return Err(Box::new(RagError::EmptyDocument(file_name.to_string())));
        }

        let vectors = self.embedding_client.embed_batch(&pieces).await?;

        let document_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp();
        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| DocumentChunk {
                user_id: user_id.to_string(),
                conversation_id: conversation_id.to_string(),
                document_id: document_id.clone(),
                file_name: file_name.to_string(),
                chunk_index,
                text,
                content_hash: content_hash.clone(),
                created_at,
            })
            .collect();

        let chunk_count = chunks.len();
        self.store.upsert_chunks(&chunks, vectors).await?;
        info!(
            "Indexed '{}' as document {} ({} chunks) in conversation {}",
            file_name,
            document_id,
            chunk_count,
            conversation_id
        );

        Ok(IngestReport {
            document_id,
            file_name: file_name.to_string(),
            chunk_count,
            duplicate: false,
        })
    }

    /// Top-k chunks for a question, scoped to the conversation.
    pub async fn retrieve(
        &self,
        user_id: &str,
        conversation_id: &str,
        query: &str
    ) -> Result<Vec<ScoredChunk>, Box<dyn Error + Send + Sync>> {
        let embed_resp = self.embedding_client.embed(query).await?;
        self.store.search(
            user_id,
            conversation_id,
            embed_resp.embedding,
            self.top_k,
            self.min_score
        ).await
    }

    pub fn build_context(&self, hits: &[ScoredChunk]) -> String {
        assemble_context(hits, self.context_char_budget)
    }

    pub async fn has_documents(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        self.store.has_documents(user_id, conversation_id).await
    }

    pub async fn list_documents(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<Vec<DocumentInfo>, Box<dyn Error + Send + Sync>> {
        self.store.list_documents(user_id, conversation_id).await
    }

    pub async fn delete_document(
        &self,
        user_id: &str,
        conversation_id: &str,
        document_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.store.delete_document(user_id, conversation_id, document_id).await
    }

    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.store.delete_conversation(user_id, conversation_id).await
    }
}

pub fn hash_content(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Render retrieved chunks into the prompt context, best hits first, without
/// ever crossing the character budget mid-chunk. The best hit is always
/// admitted, truncated to the budget if it alone is too large.
fn assemble_context(hits: &[ScoredChunk], char_budget: usize) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut context = String::new();
    let mut used = 0;

    for (i, hit) in hits.iter().enumerate() {
        let entry = format!("[source: {}]\n{}\n\n", hit.file_name, hit.text);
        let entry_chars = entry.chars().count();

        if used + entry_chars > char_budget {
            if i == 0 {
                context.extend(entry.chars().take(char_budget));
            }
            break;
        }

        context.push_str(&entry);
        used += entry_chars;
    }

    context.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(file_name: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            score,
            file_name: file_name.to_string(),
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn content_hash_is_stable_and_hex_encoded() {
        let a = hash_content("amoxicillin");
        let b = hash_content("amoxicillin");
        let c = hash_content("amoxicillin ");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn context_is_empty_for_no_hits() {
        assert_eq!(assemble_context(&[], 1000), "");
    }

    #[test]
    fn context_labels_each_chunk_with_its_source() {
        let hits = vec![hit("bnf.pdf", "Dose: 500mg", 0.9), hit("notes.txt", "Take with food", 0.8)];
        let context = assemble_context(&hits, 1000);
        assert!(context.starts_with("[source: bnf.pdf]\nDose: 500mg"));
        assert!(context.contains("[source: notes.txt]\nTake with food"));
    }

    #[test]
    fn context_stops_before_crossing_the_budget() {
        let hits = vec![
            hit("a.pdf", &"x".repeat(50), 0.9),
            hit("b.pdf", &"y".repeat(50), 0.8),
            hit("c.pdf", &"z".repeat(50), 0.7)
        ];
        // Each entry is ~66 chars; budget admits two.
        let context = assemble_context(&hits, 140);
        assert!(context.contains("a.pdf"));
        assert!(context.contains("b.pdf"));
        assert!(!context.contains("c.pdf"));
        assert!(context.chars().count() <= 140);
    }

    #[test]
    fn oversized_best_hit_is_truncated_rather_than_dropped() {
        let hits = vec![hit("huge.pdf", &"w".repeat(500), 0.9)];
        let context = assemble_context(&hits, 100);
        assert!(!context.is_empty());
        assert!(context.chars().count() <= 100);
        assert!(context.starts_with("[source: huge.pdf]"));
    }
}

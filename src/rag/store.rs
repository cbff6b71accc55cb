use std::collections::HashMap;
use std::error::Error;

use log::info;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition,
    CreateCollection,
    CreateFieldIndexCollection,
    DeletePointsBuilder,
    Distance,
    FieldType,
    Filter,
    PointStruct,
    ScrollPoints,
    SearchPoints,
    UpsertPoints,
    Value as QdrantValue,
    VectorParams,
    VectorsConfig,
    WithPayloadSelector,
    with_payload_selector::SelectorOptions as WithPayloadOptions,
};
use uuid::Uuid;

use crate::cli::Args;
use crate::models::document::{ DocumentChunk, DocumentInfo, ScoredChunk };
use crate::rag::RagError;

const SCROLL_PAGE_SIZE: u32 = 256;

/// Qdrant-backed store for embedded document chunks. All tenants share one
/// collection; isolation happens through payload filters on the
/// (user_id, conversation_id) pair.
pub struct KnowledgeStore {
    client: Qdrant,
    collection_name: String,
    vector_dim: u64,
}

impl KnowledgeStore {
    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let client = Qdrant::from_url(&args.qdrant_url)
            .api_key(args.qdrant_api_key.clone())
            .build()?;

        Ok(Self {
            client,
            collection_name: args.knowledge_collection.clone(),
            vector_dim: args.dimension as u64,
        })
    }

    async fn ensure_collection_exists(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.client.collection_exists(&self.collection_name).await? {
            self.client.create_collection(CreateCollection {
                collection_name: self.collection_name.clone(),
                vectors_config: Some(
                    VectorsConfig::from(VectorParams {
                        size: self.vector_dim,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    })
                ),
                ..Default::default()
            }).await?;
            info!("Created knowledge collection: {}", self.collection_name);

            for field in ["user_id", "conversation_id", "document_id", "content_hash"] {
                self.client.create_field_index(CreateFieldIndexCollection {
                    collection_name: self.collection_name.clone(),
                    field_name: field.to_string(),
                    field_type: Some(FieldType::Keyword.into()),
                    wait: Some(true),
                    ..Default::default()
                }).await?;
                info!("Created '{}' index in {}", field, self.collection_name);
            }
        }
        Ok(())
    }

    fn scope_filter(&self, user_id: &str, conversation_id: &str) -> Filter {
        Filter::must([
            Condition::matches("user_id", user_id.to_string()),
            Condition::matches("conversation_id", conversation_id.to_string()),
        ])
    }

    fn with_payload() -> WithPayloadSelector {
        WithPayloadSelector {
            selector_options: Some(WithPayloadOptions::Enable(true)),
        }
    }

    fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> String {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    fn payload_int(payload: &HashMap<String, QdrantValue>, key: &str) -> i64 {
        payload
            .get(key)
            .and_then(|v| v.as_integer())
            .unwrap_or(0)
    }

    /// Duplicate probe: returns the document id already holding this content
    /// hash within the conversation, if any.
    pub async fn find_document_by_hash(
        &self,
        user_id: &str,
        conversation_id: &str,
        content_hash: &str
    ) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        self.ensure_collection_exists().await?;

        let mut filter = self.scope_filter(user_id, conversation_id);
        filter.must.push(Condition::matches("content_hash", content_hash.to_string()));

        let response = self.client.scroll(ScrollPoints {
            collection_name: self.collection_name.clone(),
            filter: Some(filter),
            limit: Some(1),
            with_payload: Some(Self::with_payload()),
            ..Default::default()
        }).await?;

        Ok(
            response.result
                .first()
                .map(|point| Self::payload_str(&point.payload, "document_id"))
                .filter(|id| !id.is_empty())
        )
    }

    pub async fn upsert_chunks(
        &self,
        chunks: &[DocumentChunk],
        vectors: Vec<Vec<f32>>
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if chunks.len() != vectors.len() {
            return Err(
                format!("chunk/vector count mismatch: {} vs {}", chunks.len(), vectors.len()).into()
            );
        }
        self.ensure_collection_exists().await?;

        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            if (vector.len() as u64) != self.vector_dim {
                return Err(
                    Box::new(RagError::DimensionMismatch {
                        expected: self.vector_dim as usize,
                        actual: vector.len(),
                    })
                );
            }

            let mut payload: HashMap<String, QdrantValue> = HashMap::new();
            payload.insert("user_id".to_string(), chunk.user_id.clone().into());
            payload.insert("conversation_id".to_string(), chunk.conversation_id.clone().into());
            payload.insert("document_id".to_string(), chunk.document_id.clone().into());
            payload.insert("file_name".to_string(), chunk.file_name.clone().into());
            payload.insert("chunk_index".to_string(), (chunk.chunk_index as i64).into());
            payload.insert("text".to_string(), chunk.text.clone().into());
            payload.insert("content_hash".to_string(), chunk.content_hash.clone().into());
            payload.insert("created_at".to_string(), chunk.created_at.into());

            points.push(PointStruct::new(Uuid::new_v4().to_string(), vector, payload));
        }

        let upsert_request = UpsertPoints {
            collection_name: self.collection_name.clone(),
            wait: Some(true),
            points,
            ordering: None,
            shard_key_selector: None,
            ..Default::default()
        };
        self.client.upsert_points(upsert_request).await?;

        Ok(())
    }

    /// Top-k nearest chunks for a query vector, scoped to one conversation.
    pub async fn search(
        &self,
        user_id: &str,
        conversation_id: &str,
        query_vector: Vec<f32>,
        limit: usize,
        min_score: f32
    ) -> Result<Vec<ScoredChunk>, Box<dyn Error + Send + Sync>> {
        self.ensure_collection_exists().await?;

        let response = self.client.search_points(SearchPoints {
            collection_name: self.collection_name.clone(),
            vector: query_vector,
            filter: Some(self.scope_filter(user_id, conversation_id)),
            limit: limit as u64,
            score_threshold: if min_score > 0.0 {
                Some(min_score)
            } else {
                None
            },
            with_payload: Some(Self::with_payload()),
            ..Default::default()
        }).await?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let text = Self::payload_str(&point.payload, "text");
            if text.is_empty() {
                continue;
            }
            hits.push(ScoredChunk {
                score: point.score,
                file_name: Self::payload_str(&point.payload, "file_name"),
                chunk_index: Self::payload_int(&point.payload, "chunk_index").max(0) as usize,
                text,
            });
        }

        Ok(hits)
    }

    /// True when the conversation has at least one indexed chunk.
    pub async fn has_documents(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        self.ensure_collection_exists().await?;

        let response = self.client.scroll(ScrollPoints {
            collection_name: self.collection_name.clone(),
            filter: Some(self.scope_filter(user_id, conversation_id)),
            limit: Some(1),
            ..Default::default()
        }).await?;

        Ok(!response.result.is_empty())
    }

    /// One entry per document in the conversation, folded from its chunks.
    pub async fn list_documents(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<Vec<DocumentInfo>, Box<dyn Error + Send + Sync>> {
        self.ensure_collection_exists().await?;

        let mut documents: HashMap<String, DocumentInfo> = HashMap::new();
        let mut offset = None;

        loop {
            let response = self.client.scroll(ScrollPoints {
                collection_name: self.collection_name.clone(),
                filter: Some(self.scope_filter(user_id, conversation_id)),
                limit: Some(SCROLL_PAGE_SIZE),
                with_payload: Some(Self::with_payload()),
                offset,
                ..Default::default()
            }).await?;

            for point in &response.result {
                let document_id = Self::payload_str(&point.payload, "document_id");
                if document_id.is_empty() {
                    continue;
                }

                let entry = documents.entry(document_id.clone()).or_insert_with(|| DocumentInfo {
                    document_id,
                    file_name: Self::payload_str(&point.payload, "file_name"),
                    content_hash: Self::payload_str(&point.payload, "content_hash"),
                    chunk_count: 0,
                    created_at: Self::payload_int(&point.payload, "created_at"),
                });
                entry.chunk_count += 1;
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        let mut list: Vec<DocumentInfo> = documents.into_values().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    /// Remove every chunk of one document. Errors when nothing matched so the
    /// API can answer 404 instead of silently succeeding.
    pub async fn delete_document(
        &self,
        user_id: &str,
        conversation_id: &str,
        document_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.ensure_collection_exists().await?;

        let mut filter = self.scope_filter(user_id, conversation_id);
        filter.must.push(Condition::matches("document_id", document_id.to_string()));

        let existing = self.client.scroll(ScrollPoints {
            collection_name: self.collection_name.clone(),
            filter: Some(filter.clone()),
            limit: Some(1),
            ..Default::default()
        }).await?;
        if existing.result.is_empty() {
            return Err(Box::new(RagError::DocumentNotFound(document_id.to_string())));
        }

        self.client.delete_points(
            DeletePointsBuilder::new(&self.collection_name).points(filter).wait(true)
        ).await?;

        Ok(())
    }

    /// Remove every chunk belonging to a conversation (conversation deletion).
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.ensure_collection_exists().await?;

        self.client.delete_points(
            DeletePointsBuilder::new(&self.collection_name)
                .points(self.scope_filter(user_id, conversation_id))
                .wait(true)
        ).await?;

        Ok(())
    }
}

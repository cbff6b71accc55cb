use async_trait::async_trait;
use crate::models::chat::{ ChatMessage, Conversation, ConversationSummary };
use crate::history::{ ConversationStore, HistoryError };
use crate::cli::Args;
use std::collections::HashMap;
use std::error::Error;
use chrono::Utc;
use log::error;
use redis::{ Client, AsyncCommands };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    role: String,
    content: String,
    timestamp: i64,
}

struct ConversationMeta {
    user_id: String,
    title: String,
    created_at: i64,
}

pub struct RedisConversationStore {
    client: Client,
    key_prefix: String,
}

impl RedisConversationStore {
    pub fn new(args: Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(args.history_redis_url.as_str())?,
            key_prefix: args.history_key_prefix,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn user_set_key(&self, user_id: &str) -> String {
        format!("{}user:{}:conversations", self.key_prefix, user_id)
    }

    fn meta_key(&self, conversation_id: &str) -> String {
        format!("{}conv:{}:meta", self.key_prefix, conversation_id)
    }

    fn messages_key(&self, conversation_id: &str) -> String {
        format!("{}conv:{}:messages", self.key_prefix, conversation_id)
    }

    /// Load a conversation's metadata and verify ownership. A missing hash
    /// and a foreign owner both surface as NotFound.
    async fn load_meta_checked(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        user_id: &str,
        conversation_id: &str
    ) -> Result<ConversationMeta, Box<dyn Error + Send + Sync>> {
        let raw: HashMap<String, String> = conn.hgetall(self.meta_key(conversation_id)).await?;
        if raw.is_empty() {
            return Err(Box::new(HistoryError::NotFound(conversation_id.to_string())));
        }

        let owner = raw.get("user_id").cloned().unwrap_or_default();
        if owner != user_id {
            return Err(Box::new(HistoryError::NotFound(conversation_id.to_string())));
        }

        Ok(ConversationMeta {
            user_id: owner,
            title: raw.get("title").cloned().unwrap_or_default(),
            created_at: raw
                .get("created_at")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let conversation_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp();

        let _: () = conn.hset_multiple(
            self.meta_key(&conversation_id),
            &[
                ("user_id", user_id.to_string()),
                ("title", title.to_string()),
                ("created_at", created_at.to_string()),
            ]
        ).await?;
        let _: i64 = conn.sadd(self.user_set_key(user_id), &conversation_id).await?;

        Ok(Conversation {
            id: conversation_id,
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at,
            messages: Vec::new(),
        })
    }

    async fn add_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: &str,
        content: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        self.load_meta_checked(&mut conn, user_id, conversation_id).await?;

        let message = StoredMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().timestamp(),
        };

        let json_msg = serde_json::to_string(&message)?;
        let _: i64 = conn.lpush(self.messages_key(conversation_id), &json_msg).await?;
        Ok(())
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let meta = self.load_meta_checked(&mut conn, user_id, conversation_id).await?;

        let json_entries: Vec<String> = conn.lrange(
            self.messages_key(conversation_id),
            0,
            (limit as isize) - 1
        ).await?;
        let mut messages = Vec::new();

        for json_entry in &json_entries {
            match serde_json::from_str::<StoredMessage>(json_entry) {
                Ok(msg) => {
                    messages.push(ChatMessage {
                        role: msg.role,
                        content: msg.content,
                        timestamp: msg.timestamp,
                    });
                }
                Err(e) => {
                    error!("Error parsing history entry: {}", e);
                }
            }
        }
        messages.reverse();

        Ok(Conversation {
            id: conversation_id.to_string(),
            user_id: meta.user_id,
            title: meta.title,
            created_at: meta.created_at,
            messages,
        })
    }

    async fn list_conversations(
        &self,
        user_id: &str
    ) -> Result<Vec<ConversationSummary>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.smembers(self.user_set_key(user_id)).await?;

        let mut summaries = Vec::with_capacity(ids.len());
        for conversation_id in ids {
            let raw: HashMap<String, String> = conn.hgetall(self.meta_key(&conversation_id)).await?;
            if raw.is_empty() {
                // Stale set entry; the meta hash was deleted out of band.
                let _: i64 = conn.srem(self.user_set_key(user_id), &conversation_id).await?;
                continue;
            }
            let message_count: i64 = conn.llen(self.messages_key(&conversation_id)).await?;
            summaries.push(ConversationSummary {
                id: conversation_id,
                title: raw.get("title").cloned().unwrap_or_default(),
                created_at: raw
                    .get("created_at")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                message_count: message_count.max(0) as usize,
            });
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        self.load_meta_checked(&mut conn, user_id, conversation_id).await?;
        let _: () = conn.hset(self.meta_key(conversation_id), "title", title).await?;
        Ok(())
    }

    async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        self.load_meta_checked(&mut conn, user_id, conversation_id).await?;

        let _: i64 = conn.del(self.messages_key(conversation_id)).await?;
        let _: i64 = conn.del(self.meta_key(conversation_id)).await?;
        let _: i64 = conn.srem(self.user_set_key(user_id), conversation_id).await?;
        Ok(())
    }
}

mod redis;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use crate::cli::Args;
use crate::models::chat::{ Conversation, ConversationSummary };

#[derive(Debug)]
pub enum HistoryError {
    /// The conversation does not exist, or belongs to a different user.
    /// The two cases are deliberately indistinguishable to callers.
    NotFound(String),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::NotFound(id) => write!(f, "Conversation '{}' not found", id),
        }
    }
}

impl Error for HistoryError {}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>>;

    async fn add_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        role: &str,
        content: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Fetch a conversation with its trailing `limit` messages, oldest first.
    async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>>;

    /// List a user's conversations, newest first.
    async fn list_conversations(
        &self,
        user_id: &str
    ) -> Result<Vec<ConversationSummary>, Box<dyn Error + Send + Sync>>;

    async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

pub fn initialize_conversation_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    info!("Conversations will be stored in Redis at {}", args.history_redis_url);
    let store = redis::RedisConversationStore::new(args.clone())?;
    Ok(Arc::new(store))
}

pub fn format_history_for_prompt(conversation: &Conversation) -> String {
    if conversation.messages.is_empty() {
        return String::new();
    }
    let mut result = String::from("Previous conversation:\n");
    for msg in &conversation.messages {
        let role_display = match msg.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            other => other,
        };

        result.push_str(&format!("{}: {}\n", role_display, msg.content));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatMessage;

    fn conversation_with(messages: Vec<(&str, &str)>) -> Conversation {
        Conversation {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            title: "Test".to_string(),
            created_at: 0,
            messages: messages
                .into_iter()
                .map(|(role, content)| ChatMessage {
                    role: role.to_string(),
                    content: content.to_string(),
                    timestamp: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn empty_history_formats_to_empty_string() {
        let conversation = conversation_with(vec![]);
        assert_eq!(format_history_for_prompt(&conversation), "");
    }

    #[test]
    fn roles_are_capitalized_in_transcript() {
        let conversation = conversation_with(
            vec![("user", "What is warfarin?"), ("assistant", "An anticoagulant.")]
        );
        let formatted = format_history_for_prompt(&conversation);
        assert_eq!(
            formatted,
            "Previous conversation:\nUser: What is warfarin?\nAssistant: An anticoagulant.\n"
        );
    }

    #[test]
    fn unknown_roles_pass_through_unchanged() {
        let conversation = conversation_with(vec![("system", "note")]);
        let formatted = format_history_for_prompt(&conversation);
        assert!(formatted.contains("system: note"));
    }
}

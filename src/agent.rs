use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::history::{ format_history_for_prompt, initialize_conversation_store, ConversationStore };
use crate::llm::LlmConfig;
use crate::llm::chat::{ ChatClient, TokenStream, new_client as new_chat_client };
use crate::llm::embedding::{ EmbeddingClient, new_client as new_embedding_client };
use crate::models::chat::{ Conversation, ConversationSummary };
use crate::models::document::{ DocumentInfo, IngestReport };
use crate::rag::chunk::ChunkConfig;
use crate::rag::store::KnowledgeStore;
use crate::rag::RagEngine;

use futures::StreamExt;
use log::{ info, warn, error };
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";
const MAX_TITLE_CHARS: usize = 80;

/// Orchestrates one chat turn: bounded history, document-grounded context
/// when the conversation has indexed files, prompt rendering, the LLM call,
/// and persistence of both sides of the exchange.
pub struct PharmAgent {
    chat_client: Arc<dyn ChatClient>,
    rag_engine: Arc<RagEngine>,
    conversation_store: Arc<dyn ConversationStore>,
    prompt_config: Arc<PromptConfig>,
    history_for_prompt: usize,
}

impl PharmAgent {
    fn initialize_llm_clients(
        args: &Args
    ) -> Result<(Arc<dyn ChatClient>, Arc<dyn EmbeddingClient>), Box<dyn Error + Send + Sync>> {
        let chat_llm_type = crate::llm::parse_llm_type(&args.chat_llm_type)?;
        let chat_api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let chat_config = LlmConfig {
            llm_type: chat_llm_type,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
            completion_model: args.chat_model.clone(),
            embedding_model: None,
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={:?}, BaseURL={:?}",
            args.chat_llm_type,
            chat_config.completion_model.as_deref().unwrap_or("adapter default"),
            chat_config.base_url.as_deref().unwrap_or("adapter default")
        );

        let embedding_llm_type = crate::llm::parse_llm_type(&args.embedding_llm_type)?;
        let embedding_api_key = if !args.embedding_api_key.is_empty() {
            Some(args.embedding_api_key.clone())
        } else {
            None
        };
        let embedding_config = LlmConfig {
            llm_type: embedding_llm_type,
            base_url: args.embedding_base_url.clone(),
            api_key: embedding_api_key,
            embedding_model: args.embedding_model.clone(),
            completion_model: None,
        };
        let embedding_client = new_embedding_client(&embedding_config)?;
        info!(
            "Embedding client configured: Type={}, Model={:?}, BaseURL={:?}",
            args.embedding_llm_type,
            embedding_config.embedding_model.as_deref().unwrap_or("adapter default"),
            embedding_config.base_url.as_deref().unwrap_or("adapter default")
        );

        Ok((chat_client, embedding_client))
    }

    pub async fn new(args: Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let (chat_client, embedding_client) = Self::initialize_llm_clients(&args)?;

        let knowledge_store = KnowledgeStore::new(&args)?;
        let chunk_config = ChunkConfig::new(args.chunk_max_chars, args.chunk_overlap_chars)?;
        let rag_engine = Arc::new(
            RagEngine::new(
                knowledge_store,
                Arc::clone(&embedding_client),
                chunk_config,
                args.rag_top_k,
                args.rag_min_score,
                args.context_char_budget,
                args.ocr_command.clone()
            )
        );

        let conversation_store = initialize_conversation_store(&args)?;
        let prompt_config = prompt::load_prompts(&args.prompts_path)?;

        Ok(Self {
            chat_client,
            rag_engine,
            conversation_store,
            prompt_config,
            history_for_prompt: args.history_for_prompt,
        })
    }

    /// Render the prompt for one turn. Conversations with indexed documents
    /// take the grounded path; everything else falls back to general chat.
    async fn render_prompt(
        &self,
        conversation: &Conversation,
        message: &str
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let history_str = format_history_for_prompt(conversation);

        if self.rag_engine.has_documents(&conversation.user_id, &conversation.id).await? {
            let hits = self.rag_engine.retrieve(
                &conversation.user_id,
                &conversation.id,
                message
            ).await?;

            if !hits.is_empty() {
                info!(
                    "Retrieved {} chunks for conversation {} (best score {:.4})",
                    hits.len(),
                    conversation.id,
                    hits[0].score
                );
                let context = self.rag_engine.build_context(&hits);
                return Ok(
                    prompt::get_rag_answer_prompt(
                        &self.prompt_config,
                        &context,
                        &history_str,
                        message
                    )?
                );
            }
            info!("No relevant chunks for conversation {}, using general prompt", conversation.id);
        }

        Ok(prompt::get_general_prompt(&self.prompt_config, &history_str, message)?)
    }

    pub async fn process_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &str
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let conversation = self.conversation_store.get_conversation(
            user_id,
            conversation_id,
            self.history_for_prompt
        ).await?;
        let first_exchange = conversation.messages.is_empty();

        let rendered = self.render_prompt(&conversation, message).await?;
        let response = self.chat_client
            .complete(&rendered).await
            .map_err(|e| {
                error!("LLM interaction error: {}", e);
                e
            })?;

        self.conversation_store.add_message(user_id, conversation_id, "user", message).await?;
        self.conversation_store.add_message(
            user_id,
            conversation_id,
            "assistant",
            &response.response
        ).await?;

        if first_exchange {
            finalize_title(
                Arc::clone(&self.chat_client),
                Arc::clone(&self.conversation_store),
                Arc::clone(&self.prompt_config),
                user_id.to_string(),
                conversation_id.to_string(),
                message.to_string()
            ).await;
        }

        Ok(response.response)
    }

    /// Streaming variant. Fragments are forwarded as they arrive; the full
    /// reply is persisted once the provider stream finishes.
    pub async fn process_message_stream(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &str
    ) -> Result<TokenStream, Box<dyn Error + Send + Sync>> {
        let conversation = self.conversation_store.get_conversation(
            user_id,
            conversation_id,
            self.history_for_prompt
        ).await?;
        let first_exchange = conversation.messages.is_empty();

        let rendered = self.render_prompt(&conversation, message).await?;
        let mut inner = self.chat_client.stream_completion(&rendered).await?;

        self.conversation_store.add_message(user_id, conversation_id, "user", message).await?;

        let (tx, rx) = mpsc::channel(32);
        let conversation_store = Arc::clone(&self.conversation_store);
        let chat_client = Arc::clone(&self.chat_client);
        let prompt_config = Arc::clone(&self.prompt_config);
        let user_id = user_id.to_string();
        let conversation_id = conversation_id.to_string();
        let message = message.to_string();

        tokio::spawn(async move {
            let mut full_response = String::new();

            while let Some(fragment) = inner.next().await {
                match fragment {
                    Ok(text) => {
                        full_response.push_str(&text);
                        if tx.send(Ok(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if !full_response.is_empty() {
                if
                    let Err(e) = conversation_store.add_message(
                        &user_id,
                        &conversation_id,
                        "assistant",
                        &full_response
                    ).await
                {
                    warn!("History write (assistant) failed: {}", e);
                }
            }

            if first_exchange {
                finalize_title(
                    chat_client,
                    conversation_store,
                    prompt_config,
                    user_id,
                    conversation_id,
                    message
                ).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    // --- Conversation management ---

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<String>
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string());
        self.conversation_store.create_conversation(user_id, &title).await
    }

    pub async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        self.conversation_store.get_conversation(user_id, conversation_id, limit).await
    }

    pub async fn list_conversations(
        &self,
        user_id: &str
    ) -> Result<Vec<ConversationSummary>, Box<dyn Error + Send + Sync>> {
        self.conversation_store.list_conversations(user_id).await
    }

    pub async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.conversation_store.rename_conversation(user_id, conversation_id, title).await
    }

    /// Delete a conversation and its knowledge base.
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.conversation_store.delete_conversation(user_id, conversation_id).await?;
        self.rag_engine.delete_conversation(user_id, conversation_id).await?;
        Ok(())
    }

    // --- Document management ---

    pub async fn ingest_document(
        &self,
        user_id: &str,
        conversation_id: &str,
        file_name: &str,
        data: Vec<u8>
    ) -> Result<IngestReport, Box<dyn Error + Send + Sync>> {
        // Ownership gate: the conversation must exist and belong to the caller.
        self.conversation_store.get_conversation(user_id, conversation_id, 1).await?;
        self.rag_engine.ingest_document(user_id, conversation_id, file_name, data).await
    }

    pub async fn list_documents(
        &self,
        user_id: &str,
        conversation_id: &str
    ) -> Result<Vec<DocumentInfo>, Box<dyn Error + Send + Sync>> {
        self.conversation_store.get_conversation(user_id, conversation_id, 1).await?;
        self.rag_engine.list_documents(user_id, conversation_id).await
    }

    pub async fn delete_document(
        &self,
        user_id: &str,
        conversation_id: &str,
        document_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.conversation_store.get_conversation(user_id, conversation_id, 1).await?;
        self.rag_engine.delete_document(user_id, conversation_id, document_id).await
    }

    // --- Prompt reload ---

    pub async fn reload_prompts_if_changed(
        &mut self,
        args: &Args
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let result = prompt::reload_prompts_if_changed(&args.prompts_path, &self.prompt_config)?;

        if let Some(new_config) = result {
            self.prompt_config = new_config;
            info!("Prompts successfully reloaded");
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Give a fresh conversation a title from its opening message. Failures are
/// logged and swallowed; the chat reply has already been produced.
async fn finalize_title(
    chat_client: Arc<dyn ChatClient>,
    conversation_store: Arc<dyn ConversationStore>,
    prompt_config: Arc<PromptConfig>,
    user_id: String,
    conversation_id: String,
    message: String
) {
    let title = match prompt::get_title_prompt(&prompt_config, &message) {
        Ok(title_prompt) =>
            match chat_client.complete(&title_prompt).await {
                Ok(resp) => sanitize_title(&resp.response, &message),
                Err(e) => {
                    warn!("Title generation failed: {}", e);
                    sanitize_title("", &message)
                }
            }
        Err(e) => {
            warn!("Title prompt rendering failed: {}", e);
            sanitize_title("", &message)
        }
    };

    if
        let Err(e) = conversation_store.rename_conversation(
            &user_id,
            &conversation_id,
            &title
        ).await
    {
        warn!("Failed to store conversation title: {}", e);
    }
}

/// Collapse the model's title output to one clean line, falling back to the
/// truncated first message when the model returned nothing usable.
fn sanitize_title(generated: &str, fallback_message: &str) -> String {
    let candidate = generated
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim_end_matches('.')
        .trim()
        .to_string();

    let source = if candidate.is_empty() { fallback_message.trim() } else { &candidate };

    let mut title: String = source.chars().take(MAX_TITLE_CHARS).collect();
    if source.chars().count() > MAX_TITLE_CHARS {
        title.push('…');
    }

    if title.is_empty() {
        DEFAULT_CONVERSATION_TITLE.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_title_strips_quotes_and_trailing_period() {
        assert_eq!(sanitize_title("\"Warfarin dosing.\"", "ignored"), "Warfarin dosing");
    }

    #[test]
    fn sanitize_title_keeps_only_the_first_line() {
        assert_eq!(sanitize_title("Statin overview\nSecond line", "ignored"), "Statin overview");
    }

    #[test]
    fn sanitize_title_falls_back_to_the_message() {
        assert_eq!(sanitize_title("   ", "What is metformin?"), "What is metformin?");
    }

    #[test]
    fn sanitize_title_truncates_long_output() {
        let long = "a".repeat(200);
        let title = sanitize_title(&long, "ignored");
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn sanitize_title_never_returns_empty() {
        assert_eq!(sanitize_title("", "  "), DEFAULT_CONVERSATION_TITLE);
    }
}

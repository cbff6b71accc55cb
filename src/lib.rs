pub mod agent;
pub mod models;
pub mod server;
pub mod config;
pub mod llm;
pub mod cli;
pub mod history;
pub mod rag;

use agent::PharmAgent;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP Port: {:?}", args.http_port);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Embedding LLM Type: {}", args.embedding_llm_type);
    info!("Conversation Store: {}", args.history_redis_url);
    info!("Knowledge Store: {}", args.qdrant_url);
    info!("Knowledge Collection: {}", args.knowledge_collection);
    info!("Vector Dimension: {}", args.dimension);
    info!("Chunk Size/Overlap: {}/{}", args.chunk_max_chars, args.chunk_overlap_chars);
    info!("RAG Top-K: {}", args.rag_top_k);
    info!("Context Budget: {} chars", args.context_char_budget);
    info!("Prompts Path: {}", args.prompts_path);
    info!("-------------------------");

    let agent_args = args.clone();
    let agent = Arc::new(Mutex::new(PharmAgent::new(agent_args).await?));
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args);
    server.run().await?;

    Ok(())
}

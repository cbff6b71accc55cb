use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Conversation Store Args ---
    /// Redis endpoint holding conversations and messages (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub history_redis_url: String,

    /// Prefix for all conversation keys in Redis.
    #[arg(long, env = "HISTORY_KEY_PREFIX", default_value = "pharmgpt:")]
    pub history_key_prefix: String,

    /// Number of trailing messages included in the prompt as conversation history.
    #[arg(long, env = "HISTORY_FOR_PROMPT", default_value = "8")]
    pub history_for_prompt: usize,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (ollama, openai, groq, openrouter)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "ollama")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (e.g., Groq, OpenRouter)
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., llama-3.1-8b-instant, gpt-4o)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    // --- Embedding LLM Provider Args ---
    /// Type of LLM provider for text embedding (ollama, openai)
    #[arg(long, env = "EMBEDDING_LLM_TYPE", default_value = "ollama")]
    pub embedding_llm_type: String,

    /// Base URL for the Embedding LLM provider API
    #[arg(long, env = "EMBEDDING_BASE_URL")]
    pub embedding_base_url: Option<String>,

    /// API Key for the Embedding LLM provider
    #[arg(long, env = "EMBEDDING_API_KEY", default_value = "")]
    pub embedding_api_key: String,

    /// Model name for text embedding (e.g., nomic-embed-text, text-embedding-3-small)
    #[arg(long, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    // --- Knowledge Store Args ---
    /// Qdrant endpoint holding the document chunk vectors.
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6334")]
    pub qdrant_url: String,

    /// Optional API key for the Qdrant instance.
    #[arg(long, env = "QDRANT_API_KEY")]
    pub qdrant_api_key: Option<String>,

    /// Collection name for document chunks.
    #[arg(long, env = "KNOWLEDGE_COLLECTION", default_value = "pharmgpt_chunks")]
    pub knowledge_collection: String,

    /// Vector dimension of the embedding model output.
    #[arg(long, env = "VECTOR_DIMENSION", default_value = "768")]
    pub dimension: usize,

    // --- Ingestion Args ---
    /// Maximum chunk size in characters.
    #[arg(long, env = "CHUNK_MAX_CHARS", default_value = "1000")]
    pub chunk_max_chars: usize,

    /// Overlap between consecutive chunks in characters.
    #[arg(long, env = "CHUNK_OVERLAP_CHARS", default_value = "200")]
    pub chunk_overlap_chars: usize,

    /// Maximum accepted upload size in bytes (after base64 decoding).
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Executable used for image OCR. Must accept `<file> stdout` arguments.
    #[arg(long, env = "OCR_COMMAND", default_value = "tesseract")]
    pub ocr_command: String,

    // --- Retrieval Args ---
    /// Number of chunks retrieved per question.
    #[arg(long, env = "RAG_TOP_K", default_value = "5")]
    pub rag_top_k: usize,

    /// Minimum cosine similarity for a chunk to be used as context (0.0 to 1.0).
    #[arg(long, env = "RAG_MIN_SCORE", default_value = "0.25")]
    pub rag_min_score: f32,

    /// Character budget for the assembled document context in the prompt.
    #[arg(long, env = "CONTEXT_CHAR_BUDGET", default_value = "6000")]
    pub context_char_budget: usize,

    // --- General App Args ---
    /// Path to the prompt template configuration file.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    /// Host address and port for the WebSocket chat server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP API server. The HTTP server is skipped when unset.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Optional API Key clients must sign WebSocket connections with.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

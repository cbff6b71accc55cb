use crate::agent::PharmAgent;
use crate::cli::Args;
use crate::history::HistoryError;
use crate::rag::RagError;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use axum::{
    routing::{ delete, get, post },
    Router,
    Json,
    extract::{ Path, Query, State },
    response::IntoResponse,
    http::StatusCode,
};
use base64::{ engine::general_purpose::STANDARD as BASE64, Engine as _ };
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Clone)]
struct AppState {
    agent: Arc<Mutex<PharmAgent>>,
    args: Args,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

#[derive(Deserialize)]
struct ConversationQuery {
    user_id: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub user_id: String,
    pub title: Option<String>,
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub user_id: String,
    pub content: String,
}

#[derive(Serialize)]
struct SendMessageResponse {
    conversation_id: String,
    reply: String,
}

#[derive(Deserialize)]
pub struct RenameConversationRequest {
    pub user_id: String,
    pub title: String,
}

#[derive(Deserialize)]
pub struct UploadDocumentRequest {
    pub user_id: String,
    pub file_name: String,
    /// Base64-encoded file content.
    pub data: String,
}

#[derive(Serialize)]
struct ReloadResponse {
    success: bool,
    message: String,
}

/// Map store/pipeline failures onto HTTP statuses. Ownership violations are
/// indistinguishable from missing rows by design, so both come back as 404.
fn error_response(e: Box<dyn Error + Send + Sync>) -> axum::response::Response {
    let status = if e.downcast_ref::<HistoryError>().is_some() {
        StatusCode::NOT_FOUND
    } else if let Some(rag_err) = e.downcast_ref::<RagError>() {
        match rag_err {
            RagError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            RagError::UnsupportedFormat(_) | RagError::EmptyDocument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", e);
    }

    (status, Json(ErrorBody { error: e.to_string() })).into_response()
}

pub async fn start_http_server(
    http_port: u16,
    agent: Arc<Mutex<PharmAgent>>,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app_state = AppState {
        agent,
        args: args.clone(),
    };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/conversations",
            post(create_conversation_handler).get(list_conversations_handler)
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation_handler)
                .patch(rename_conversation_handler)
                .delete(delete_conversation_handler)
        )
        .route("/api/conversations/{id}/messages", post(send_message_handler))
        .route(
            "/api/conversations/{id}/documents",
            post(upload_document_handler).get(list_documents_handler)
        )
        .route("/api/conversations/{id}/documents/{doc_id}", delete(delete_document_handler))
        .route("/api/reload-prompts", get(reload_prompts_handler))
        .layer(cors)
        .with_state(app_state);

    if args.enable_tls && args.tls_cert_path.is_some() && args.tls_key_path.is_some() {
        let cert_path = args.tls_cert_path.clone().unwrap_or_default();
        let key_path = args.tls_key_path.clone().unwrap_or_default();

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service()).await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });

        info!("HTTPS server started with TLS enabled");
    } else {
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                        error!("HTTP server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
                }
            }
        });

        info!("HTTP server started");
    }

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_conversation_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>
) -> impl IntoResponse {
    let agent = state.agent.lock().await;
    match agent.create_conversation(&req.user_id, req.title).await {
        Ok(conversation) => (StatusCode::CREATED, Json(conversation)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_conversations_handler(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>
) -> impl IntoResponse {
    let agent = state.agent.lock().await;
    match agent.list_conversations(&query.user_id).await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ConversationQuery>
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100);
    let agent = state.agent.lock().await;
    match agent.get_conversation(&query.user_id, &conversation_id, limit).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => error_response(e),
    }
}

async fn send_message_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<SendMessageRequest>
) -> impl IntoResponse {
    if req.content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { error: "message content is empty".to_string() }),
        ).into_response();
    }

    let agent = state.agent.lock().await;
    match agent.process_message(&req.user_id, &conversation_id, &req.content).await {
        Ok(reply) =>
            Json(SendMessageResponse {
                conversation_id,
                reply,
            }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn rename_conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<RenameConversationRequest>
) -> impl IntoResponse {
    if req.title.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { error: "title is empty".to_string() }),
        ).into_response();
    }

    let agent = state.agent.lock().await;
    match agent.rename_conversation(&req.user_id, &conversation_id, req.title.trim()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<UserQuery>
) -> impl IntoResponse {
    let agent = state.agent.lock().await;
    match agent.delete_conversation(&query.user_id, &conversation_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn upload_document_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<UploadDocumentRequest>
) -> impl IntoResponse {
    let data = match BASE64.decode(req.data.as_bytes()) {
        Ok(data) => data,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody { error: format!("invalid base64 payload: {}", e) }),
            ).into_response();
        }
    };

    if data.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody { error: "uploaded file is empty".to_string() }),
        ).into_response();
    }

    if data.len() > state.args.max_upload_bytes {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorBody {
                error: format!(
                    "upload of {} bytes exceeds limit of {} bytes",
                    data.len(),
                    state.args.max_upload_bytes
                ),
            }),
        ).into_response();
    }

    let agent = state.agent.lock().await;
    match agent.ingest_document(&req.user_id, &conversation_id, &req.file_name, data).await {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_documents_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<UserQuery>
) -> impl IntoResponse {
    let agent = state.agent.lock().await;
    match agent.list_documents(&query.user_id, &conversation_id).await {
        Ok(documents) => Json(documents).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_document_handler(
    State(state): State<AppState>,
    Path((conversation_id, document_id)): Path<(String, String)>,
    Query(query): Query<UserQuery>
) -> impl IntoResponse {
    let agent = state.agent.lock().await;
    match agent.delete_document(&query.user_id, &conversation_id, &document_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn reload_prompts_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut agent = match state.agent.try_lock() {
        Ok(g) => g,
        Err(_) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReloadResponse {
                    success: false,
                    message: "Agent busy".into(),
                }),
            ).into_response();
        }
    };

    match agent.reload_prompts_if_changed(&state.args).await {
        Ok(true) =>
            Json(ReloadResponse {
                success: true,
                message: "Prompts reloaded".into(),
            }).into_response(),
        Ok(false) =>
            Json(ReloadResponse {
                success: true,
                message: "Prompts unchanged".into(),
            }).into_response(),
        Err(e) =>
            (
                StatusCode::BAD_REQUEST,
                Json(ReloadResponse {
                    success: false,
                    message: format!("Reload error: {}", e),
                }),
            ).into_response(),
    }
}

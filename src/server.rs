//! HTTP API：聊天（同步 / SSE 流式）、会话查询与删除、健康检查
//!
//! 流式端点把回合跑在独立任务里，事件经 unbounded channel 转为 SSE 帧；
//! 客户端中途断开只会停止转发，回合本身照常跑完并提交历史。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::conversation::{ConversationStore, Role};
use crate::error::OrchestratorError;
use crate::kernel::KernelProvisioner;
use crate::orchestrator::{TurnEvent, TurnOrchestrator};

/// 路由共享状态
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub conversations: Arc<ConversationStore>,
    pub provisioner: Arc<KernelProvisioner>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageView {
    pub role: String,
    pub content: String,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct ConversationHistoryView {
    pub conversation_id: String,
    pub messages: Vec<ChatMessageView>,
}

fn now_unix() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// 请求未带 conversation_id 时由服务端生成
fn fresh_conversation_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("conv-{}", &hex[..12])
}

fn error_status(e: &OrchestratorError) -> StatusCode {
    match e {
        OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/conversations", get(api_conversations_list))
        .route(
            "/api/conversations/:id",
            get(api_conversation_get).delete(api_conversation_delete),
        )
        .route("/api/health", get(api_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// POST /api/chat：同步回合，返回最终回复
async fn api_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }

    let conv_id = req
        .conversation_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(fresh_conversation_id);

    let response = state
        .orchestrator
        .chat_sync(&conv_id, message)
        .await
        .map_err(|e| (error_status(&e), e.to_string()))?;

    Ok(Json(ChatResponse {
        response,
        conversation_id: conv_id,
        timestamp: now_unix(),
    }))
}

/// POST /api/chat/stream：SSE 事件流，首个事件为 conversation_id，结尾为 complete 或 error
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>>>, (StatusCode, String)>
{
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }

    let conv_id = req
        .conversation_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(fresh_conversation_id);

    let (tx, rx) = mpsc::unbounded_channel::<TurnEvent>();
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.chat_stream(&conv_id, &message, &tx).await;
    });

    let event_stream = stream::unfold(rx, |mut rx| async move {
        let ev = rx.recv().await?;
        let data = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string());
        Some((Ok(Event::default().data(data)), rx))
    });

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// GET /api/conversations/:id：会话历史（仅 user / assistant 消息），不存在返回 404
async fn api_conversation_get(
    State(state): State<Arc<AppState>>,
    Path(conv_id): Path<String>,
) -> Result<Json<ConversationHistoryView>, (StatusCode, String)> {
    let messages = state
        .conversations
        .history(&conv_id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Conversation not found".to_string()))?;

    let now = now_unix();
    let messages = messages
        .into_iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| ChatMessageView {
            role: match m.role {
                Role::User => "user".to_string(),
                _ => "assistant".to_string(),
            },
            content: m.content.unwrap_or_default(),
            timestamp: now,
        })
        .collect();

    Ok(Json(ConversationHistoryView {
        conversation_id: conv_id,
        messages,
    }))
}

/// GET /api/conversations：所有会话 id
async fn api_conversations_list(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let ids = state.conversations.list().await;
    Json(serde_json::json!({ "conversations": ids }))
}

/// DELETE /api/conversations/:id：删除会话并回收其内核（幂等）
async fn api_conversation_delete(
    State(state): State<Arc<AppState>>,
    Path(conv_id): Path<String>,
) -> Json<serde_json::Value> {
    state.conversations.delete(&conv_id).await;
    state.provisioner.cleanup(&conv_id).await;
    Json(serde_json::json!({ "message": "Conversation deleted" }))
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "timestamp": now_unix() }))
}

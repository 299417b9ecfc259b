//! 回合编排：一次用户消息到最终回复的完整驱动
//!
//! 同步路径：调模型（带工具定义）→ 若有工具调用则逐个分发并追加 tool 消息 →
//! 再调一次模型（不带工具）→ 整体提交历史。
//!
//! 流式路径：同一逻辑的事件化版本。事件顺序固定：conversation_id 先行，
//! content 与工具生命周期事件交错，最后恰好一个 complete 或 error。
//! 工具调用片段按 index 增量拼装；任何致命错误只在顶层捕获一次并以 error 事件收尾，
//! 此时不提交任何历史（轮前状态仍然有效）。

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::conversation::{ConversationStore, Message, ToolCallData};
use crate::error::OrchestratorError;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

/// tool_result 事件里结果预览的最大字符数（仅展示层截断，内部始终用全文）
pub const TOOL_RESULT_PREVIEW_CHARS: usize = 200;

/// 流式回合事件（序列化为 JSON 供 SSE 推送）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    ConversationId { conversation_id: String },
    Content { content: String },
    /// 某个 index 的工具名首次确定
    ToolStart { tool_name: String },
    ToolsExecuting,
    ToolExecuting { tool_name: String },
    ToolResult { tool_name: String, result: String },
    FinalResponseStart,
    Complete,
    Error { error: String },
}

/// 流式拼装中的工具调用：index 是稳定键，id / name / arguments 分片到达
#[derive(Debug, Clone, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallBuilder {
    /// id 就位后才可执行（name 与参数此时也已完整）
    fn into_call(self) -> Option<ToolCallData> {
        self.id.map(|id| ToolCallData {
            id,
            name: self.name,
            arguments: self.arguments,
        })
    }
}

/// 超长工具结果的展示截断（200 字符 + 省略号标记）
fn truncate_result(result: &str) -> String {
    if result.chars().count() > TOOL_RESULT_PREVIEW_CHARS {
        result.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect::<String>() + "..."
    } else {
        result.to_string()
    }
}

/// 工具参数原文 -> JSON；空串按空对象处理，解析失败视为模型响应畸形（对本轮致命）
fn parse_arguments(raw: &str) -> Result<serde_json::Value, OrchestratorError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| OrchestratorError::Llm(format!("invalid tool arguments: {}", e)))
}

/// 回合编排器：持有 LLM 客户端、工具注册表与会话存储
pub struct TurnOrchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    conversations: Arc<ConversationStore>,
}

impl TurnOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        conversations: Arc<ConversationStore>,
    ) -> Self {
        Self {
            llm,
            tools,
            conversations,
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    /// 同步回合：返回最终回复文本
    pub async fn chat_sync(
        &self,
        conv_id: &str,
        user_message: &str,
    ) -> Result<String, OrchestratorError> {
        let mut messages = self.conversations.get_or_seed(conv_id).await;
        messages.push(Message::user(user_message));

        let defs = self.tools.definitions();
        let reply = self
            .llm
            .complete(&messages, Some(&defs))
            .await
            .map_err(OrchestratorError::Llm)?;

        if reply.tool_calls.is_empty() {
            let content = reply.content.unwrap_or_default();
            messages.push(Message::assistant(Some(content.clone()), Vec::new()));
            self.conversations.save(conv_id, messages).await;
            return Ok(content);
        }

        messages.push(Message::assistant(
            reply.content.clone(),
            reply.tool_calls.clone(),
        ));

        for call in &reply.tool_calls {
            let args = parse_arguments(&call.arguments)?;
            let result = self.tools.dispatch(&call.name, args, conv_id).await;
            messages.push(Message::tool(call.id.clone(), result));
        }

        // 第二次调用不再提供工具：这一轮要的是自然语言收尾
        let final_reply = self
            .llm
            .complete(&messages, None)
            .await
            .map_err(OrchestratorError::Llm)?;
        let content = final_reply.content.unwrap_or_default();
        messages.push(Message::assistant(Some(content.clone()), Vec::new()));
        self.conversations.save(conv_id, messages).await;
        Ok(content)
    }

    /// 流式回合：事件经 tx 推送；接收端断开不影响回合跑完并提交
    pub async fn chat_stream(
        &self,
        conv_id: &str,
        user_message: &str,
        tx: &mpsc::UnboundedSender<TurnEvent>,
    ) {
        let _ = tx.send(TurnEvent::ConversationId {
            conversation_id: conv_id.to_string(),
        });

        match self.stream_turn(conv_id, user_message, tx).await {
            Ok(()) => {
                let _ = tx.send(TurnEvent::Complete);
            }
            Err(e) => {
                tracing::error!(conv_id = %conv_id, "streaming turn failed: {}", e);
                let _ = tx.send(TurnEvent::Error {
                    error: e.to_string(),
                });
            }
        }
    }

    async fn stream_turn(
        &self,
        conv_id: &str,
        user_message: &str,
        tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> Result<(), OrchestratorError> {
        let mut messages = self.conversations.get_or_seed(conv_id).await;
        messages.push(Message::user(user_message));

        let defs = self.tools.definitions();
        let mut stream = self
            .llm
            .complete_stream(&messages, Some(&defs))
            .await
            .map_err(OrchestratorError::Llm)?;

        let mut accumulated = String::new();
        let mut builders: Vec<ToolCallBuilder> = Vec::new();

        while let Some(delta) = stream.next().await {
            let delta = delta.map_err(OrchestratorError::Llm)?;

            if let Some(content) = delta.content {
                if !content.is_empty() {
                    accumulated.push_str(&content);
                    let _ = tx.send(TurnEvent::Content { content });
                }
            }

            for frag in delta.tool_calls {
                while builders.len() <= frag.index {
                    builders.push(ToolCallBuilder::default());
                }
                let builder = &mut builders[frag.index];

                if let Some(id) = frag.id {
                    builder.id = Some(id);
                }
                if let Some(name) = frag.name {
                    // tool_start 只在该 index 的名字首次确定时发一次
                    if builder.name.is_empty() && !name.is_empty() {
                        builder.name = name;
                        let _ = tx.send(TurnEvent::ToolStart {
                            tool_name: builder.name.clone(),
                        });
                    }
                }
                if let Some(arguments) = frag.arguments {
                    builder.arguments.push_str(&arguments);
                }
            }
        }
        drop(stream);

        let calls: Vec<ToolCallData> = builders
            .into_iter()
            .filter_map(ToolCallBuilder::into_call)
            .collect();

        if calls.is_empty() {
            messages.push(Message::assistant(Some(accumulated), Vec::new()));
            self.conversations.save(conv_id, messages).await;
            return Ok(());
        }

        let _ = tx.send(TurnEvent::ToolsExecuting);
        messages.push(Message::assistant(Some(accumulated), calls.clone()));

        // 按 index 顺序串行执行：每个结果先进历史，下一条 tool 消息才成立
        for call in &calls {
            let _ = tx.send(TurnEvent::ToolExecuting {
                tool_name: call.name.clone(),
            });
            let args = parse_arguments(&call.arguments)?;
            let result = self.tools.dispatch(&call.name, args, conv_id).await;
            messages.push(Message::tool(call.id.clone(), result.clone()));
            let _ = tx.send(TurnEvent::ToolResult {
                tool_name: call.name.clone(),
                result: truncate_result(&result),
            });
        }

        let _ = tx.send(TurnEvent::FinalResponseStart);
        let mut final_stream = self
            .llm
            .complete_stream(&messages, None)
            .await
            .map_err(OrchestratorError::Llm)?;

        let mut final_content = String::new();
        while let Some(delta) = final_stream.next().await {
            let delta = delta.map_err(OrchestratorError::Llm)?;
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    final_content.push_str(&content);
                    let _ = tx.send(TurnEvent::Content { content });
                }
            }
        }

        messages.push(Message::assistant(Some(final_content), Vec::new()));
        self.conversations.save(conv_id, messages).await;
        Ok(())
    }
}
